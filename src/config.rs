//! Parses and validates the `info.config` mapping supplied at `StartLogging`.

use std::time::Duration;

use snafu::{ensure, ResultExt};

use crate::error::{
    ConfigError, InvalidTimeoutSnafu, InvalidUrlSnafu, MissingLogstashUrlSnafu, UnknownOptionSnafu,
    UnsupportedSchemeSnafu,
};
use crate::model::{Scheme, SinkEndpoint};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const KEY_LOGSTASH_URL: &str = "logstash-url";
const KEY_LOGSTASH_TIMEOUT: &str = "logstash-timeout";

/// Parses the driver-specific options out of `info.config`, rejecting
/// unknown keys.
pub fn parse_sink_endpoint(
    config: &std::collections::HashMap<String, String>,
) -> Result<SinkEndpoint, ConfigError> {
    for key in config.keys() {
        ensure!(
            key == KEY_LOGSTASH_URL || key == KEY_LOGSTASH_TIMEOUT,
            UnknownOptionSnafu { key }
        );
    }

    let raw_url = config
        .get(KEY_LOGSTASH_URL)
        .ok_or(ConfigError::MissingLogstashUrl)?;
    if raw_url.is_empty() {
        return MissingLogstashUrlSnafu.fail();
    }

    let url = url::Url::parse(raw_url).context(InvalidUrlSnafu)?;
    let scheme = match url.scheme() {
        "tcp" => Scheme::Tcp,
        "udp" => Scheme::Udp,
        other => {
            return UnsupportedSchemeSnafu {
                scheme: other.to_string(),
            }
            .fail()
        }
    };
    let host = url
        .host_str()
        .ok_or(ConfigError::MissingHost)?
        .to_string();
    let port = url.port().ok_or(ConfigError::MissingPort)?;

    let timeout = match config.get(KEY_LOGSTASH_TIMEOUT) {
        Some(raw) => humantime::parse_duration(raw).context(InvalidTimeoutSnafu)?,
        None => DEFAULT_TIMEOUT,
    };

    Ok(SinkEndpoint {
        scheme,
        host,
        port,
        timeout,
    })
}
