//! Error types surfaced to callers of [`crate::Driver`].
//!
//! Steady-state failures (transport hiccups, malformed frames, spool I/O)
//! never reach this module's types — they're logged and handled locally by
//! the component that hit them, per the driver's at-least-once delivery
//! contract.

use std::path::PathBuf;

use snafu::Snafu;

/// Failure to parse or validate the `info.config` mapping passed to
/// `StartLogging`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("missing required option \"logstash-url\""))]
    MissingLogstashUrl,

    #[snafu(display("invalid \"logstash-url\": {source}"))]
    InvalidUrl { source: url::ParseError },

    #[snafu(display("unsupported logstash-url scheme \"{scheme}\", expected tcp or udp"))]
    UnsupportedScheme { scheme: String },

    #[snafu(display("logstash-url is missing a host"))]
    MissingHost,

    #[snafu(display("logstash-url is missing a port"))]
    MissingPort,

    #[snafu(display("invalid \"logstash-timeout\": {source}"))]
    InvalidTimeout { source: humantime::DurationError },

    #[snafu(display("unknown option \"{key}\""))]
    UnknownOption { key: String },
}

/// Failure to start logging for a container.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StartError {
    #[snafu(display("a stream is already registered for {}", pipe_path.display()))]
    AlreadyExists { pipe_path: PathBuf },

    #[snafu(display("invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("failed to open fifo {}: {source}", pipe_path.display()))]
    FifoOpen {
        pipe_path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to open spool file {}: {source}", spool_path.display()))]
    SpoolOpen {
        spool_path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "sink endpoint already in use by another stream with a different configuration"
    ))]
    ConfigConflict,
}

/// Failure to stop logging for a container.
///
/// `StopLogging` is specified to be idempotent and infallible for the
/// documented cases (unknown pipe, known pipe); this type exists so the
/// public API has room to report filesystem errors encountered while
/// closing descriptors, without that ever being exercised in practice.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StopError {
    #[snafu(display("failed to close spool file: {source}"))]
    SpoolClose { source: std::io::Error },
}
