//! Core data types shared across the pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which stream a log line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Stdout,
    Stderr,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Stdout => "stdout",
            Source::Stderr => "stderr",
        }
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        match value {
            "stderr" => Source::Stderr,
            _ => Source::Stdout,
        }
    }
}

/// Descriptor of the container a stream belongs to, supplied once at
/// `StartLogging` and immutable thereafter.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image_name: String,
    pub created: DateTime<Utc>,
    pub log_path: Option<String>,
    pub config: HashMap<String, String>,
}

/// The JSON object emitted to the sink for one record.
///
/// Field order matches the wire contract exactly: callers on the other end
/// of the sink connection depend on it.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub source: &'static str,
    pub message: String,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "containerName")]
    pub container_name: String,
    #[serde(rename = "containerImageName")]
    pub container_image_name: String,
    #[serde(rename = "containerCreated")]
    pub container_created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Supported sink transport schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Udp,
}

/// Identifies a remote sink endpoint, used as the dedup key for the
/// process-wide [`crate::sink::SinkRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub timeout: std::time::Duration,
}
