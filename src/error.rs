use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamloadError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Inventory error from {source_name}: {message}")]
    Inventory {
        source_name: String,
        message: String,
    },

    #[error("System error: {message}")]
    System { message: String },
}

impl CamloadError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn inventory<S: Into<String>>(source_name: S, message: S) -> Self {
        Self::Inventory {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Failures that make a test run impossible to start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("no active cameras returned by inventory")]
    NoActiveCameras,

    #[error("no connection targets to launch")]
    NoTargets,

    #[error("connections per camera must be greater than 0")]
    ZeroConnections,
}

/// Malformed or hostile multipart content
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("part of {size} bytes exceeds limit of {limit} bytes")]
    PartTooLarge { size: usize, limit: usize },

    #[error("malformed boundary: {details}")]
    MalformedBoundary { details: String },

    #[error("malformed part headers: {details}")]
    MalformedHeaders { details: String },

    #[error("part header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
}

/// Errors local to a single stream connection. These drive the reconnect
/// state machine and never abort the run.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("connect to {url} failed: {details}")]
    Connect { url: String, details: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no frame received within {timeout:?}")]
    ReadTimeout { timeout: Duration },

    #[error("read failed: {details}")]
    Read { details: String },

    #[error("stream ended by server")]
    StreamEnded,
}

impl StreamError {
    pub fn connect<S: Into<String>>(url: S, details: S) -> Self {
        Self::Connect {
            url: url.into(),
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Connect { .. } => ErrorKind::Connect,
            StreamError::Protocol(_) => ErrorKind::Protocol,
            StreamError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            StreamError::Read { .. } => ErrorKind::ConnectionReset,
            StreamError::StreamEnded => ErrorKind::StreamEnded,
        }
    }
}

/// Serializable error classification kept in connection metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Protocol,
    ReadTimeout,
    ConnectionReset,
    StreamEnded,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, CamloadError>;
