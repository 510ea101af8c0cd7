use serde::{Deserialize, Serialize};

/// Lifecycle of a single stream connection.
///
/// `Connecting -> Streaming -> Disconnected -> Reconnecting -> Connecting ... -> Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Disconnected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// Stopped by the shared cancellation signal
    Cancelled,
    /// Gave up after too many consecutive failures
    Failed,
    /// Did not close within the shutdown grace period and was aborted
    Abandoned,
}

impl FinalStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, FinalStatus::Failed | FinalStatus::Abandoned)
    }
}
