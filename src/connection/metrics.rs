use super::state::{ConnectionState, FinalStatus};
use super::target::ConnectionTarget;
use crate::error::{ErrorKind, StreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Oldest entries are dropped beyond this many
pub const MAX_ERROR_HISTORY: usize = 20;

/// One failure in a connection's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counters and state of one connection, published as an immutable snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub connection_id: String,
    pub camera_id: String,
    pub connection_number: u32,
    pub state: ConnectionState,
    /// Complete frames parsed
    pub frames: u64,
    /// Payload bytes of complete frames
    pub frame_bytes: u64,
    /// Raw bytes read from the network, headers and boundaries included
    pub bytes_received: u64,
    pub started_at: DateTime<Utc>,
    /// Most recent successful connect
    pub connected_at: Option<DateTime<Utc>>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub reconnections: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
    /// Most recent failures, newest last
    pub errors: Vec<ErrorRecord>,
    /// Frames per second over the measurement window, set when the report is built
    #[serde(default)]
    pub avg_fps: f64,
    pub final_status: Option<FinalStatus>,
}

impl ConnectionMetrics {
    pub fn new(target: &ConnectionTarget) -> Self {
        Self {
            connection_id: target.connection_id(),
            camera_id: target.camera_id.clone(),
            connection_number: target.connection_number,
            state: ConnectionState::Connecting,
            frames: 0,
            frame_bytes: 0,
            bytes_received: 0,
            started_at: Utc::now(),
            connected_at: None,
            last_frame_at: None,
            reconnections: 0,
            consecutive_failures: 0,
            last_error: None,
            last_error_message: None,
            errors: Vec::new(),
            avg_fps: 0.0,
            final_status: None,
        }
    }

    /// Count a failed session and keep it in the bounded error history
    pub fn record_error(&mut self, error: &StreamError) {
        let message = error.to_string();
        self.reconnections += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.kind());
        self.last_error_message = Some(message.clone());

        if self.errors.len() == MAX_ERROR_HISTORY {
            self.errors.remove(0);
        }
        self.errors.push(ErrorRecord {
            at: Utc::now(),
            kind: error.kind(),
            message,
        });
    }

    /// Received at least one complete frame at some point
    pub fn ever_successful(&self) -> bool {
        self.frames > 0
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Streaming
    }

    pub fn is_failed(&self) -> bool {
        self.final_status.map(|s| s.is_failure()).unwrap_or(false)
    }

    /// Average frames per second since the connection task started
    pub fn average_fps(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            self.frames as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Read-only view of a connection's latest metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    receiver: watch::Receiver<ConnectionMetrics>,
}

impl MetricsHandle {
    /// Create the publishing side for a connection and the matching handle
    pub fn channel(target: &ConnectionTarget) -> (watch::Sender<ConnectionMetrics>, Self) {
        let (sender, receiver) = watch::channel(ConnectionMetrics::new(target));
        (sender, Self { receiver })
    }

    /// Consistent copy of the latest published metrics
    pub fn snapshot(&self) -> ConnectionMetrics {
        self.receiver.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.receiver.borrow().state
    }

    pub fn frames(&self) -> u64 {
        self.receiver.borrow().frames
    }

    /// Wait until the connection publishes the given state
    pub async fn wait_for_state(&mut self, state: ConnectionState) -> bool {
        self.receiver.wait_for(|m| m.state == state).await.is_ok()
    }
}
