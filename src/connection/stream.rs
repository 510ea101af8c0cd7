use super::backoff::BackoffPolicy;
use super::metrics::{ConnectionMetrics, MetricsHandle};
use super::source::{ByteStream, StreamSource};
use super::state::{ConnectionState, FinalStatus};
use super::target::ConnectionTarget;
use crate::config::{BackoffConfig, ConnectionConfig};
use crate::error::StreamError;
use crate::parser::{MultipartParser, ParserLimits};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Per-connection tunables shared by every connection of a run
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    /// Longest gap allowed between complete frames while streaming
    pub read_timeout: Duration,
    pub max_consecutive_failures: u32,
    /// Boundary assumed when the server does not announce one
    pub boundary: String,
    pub limits: ParserLimits,
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default(), &BackoffConfig::default())
    }
}

impl ConnectionSettings {
    pub fn from_config(connection: &ConnectionConfig, backoff: &BackoffConfig) -> Self {
        Self {
            connect_timeout: connection.connect_timeout(),
            read_timeout: connection.read_timeout(),
            max_consecutive_failures: connection.max_consecutive_failures,
            boundary: connection.boundary.clone(),
            limits: ParserLimits {
                max_part_size: connection.max_part_size,
                max_header_size: connection.max_header_size,
            },
            backoff: BackoffPolicy::from(backoff),
        }
    }
}

enum SessionEnd {
    Cancelled,
    Failed(StreamError),
}

/// One long-lived camera stream with its own reconnect loop.
///
/// The task owns its metrics and publishes every change through a watch
/// channel; readers only ever see whole snapshots.
pub struct StreamConnection {
    target: ConnectionTarget,
    source: Arc<dyn StreamSource>,
    settings: Arc<ConnectionSettings>,
    connect_gate: Arc<Semaphore>,
    cancel: CancellationToken,
    metrics: watch::Sender<ConnectionMetrics>,
}

impl StreamConnection {
    pub fn new(
        target: ConnectionTarget,
        source: Arc<dyn StreamSource>,
        settings: Arc<ConnectionSettings>,
        connect_gate: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> (Self, MetricsHandle) {
        let (metrics, handle) = MetricsHandle::channel(&target);
        let connection = Self {
            target,
            source,
            settings,
            connect_gate,
            cancel,
            metrics,
        };
        (connection, handle)
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Drive the connection until it is cancelled or gives up, returning the
    /// final metrics. The state is always `Closed` on return.
    pub async fn run(self) -> ConnectionMetrics {
        debug!("{}: starting stream to {}", self.target, self.target.stream_url);

        loop {
            if self.cancel.is_cancelled() {
                return self.close(FinalStatus::Cancelled);
            }

            self.transition(ConnectionState::Connecting);

            let end = match self.connect().await {
                Ok(Some(stream)) => self.stream_frames(stream).await,
                Ok(None) => SessionEnd::Cancelled,
                Err(e) => SessionEnd::Failed(e),
            };

            let error = match end {
                SessionEnd::Cancelled => return self.close(FinalStatus::Cancelled),
                SessionEnd::Failed(error) => error,
            };

            let failures = self.record_failure(&error);
            if failures >= self.settings.max_consecutive_failures {
                warn!(
                    "{}: giving up after {} consecutive failures (last: {})",
                    self.target, failures, error
                );
                return self.close(FinalStatus::Failed);
            }

            self.transition(ConnectionState::Reconnecting);
            let delay = self.settings.backoff.next_delay(failures.saturating_sub(1));
            debug!(
                "{}: reconnecting in {:?} (attempt #{})",
                self.target,
                delay,
                failures + 1
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.close(FinalStatus::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Open the stream while holding a connect-gate permit.
    ///
    /// Returns `Ok(None)` if cancelled first.
    async fn connect(&self) -> Result<Option<Box<dyn ByteStream>>, StreamError> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            permit = self.connect_gate.acquire() => permit.map_err(|_| {
                StreamError::connect(self.target.stream_url.clone(), "connect gate closed".to_string())
            })?,
        };

        trace!("{}: connecting", self.target);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            opened = timeout(self.settings.connect_timeout, self.source.open(&self.target)) => match opened {
                Ok(Ok(stream)) => Ok(Some(stream)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(StreamError::connect(
                    self.target.stream_url.clone(),
                    format!("timed out after {:?}", self.settings.connect_timeout),
                )),
            },
        }
    }

    /// Read and parse until the session ends
    async fn stream_frames(&self, mut stream: Box<dyn ByteStream>) -> SessionEnd {
        let boundary = stream
            .boundary()
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.boundary.clone());
        let mut parser = MultipartParser::new(&boundary, self.settings.limits);

        self.metrics.send_modify(|m| {
            m.state = ConnectionState::Streaming;
            m.connected_at = Some(Utc::now());
        });
        info!("{}: streaming (boundary {:?})", self.target, boundary);

        let read_timeout = self.settings.read_timeout;
        let mut deadline = Instant::now() + read_timeout;
        let mut session_frames = 0u64;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                read = timeout_at(deadline, stream.next_chunk()) => read,
            };

            let chunk = match read {
                Err(_) => {
                    return SessionEnd::Failed(StreamError::ReadTimeout {
                        timeout: read_timeout,
                    })
                }
                Ok(Err(e)) => return SessionEnd::Failed(e),
                Ok(Ok(None)) => return SessionEnd::Failed(StreamError::StreamEnded),
                Ok(Ok(Some(chunk))) => chunk,
            };

            parser.push(&chunk);

            let mut frames = 0u64;
            let mut frame_bytes = 0u64;
            let protocol_error = loop {
                match parser.next_frame() {
                    Ok(Some(frame)) => {
                        frames += 1;
                        frame_bytes += frame.length as u64;
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                }
            };

            let now = Utc::now();
            self.metrics.send_modify(|m| {
                m.bytes_received += chunk.len() as u64;
                if frames > 0 {
                    m.frames += frames;
                    m.frame_bytes += frame_bytes;
                    m.last_frame_at = Some(now);
                    m.consecutive_failures = 0;
                }
            });

            if frames > 0 {
                if session_frames == 0 {
                    debug!("{}: first frame received", self.target);
                }
                session_frames += frames;
                deadline = Instant::now() + read_timeout;
            }

            if let Some(e) = protocol_error {
                return SessionEnd::Failed(e.into());
            }
            if parser.is_finished() {
                return SessionEnd::Failed(StreamError::StreamEnded);
            }
        }
    }

    fn transition(&self, state: ConnectionState) {
        self.metrics.send_modify(|m| m.state = state);
        trace!("{}: -> {:?}", self.target, state);
    }

    fn record_failure(&self, error: &StreamError) -> u32 {
        let mut failures = 0;
        self.metrics.send_modify(|m| {
            m.state = ConnectionState::Disconnected;
            m.record_error(error);
            failures = m.consecutive_failures;
        });

        warn!(
            "{}: {} (failure {}/{})",
            self.target, error, failures, self.settings.max_consecutive_failures
        );
        failures
    }

    fn close(&self, status: FinalStatus) -> ConnectionMetrics {
        self.metrics.send_modify(|m| {
            m.state = ConnectionState::Closed;
            m.final_status = Some(status);
        });
        debug!("{}: closed ({:?})", self.target, status);
        self.metrics.borrow().clone()
    }
}
