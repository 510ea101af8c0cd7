use super::source::{ByteStream, StreamSource};
use super::target::ConnectionTarget;
use crate::error::StreamError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Scripted behavior of a mock camera endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Connects and delivers one frame per interval forever
    Healthy {
        frame_interval: Duration,
        frame_size: usize,
    },
    /// Every connect attempt is refused
    RefuseConnect,
    /// The first `failures` connects are refused, then the stream is healthy
    FailFirst {
        failures: u32,
        frame_interval: Duration,
        frame_size: usize,
    },
    /// Each session ends after `frames` frames
    DropAfter {
        frames: u64,
        frame_interval: Duration,
        frame_size: usize,
    },
    /// Connects but never sends a byte
    Stall,
    /// Connects and sends a malformed part
    Malformed,
    /// Connect never completes
    Hang,
}

impl MockBehavior {
    pub fn healthy() -> Self {
        MockBehavior::Healthy {
            frame_interval: Duration::from_millis(100),
            frame_size: 2048,
        }
    }
}

/// In-process stream source for tests and dry runs.
///
/// Behaviors are keyed by stream URL; unknown URLs use the default behavior.
pub struct MockStreamSource {
    default: MockBehavior,
    behaviors: HashMap<String, MockBehavior>,
    attempts: Mutex<HashMap<String, u32>>,
    open_times: Mutex<Vec<Instant>>,
}

impl MockStreamSource {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            default,
            behaviors: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            open_times: Mutex::new(Vec::new()),
        }
    }

    /// Override the behavior for one stream URL
    pub fn with_behavior<S: Into<String>>(mut self, url: S, behavior: MockBehavior) -> Self {
        self.behaviors.insert(url.into(), behavior);
        self
    }

    /// Connect attempts made against a URL so far
    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts
            .lock()
            .map(|attempts| attempts.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Time at which every connect attempt started
    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times
            .lock()
            .map(|times| times.clone())
            .unwrap_or_default()
    }

    fn record_attempt(&self, url: &str) -> u32 {
        if let Ok(mut times) = self.open_times.lock() {
            times.push(Instant::now());
        }
        match self.attempts.lock() {
            Ok(mut attempts) => {
                let count = attempts.entry(url.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl StreamSource for MockStreamSource {
    async fn open(&self, target: &ConnectionTarget) -> Result<Box<dyn ByteStream>, StreamError> {
        let attempt = self.record_attempt(&target.stream_url);
        let behavior = self
            .behaviors
            .get(&target.stream_url)
            .unwrap_or(&self.default)
            .clone();

        trace!("{}: mock open attempt {} ({:?})", target, attempt, behavior);

        let refused = || {
            Err(StreamError::connect(
                target.stream_url.clone(),
                "connection refused".to_string(),
            ))
        };

        match behavior {
            MockBehavior::Healthy {
                frame_interval,
                frame_size,
            } => Ok(Box::new(MockByteStream::frames(frame_interval, frame_size, None))),
            MockBehavior::RefuseConnect => refused(),
            MockBehavior::FailFirst {
                failures,
                frame_interval,
                frame_size,
            } => {
                if attempt <= failures {
                    refused()
                } else {
                    Ok(Box::new(MockByteStream::frames(frame_interval, frame_size, None)))
                }
            }
            MockBehavior::DropAfter {
                frames,
                frame_interval,
                frame_size,
            } => Ok(Box::new(MockByteStream::frames(
                frame_interval,
                frame_size,
                Some(frames),
            ))),
            MockBehavior::Stall => Ok(Box::new(MockByteStream::stalled())),
            MockBehavior::Malformed => Ok(Box::new(MockByteStream::malformed())),
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                refused()
            }
        }
    }
}

enum Script {
    Frames {
        interval: Duration,
        remaining: Option<u64>,
    },
    Stall,
    Malformed { sent: bool },
}

struct MockByteStream {
    part: Bytes,
    script: Script,
}

impl MockByteStream {
    fn frames(interval: Duration, frame_size: usize, limit: Option<u64>) -> Self {
        Self {
            part: encode_part(frame_size),
            script: Script::Frames {
                interval,
                remaining: limit,
            },
        }
    }

    fn stalled() -> Self {
        Self {
            part: Bytes::new(),
            script: Script::Stall,
        }
    }

    fn malformed() -> Self {
        Self {
            part: Bytes::from_static(b"--frame\r\nnot a header line\r\n\r\n\xff\xd8\xff\xd9\r\n"),
            script: Script::Malformed { sent: false },
        }
    }
}

#[async_trait]
impl ByteStream for MockByteStream {
    fn boundary(&self) -> Option<&str> {
        Some("frame")
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        match &mut self.script {
            Script::Frames {
                interval,
                remaining,
            } => {
                if let Some(left) = remaining {
                    if *left == 0 {
                        return Ok(None);
                    }
                    *left -= 1;
                }
                sleep(*interval).await;
                Ok(Some(self.part.clone()))
            }
            Script::Stall => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            Script::Malformed { sent } => {
                if *sent {
                    std::future::pending::<()>().await;
                }
                *sent = true;
                Ok(Some(self.part.clone()))
            }
        }
    }
}

/// One multipart part in the layout IP cameras commonly emit
fn encode_part(frame_size: usize) -> Bytes {
    let size = frame_size.max(4);
    let mut payload = vec![0u8; size];
    payload[0] = 0xFF;
    payload[1] = 0xD8;
    payload[size - 2] = 0xFF;
    payload[size - 1] = 0xD9;

    let mut part = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        size
    )
    .into_bytes();
    part.extend_from_slice(&payload);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
