use crate::connection::FinalStatus;
use crate::error::EventBusError;
use crate::pool::{ProgressSnapshot, StopReason};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events emitted while a load test runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoadTestEvent {
    /// All connection tasks for a run have been launched
    RunStarted {
        run_id: String,
        attempted: usize,
        duration_secs: u64,
    },
    /// Periodic aggregate of the live connections
    Progress(ProgressSnapshot),
    /// A connection reached its terminal state before the run ended
    ConnectionClosed {
        connection_id: String,
        status: FinalStatus,
    },
    /// Measurement window over and all tasks torn down
    RunCompleted {
        run_id: String,
        attempted: usize,
        successful: usize,
        stop_reason: StopReason,
    },
    /// One adaptive search probe finished
    IterationCompleted {
        iteration: usize,
        level: usize,
        stable: bool,
        success_rate: f64,
    },
    /// Operator asked the run to stop
    ShutdownRequested { reason: String },
}

impl LoadTestEvent {
    /// Human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            LoadTestEvent::RunStarted {
                run_id,
                attempted,
                duration_secs,
            } => format!(
                "Run {} started: {} connections for {}s",
                run_id, attempted, duration_secs
            ),
            LoadTestEvent::Progress(progress) => format!(
                "[{:>4}s] streaming {} | connecting {} | reconnecting {} | closed {} | {:.1} fps",
                progress.elapsed_secs,
                progress.streaming,
                progress.connecting,
                progress.reconnecting,
                progress.closed,
                progress.total_fps
            ),
            LoadTestEvent::ConnectionClosed {
                connection_id,
                status,
            } => format!("Connection {} closed ({:?})", connection_id, status),
            LoadTestEvent::RunCompleted {
                run_id,
                attempted,
                successful,
                stop_reason,
            } => format!(
                "Run {} completed ({:?}): {}/{} successful",
                run_id, stop_reason, successful, attempted
            ),
            LoadTestEvent::IterationCompleted {
                iteration,
                level,
                stable,
                success_rate,
            } => format!(
                "Iteration {} at level {}: {} ({:.1}%)",
                iteration,
                level,
                if *stable { "stable" } else { "unstable" },
                success_rate * 100.0
            ),
            LoadTestEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LoadTestEvent::RunStarted { .. } => "run_started",
            LoadTestEvent::Progress(_) => "progress",
            LoadTestEvent::ConnectionClosed { .. } => "connection_closed",
            LoadTestEvent::RunCompleted { .. } => "run_completed",
            LoadTestEvent::IterationCompleted { .. } => "iteration_completed",
            LoadTestEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Broadcast bus for run lifecycle and progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LoadTestEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadTestEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing with nobody listening is not an error and returns 0.
    pub fn publish(&self, event: LoadTestEvent) -> Result<usize, EventBusError> {
        match &event {
            LoadTestEvent::RunStarted { .. }
            | LoadTestEvent::RunCompleted { .. }
            | LoadTestEvent::IterationCompleted { .. } => info!("{}", event.description()),
            LoadTestEvent::ShutdownRequested { reason } => {
                warn!("Shutdown requested: {}", reason)
            }
            _ => debug!("Event: {}", event.description()),
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    pub fn matches(&self, event: &LoadTestEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Named receiver that skips events rejected by its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<LoadTestEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(bus: &EventBus, filter: EventFilter, name: &str) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.to_string(),
        }
    }

    /// Receive the next matching event. Lagging is logged and skipped.
    pub async fn recv(&mut self) -> Result<LoadTestEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn started() -> LoadTestEvent {
        LoadTestEvent::RunStarted {
            run_id: "r1".to_string(),
            attempted: 10,
            duration_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(started()).unwrap(), 1);

        match receiver.recv().await.unwrap() {
            LoadTestEvent::RunStarted { attempted, .. } => assert_eq!(attempted, 10),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(started()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let bus = EventBus::new(10);
        let mut receiver = EventReceiver::new(
            &bus,
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "test",
        );

        bus.publish(started()).unwrap();
        bus.publish(LoadTestEvent::ShutdownRequested {
            reason: "signal".to_string(),
        })
        .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "shutdown_requested");
    }

    #[tokio::test]
    async fn test_receiver_reports_closed_bus() {
        let bus = EventBus::new(4);
        let mut receiver = EventReceiver::new(&bus, EventFilter::All, "test");
        drop(bus);

        assert_eq!(receiver.recv().await.unwrap_err(), EventBusError::ChannelClosed);
    }

    #[test]
    fn test_descriptions() {
        let event = LoadTestEvent::IterationCompleted {
            iteration: 3,
            level: 120,
            stable: false,
            success_rate: 0.9,
        };
        assert_eq!(event.description(), "Iteration 3 at level 120: unstable (90.0%)");
        assert_eq!(event.event_type(), "iteration_completed");
    }
}
