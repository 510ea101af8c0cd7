pub mod adaptive;
pub mod capacity;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod inventory;
pub mod parser;
pub mod pool;

#[cfg(feature = "simulator")]
pub mod simulator;

pub use adaptive::{
    AdaptiveDriver, AdaptiveOutcome, BinarySearch, IterationRecord, LinearDecrease, LoadRunner,
    PoolRunner, SearchStep, SearchStrategy,
};
pub use capacity::{estimate, CapacityEstimate, Confidence, ProductionRecommendations, ViewerScenario};
pub use config::CamloadConfig;
pub use connection::{
    BackoffPolicy, ConnectionMetrics, ConnectionSettings, ConnectionState, ConnectionTarget,
    FinalStatus, HttpStreamSource, MetricsHandle, MockBehavior, MockStreamSource,
    StreamConnection, StreamSource,
};
pub use error::{CamloadError, ProtocolError, Result, SetupError, StreamError};
pub use events::{EventBus, EventFilter, EventReceiver, LoadTestEvent};
pub use inventory::{CameraInventory, CameraRecord, FileInventory, HttpInventory};
pub use parser::{FrameEvent, MultipartParser, ParserLimits};
pub use pool::{
    build_targets, CameraAggregate, ConnectionPool, FpsDistribution, PoolSettings,
    ProgressSnapshot, ResourceSummary, StopReason, TestRunReport, UnstableCamera,
};

#[cfg(feature = "simulator")]
pub use simulator::{RunningSimulator, SimulatorServer};
