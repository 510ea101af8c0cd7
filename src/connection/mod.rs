mod backoff;
mod metrics;
mod mock;
mod source;
mod state;
mod stream;
mod target;

pub use backoff::BackoffPolicy;
pub use metrics::{ConnectionMetrics, ErrorRecord, MetricsHandle, MAX_ERROR_HISTORY};
pub use mock::{MockBehavior, MockStreamSource};
pub use source::{ByteStream, HttpStreamSource, StreamSource};
pub use state::{ConnectionState, FinalStatus};
pub use stream::{ConnectionSettings, StreamConnection};
pub use target::ConnectionTarget;
