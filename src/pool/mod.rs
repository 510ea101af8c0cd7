mod orchestrator;
mod report;
mod resources;
mod targets;
#[cfg(test)]
mod tests;

pub use orchestrator::{ConnectionPool, PoolSettings};
pub use report::{
    CameraAggregate, FpsDistribution, ProgressSnapshot, StopReason, TestRunReport, UnstableCamera,
    TOP_UNSTABLE_LIMIT,
};
pub use resources::{ResourceSample, ResourceSampler, ResourceSummary};
pub use targets::{build_targets, build_targets_with_rng};
