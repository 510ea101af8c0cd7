use super::strategy::{SearchStep, SearchStrategy};
use crate::capacity::{self, CapacityEstimate};
use crate::config::CapacityConfig;
use crate::error::Result;
use crate::events::{EventBus, LoadTestEvent};
use crate::pool::{StopReason, TestRunReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one load test at a given concurrency level
#[async_trait]
pub trait LoadRunner: Send + Sync {
    async fn run_level(&self, level: usize, cancel: &CancellationToken) -> Result<TestRunReport>;
}

/// One probe of the search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Level requested from the runner
    pub level: usize,
    /// Connections the runner actually opened; below `level` when the
    /// inventory ran short, in which case the level counts as unstable
    pub achieved: usize,
    pub stable: bool,
    pub estimate: CapacityEstimate,
    pub report: TestRunReport,
}

impl IterationRecord {
    pub fn step(&self) -> SearchStep {
        SearchStep {
            level: self.level,
            stable: self.stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveOutcome {
    pub strategy: String,
    /// Highest level observed stable
    pub best_level: Option<usize>,
    pub best_estimate: Option<CapacityEstimate>,
    pub iterations: Vec<IterationRecord>,
    /// The strategy ran out of levels to try
    pub converged: bool,
    pub interrupted: bool,
}

impl AdaptiveOutcome {
    /// Production limit at 80% of the best stable level
    pub fn recommended_limit(&self) -> Option<usize> {
        self.best_level.map(|level| (level * 4 / 5).max(1))
    }
}

/// Repeats load tests at levels picked by a [`SearchStrategy`]
pub struct AdaptiveDriver<R: LoadRunner> {
    runner: R,
    strategy: Box<dyn SearchStrategy>,
    capacity: CapacityConfig,
    connections_per_camera: u32,
    max_iterations: usize,
    events: EventBus,
}

impl<R: LoadRunner> AdaptiveDriver<R> {
    pub fn new(
        runner: R,
        strategy: Box<dyn SearchStrategy>,
        capacity: CapacityConfig,
        connections_per_camera: u32,
        max_iterations: usize,
        events: EventBus,
    ) -> Self {
        Self {
            runner,
            strategy,
            capacity,
            connections_per_camera,
            max_iterations,
            events,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<AdaptiveOutcome> {
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut converged = false;
        let mut interrupted = false;

        info!(
            "Adaptive search ({}) for up to {} iterations",
            self.strategy.name(),
            self.max_iterations
        );

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let history: Vec<SearchStep> = iterations.iter().map(IterationRecord::step).collect();
            let level = match self.strategy.next_level(&history) {
                Some(level) => level,
                None => {
                    converged = true;
                    break;
                }
            };

            info!("Iteration {}: testing {} connections", iteration, level);
            let report = self.runner.run_level(level, cancel).await?;

            if report.stop_reason == StopReason::Interrupted {
                warn!("Iteration {} interrupted; its measurement is discarded", iteration);
                interrupted = true;
                break;
            }

            let estimate = capacity::estimate(&report, self.connections_per_camera, &self.capacity);
            let achieved = report.attempted;
            let stable = if achieved < level {
                warn!(
                    "Iteration {}: only {} of {} connections could be opened; level not reached",
                    iteration, achieved, level
                );
                false
            } else {
                estimate.stable
            };

            if let Err(e) = self.events.publish(LoadTestEvent::IterationCompleted {
                iteration,
                level,
                stable,
                success_rate: report.success_rate(),
            }) {
                debug!("Event not delivered: {}", e);
            }

            iterations.push(IterationRecord {
                iteration,
                level,
                achieved,
                stable,
                estimate,
                report,
            });
        }

        if !converged && !interrupted {
            warn!(
                "Search stopped after {} iterations without converging",
                self.max_iterations
            );
        }

        let best = iterations
            .iter()
            .filter(|record| record.stable)
            .max_by_key(|record| record.level);

        match best {
            Some(best) => info!(
                "Highest stable level: {} connections (estimated max {})",
                best.level, best.estimate.estimated_max_connections
            ),
            None => warn!("No tested level was stable"),
        }

        Ok(AdaptiveOutcome {
            strategy: self.strategy.name().to_string(),
            best_level: best.map(|record| record.level),
            best_estimate: best.map(|record| record.estimate.clone()),
            iterations,
            converged,
            interrupted,
        })
    }
}
