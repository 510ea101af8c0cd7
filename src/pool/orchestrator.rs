use super::report::{ProgressSnapshot, StopReason, TestRunReport};
use super::resources::{ResourceSample, ResourceSampler, ResourceSummary};
use crate::config::{CamloadConfig, PoolConfig};
use crate::connection::{
    ConnectionMetrics, ConnectionSettings, ConnectionState, ConnectionTarget, FinalStatus,
    MetricsHandle, StreamConnection, StreamSource,
};
use crate::error::{Result, SetupError};
use crate::events::{EventBus, LoadTestEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pool-level tunables
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Ceiling on simultaneous connect attempts across the pool
    pub max_inflight_connects: usize,
    pub progress_interval: Duration,
    /// How long connections get to close after the window ends
    pub shutdown_grace: Duration,
    /// Cadence of peak-concurrency and resource samples
    pub sample_interval: Duration,
    pub sample_resources: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_inflight_connects: config.max_inflight_connects,
            progress_interval: config.progress_interval(),
            shutdown_grace: config.shutdown_grace(),
            sample_interval: config.sample_interval(),
            sample_resources: config.sample_resources,
        }
    }
}

/// Launches one stream connection per target and turns a measurement window
/// into a [`TestRunReport`]
pub struct ConnectionPool {
    source: Arc<dyn StreamSource>,
    settings: Arc<ConnectionSettings>,
    pool: PoolSettings,
    events: EventBus,
}

type JoinedConnection = (usize, ConnectionMetrics);

impl ConnectionPool {
    pub fn new(
        source: Arc<dyn StreamSource>,
        settings: ConnectionSettings,
        pool: PoolSettings,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            settings: Arc::new(settings),
            pool,
            events,
        }
    }

    pub fn from_config(source: Arc<dyn StreamSource>, config: &CamloadConfig, events: EventBus) -> Self {
        Self::new(
            source,
            ConnectionSettings::from_config(&config.connection, &config.backoff),
            PoolSettings::from(&config.pool),
            events,
        )
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run every target concurrently for `duration` or until `cancel` fires.
    ///
    /// Cancelling `cancel` ends the window early; the report is still built
    /// from whatever was measured.
    pub async fn run(
        &self,
        targets: Vec<ConnectionTarget>,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<TestRunReport> {
        if targets.is_empty() {
            return Err(SetupError::NoTargets.into());
        }

        let run_id = Uuid::new_v4().to_string();
        let attempted = targets.len();
        let run_cancel = cancel.child_token();
        let connect_gate = Arc::new(Semaphore::new(self.pool.max_inflight_connects.max(1)));

        let started_at = Utc::now();
        let start = Instant::now();

        let mut handles: Vec<MetricsHandle> = Vec::with_capacity(attempted);
        let mut tasks: JoinSet<JoinedConnection> = JoinSet::new();

        for (index, target) in targets.into_iter().enumerate() {
            let (connection, handle) = StreamConnection::new(
                target,
                self.source.clone(),
                self.settings.clone(),
                connect_gate.clone(),
                run_cancel.clone(),
            );
            handles.push(handle);
            tasks.spawn(async move { (index, connection.run().await) });
        }

        info!(
            "Run {}: launched {} connections for {:?} (max {} concurrent connects)",
            run_id, attempted, duration, self.pool.max_inflight_connects
        );
        self.publish(LoadTestEvent::RunStarted {
            run_id: run_id.clone(),
            attempted,
            duration_secs: duration.as_secs(),
        });

        let mut finals: Vec<Option<ConnectionMetrics>> = vec![None; attempted];
        let deadline = start + duration;
        let progress_interval = self.pool.progress_interval.max(Duration::from_millis(100));
        let mut ticker = interval_at(start + progress_interval, progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sample_interval = self.pool.sample_interval.max(Duration::from_millis(100));
        let mut sampler_ticker = interval_at(start + sample_interval, sample_interval);
        sampler_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sampler = self.pool.sample_resources.then(ResourceSampler::new);
        let mut samples: Vec<ResourceSample> = Vec::new();
        let mut peak_concurrent = 0usize;

        let stop_reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Interrupted,
                _ = sleep_until(deadline) => break StopReason::DurationElapsed,
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, metrics))) => {
                        if let Some(status) = metrics.final_status {
                            self.publish(LoadTestEvent::ConnectionClosed {
                                connection_id: metrics.connection_id.clone(),
                                status,
                            });
                        }
                        finals[index] = Some(metrics);
                    }
                    Some(Err(e)) => error!("Connection task failed: {}", e),
                    None => break StopReason::AllClosed,
                },
                _ = ticker.tick() => {
                    let snapshots: Vec<ConnectionMetrics> =
                        handles.iter().map(MetricsHandle::snapshot).collect();
                    let progress = ProgressSnapshot::from_metrics(&snapshots, start.elapsed());
                    peak_concurrent = peak_concurrent.max(progress.streaming);
                    self.publish(LoadTestEvent::Progress(progress));
                }
                _ = sampler_ticker.tick() => {
                    let streaming = streaming_count(&handles);
                    peak_concurrent = peak_concurrent.max(streaming);
                    if let Some(sampler) = sampler.as_mut() {
                        samples.push(sampler.sample(start.elapsed(), streaming));
                    }
                }
            }
        };

        // Measure before teardown so states reflect the window, not the shutdown
        let elapsed = start.elapsed();
        let window: Vec<ConnectionMetrics> = handles.iter().map(MetricsHandle::snapshot).collect();

        debug!("Run {}: window closed ({:?}), shutting down connections", run_id, stop_reason);
        run_cancel.cancel();
        self.drain(&mut tasks, &mut finals).await;

        let connections = window
            .into_iter()
            .zip(finals)
            .map(|(measured, closed)| merge_final(measured, closed))
            .collect();

        let report =
            TestRunReport::from_snapshots(run_id.clone(), started_at, elapsed, stop_reason, connections)
                .with_peak_concurrent(peak_concurrent)
                .with_resources(ResourceSummary::from_samples(&samples));

        info!(
            "Run {}: {}/{} successful, {} active at end (peak {}), {} failed, {:.1} fps, {:.2} Mbps, {} reconnections",
            run_id,
            report.successful,
            report.attempted,
            report.active_at_end,
            report.peak_concurrent,
            report.failed,
            report.aggregate_fps,
            report.throughput_mbps(),
            report.total_reconnections
        );
        self.publish(LoadTestEvent::RunCompleted {
            run_id,
            attempted: report.attempted,
            successful: report.successful,
            stop_reason,
        });

        Ok(report)
    }

    /// Wait for tasks to close within the grace period, then abort the rest
    async fn drain(
        &self,
        tasks: &mut JoinSet<JoinedConnection>,
        finals: &mut [Option<ConnectionMetrics>],
    ) {
        let grace = sleep(self.pool.shutdown_grace);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, metrics))) => finals[index] = Some(metrics),
                    Some(Err(e)) => error!("Connection task failed during shutdown: {}", e),
                    None => return,
                },
                _ = &mut grace => break,
            }
        }

        warn!(
            "{} connections did not close within {:?}; abandoning them",
            tasks.len(),
            self.pool.shutdown_grace
        );
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, metrics)) = joined {
                finals[index] = Some(metrics);
            }
        }
    }

    fn publish(&self, event: LoadTestEvent) {
        if let Err(e) = self.events.publish(event) {
            debug!("Event not delivered: {}", e);
        }
    }
}

fn streaming_count(handles: &[MetricsHandle]) -> usize {
    handles
        .iter()
        .filter(|h| h.state() == ConnectionState::Streaming)
        .count()
}

/// Combine the window snapshot with the teardown result of the same connection.
/// A connection that never finished its teardown is closed as abandoned.
pub(super) fn merge_final(mut measured: ConnectionMetrics, closed: Option<ConnectionMetrics>) -> ConnectionMetrics {
    match closed {
        // Closed on its own during the window: the teardown copy is complete
        Some(closed) if measured.state.is_terminal() => closed,
        Some(closed) => {
            measured.final_status = closed.final_status;
            measured
        }
        None => {
            measured.state = ConnectionState::Closed;
            measured.final_status = Some(FinalStatus::Abandoned);
            measured
        }
    }
}
