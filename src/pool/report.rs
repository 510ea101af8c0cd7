use super::resources::ResourceSummary;
use crate::connection::{ConnectionMetrics, ConnectionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why the measurement window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    /// Every connection closed on its own before the duration elapsed
    AllClosed,
}

/// Live view of a running pool, published on every progress tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub elapsed_secs: u64,
    pub attempted: usize,
    pub streaming: usize,
    pub connecting: usize,
    /// Disconnected or waiting out a backoff delay
    pub reconnecting: usize,
    pub closed: usize,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub total_fps: f64,
}

impl ProgressSnapshot {
    pub fn from_metrics(metrics: &[ConnectionMetrics], elapsed: Duration) -> Self {
        let count = |state: ConnectionState| metrics.iter().filter(|m| m.state == state).count();
        let total_frames: u64 = metrics.iter().map(|m| m.frames).sum();
        let secs = elapsed.as_secs_f64();

        Self {
            elapsed_secs: elapsed.as_secs(),
            attempted: metrics.len(),
            streaming: count(ConnectionState::Streaming),
            connecting: count(ConnectionState::Connecting),
            reconnecting: count(ConnectionState::Disconnected)
                + count(ConnectionState::Reconnecting),
            closed: count(ConnectionState::Closed),
            total_frames,
            total_bytes: metrics.iter().map(|m| m.bytes_received).sum(),
            total_fps: if secs > 0.0 {
                total_frames as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Per-camera totals derived from connection metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraAggregate {
    pub camera_id: String,
    pub connections: usize,
    pub successful_connections: usize,
    pub active_connections: usize,
    pub frames: u64,
    pub bytes_received: u64,
    pub reconnections: u64,
    pub fps: f64,
}

impl CameraAggregate {
    /// Group metrics by camera, ordered by camera id
    pub fn group(metrics: &[ConnectionMetrics], duration: Duration) -> Vec<CameraAggregate> {
        let secs = duration.as_secs_f64();
        let mut cameras: BTreeMap<&str, CameraAggregate> = BTreeMap::new();

        for m in metrics {
            let aggregate = cameras
                .entry(m.camera_id.as_str())
                .or_insert_with(|| CameraAggregate {
                    camera_id: m.camera_id.clone(),
                    connections: 0,
                    successful_connections: 0,
                    active_connections: 0,
                    frames: 0,
                    bytes_received: 0,
                    reconnections: 0,
                    fps: 0.0,
                });

            aggregate.connections += 1;
            if m.ever_successful() {
                aggregate.successful_connections += 1;
            }
            if m.is_active() {
                aggregate.active_connections += 1;
            }
            aggregate.frames += m.frames;
            aggregate.bytes_received += m.bytes_received;
            aggregate.reconnections += m.reconnections as u64;
        }

        cameras
            .into_values()
            .map(|mut aggregate| {
                if secs > 0.0 {
                    aggregate.fps = aggregate.frames as f64 / secs;
                }
                aggregate
            })
            .collect()
    }
}

/// Spread of per-connection frame rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpsDistribution {
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl FpsDistribution {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / count;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;

        Some(Self {
            min: sorted[0],
            p25: percentile(&sorted, 25.0),
            p50: percentile(&sorted, 50.0),
            p75: percentile(&sorted, 75.0),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            max: sorted[sorted.len() - 1],
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

/// Linear interpolation between closest ranks of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

/// Connections with the most reconnections, listed in the report
pub const TOP_UNSTABLE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstableCamera {
    pub camera_id: String,
    pub connection_id: String,
    pub reconnections: u32,
    pub avg_fps: f64,
    pub total_frames: u64,
    pub errors_count: usize,
    /// 1.0 minus 0.1 per reconnection, floored at 0
    pub stability_score: f64,
}

impl UnstableCamera {
    /// Connections that reconnected at least once, most reconnections first
    pub fn rank(connections: &[ConnectionMetrics], limit: usize) -> Vec<UnstableCamera> {
        let mut unstable: Vec<&ConnectionMetrics> =
            connections.iter().filter(|m| m.reconnections > 0).collect();
        unstable.sort_by(|a, b| {
            b.reconnections
                .cmp(&a.reconnections)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });

        unstable
            .into_iter()
            .take(limit)
            .map(|m| UnstableCamera {
                camera_id: m.camera_id.clone(),
                connection_id: m.connection_id.clone(),
                reconnections: m.reconnections,
                avg_fps: m.avg_fps,
                total_frames: m.frames,
                errors_count: m.errors.len(),
                stability_score: (1.0 - m.reconnections as f64 * 0.1).max(0.0),
            })
            .collect()
    }
}

/// Outcome of one test iteration. Never mutated once built.
///
/// A connection abandoned during shutdown is reported as closed and counts
/// toward `failed` only, even if it was streaming when the window closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub stop_reason: StopReason,
    pub attempted: usize,
    /// Connections that received at least one frame
    pub successful: usize,
    /// Connections streaming when the window closed, abandoned ones excluded
    pub active_at_end: usize,
    /// Most connections seen streaming at once during the window
    pub peak_concurrent: usize,
    /// Connections that gave up or had to be abandoned
    pub failed: usize,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub aggregate_fps: f64,
    pub total_reconnections: u64,
    /// Reconnections per successful connection
    pub reconnection_rate: f64,
    /// Frame rates of connections that streamed
    pub fps_distribution: Option<FpsDistribution>,
    pub top_unstable_cameras: Vec<UnstableCamera>,
    /// Host load while the test ran, when sampling is enabled
    pub resources: Option<ResourceSummary>,
    pub cameras: Vec<CameraAggregate>,
    pub connections: Vec<ConnectionMetrics>,
}

impl TestRunReport {
    pub fn from_snapshots(
        run_id: String,
        started_at: DateTime<Utc>,
        duration: Duration,
        stop_reason: StopReason,
        mut connections: Vec<ConnectionMetrics>,
    ) -> Self {
        let secs = duration.as_secs_f64();
        for m in connections.iter_mut() {
            m.avg_fps = if secs > 0.0 { m.frames as f64 / secs } else { 0.0 };
        }

        let attempted = connections.len();
        let successful = connections.iter().filter(|m| m.ever_successful()).count();
        let active_at_end = connections.iter().filter(|m| m.is_active()).count();
        let failed = connections.iter().filter(|m| m.is_failed()).count();
        let total_frames: u64 = connections.iter().map(|m| m.frames).sum();
        let total_bytes: u64 = connections.iter().map(|m| m.bytes_received).sum();
        let total_reconnections: u64 = connections.iter().map(|m| m.reconnections as u64).sum();
        let fps_values: Vec<f64> = connections
            .iter()
            .filter(|m| m.ever_successful())
            .map(|m| m.avg_fps)
            .collect();

        let aggregate_fps = if secs > 0.0 {
            total_frames as f64 / secs
        } else {
            0.0
        };

        Self {
            run_id,
            started_at,
            duration_secs: secs,
            stop_reason,
            attempted,
            successful,
            active_at_end,
            peak_concurrent: active_at_end,
            failed,
            total_frames,
            total_bytes,
            aggregate_fps,
            total_reconnections,
            reconnection_rate: total_reconnections as f64 / successful.max(1) as f64,
            fps_distribution: FpsDistribution::from_values(&fps_values),
            top_unstable_cameras: UnstableCamera::rank(&connections, TOP_UNSTABLE_LIMIT),
            resources: None,
            cameras: CameraAggregate::group(&connections, duration),
            connections,
        }
    }

    /// Raise the peak to what the samplers saw during the window
    pub fn with_peak_concurrent(mut self, peak: usize) -> Self {
        self.peak_concurrent = self.peak_concurrent.max(peak);
        self
    }

    pub fn with_resources(mut self, resources: Option<ResourceSummary>) -> Self {
        self.resources = resources;
        self
    }

    /// Fraction of attempted connections that ever streamed
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.successful as f64 / self.attempted as f64
        }
    }

    /// Aggregate throughput in megabits per second
    pub fn throughput_mbps(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total_bytes as f64 * 8.0 / self.duration_secs / 1_000_000.0
        } else {
            0.0
        }
    }
}
