use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Networks, RefreshKind, System};

/// Host load at one point of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub elapsed_secs: f64,
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_used_mb: u64,
    /// Bytes sent on all interfaces since the sampler was created
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
    pub active_streams: usize,
}

/// Peaks and averages over every sample of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub samples: usize,
    pub peak_cpu_percent: f32,
    pub avg_cpu_percent: f32,
    pub peak_memory_percent: f64,
    pub avg_memory_percent: f64,
    pub peak_memory_used_mb: u64,
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
}

impl ResourceSummary {
    pub fn from_samples(samples: &[ResourceSample]) -> Option<Self> {
        let last = samples.last()?;
        let count = samples.len();

        Some(Self {
            samples: count,
            peak_cpu_percent: samples.iter().map(|s| s.cpu_percent).fold(0.0, f32::max),
            avg_cpu_percent: samples.iter().map(|s| s.cpu_percent).sum::<f32>() / count as f32,
            peak_memory_percent: samples.iter().map(|s| s.memory_percent).fold(0.0, f64::max),
            avg_memory_percent: samples.iter().map(|s| s.memory_percent).sum::<f64>()
                / count as f64,
            peak_memory_used_mb: samples.iter().map(|s| s.memory_used_mb).max().unwrap_or(0),
            network_bytes_sent: last.network_bytes_sent,
            network_bytes_recv: last.network_bytes_recv,
        })
    }
}

/// Reads CPU, memory and network counters of the machine running the test
pub struct ResourceSampler {
    system: System,
    networks: Networks,
    baseline_sent: u64,
    baseline_recv: u64,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_specifics(Self::refresh_kind());
        let networks = Networks::new_with_refreshed_list();
        let (baseline_sent, baseline_recv) = network_totals(&networks);

        Self {
            system,
            networks,
            baseline_sent,
            baseline_recv,
        }
    }

    fn refresh_kind() -> RefreshKind {
        RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram())
    }

    pub fn sample(&mut self, elapsed: Duration, active_streams: usize) -> ResourceSample {
        self.system.refresh_specifics(Self::refresh_kind());
        self.networks.refresh(true);

        let total_memory = self.system.total_memory();
        let used_memory = self.system.used_memory();
        let memory_percent = if total_memory > 0 {
            used_memory as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };
        let (sent, recv) = network_totals(&self.networks);

        ResourceSample {
            elapsed_secs: elapsed.as_secs_f64(),
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
            memory_used_mb: used_memory / 1024 / 1024,
            network_bytes_sent: sent.saturating_sub(self.baseline_sent),
            network_bytes_recv: recv.saturating_sub(self.baseline_recv),
            active_streams,
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn network_totals(networks: &Networks) -> (u64, u64) {
    networks.list().values().fold((0, 0), |(sent, recv), data| {
        (
            sent + data.total_transmitted(),
            recv + data.total_received(),
        )
    })
}
