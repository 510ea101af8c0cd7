use crate::config::CapacityConfig;
use crate::pool::TestRunReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Unique cameras supportable when each camera has `viewers_per_camera` streams open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerScenario {
    pub viewers_per_camera: u32,
    pub unique_cameras: usize,
    pub description: String,
    /// The multiplicity the measured run actually used
    pub tested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRecommendations {
    /// 70% of the estimated maximum
    pub safe_connections: usize,
    /// 80% of the estimated maximum
    pub warning_threshold: usize,
    /// 90% of the estimated maximum
    pub critical_threshold: usize,
    /// Unique cameras at the safe level with the tested viewer multiplicity
    pub safe_unique_cameras: usize,
}

/// Capacity derived from one test run. A pure function of report and config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityEstimate {
    pub attempted: usize,
    pub successful: usize,
    pub stable: bool,
    pub estimated_max_connections: usize,
    pub confidence: Confidence,
    /// successful / attempted, as a percentage
    pub utilization_percent: f64,
    /// successful / estimated maximum, as a percentage
    pub current_load_percent: f64,
    pub reconnection_rate: f64,
    pub connections_per_camera: u32,
    pub scenarios: Vec<ViewerScenario>,
    pub recommendations: ProductionRecommendations,
}

impl CapacityEstimate {
    /// Unique cameras for a viewer multiplicity, computed even if not in the table
    pub fn unique_cameras(&self, viewers_per_camera: u32) -> usize {
        self.estimated_max_connections / viewers_per_camera.max(1) as usize
    }

    /// Whether `cameras` unique cameras fit at the safe deployment level
    pub fn supports_cameras(&self, cameras: usize, viewers_per_camera: u32) -> bool {
        self.recommendations.safe_connections / viewers_per_camera.max(1) as usize >= cameras
    }
}

pub fn estimate(
    report: &TestRunReport,
    connections_per_camera: u32,
    config: &CapacityConfig,
) -> CapacityEstimate {
    let attempted = report.attempted;
    let successful = report.successful;

    let utilization = if attempted == 0 {
        0.0
    } else {
        successful as f64 / attempted as f64
    };

    let reconnections_ok = config
        .max_reconnection_rate
        .map(|limit| report.reconnection_rate <= limit)
        .unwrap_or(true);
    let stable = attempted > 0 && utilization >= config.stability_threshold && reconnections_ok;

    let estimated_max_connections = if stable {
        // Epsilon keeps exact quotients such as 48 / 0.8 from landing at 59.999...
        (successful as f64 / config.target_utilization + 1e-9).floor() as usize
    } else {
        successful
    };

    let confidence = if utilization >= config.high_confidence_utilization
        && report.reconnection_rate <= config.high_confidence_reconnection_rate
    {
        Confidence::High
    } else if utilization >= config.medium_confidence_utilization {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let current_load_percent = if estimated_max_connections == 0 {
        0.0
    } else {
        successful as f64 / estimated_max_connections as f64 * 100.0
    };

    let mut multiplicities: Vec<u32> = config
        .viewer_multiplicities
        .iter()
        .copied()
        .chain(std::iter::once(connections_per_camera))
        .filter(|v| *v > 0)
        .collect();
    multiplicities.sort_unstable();
    multiplicities.dedup();

    let scenarios = multiplicities
        .into_iter()
        .map(|viewers| ViewerScenario {
            viewers_per_camera: viewers,
            unique_cameras: estimated_max_connections / viewers as usize,
            description: describe_viewers(viewers),
            tested: viewers == connections_per_camera,
        })
        .collect();

    let safe_connections = percent_of(estimated_max_connections, 70);
    let recommendations = ProductionRecommendations {
        safe_connections,
        warning_threshold: percent_of(estimated_max_connections, 80),
        critical_threshold: percent_of(estimated_max_connections, 90),
        safe_unique_cameras: safe_connections / connections_per_camera.max(1) as usize,
    };

    CapacityEstimate {
        attempted,
        successful,
        stable,
        estimated_max_connections,
        confidence,
        utilization_percent: utilization * 100.0,
        current_load_percent,
        reconnection_rate: report.reconnection_rate,
        connections_per_camera,
        scenarios,
        recommendations,
    }
}

fn percent_of(value: usize, percent: usize) -> usize {
    value * percent / 100
}

fn describe_viewers(viewers: u32) -> String {
    match viewers {
        1 => "Each camera has 1 viewer".to_string(),
        2 => "Each camera has 2 viewers (security + recording)".to_string(),
        4 => "Each camera has 4 viewers (multiple operators)".to_string(),
        n => format!("Each camera has {} viewers", n),
    }
}
