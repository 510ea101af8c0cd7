use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CamloadConfig {
    pub inventory: InventoryConfig,
    pub test: TestConfig,
    pub connection: ConnectionConfig,
    pub backoff: BackoffConfig,
    pub pool: PoolConfig,
    pub capacity: CapacityConfig,
    pub adaptive: AdaptiveConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InventoryConfig {
    /// Camera inventory API returning a JSON camera list
    #[serde(default)]
    pub api_url: Option<String>,

    /// Local JSON camera list, used when no API URL is configured
    #[serde(default)]
    pub file: Option<String>,

    /// Shuffle the camera list before selecting the test set
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,

    /// Inventory request timeout in seconds
    #[serde(default = "default_inventory_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TestConfig {
    /// Number of unique cameras to open streams against
    #[serde(default = "default_camera_count")]
    pub cameras: usize,

    /// Simultaneous connections opened per camera
    #[serde(default = "default_connections_per_camera")]
    pub connections_per_camera: u32,

    /// Test duration in seconds
    #[serde(default = "default_duration")]
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Time allowed to establish a stream and receive response headers
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Inactivity window: no frame for this long counts as a disconnect
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Consecutive failures before a connection is closed for good
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Boundary token used when the server does not announce one
    #[serde(default = "default_boundary")]
    pub boundary: String,

    /// Largest accepted multipart part in bytes
    #[serde(default = "default_max_part_size")]
    pub max_part_size: usize,

    /// Largest accepted part header block in bytes
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,

    /// Skip TLS certificate verification (cameras commonly use self-signed certs)
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Fraction of the delay randomly added or removed (0.0-1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PoolConfig {
    /// Ceiling on simultaneous in-flight connect attempts
    #[serde(default = "default_max_inflight_connects")]
    pub max_inflight_connects: usize,

    /// Seconds between progress snapshots
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Seconds to wait for connections to close before abandoning them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Milliseconds between concurrency and resource samples
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Record host CPU, memory and network usage during the run
    #[serde(default = "default_sample_resources")]
    pub sample_resources: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CapacityConfig {
    /// Minimum success ratio for a run to count as stable
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f64,

    /// Fraction of maximum capacity production should run at
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,

    /// Optional reconnection-rate ceiling for stability
    #[serde(default)]
    pub max_reconnection_rate: Option<f64>,

    #[serde(default = "default_high_confidence_utilization")]
    pub high_confidence_utilization: f64,

    #[serde(default = "default_high_confidence_reconnection_rate")]
    pub high_confidence_reconnection_rate: f64,

    #[serde(default = "default_medium_confidence_utilization")]
    pub medium_confidence_utilization: f64,

    /// Viewer multiplicities reported in the unique-camera capacity table
    #[serde(default = "default_viewer_multiplicities")]
    pub viewer_multiplicities: Vec<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Start high and step down until a stable level is found
    Linear,
    /// Bisect between the highest stable and lowest unstable levels
    Binary,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AdaptiveConfig {
    #[serde(default = "default_search_mode")]
    pub mode: SearchMode,

    /// First concurrency level probed
    #[serde(default = "default_initial_level")]
    pub initial_level: usize,

    #[serde(default = "default_min_level")]
    pub min_level: usize,

    #[serde(default = "default_max_level")]
    pub max_level: usize,

    /// Binary search stops once the stable/unstable gap is this narrow
    #[serde(default = "default_granularity")]
    pub granularity: usize,

    /// Linear step; defaults to 10% of the initial level (at least 10)
    #[serde(default)]
    pub step: Option<usize>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Duration of each search iteration in seconds
    #[serde(default = "default_iteration_duration")]
    pub iteration_duration_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// IP address to bind to
    #[serde(default = "default_simulator_ip")]
    pub ip: String,

    /// Port to listen on (0 picks a free port)
    #[serde(default = "default_simulator_port")]
    pub port: u16,

    /// Number of simulated cameras
    #[serde(default = "default_simulator_cameras")]
    pub cameras: usize,

    /// Frames per second per stream
    #[serde(default = "default_simulator_fps")]
    pub fps: u32,

    /// Payload size of each frame in bytes
    #[serde(default = "default_simulator_frame_size")]
    pub frame_size: usize,

    /// Concurrent stream limit; further requests get 503
    #[serde(default)]
    pub max_streams: Option<usize>,
}

impl CamloadConfig {
    /// Load configuration from a file path (optional) plus environment variables
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("inventory.shuffle", default_shuffle())?
            .set_default(
                "inventory.request_timeout_secs",
                default_inventory_timeout(),
            )?
            .set_default("test.cameras", default_camera_count() as u64)?
            .set_default(
                "test.connections_per_camera",
                default_connections_per_camera(),
            )?
            .set_default("test.duration_secs", default_duration())?
            .set_default(
                "connection.connect_timeout_secs",
                default_connect_timeout(),
            )?
            .set_default("connection.read_timeout_secs", default_read_timeout())?
            .set_default(
                "connection.max_consecutive_failures",
                default_max_consecutive_failures(),
            )?
            .set_default("connection.boundary", default_boundary())?
            .set_default(
                "connection.max_part_size",
                default_max_part_size() as u64,
            )?
            .set_default(
                "connection.max_header_size",
                default_max_header_size() as u64,
            )?
            .set_default(
                "connection.accept_invalid_certs",
                default_accept_invalid_certs(),
            )?
            .set_default("connection.user_agent", default_user_agent())?
            .set_default("backoff.base_delay_ms", default_base_delay())?
            .set_default("backoff.multiplier", default_multiplier())?
            .set_default("backoff.max_delay_ms", default_max_delay())?
            .set_default("backoff.jitter", default_jitter())?
            .set_default(
                "pool.max_inflight_connects",
                default_max_inflight_connects() as u64,
            )?
            .set_default("pool.progress_interval_secs", default_progress_interval())?
            .set_default("pool.shutdown_grace_secs", default_shutdown_grace())?
            .set_default("pool.sample_interval_ms", default_sample_interval())?
            .set_default("pool.sample_resources", default_sample_resources())?
            .set_default(
                "capacity.stability_threshold",
                default_stability_threshold(),
            )?
            .set_default(
                "capacity.target_utilization",
                default_target_utilization(),
            )?
            .set_default(
                "capacity.high_confidence_utilization",
                default_high_confidence_utilization(),
            )?
            .set_default(
                "capacity.high_confidence_reconnection_rate",
                default_high_confidence_reconnection_rate(),
            )?
            .set_default(
                "capacity.medium_confidence_utilization",
                default_medium_confidence_utilization(),
            )?
            .set_default(
                "capacity.viewer_multiplicities",
                default_viewer_multiplicities(),
            )?
            .set_default("adaptive.mode", "binary")?
            .set_default("adaptive.initial_level", default_initial_level() as u64)?
            .set_default("adaptive.min_level", default_min_level() as u64)?
            .set_default("adaptive.max_level", default_max_level() as u64)?
            .set_default("adaptive.granularity", default_granularity() as u64)?
            .set_default("adaptive.max_iterations", default_max_iterations() as u64)?
            .set_default(
                "adaptive.iteration_duration_secs",
                default_iteration_duration(),
            )?
            .set_default("simulator.ip", default_simulator_ip())?
            .set_default("simulator.port", default_simulator_port())?
            .set_default("simulator.cameras", default_simulator_cameras() as u64)?
            .set_default("simulator.fps", default_simulator_fps())?
            .set_default(
                "simulator.frame_size",
                default_simulator_frame_size() as u64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // CAMLOAD_TEST__DURATION_SECS=60 overrides test.duration_secs
            .add_source(Environment::with_prefix("CAMLOAD").separator("__"))
            .build()?;

        let config: CamloadConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Render as a TOML document
    pub fn to_toml_string(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test.connections_per_camera == 0 {
            return Err(ConfigError::Message(
                "Connections per camera must be greater than 0".to_string(),
            ));
        }

        if self.test.duration_secs == 0 {
            return Err(ConfigError::Message(
                "Test duration must be greater than 0".to_string(),
            ));
        }

        if self.connection.read_timeout_secs == 0 || self.connection.connect_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Connection timeouts must be greater than 0".to_string(),
            ));
        }

        if self.connection.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(
                "max_consecutive_failures must be greater than 0".to_string(),
            ));
        }

        if self.connection.boundary.trim().is_empty() {
            return Err(ConfigError::Message(
                "Multipart boundary must not be empty".to_string(),
            ));
        }

        if self.connection.max_part_size == 0 || self.connection.max_header_size == 0 {
            return Err(ConfigError::Message(
                "Part and header size limits must be greater than 0".to_string(),
            ));
        }

        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Message(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::Message(
                "Backoff jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigError::Message(
                "Backoff max delay must not be below the base delay".to_string(),
            ));
        }

        if self.pool.max_inflight_connects == 0 {
            return Err(ConfigError::Message(
                "max_inflight_connects must be greater than 0".to_string(),
            ));
        }

        if self.pool.progress_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Progress interval must be greater than 0".to_string(),
            ));
        }

        if self.pool.sample_interval_ms < 100 {
            return Err(ConfigError::Message(
                "Sample interval must be at least 100 ms".to_string(),
            ));
        }

        for (name, value) in [
            ("stability_threshold", self.capacity.stability_threshold),
            ("high_confidence_utilization", self.capacity.high_confidence_utilization),
            ("medium_confidence_utilization", self.capacity.medium_confidence_utilization),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "capacity.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if self.capacity.target_utilization <= 0.0 || self.capacity.target_utilization > 1.0 {
            return Err(ConfigError::Message(
                "capacity.target_utilization must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.capacity.viewer_multiplicities.iter().any(|v| *v == 0) {
            return Err(ConfigError::Message(
                "Viewer multiplicities must be greater than 0".to_string(),
            ));
        }

        if self.adaptive.min_level == 0 || self.adaptive.min_level > self.adaptive.max_level {
            return Err(ConfigError::Message(
                "Adaptive levels must satisfy 0 < min_level <= max_level".to_string(),
            ));
        }

        if self.adaptive.granularity == 0 {
            return Err(ConfigError::Message(
                "Adaptive granularity must be greater than 0".to_string(),
            ));
        }

        if self.simulator.fps == 0 {
            return Err(ConfigError::Message(
                "Simulator fps must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl PoolConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl AdaptiveConfig {
    /// Linear step, falling back to 10% of the initial level with a floor of 10
    pub fn effective_step(&self) -> usize {
        self.step
            .unwrap_or_else(|| (self.initial_level / 10).max(10))
            .max(1)
    }
}

impl Default for CamloadConfig {
    fn default() -> Self {
        Self {
            inventory: InventoryConfig {
                api_url: None,
                file: None,
                shuffle: default_shuffle(),
                request_timeout_secs: default_inventory_timeout(),
            },
            test: TestConfig {
                cameras: default_camera_count(),
                connections_per_camera: default_connections_per_camera(),
                duration_secs: default_duration(),
            },
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            pool: PoolConfig::default(),
            capacity: CapacityConfig::default(),
            adaptive: AdaptiveConfig {
                mode: default_search_mode(),
                initial_level: default_initial_level(),
                min_level: default_min_level(),
                max_level: default_max_level(),
                granularity: default_granularity(),
                step: None,
                max_iterations: default_max_iterations(),
                iteration_duration_secs: default_iteration_duration(),
            },
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            boundary: default_boundary(),
            max_part_size: default_max_part_size(),
            max_header_size: default_max_header_size(),
            accept_invalid_certs: default_accept_invalid_certs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_inflight_connects: default_max_inflight_connects(),
            progress_interval_secs: default_progress_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
            sample_interval_ms: default_sample_interval(),
            sample_resources: default_sample_resources(),
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            stability_threshold: default_stability_threshold(),
            target_utilization: default_target_utilization(),
            max_reconnection_rate: None,
            high_confidence_utilization: default_high_confidence_utilization(),
            high_confidence_reconnection_rate: default_high_confidence_reconnection_rate(),
            medium_confidence_utilization: default_medium_confidence_utilization(),
            viewer_multiplicities: default_viewer_multiplicities(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            ip: default_simulator_ip(),
            port: default_simulator_port(),
            cameras: default_simulator_cameras(),
            fps: default_simulator_fps(),
            frame_size: default_simulator_frame_size(),
            max_streams: None,
        }
    }
}

// Default value functions
fn default_shuffle() -> bool {
    true
}
fn default_inventory_timeout() -> u64 {
    30
}

fn default_camera_count() -> usize {
    10
}
fn default_connections_per_camera() -> u32 {
    1
}
fn default_duration() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    30
}
fn default_max_consecutive_failures() -> u32 {
    10
}
fn default_boundary() -> String {
    "frame".to_string()
}
fn default_max_part_size() -> usize {
    2 * 1024 * 1024
}
fn default_max_header_size() -> usize {
    8 * 1024
}
fn default_accept_invalid_certs() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("camload/{}", env!("CARGO_PKG_VERSION"))
}

fn default_base_delay() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}

fn default_max_inflight_connects() -> usize {
    32
}
fn default_progress_interval() -> u64 {
    5
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_sample_interval() -> u64 {
    1000
}
fn default_sample_resources() -> bool {
    true
}

fn default_stability_threshold() -> f64 {
    0.95
}
fn default_target_utilization() -> f64 {
    0.8
}
fn default_high_confidence_utilization() -> f64 {
    0.95
}
fn default_high_confidence_reconnection_rate() -> f64 {
    0.05
}
fn default_medium_confidence_utilization() -> f64 {
    0.85
}
fn default_viewer_multiplicities() -> Vec<u32> {
    vec![1, 2, 4]
}

fn default_search_mode() -> SearchMode {
    SearchMode::Binary
}
fn default_initial_level() -> usize {
    100
}
fn default_min_level() -> usize {
    1
}
fn default_max_level() -> usize {
    200
}
fn default_granularity() -> usize {
    5
}
fn default_max_iterations() -> usize {
    12
}
fn default_iteration_duration() -> u64 {
    120
}

fn default_simulator_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_simulator_port() -> u16 {
    8090
}
fn default_simulator_cameras() -> usize {
    20
}
fn default_simulator_fps() -> u32 {
    10
}
fn default_simulator_frame_size() -> usize {
    16 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CamloadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity.stability_threshold, 0.95);
        assert_eq!(config.capacity.target_utilization, 0.8);
        assert_eq!(config.adaptive.granularity, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = CamloadConfig::load_from_file("/nonexistent/camload-test.toml").unwrap();
        assert_eq!(config, CamloadConfig::default());
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[test]
cameras = 24
connections_per_camera = 2

[backoff]
base_delay_ms = 250

[adaptive]
mode = "linear"
step = 15

[capacity]
max_reconnection_rate = 0.1
"#
        )
        .unwrap();

        let config = CamloadConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.test.cameras, 24);
        assert_eq!(config.test.connections_per_camera, 2);
        assert_eq!(config.test.duration_secs, default_duration());
        assert_eq!(config.backoff.base_delay_ms, 250);
        assert_eq!(config.adaptive.mode, SearchMode::Linear);
        assert_eq!(config.adaptive.effective_step(), 15);
        assert_eq!(config.capacity.max_reconnection_rate, Some(0.1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CamloadConfig::default();
        config.test.connections_per_camera = 0;
        assert!(config.validate().is_err());

        config.test.connections_per_camera = 2;
        assert!(config.validate().is_ok());

        config.backoff.jitter = 1.5;
        assert!(config.validate().is_err());
        config.backoff.jitter = 0.2;

        config.adaptive.min_level = 300;
        assert!(config.validate().is_err());
        config.adaptive.min_level = 1;

        config.capacity.viewer_multiplicities = vec![1, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_step() {
        let mut adaptive = CamloadConfig::default().adaptive;
        adaptive.initial_level = 300;
        assert_eq!(adaptive.effective_step(), 30);
        adaptive.initial_level = 40;
        assert_eq!(adaptive.effective_step(), 10);
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = CamloadConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("[connection]"));
        assert!(rendered.contains("boundary = \"frame\""));
        assert!(rendered.contains("sample_interval_ms = 1000"));
    }
}
