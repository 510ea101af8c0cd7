use crate::config::SimulatorConfig;
use crate::error::{CamloadError, Result};
use axum::{routing::get, Router};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::handlers::{cameras_handler, health_handler, mjpeg_stream_handler, synthetic_jpeg};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) cameras: usize,
    pub(crate) frame_interval: Duration,
    pub(crate) frame: Bytes,
    pub(crate) max_streams: Option<usize>,
    pub(crate) base_url: String,
    pub(crate) active_streams: Arc<AtomicUsize>,
    pub(crate) total_streams: Arc<AtomicU64>,
    pub(crate) shutdown: CancellationToken,
}

/// HTTP server emulating a fleet of MJPEG cameras plus their inventory API
pub struct SimulatorServer {
    config: SimulatorConfig,
}

impl SimulatorServer {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    /// Bind the listener and start serving in the background
    pub async fn start(&self) -> Result<RunningSimulator> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            CamloadError::system(format!("Failed to bind simulator on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let active_streams = Arc::new(AtomicUsize::new(0));
        let total_streams = Arc::new(AtomicU64::new(0));

        let state = ServerState {
            cameras: self.config.cameras,
            frame_interval: Duration::from_micros(1_000_000u64 / self.config.fps.max(1) as u64),
            frame: synthetic_jpeg(self.config.frame_size),
            max_streams: self.config.max_streams,
            base_url: format!("http://{}", local_addr),
            active_streams: active_streams.clone(),
            total_streams: total_streams.clone(),
            shutdown: shutdown.clone(),
        };

        let app = Router::new()
            .route("/api/cameras", get(cameras_handler))
            .route("/camera/:id/stream.mjpg", get(mjpeg_stream_handler))
            .route("/health", get(health_handler))
            .with_state(state);

        info!(
            "Camera simulator listening on {} ({} cameras at {} fps, {} byte frames)",
            local_addr, self.config.cameras, self.config.fps, self.config.frame_size
        );

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .map_err(|e| {
                    error!("Simulator server error: {}", e);
                    CamloadError::from(e)
                })
        });

        Ok(RunningSimulator {
            addr: local_addr,
            shutdown,
            active_streams,
            total_streams,
            handle,
        })
    }
}

/// Handle to a simulator serving in the background
pub struct RunningSimulator {
    addr: SocketAddr,
    shutdown: CancellationToken,
    active_streams: Arc<AtomicUsize>,
    total_streams: Arc<AtomicU64>,
    handle: JoinHandle<Result<()>>,
}

impl RunningSimulator {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Inventory endpoint listing every simulated camera
    pub fn inventory_url(&self) -> String {
        format!("{}/api/cameras", self.base_url())
    }

    pub fn stream_url(&self, camera: usize) -> String {
        format!("{}/camera/{}/stream.mjpg", self.base_url(), camera)
    }

    /// Streams currently open
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Relaxed)
    }

    /// Streams accepted since start
    pub fn total_streams(&self) -> u64 {
        self.total_streams.load(Ordering::Relaxed)
    }

    /// Serve until `cancel` fires, then shut down
    pub async fn run_until(self, cancel: &CancellationToken) -> Result<()> {
        cancel.cancelled().await;
        self.shutdown().await
    }

    /// Stop accepting connections, end open streams, and wait for the server
    pub async fn shutdown(self) -> Result<()> {
        info!("Stopping camera simulator on {}", self.addr);
        self.shutdown.cancel();
        self.handle
            .await
            .map_err(|e| CamloadError::system(format!("Simulator task failed: {}", e)))?
    }
}
