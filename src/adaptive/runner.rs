use super::driver::LoadRunner;
use crate::error::Result;
use crate::inventory::CameraRecord;
use crate::pool::{build_targets, ConnectionPool, TestRunReport};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// [`LoadRunner`] that spreads each level over the inventory and runs it on a pool
pub struct PoolRunner {
    pool: ConnectionPool,
    cameras: Vec<CameraRecord>,
    connections_per_camera: u32,
    shuffle: bool,
    duration: Duration,
}

impl PoolRunner {
    pub fn new(
        pool: ConnectionPool,
        cameras: Vec<CameraRecord>,
        connections_per_camera: u32,
        shuffle: bool,
        duration: Duration,
    ) -> Self {
        Self {
            pool,
            cameras,
            connections_per_camera,
            shuffle,
            duration,
        }
    }
}

#[async_trait]
impl LoadRunner for PoolRunner {
    async fn run_level(&self, level: usize, cancel: &CancellationToken) -> Result<TestRunReport> {
        let per_camera = self.connections_per_camera.max(1) as usize;
        let camera_count = (level + per_camera - 1) / per_camera;

        let mut targets = build_targets(
            &self.cameras,
            Some(camera_count),
            self.connections_per_camera,
            self.shuffle,
        )?;

        if targets.len() < level {
            warn!(
                "Level {} needs more cameras than the inventory has; testing {} connections",
                level,
                targets.len()
            );
        }
        targets.truncate(level);

        self.pool.run(targets, self.duration, cancel).await
    }
}
