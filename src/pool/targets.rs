use crate::connection::ConnectionTarget;
use crate::error::SetupError;
use crate::inventory::CameraRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

/// Expand an inventory into connection targets.
///
/// Only active cameras with a stream URL are used. `camera_count` caps the
/// number of cameras (all of them when `None`); each chosen camera gets
/// `connections_per_camera` targets numbered from 1.
pub fn build_targets(
    cameras: &[CameraRecord],
    camera_count: Option<usize>,
    connections_per_camera: u32,
    shuffle: bool,
) -> Result<Vec<ConnectionTarget>, SetupError> {
    build_targets_with_rng(
        cameras,
        camera_count,
        connections_per_camera,
        shuffle,
        &mut rand::thread_rng(),
    )
}

pub fn build_targets_with_rng<R: Rng + ?Sized>(
    cameras: &[CameraRecord],
    camera_count: Option<usize>,
    connections_per_camera: u32,
    shuffle: bool,
    rng: &mut R,
) -> Result<Vec<ConnectionTarget>, SetupError> {
    if connections_per_camera == 0 {
        return Err(SetupError::ZeroConnections);
    }

    let mut usable: Vec<&CameraRecord> = cameras
        .iter()
        .filter(|camera| camera.active && !camera.stream_url.trim().is_empty())
        .collect();

    if usable.is_empty() {
        return Err(SetupError::NoActiveCameras);
    }

    info!(
        "{} of {} cameras are active with a stream URL",
        usable.len(),
        cameras.len()
    );

    if shuffle {
        usable.shuffle(rng);
    }

    let wanted = camera_count.unwrap_or(usable.len());
    if wanted == 0 {
        return Err(SetupError::NoTargets);
    }
    if wanted > usable.len() {
        warn!(
            "Requested {} cameras but only {} are available; using all of them",
            wanted,
            usable.len()
        );
    }
    usable.truncate(wanted);

    let targets = usable
        .iter()
        .flat_map(|camera| {
            (1..=connections_per_camera).map(move |number| {
                ConnectionTarget::new(camera.camera_id.as_str(), number, camera.stream_url.as_str())
            })
        })
        .collect();

    Ok(targets)
}
