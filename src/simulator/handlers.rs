use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::server::ServerState;

/// Decrements the open-stream count when the response body is dropped
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JPEG-shaped payload: SOI marker, filler, EOI marker
pub(crate) fn synthetic_jpeg(size: usize) -> Bytes {
    let size = size.max(4);
    let mut data = vec![0x5Au8; size];
    data[0] = 0xFF;
    data[1] = 0xD8;
    data[size - 2] = 0xFF;
    data[size - 1] = 0xD9;
    Bytes::from(data)
}

/// Camera list in the camera API shape
pub async fn cameras_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let cameras: Vec<serde_json::Value> = (0..state.cameras)
        .map(|id| {
            serde_json::json!({
                "id": id,
                "name": format!("Simulated camera {}", id),
                "fr_url": format!("{}/camera/{}/stream.mjpg", state.base_url, id),
                "status": 1,
            })
        })
        .collect();

    Json(cameras)
}

/// Handler for MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(
    Path(id): Path<String>,
    State(state): State<ServerState>,
) -> Response {
    let camera = match id.parse::<usize>() {
        Ok(camera) if camera < state.cameras => camera,
        _ => return (StatusCode::NOT_FOUND, format!("unknown camera {}", id)).into_response(),
    };

    let active = state.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
    let guard = StreamGuard(state.active_streams.clone());

    if let Some(max) = state.max_streams {
        if active > max {
            warn!("Rejecting stream for camera {}: {} streams already open", camera, max);
            drop(guard);
            return (StatusCode::SERVICE_UNAVAILABLE, "stream limit reached").into_response();
        }
    }

    state.total_streams.fetch_add(1, Ordering::Relaxed);
    info!("Camera {}: client connected ({} streams open)", camera, active);

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut frame_interval = interval(state.frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frame_id = 0u64;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = frame_interval.tick() => {}
            }

            frame_id += 1;
            let header = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\nX-Camera-ID: {}\r\n\r\n",
                state.frame.len(),
                frame_id,
                camera
            );

            yield Ok::<_, axum::Error>(Bytes::from(header));
            yield Ok(state.frame.clone());
            yield Ok(Bytes::from_static(b"\r\n"));
        }

        debug!("Camera {}: stream ended after {} frames", camera, frame_id);
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "cameras": state.cameras,
        "active_streams": state.active_streams.load(Ordering::Relaxed),
        "total_streams": state.total_streams.load(Ordering::Relaxed),
        "max_streams": state.max_streams,
    });

    (StatusCode::OK, Json(health_info))
}
