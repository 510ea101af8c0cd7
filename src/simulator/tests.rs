use super::*;
use crate::config::{ConnectionConfig, SimulatorConfig};
use crate::connection::{ConnectionTarget, HttpStreamSource, StreamSource};
use crate::inventory::{CameraInventory, HttpInventory};
use crate::parser::{MultipartParser, ParserLimits};
use std::time::Duration;
use tokio::time::timeout;

fn config(cameras: usize, max_streams: Option<usize>) -> SimulatorConfig {
    SimulatorConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
        cameras,
        fps: 20,
        frame_size: 4096,
        max_streams,
    }
}

#[tokio::test]
async fn test_inventory_lists_every_camera() {
    let simulator = SimulatorServer::new(config(3, None)).start().await.unwrap();

    let inventory = HttpInventory::new(simulator.inventory_url(), Duration::from_secs(5)).unwrap();
    let cameras = inventory.cameras().await.unwrap();

    assert_eq!(cameras.len(), 3);
    assert!(cameras.iter().all(|c| c.active));
    assert_eq!(cameras[2].camera_id, "2");
    assert_eq!(cameras[2].stream_url, simulator.stream_url(2));

    simulator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_delivers_parseable_frames() {
    let simulator = SimulatorServer::new(config(2, None)).start().await.unwrap();
    let source = HttpStreamSource::new(&ConnectionConfig::default()).unwrap();
    let target = ConnectionTarget::new("1".to_string(), 1, simulator.stream_url(1));

    let mut stream = source.open(&target).await.unwrap();
    assert_eq!(stream.boundary(), Some("frame"));
    assert_eq!(simulator.active_streams(), 1);

    let mut parser = MultipartParser::new("frame", ParserLimits::default());
    let mut frames = Vec::new();
    while frames.len() < 3 {
        let chunk = timeout(Duration::from_secs(5), stream.next_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        parser.push(&chunk);
        while let Some(frame) = parser.next_frame().unwrap() {
            frames.push(frame.length);
        }
    }

    assert!(frames.iter().all(|length| *length == 4096));

    drop(stream);
    simulator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_camera_is_not_found() {
    let simulator = SimulatorServer::new(config(2, None)).start().await.unwrap();
    let source = HttpStreamSource::new(&ConnectionConfig::default()).unwrap();

    for id in ["2", "abc"] {
        let url = format!("{}/camera/{}/stream.mjpg", simulator.base_url(), id);
        let target = ConnectionTarget::new(id.to_string(), 1, url);
        let error = source.open(&target).await.err().unwrap();
        assert!(error.to_string().contains("404"), "{}", error);
    }

    simulator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_limit_rejects_extra_clients() {
    let simulator = SimulatorServer::new(config(4, Some(1))).start().await.unwrap();
    let source = HttpStreamSource::new(&ConnectionConfig::default()).unwrap();

    let first = ConnectionTarget::new("0".to_string(), 1, simulator.stream_url(0));
    let _open = source.open(&first).await.unwrap();

    let second = ConnectionTarget::new("1".to_string(), 1, simulator.stream_url(1));
    let error = source.open(&second).await.err().unwrap();
    assert!(error.to_string().contains("503"), "{}", error);

    assert_eq!(simulator.active_streams(), 1);
    assert_eq!(simulator.total_streams(), 1);

    drop(_open);
    simulator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let simulator = SimulatorServer::new(config(5, None)).start().await.unwrap();

    let health: serde_json::Value = reqwest::get(format!("{}/health", simulator.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "healthy");
    assert_eq!(health["cameras"], 5);
    assert_eq!(health["active_streams"], 0);

    simulator.shutdown().await.unwrap();
}
