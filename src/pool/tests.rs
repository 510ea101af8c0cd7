use super::*;
use crate::connection::{
    BackoffPolicy, ConnectionSettings, ConnectionState, ConnectionTarget, FinalStatus,
    MockBehavior, MockStreamSource,
};
use crate::error::{CamloadError, SetupError};
use crate::events::{EventBus, LoadTestEvent};
use crate::inventory::CameraRecord;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn url(camera: usize) -> String {
    format!("http://cams.test/{}/stream", camera)
}

fn targets(count: usize) -> Vec<ConnectionTarget> {
    (0..count)
        .map(|i| ConnectionTarget::new(i.to_string(), 1, url(i)))
        .collect()
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        max_consecutive_failures: 3,
        backoff: BackoffPolicy::fixed(Duration::from_millis(200), 2.0, Duration::from_secs(2)),
        ..ConnectionSettings::default()
    }
}

fn pool_settings() -> PoolSettings {
    PoolSettings {
        max_inflight_connects: 16,
        progress_interval: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(5),
        sample_interval: Duration::from_secs(1),
        sample_resources: false,
    }
}

fn pool(source: Arc<MockStreamSource>, events: EventBus) -> ConnectionPool {
    ConnectionPool::new(source, settings(), pool_settings(), events)
}

#[tokio::test(start_paused = true)]
async fn test_all_healthy_targets_stream_for_the_whole_window() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::healthy()));
    let pool = pool(source.clone(), EventBus::default());
    let cancel = CancellationToken::new();

    let report = pool
        .run(targets(50), Duration::from_secs(10), &cancel)
        .await
        .unwrap();

    assert_eq!(report.attempted, 50);
    assert_eq!(report.successful, 50);
    assert_eq!(report.active_at_end, 50);
    assert_eq!(report.failed, 0);
    assert_eq!(report.total_reconnections, 0);
    assert_eq!(report.reconnection_rate, 0.0);
    assert_eq!(report.stop_reason, StopReason::DurationElapsed);
    assert!(report.total_frames >= 50 * 99);
    assert!(report.aggregate_fps > 490.0);
    assert_eq!(report.peak_concurrent, 50);
    assert!(report.top_unstable_cameras.is_empty());
    assert!(report.resources.is_none());
    let fps = report.fps_distribution.as_ref().unwrap();
    assert!(fps.min > 9.5 && fps.max <= 10.2, "{:?}", fps);
    assert!(fps.std_dev < 0.2);
    assert_eq!(report.cameras.len(), 50);
    assert!(report
        .connections
        .iter()
        .all(|m| m.final_status == Some(FinalStatus::Cancelled)));

    // Connects are not serialized behind each other
    let opens = source.open_times();
    assert_eq!(opens.len(), 50);
    let first = opens.iter().min().unwrap();
    let last = opens.iter().max().unwrap();
    assert!(*last - *first < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_failing_targets_close_while_others_keep_streaming() {
    let mut source = MockStreamSource::new(MockBehavior::healthy());
    for camera in 0..10 {
        source = source.with_behavior(url(camera), MockBehavior::RefuseConnect);
    }
    let pool = pool(Arc::new(source), EventBus::default());
    let cancel = CancellationToken::new();

    let report = pool
        .run(targets(50), Duration::from_secs(10), &cancel)
        .await
        .unwrap();

    assert_eq!(report.attempted, 50);
    assert_eq!(report.successful, 40);
    assert_eq!(report.active_at_end, 40);
    assert_eq!(report.failed, 10);

    for metrics in &report.connections {
        let camera: usize = metrics.camera_id.parse().unwrap();
        if camera < 10 {
            assert_eq!(metrics.state, ConnectionState::Closed);
            assert_eq!(metrics.final_status, Some(FinalStatus::Failed));
            assert_eq!(metrics.reconnections, 3);
        } else {
            assert_eq!(metrics.state, ConnectionState::Streaming);
            assert_eq!(metrics.reconnections, 0);
        }
    }

    assert_eq!(report.total_reconnections, 30);
    assert!((report.reconnection_rate - 30.0 / 40.0).abs() < 1e-9);

    let unstable = &report.top_unstable_cameras;
    assert_eq!(unstable.len(), TOP_UNSTABLE_LIMIT);
    assert_eq!(unstable[0].connection_id, "camera_0_conn_1");
    assert!(unstable.iter().all(|c| c.reconnections == 3 && c.errors_count == 3));
    assert!(unstable.iter().all(|c| (c.stability_score - 0.7).abs() < 1e-9));
    assert!(unstable.iter().all(|c| c.total_frames == 0 && c.avg_fps == 0.0));

    // Failed connections stay out of the frame-rate distribution
    assert!(report.fps_distribution.unwrap().min > 9.0);
}

#[tokio::test(start_paused = true)]
async fn test_peak_concurrency_outlives_dropped_streams() {
    let mut source = MockStreamSource::new(MockBehavior::healthy());
    for camera in 0..4 {
        source = source.with_behavior(url(camera), MockBehavior::Stall);
    }
    let settings = ConnectionSettings {
        read_timeout: Duration::from_secs(2),
        max_consecutive_failures: 1,
        ..settings()
    };
    let pool = ConnectionPool::new(Arc::new(source), settings, pool_settings(), EventBus::default());

    let report = pool
        .run(targets(10), Duration::from_secs(6), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.peak_concurrent, 10);
    assert_eq!(report.active_at_end, 6);
    assert_eq!(report.failed, 4);
    assert_eq!(report.successful, 6);
}

#[tokio::test(start_paused = true)]
async fn test_resource_sampling_produces_summary() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::healthy()));
    let sampling = PoolSettings {
        sample_resources: true,
        ..pool_settings()
    };
    let pool = ConnectionPool::new(source, settings(), sampling, EventBus::default());

    let report = pool
        .run(targets(3), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    let resources = report.resources.unwrap();
    assert!(resources.samples >= 3, "{:?}", resources);
    assert!(resources.peak_cpu_percent >= resources.avg_cpu_percent);
    assert!(resources.peak_memory_percent > 0.0);
}

#[test]
fn test_abandoned_connection_counts_as_failed_not_active() {
    let target = ConnectionTarget::new("1", 1, &url(1));
    let mut measured = crate::connection::ConnectionMetrics::new(&target);
    measured.state = ConnectionState::Streaming;
    measured.frames = 100;

    let merged = super::orchestrator::merge_final(measured, None);
    assert_eq!(merged.state, ConnectionState::Closed);
    assert_eq!(merged.final_status, Some(FinalStatus::Abandoned));

    let report = TestRunReport::from_snapshots(
        "abandoned".to_string(),
        chrono::Utc::now(),
        Duration::from_secs(10),
        StopReason::DurationElapsed,
        vec![merged],
    );
    assert_eq!(report.successful, 1);
    assert_eq!(report.active_at_end, 0);
    assert_eq!(report.failed, 1);
}

#[test]
fn test_fps_distribution_percentiles() {
    let fps = FpsDistribution::from_values(&[5.0, 1.0, 4.0, 2.0, 3.0]).unwrap();

    assert_eq!(fps.min, 1.0);
    assert_eq!(fps.p25, 2.0);
    assert_eq!(fps.p50, 3.0);
    assert!((fps.p90 - 4.6).abs() < 1e-9);
    assert_eq!(fps.max, 5.0);
    assert_eq!(fps.mean, 3.0);
    assert!((fps.std_dev - 2.0f64.sqrt()).abs() < 1e-9);

    assert!(FpsDistribution::from_values(&[]).is_none());
    let single = FpsDistribution::from_values(&[7.5]).unwrap();
    assert_eq!(single.p95, 7.5);
    assert_eq!(single.std_dev, 0.0);
}

#[test]
fn test_resource_summary_peaks_and_averages() {
    let sample = |cpu: f32, memory: f64, recv: u64| ResourceSample {
        elapsed_secs: 1.0,
        cpu_percent: cpu,
        memory_percent: memory,
        memory_used_mb: (memory * 100.0) as u64,
        network_bytes_sent: recv / 10,
        network_bytes_recv: recv,
        active_streams: 4,
    };
    let summary =
        ResourceSummary::from_samples(&[sample(10.0, 40.0, 1000), sample(30.0, 60.0, 5000)]).unwrap();

    assert_eq!(summary.samples, 2);
    assert_eq!(summary.peak_cpu_percent, 30.0);
    assert_eq!(summary.avg_cpu_percent, 20.0);
    assert_eq!(summary.peak_memory_percent, 60.0);
    assert_eq!(summary.avg_memory_percent, 50.0);
    assert_eq!(summary.peak_memory_used_mb, 6000);
    assert_eq!(summary.network_bytes_recv, 5000);
    assert!(ResourceSummary::from_samples(&[]).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_run_closes_everything_within_grace() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::healthy()));
    let pool = Arc::new(pool(source, EventBus::default()));
    let cancel = CancellationToken::new();

    let run = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(targets(50), Duration::from_secs(60), &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(3)).await;
    let cancelled_at = tokio::time::Instant::now();
    cancel.cancel();

    let report = run.await.unwrap().unwrap();

    assert!(cancelled_at.elapsed() <= Duration::from_secs(5));
    assert_eq!(report.stop_reason, StopReason::Interrupted);
    assert_eq!(report.attempted, 50);
    assert_eq!(report.connections.len(), 50);
    assert!(report.duration_secs < 4.0);
    assert!(report
        .connections
        .iter()
        .all(|m| m.final_status == Some(FinalStatus::Cancelled)));
    assert_eq!(report.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_ends_early_when_every_connection_gives_up() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::RefuseConnect));
    let pool = pool(source, EventBus::default());
    let cancel = CancellationToken::new();

    let report = pool
        .run(targets(5), Duration::from_secs(600), &cancel)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::AllClosed);
    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 5);
    assert!(report.duration_secs < 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_target_list_is_a_setup_error() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::healthy()));
    let pool = pool(source, EventBus::default());

    let result = pool
        .run(Vec::new(), Duration::from_secs(5), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(CamloadError::Setup(SetupError::NoTargets))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_progress_and_lifecycle_events() {
    let source = Arc::new(MockStreamSource::new(MockBehavior::healthy()));
    let events = EventBus::new(64);
    let mut receiver = events.subscribe();
    let pool = pool(source, events);

    let report = pool
        .run(targets(4), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(LoadTestEvent::RunStarted { attempted: 4, .. })));
    assert!(matches!(
        seen.last(),
        Some(LoadTestEvent::RunCompleted { successful: 4, .. })
    ));

    let progress: Vec<&ProgressSnapshot> = seen
        .iter()
        .filter_map(|event| match event {
            LoadTestEvent::Progress(progress) => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0].elapsed_secs, 2);
    assert_eq!(progress[0].streaming, 4);
    assert!(progress[1].total_frames > progress[0].total_frames);
    assert_eq!(report.attempted, 4);
}

#[test]
fn test_camera_aggregates_sum_to_connection_totals() {
    let targets: Vec<ConnectionTarget> = (0..6)
        .map(|i| ConnectionTarget::new((i % 2).to_string(), (i / 2 + 1) as u32, url(i % 2)))
        .collect();
    let metrics: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let mut m = crate::connection::ConnectionMetrics::new(target);
            m.frames = (i as u64 + 1) * 10;
            m.bytes_received = (i as u64 + 1) * 1000;
            m.state = ConnectionState::Streaming;
            m
        })
        .collect();

    let cameras = CameraAggregate::group(&metrics, Duration::from_secs(10));

    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0].camera_id, "0");
    assert_eq!(cameras[0].connections, 3);
    assert_eq!(cameras[0].frames, 10 + 30 + 50);
    assert_eq!(cameras[1].frames, 20 + 40 + 60);
    let camera_total: u64 = cameras.iter().map(|c| c.frames).sum();
    let connection_total: u64 = metrics.iter().map(|m| m.frames).sum();
    assert_eq!(camera_total, connection_total);
    assert!((cameras[1].fps - 12.0).abs() < 1e-9);
}

fn inventory() -> Vec<CameraRecord> {
    vec![
        CameraRecord::new("1", "http://h/1", true),
        CameraRecord::new("2", "http://h/2", false),
        CameraRecord::new("3", "", true),
        CameraRecord::new("4", "http://h/4", true),
        CameraRecord::new("5", "http://h/5", true),
    ]
}

#[test]
fn test_build_targets_filters_and_replicates() {
    let targets = build_targets(&inventory(), Some(2), 3, false).unwrap();

    let ids: Vec<String> = targets.iter().map(ConnectionTarget::connection_id).collect();
    assert_eq!(
        ids,
        vec![
            "camera_1_conn_1",
            "camera_1_conn_2",
            "camera_1_conn_3",
            "camera_4_conn_1",
            "camera_4_conn_2",
            "camera_4_conn_3",
        ]
    );
    assert!(targets.iter().all(|t| !t.stream_url.is_empty()));
}

#[test]
fn test_build_targets_uses_what_is_available() {
    let targets = build_targets(&inventory(), Some(50), 1, false).unwrap();
    assert_eq!(targets.len(), 3);

    let targets = build_targets(&inventory(), None, 2, false).unwrap();
    assert_eq!(targets.len(), 6);
}

#[test]
fn test_build_targets_shuffle_keeps_the_same_cameras() {
    let mut rng = StdRng::seed_from_u64(7);
    let targets = build_targets_with_rng(&inventory(), None, 1, true, &mut rng).unwrap();

    let mut cameras: Vec<&str> = targets.iter().map(|t| t.camera_id.as_str()).collect();
    cameras.sort();
    assert_eq!(cameras, vec!["1", "4", "5"]);
}

#[test]
fn test_build_targets_setup_errors() {
    let inactive = vec![CameraRecord::new("1", "http://h/1", false)];
    assert_eq!(
        build_targets(&inactive, None, 1, false).unwrap_err(),
        SetupError::NoActiveCameras
    );
    assert_eq!(
        build_targets(&inventory(), None, 0, false).unwrap_err(),
        SetupError::ZeroConnections
    );
    assert_eq!(
        build_targets(&inventory(), Some(0), 1, false).unwrap_err(),
        SetupError::NoTargets
    );
}
