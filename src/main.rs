use anyhow::Result;
use camload::config::SearchMode;
use camload::{
    adaptive, capacity, inventory, AdaptiveDriver, CamloadConfig, CamloadError, CameraRecord,
    ConnectionPool, EventBus, EventFilter, EventReceiver, HttpStreamSource, LoadTestEvent,
    PoolRunner, StopReason,
};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_SETUP_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "camload")]
#[command(about = "Concurrent MJPEG camera stream load tester and capacity estimator")]
#[command(version)]
#[command(long_about = "Opens many simultaneous multipart/x-mixed-replace camera streams, \
measures per-connection throughput and reconnect behavior, and estimates how many \
connections and unique cameras a streaming server can sustain.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "camload.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without running a test")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one load test at a fixed concurrency
    Run {
        #[command(flatten)]
        test: TestArgs,

        /// Number of cameras to test
        #[arg(long)]
        cameras: Option<usize>,

        /// Test duration in seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Search for the highest stable concurrency level
    Adaptive {
        #[command(flatten)]
        test: TestArgs,

        /// Search strategy
        #[arg(long, value_parser = ["linear", "binary"])]
        mode: Option<String>,

        /// First concurrency level to probe
        #[arg(long)]
        initial: Option<usize>,

        #[arg(long)]
        min: Option<usize>,

        #[arg(long)]
        max: Option<usize>,

        /// Stop once the search interval is narrower than this
        #[arg(long)]
        granularity: Option<usize>,

        /// Step size for the linear strategy
        #[arg(long)]
        step: Option<usize>,

        #[arg(long)]
        max_iterations: Option<usize>,

        /// Duration of each iteration in seconds
        #[arg(long)]
        iteration_duration: Option<u64>,
    },
    /// Serve simulated MJPEG cameras and their inventory API
    #[cfg(feature = "simulator")]
    Simulate {
        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        cameras: Option<usize>,

        #[arg(long)]
        fps: Option<u32>,

        /// Frame payload size in bytes
        #[arg(long)]
        frame_size: Option<usize>,

        /// Reject streams beyond this many with 503
        #[arg(long)]
        max_streams: Option<usize>,
    },
}

#[derive(clap::Args, Debug)]
struct TestArgs {
    /// Camera inventory API URL
    #[arg(long)]
    api_url: Option<String>,

    /// Camera inventory JSON file
    #[arg(long, conflicts_with = "api_url")]
    inventory_file: Option<String>,

    /// Parallel connections opened to each camera
    #[arg(long)]
    connections_per_camera: Option<u32>,

    /// Keep inventory order instead of shuffling
    #[arg(long)]
    no_shuffle: bool,

    /// Write the JSON result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunOutput {
    report: camload::TestRunReport,
    capacity: camload::CapacityEstimate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;
    let exit_code = run(args).await?;

    info!("camload exited with code: {}", exit_code);
    // Flush the file log before the process goes away
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    info!("Starting camload v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match CamloadConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("✗ Failed to load configuration: {}", e);
            return Ok(EXIT_SETUP_FAILURE);
        }
    };

    if let Some(command) = &args.command {
        apply_overrides(&mut config, command);
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        return Ok(EXIT_SETUP_FAILURE);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(EXIT_OK);
    }

    let command = match args.command {
        Some(command) => command,
        None => {
            Args::command().print_help()?;
            return Ok(EXIT_SETUP_FAILURE);
        }
    };

    let events = EventBus::new(1024);
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), events.clone());
    spawn_progress_logger(&events);

    let exit_code = match execute(command, &config, &events, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("✗ {}", e);
            EXIT_SETUP_FAILURE
        }
    };

    Ok(exit_code)
}

async fn execute(
    command: Command,
    config: &CamloadConfig,
    events: &EventBus,
    cancel: &CancellationToken,
) -> std::result::Result<i32, CamloadError> {
    match command {
        Command::Run { test, .. } => {
            let cameras = match load_cameras(config, cancel).await? {
                Some(cameras) => cameras,
                None => return Ok(EXIT_INTERRUPTED),
            };

            let targets = camload::build_targets(
                &cameras,
                Some(config.test.cameras),
                config.test.connections_per_camera,
                config.inventory.shuffle,
            )?;

            let source = Arc::new(HttpStreamSource::new(&config.connection)?);
            let pool = ConnectionPool::from_config(source, config, events.clone());
            let report = pool
                .run(
                    targets,
                    Duration::from_secs(config.test.duration_secs),
                    cancel,
                )
                .await?;

            let estimate = capacity::estimate(
                &report,
                config.test.connections_per_camera,
                &config.capacity,
            );
            info!(
                "Estimated max connections: {} ({:?} confidence, {})",
                estimate.estimated_max_connections,
                estimate.confidence,
                if estimate.stable { "stable" } else { "unstable" }
            );

            if report.stop_reason == StopReason::Interrupted {
                warn!("Run was interrupted; the report covers a partial window");
            }

            write_output(
                &RunOutput {
                    report,
                    capacity: estimate,
                },
                test.output.as_ref(),
            )
            .await?;
            Ok(EXIT_OK)
        }
        Command::Adaptive { test, .. } => {
            let cameras = match load_cameras(config, cancel).await? {
                Some(cameras) => cameras,
                None => return Ok(EXIT_INTERRUPTED),
            };

            let source = Arc::new(HttpStreamSource::new(&config.connection)?);
            let pool = ConnectionPool::from_config(source, config, events.clone());
            let runner = PoolRunner::new(
                pool,
                cameras,
                config.test.connections_per_camera,
                config.inventory.shuffle,
                Duration::from_secs(config.adaptive.iteration_duration_secs),
            );
            let driver = AdaptiveDriver::new(
                runner,
                adaptive::from_config(&config.adaptive),
                config.capacity.clone(),
                config.test.connections_per_camera,
                config.adaptive.max_iterations,
                events.clone(),
            );

            let outcome = driver.run(cancel).await?;
            if outcome.iterations.is_empty() && outcome.interrupted {
                return Ok(EXIT_INTERRUPTED);
            }

            match outcome.recommended_limit() {
                Some(limit) => info!(
                    "Maximum stable level: {:?}, recommended production limit: {}",
                    outcome.best_level, limit
                ),
                None => warn!("No stable level found"),
            }

            write_output(&outcome, test.output.as_ref()).await?;
            Ok(EXIT_OK)
        }
        #[cfg(feature = "simulator")]
        Command::Simulate { .. } => {
            let simulator = camload::SimulatorServer::new(config.simulator.clone())
                .start()
                .await?;
            println!("Inventory: {}", simulator.inventory_url());
            println!("Example stream: {}", simulator.stream_url(0));

            simulator.run_until(cancel).await?;
            Ok(EXIT_OK)
        }
    }
}

/// Fetch the inventory, or `None` if interrupted first
async fn load_cameras(
    config: &CamloadConfig,
    cancel: &CancellationToken,
) -> std::result::Result<Option<Vec<CameraRecord>>, CamloadError> {
    let inventory = inventory::from_config(&config.inventory)?;

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!("Interrupted while loading cameras from {}", inventory.name());
            Ok(None)
        }
        cameras = inventory.cameras() => cameras.map(Some),
    }
}

async fn write_output<T: Serialize>(
    value: &T,
    path: Option<&PathBuf>,
) -> std::result::Result<(), CamloadError> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn apply_overrides(config: &mut CamloadConfig, command: &Command) {
    match command {
        Command::Run {
            test,
            cameras,
            duration,
        } => {
            apply_test_overrides(config, test);
            if let Some(cameras) = cameras {
                config.test.cameras = *cameras;
            }
            if let Some(duration) = duration {
                config.test.duration_secs = *duration;
            }
        }
        Command::Adaptive {
            test,
            mode,
            initial,
            min,
            max,
            granularity,
            step,
            max_iterations,
            iteration_duration,
        } => {
            apply_test_overrides(config, test);
            let adaptive = &mut config.adaptive;
            match mode.as_deref() {
                Some("linear") => adaptive.mode = SearchMode::Linear,
                Some("binary") => adaptive.mode = SearchMode::Binary,
                _ => {}
            }
            if let Some(initial) = initial {
                adaptive.initial_level = *initial;
            }
            if let Some(min) = min {
                adaptive.min_level = *min;
            }
            if let Some(max) = max {
                adaptive.max_level = *max;
            }
            if let Some(granularity) = granularity {
                adaptive.granularity = *granularity;
            }
            if step.is_some() {
                adaptive.step = *step;
            }
            if let Some(max_iterations) = max_iterations {
                adaptive.max_iterations = *max_iterations;
            }
            if let Some(duration) = iteration_duration {
                adaptive.iteration_duration_secs = *duration;
            }
        }
        #[cfg(feature = "simulator")]
        Command::Simulate {
            ip,
            port,
            cameras,
            fps,
            frame_size,
            max_streams,
        } => {
            let simulator = &mut config.simulator;
            if let Some(ip) = ip {
                simulator.ip = ip.clone();
            }
            if let Some(port) = port {
                simulator.port = *port;
            }
            if let Some(cameras) = cameras {
                simulator.cameras = *cameras;
            }
            if let Some(fps) = fps {
                simulator.fps = *fps;
            }
            if let Some(frame_size) = frame_size {
                simulator.frame_size = *frame_size;
            }
            if max_streams.is_some() {
                simulator.max_streams = *max_streams;
            }
        }
    }
}

fn apply_test_overrides(config: &mut CamloadConfig, test: &TestArgs) {
    if let Some(url) = &test.api_url {
        config.inventory.api_url = Some(url.clone());
        config.inventory.file = None;
    }
    if let Some(file) = &test.inventory_file {
        config.inventory.file = Some(file.clone());
        config.inventory.api_url = None;
    }
    if let Some(connections) = test.connections_per_camera {
        config.test.connections_per_camera = connections;
    }
    if test.no_shuffle {
        config.inventory.shuffle = false;
    }
}

/// Cancel the run on Ctrl-C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken, events: EventBus) {
    tokio::spawn(async move {
        let reason = wait_for_signal().await;
        info!("Received {}", reason);
        if let Err(e) = events.publish(LoadTestEvent::ShutdownRequested {
            reason: reason.to_string(),
        }) {
            warn!("Failed to publish shutdown event: {}", e);
        }
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}

/// Log progress and iteration events as they arrive
fn spawn_progress_logger(events: &EventBus) {
    let mut receiver = EventReceiver::new(
        events,
        EventFilter::EventTypes(vec!["progress", "iteration_completed"]),
        "progress",
    );

    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            info!("{}", event.description());
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camload={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    };

    // Reports go to stdout, so every log layer writes elsewhere
    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let (writer, guard) = file_log_writer(dir);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# camload configuration file");
    println!("# Every key can also be set through CAMLOAD_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", CamloadConfig::default().to_toml_string()?);
    Ok(())
}

/// Daily rolling `camload.log`; lines are only guaranteed on disk once the guard is dropped
fn file_log_writer(
    dir: &Path,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let appender = tracing_appender::rolling::daily(dir, "camload.log");
    tracing_appender::non_blocking(appender)
}
