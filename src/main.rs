//! # rc_drive entry point
//!
//! Wires the pipeline together and runs until Ctrl-C (or `--duration`).
//!
//! ## Threads
//! - **control_loop:** owns the actuator driver; max OS priority, optionally
//!   pinned to `control.core`. Drains the event queue every `loop_period_ms`.
//! - **http_transport:** `tiny_http` server (`GET /`, `GET /data`).
//! - **tokio workers:** WebSocket listener + one task per connection.
//! - **event_exporter:** drains the event recorder into CSV.
//!
//! ## Shutdown
//! transports stop (open sockets report disconnects) → control loop stops and
//! applies neutral → event trace flushed → summary row appended.
//!
//! ## Outputs
//! - `data/logs/control_events.csv`: per-event trace (nanosecond timestamps).
//! - `data/logs/session_summary.csv`: one row per run.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use parking_lot::Mutex;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use rc_drive::actuation::simulated::{SimulatedBoard, SimulatedOutput, SimulatedPwm};
use rc_drive::config::{Config, TransportMode};
use rc_drive::control::control_loop::ControlLoop;
use rc_drive::transport::{EventQueue, event_queue, http::HttpTransport, socket::SocketTransport};
use rc_drive::utils::{
    export::export_summary_csv,
    metrics::{EventRecorder, Metrics, SharedMetrics},
};

type VehicleLoop = ControlLoop<EventQueue, SimulatedOutput, SimulatedPwm>;

#[derive(Debug, Parser)]
#[command(name = "rc_drive", version, about = "Realtime drive pipeline for a remotely operated vehicle")]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override transport.mode from the configuration
    #[arg(short, long, value_enum)]
    transport: Option<TransportMode>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    duration: Option<u64>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(mode) = cli.transport {
        config.transport.mode = mode;
    }

    info!("=== RC DRIVE START ===");
    let started = Instant::now();

    // ========================================================================
    // Event Recording System
    // ========================================================================
    let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
    let event_recorder = Arc::new(EventRecorder::new());
    if let Err(e) = event_recorder.start_exporter(&config.logging.events_csv) {
        warn!(
            "Event trace disabled, cannot write {}: {}",
            config.logging.events_csv.display(),
            e
        );
    }

    // ========================================================================
    // Control loop: sole owner of the actuators
    // ========================================================================
    let (events, queue) = event_queue(
        config.transport.queue_capacity,
        metrics.clone(),
        event_recorder.clone(),
    );
    let board = SimulatedBoard::new(config.motor_pwm(), config.servo_pwm());
    let running = Arc::new(AtomicBool::new(true));

    let control = ControlLoop::new(
        queue,
        board.driver(),
        config.loop_settings(),
        running.clone(),
        metrics.clone(),
        event_recorder.clone(),
    );
    let control_handle = spawn_control_thread(control, &config).context("Failed to spawn control loop")?;

    // ========================================================================
    // Transports: producers into the event queue
    // ========================================================================
    let socket = if config.transport.mode.socket() {
        Some(
            SocketTransport::start(config.transport.socket_addr, events.clone())
                .await
                .context("Failed to start socket transport")?,
        )
    } else {
        None
    };
    let socket_port = socket.as_ref().map(|s| s.local_addr().port());
    let mut http = if config.transport.mode.http() {
        Some(
            HttpTransport::start(
                config.transport.http_addr,
                events.clone(),
                config.reply_timeout(),
                socket_port,
            )
            .context("Failed to start HTTP transport")?,
        )
    } else {
        None
    };
    drop(events);

    wait_for_stop(cli.duration).await;

    // ========================================================================
    // Shutdown
    // ========================================================================
    if let Some(socket) = socket {
        socket.stop().await;
    }
    if let Some(http) = http.as_mut() {
        http.stop();
    }

    // Let the loop drain the final disconnects before it exits.
    tokio::time::sleep(Duration::from_millis(config.control.loop_period_ms.saturating_mul(2))).await;
    running.store(false, Ordering::Release);

    match tokio::task::spawn_blocking(move || control_handle.join()).await {
        Ok(Ok(())) => info!("[Main] control loop joined"),
        Ok(Err(_)) => error!("[Main] control loop panicked"),
        Err(e) => error!("[Main] failed to join control loop: {}", e),
    }

    let snapshot = board.snapshot();
    info!(
        "[Main] final outputs: in1={:?} in2={:?} motor_duty={} servo_duty={}",
        snapshot.in1, snapshot.in2, snapshot.motor_duty, snapshot.servo_duty
    );

    event_recorder.stop_exporter();
    if event_recorder.dropped() > 0 {
        warn!("[Main] event trace dropped {} events", event_recorder.dropped());
    }

    let run_secs = started.elapsed().as_secs_f64();
    if let Err(e) = export_summary_csv(&metrics, run_secs, &config.logging.summary_csv) {
        error!("Failed to export summary: {}", e);
    }

    info!("=== RC DRIVE FINISHED ({:.1}s) ===", run_secs);
    Ok(())
}

async fn wait_for_stop(duration: Option<u64>) {
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("[Main] Ctrl-C received, stopping"),
            Err(e) => error!("[Main] cannot listen for Ctrl-C: {}", e),
        },
        _ = deadline => info!("[Main] run duration elapsed, stopping"),
    }
}

/// Spawns the control loop on its own thread, at max OS priority when
/// configured, pinned to `control.core` when set.
fn spawn_control_thread(control: VehicleLoop, config: &Config) -> std::io::Result<JoinHandle<()>> {
    let core = config.control.core;
    let builder = thread::Builder::new().name("control_loop".to_string());

    if config.control.realtime_priority {
        builder.spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                warn!("[Main] control loop runs at default priority: {:?}", e);
            }
            run_control(control, core);
        })
    } else {
        builder.spawn(move || run_control(control, core))
    }
}

fn run_control(mut control: VehicleLoop, core: Option<usize>) {
    if let Some(core) = core {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        match core_ids.into_iter().find(|c| c.id == core) {
            Some(core_id) if core_affinity::set_for_current(core_id) => {
                info!("[Main] control loop pinned to core {}", core)
            }
            Some(_) => error!("Failed to pin control loop to core {}", core),
            None => error!("Core {} not found among available cores", core),
        }
    }
    control.run();
}
