
//! Metrics collection and event recording for the control pipeline.
//!
//! Two independent paths:
//! - **EventRecorder:** Lock-free queue (16K capacity) → background CSV export (nanosecond timestamps).
//! - **Metrics:** Shared counters + bounded latency window (1000 points), read at shutdown.
//!
//! Event tracing captures: session open → command accepted/rejected → target applied → fail-safe → session close.

use std::{
    collections::VecDeque,
    fs::{File, create_dir_all},
    io::{self, BufWriter},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::actuation::{ActuatorTarget, MotorDirection};
use crate::control::supervisor::FailSafeReason;
use crate::transport::ConnectionId;

/// Pipeline event. Sequence numbers are assigned by the recorder.
#[derive(Debug, Clone)]
pub enum Event {
    SessionOpened {
        ts_ns: u64,
        connection: ConnectionId,
    },
    SessionClosed {
        ts_ns: u64,
        connection: ConnectionId,
    },
    /// Payload decoded into a command (may still be superseded in the same cycle).
    CommandAccepted {
        ts_ns: u64,
        connection: ConnectionId,
        throttle: i16,
        steering: i16,
    },
    CommandRejected {
        ts_ns: u64,
        connection: ConnectionId,
        reason: &'static str,
    },
    /// Target written to the actuators.
    TargetApplied {
        ts_ns: u64,
        motor_duty: u8,
        direction: MotorDirection,
        servo_angle_deg: u8,
    },
    FailSafe {
        ts_ns: u64,
        connection: ConnectionId,
        reason: FailSafeReason,
    },
    /// Transport could not enqueue a payload (event queue full).
    PayloadDropped {
        ts_ns: u64,
        connection: ConnectionId,
    },
    LoopOverrun {
        ts_ns: u64,
        exec_us: u64,
    },
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_ns: u64,
    event: &'static str,
    connection: Option<u64>,
    detail: String,
}

impl Event {
    pub fn target_applied(ts_ns: u64, target: &ActuatorTarget) -> Self {
        Event::TargetApplied {
            ts_ns,
            motor_duty: target.motor_duty(),
            direction: target.motor_direction(),
            servo_angle_deg: target.servo_angle_deg(),
        }
    }

    fn to_csv_row(&self, seq: u64) -> CsvRow {
        let (ts_ns, event, connection, detail) = match self {
            Event::SessionOpened { ts_ns, connection } => {
                (*ts_ns, "SessionOpened", Some(connection.0), String::new())
            }
            Event::SessionClosed { ts_ns, connection } => {
                (*ts_ns, "SessionClosed", Some(connection.0), String::new())
            }
            Event::CommandAccepted { ts_ns, connection, throttle, steering } => (
                *ts_ns,
                "CommandAccepted",
                Some(connection.0),
                format!("throttle={} steering={}", throttle, steering),
            ),
            Event::CommandRejected { ts_ns, connection, reason } => {
                (*ts_ns, "CommandRejected", Some(connection.0), reason.to_string())
            }
            Event::TargetApplied { ts_ns, motor_duty, direction, servo_angle_deg } => (
                *ts_ns,
                "TargetApplied",
                None,
                format!("duty={} dir={} servo={}", motor_duty, direction, servo_angle_deg),
            ),
            Event::FailSafe { ts_ns, connection, reason } => {
                (*ts_ns, "FailSafe", Some(connection.0), reason.to_string())
            }
            Event::PayloadDropped { ts_ns, connection } => {
                (*ts_ns, "PayloadDropped", Some(connection.0), String::new())
            }
            Event::LoopOverrun { ts_ns, exec_us } => {
                (*ts_ns, "LoopOverrun", None, format!("exec_us={}", exec_us))
            }
        };
        CsvRow { seq, ts_ns, event, connection, detail }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;

/// Non-blocking event recorder with background CSV export.
///
/// `record()` pushes onto a lock-free queue and returns immediately; when the
/// queue is full the event is dropped and counted. `start_exporter()` spawns a
/// consumer that drains the queue into a CSV file until `stop_exporter()`.
pub struct EventRecorder {
    queue: Arc<ArrayQueue<(u64, Event)>>,
    run_start: Instant,
    seq_counter: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    consumer_running: Arc<AtomicBool>,
    consumer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
            seq_counter: Arc::new(AtomicU64::new(1)),
            dropped: Arc::new(AtomicU64::new(0)),
            consumer_running: Arc::new(AtomicBool::new(false)),
            consumer_handle: Arc::new(Mutex::new(None)),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        if self.queue.push((seq, event)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Nanosecond timestamp since recorder creation.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    /// Events waiting for the exporter.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Opens `output_csv` (creating parent directories) and spawns the consumer.
    pub fn start_exporter(&self, output_csv: &Path) -> io::Result<()> {
        let mut guard = self.consumer_handle.lock();
        if guard.is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "exporter already running"));
        }

        if let Some(dir) = output_csv.parent() {
            create_dir_all(dir)?;
        }
        let file = File::create(output_csv)?;

        let queue = self.queue.clone();
        let running = self.consumer_running.clone();
        let dropped = self.dropped.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("event_exporter".to_string())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    // Batch dequeue: drain up to 256 events per poll
                    for _ in 0..256 {
                        match queue.pop() {
                            Some((seq, event)) => {
                                any = true;
                                if let Err(e) = wtr.serialize(event.to_csv_row(seq)) {
                                    error!("[EventRecorder] failed to write row: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                // Final drain after stop
                while let Some((seq, event)) = queue.pop() {
                    wtr.serialize(event.to_csv_row(seq)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[EventRecorder] exporter exiting. dropped_events={}",
                    dropped.load(Ordering::Relaxed)
                );
            })?;

        *guard = Some(handle);
        Ok(())
    }

    /// Stops the consumer after it has drained everything recorded so far.
    pub fn stop_exporter(&self) {
        self.consumer_running.store(false, Ordering::SeqCst);
        let handle = self.consumer_handle.lock().take();
        if let Some(h) = handle {
            if h.join().is_err() {
                error!("[EventRecorder] exporter thread panicked");
            }
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.stop_exporter();
    }
}

/// Pipeline counters, shared between the control loop and the transports.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub total_cycles: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    /// Valid commands replaced by a newer one before being applied.
    pub commands_superseded: u64,
    pub payloads_dropped: u64,
    pub sessions_opened: u64,
    pub failsafe_disconnect: u64,
    pub failsafe_idle: u64,
    pub loop_overruns: u64,
    pub max_cycle_us: u64,

    /// Enqueue → apply latency (microseconds, last 1000 commands)
    pub queue_latency_us: VecDeque<u64>,
}

impl Metrics {
    pub fn record_failsafe(&mut self, reason: FailSafeReason) {
        match reason {
            FailSafeReason::Disconnect => self.failsafe_disconnect += 1,
            FailSafeReason::IdleTimeout => self.failsafe_idle += 1,
            FailSafeReason::Shutdown => {}
        }
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub const MAX_POINTS: usize = 1_000;

/// Appends u64 value to metrics buffer; removes oldest if at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for u64 buffer (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}
