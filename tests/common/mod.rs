//! Shared rig: a control loop on its own thread driving a simulated board.
#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rc_drive::actuation::{
    driver::{pulse_to_duty, servo_pulse_width_us},
    peripheral::PwmConfig,
    simulated::SimulatedBoard,
};
use rc_drive::control::control_loop::{ControlLoop, LoopSettings};
use rc_drive::transport::{EventSender, event_queue};
use rc_drive::utils::metrics::{EventRecorder, Metrics, SharedMetrics};

pub struct Rig {
    pub events: EventSender,
    pub board: SimulatedBoard,
    pub metrics: SharedMetrics,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Rig {
    pub fn start(settings: LoopSettings) -> Self {
        let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
        let recorder = Arc::new(EventRecorder::new());
        let (events, queue) = event_queue(64, metrics.clone(), recorder.clone());
        let board = SimulatedBoard::new(PwmConfig::MOTOR, PwmConfig::SERVO);
        let running = Arc::new(AtomicBool::new(true));

        let mut control = ControlLoop::new(
            queue,
            board.driver(),
            settings,
            running.clone(),
            metrics.clone(),
            recorder,
        );
        let handle = thread::spawn(move || control.run());

        Self {
            events,
            board,
            metrics,
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.handle.take() {
            h.join().unwrap();
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Servo duty register value for `angle` on the default 50 Hz / 16-bit channel.
pub fn servo_duty(angle: u8) -> u32 {
    let cfg = PwmConfig::SERVO;
    pulse_to_duty(servo_pulse_width_us(angle), cfg.resolution_max(), cfg.period_us())
}

/// Poll `cond` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
