//! control_loop.rs
//! The single thread that owns the actuators.
//!
//! Every cycle:
//! 1. drain the transport queue (connects, disconnects, payloads) in order
//! 2. decode payloads; a newer valid command supersedes an older one
//! 3. disconnect → neutral immediately, dropping commands queued before it
//! 4. idle check → neutral once per session that went silent
//! 5. apply the surviving command (if any) through mapper → driver
//!
//! Periodic release uses `SpinSleeper`; a cycle that takes longer than the
//! period counts as an overrun.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::actuation::{
    ActuatorTarget,
    driver::ActuatorDriver,
    peripheral::{DigitalOutput, PwmChannel},
};
use crate::command::{
    ControlCommand,
    decoder::{decode_bytes, decode_query},
    mapper::SignalMapper,
};
use crate::control::supervisor::{
    DEFAULT_IDLE_TIMEOUT, FailSafe, FailSafeReason, LinkState, SessionSupervisor,
};
use crate::error::DecodeError;
use crate::transport::{
    CommandPayload, ConnectionId, InboundEvent, PayloadBody, Reply, TransportAdapter,
};
use crate::utils::metrics::{Event, EventRecorder, SharedMetrics, push_capped_u64};

pub const DEFAULT_LOOP_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub period: Duration,
    pub idle_timeout: Duration,
    pub mapper: SignalMapper,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_LOOP_PERIOD,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            mapper: SignalMapper::default(),
        }
    }
}

/// What one cycle did; returned by `step` for callers that drive the loop by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub events: usize,
    pub rejected: usize,
    pub fail_safes: Vec<FailSafe>,
    pub applied: Option<ActuatorTarget>,
}

struct Pending {
    command: ControlCommand,
    connection: ConnectionId,
    received_at: Instant,
}

pub struct ControlLoop<T, O, P>
where
    T: TransportAdapter,
    O: DigitalOutput,
    P: PwmChannel,
{
    transport: T,
    driver: ActuatorDriver<O, P>,
    supervisor: SessionSupervisor,
    mapper: SignalMapper,
    period: Duration,
    running: Arc<AtomicBool>,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
    inbox: Vec<InboundEvent>,
    idle: Vec<FailSafe>,
}

impl<T, O, P> ControlLoop<T, O, P>
where
    T: TransportAdapter,
    O: DigitalOutput,
    P: PwmChannel,
{
    pub fn new(
        transport: T,
        driver: ActuatorDriver<O, P>,
        settings: LoopSettings,
        running: Arc<AtomicBool>,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) -> Self {
        Self {
            transport,
            driver,
            supervisor: SessionSupervisor::new(settings.idle_timeout),
            mapper: settings.mapper,
            period: settings.period,
            running,
            metrics,
            event_recorder,
            inbox: Vec::with_capacity(64),
            idle: Vec::new(),
        }
    }

    pub fn driver(&self) -> &ActuatorDriver<O, P> {
        &self.driver
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// Periodic loop until `running` is cleared, then neutral.
    pub fn run(&mut self) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_release = Instant::now() + self.period;

        info!(
            "[ControlLoop] started: period={}ms idle_timeout={}ms",
            self.period.as_millis(),
            self.supervisor.idle_timeout().as_millis()
        );

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_release {
                sleeper.sleep(next_release - now);
            }

            let start = Instant::now();
            self.step(start);
            let exec_us = start.elapsed().as_micros() as u64;

            {
                let mut m = self.metrics.lock();
                m.total_cycles += 1;
                m.max_cycle_us = m.max_cycle_us.max(exec_us);
                if exec_us > self.period.as_micros() as u64 {
                    m.loop_overruns += 1;
                }
            }
            if exec_us > self.period.as_micros() as u64 {
                self.event_recorder.record(Event::LoopOverrun {
                    ts_ns: self.event_recorder.now_ns(),
                    exec_us,
                });
                warn!("[ControlLoop] overrun: cycle took {}us", exec_us);
            }

            next_release += self.period;
            // Skip missed releases instead of bursting to catch up.
            let after = Instant::now();
            if next_release < after {
                next_release = after + self.period;
            }
        }

        self.shutdown();
    }

    /// One drain-decide-apply cycle at time `now`.
    pub fn step(&mut self, now: Instant) -> CycleReport {
        let mut report = CycleReport::default();
        let mut pending: Option<Pending> = None;

        self.inbox.clear();
        report.events = self.transport.poll_events(&mut self.inbox);

        let mut inbox = std::mem::take(&mut self.inbox);
        for event in inbox.drain(..) {
            match event {
                InboundEvent::Connected(connection) => self.open_session(connection, now),
                InboundEvent::Disconnected(connection) => {
                    let fail_safe = self.supervisor.on_disconnect(connection);
                    self.record_session_closed(connection);
                    if pending.take().is_some() {
                        self.metrics.lock().commands_superseded += 1;
                    }
                    self.force_neutral(fail_safe);
                    report.fail_safes.push(fail_safe);
                }
                InboundEvent::Command(payload) => match self.accept(payload) {
                    Some(next) => {
                        if pending.replace(next).is_some() {
                            self.metrics.lock().commands_superseded += 1;
                        }
                    }
                    None => report.rejected += 1,
                },
            }
        }
        self.inbox = inbox;

        self.idle.clear();
        self.supervisor.poll(now, &mut self.idle);
        let idle = std::mem::take(&mut self.idle);
        for &fail_safe in &idle {
            self.force_neutral(fail_safe);
            report.fail_safes.push(fail_safe);
        }
        self.idle = idle;

        // A command whose own session just timed out is stale.
        if let Some(p) = pending.take() {
            if self.supervisor.state(p.connection) == LinkState::Idle {
                self.metrics.lock().commands_superseded += 1;
            } else {
                report.applied = Some(self.apply_command(p));
            }
        }

        report
    }

    /// Stop driving: neutral, whatever the sessions say.
    pub fn shutdown(&mut self) {
        self.driver.shutdown();
        self.event_recorder.record(Event::FailSafe {
            ts_ns: self.event_recorder.now_ns(),
            connection: ConnectionId::IMPLICIT,
            reason: FailSafeReason::Shutdown,
        });
        info!("[ControlLoop] stopped, actuators neutral");
    }

    fn open_session(&mut self, connection: ConnectionId, now: Instant) {
        self.supervisor.on_connect(connection, now);
        self.metrics.lock().sessions_opened += 1;
        self.event_recorder.record(Event::SessionOpened {
            ts_ns: self.event_recorder.now_ns(),
            connection,
        });
    }

    fn record_session_closed(&self, connection: ConnectionId) {
        self.event_recorder.record(Event::SessionClosed {
            ts_ns: self.event_recorder.now_ns(),
            connection,
        });
    }

    /// Decode one payload and answer its sender, if it expects an answer.
    fn accept(&mut self, payload: CommandPayload) -> Option<Pending> {
        let CommandPayload {
            connection,
            body,
            received_at,
            reply,
        } = payload;

        let decoded: Result<ControlCommand, DecodeError> = match &body {
            PayloadBody::Frame(bytes) => decode_bytes(bytes),
            PayloadBody::Query(query) => decode_query(query),
        };

        let ts_ns = self.event_recorder.now_ns();
        match decoded {
            Ok(command) => {
                self.supervisor.on_command(connection, received_at);
                self.event_recorder.record(Event::CommandAccepted {
                    ts_ns,
                    connection,
                    throttle: command.throttle(),
                    steering: command.steering(),
                });
                if let Some(tx) = reply {
                    // Client may have given up waiting.
                    let _ = tx.try_send(Reply::Accepted);
                }
                Some(Pending {
                    command,
                    connection,
                    received_at,
                })
            }
            Err(e) => {
                self.metrics.lock().commands_rejected += 1;
                self.event_recorder.record(Event::CommandRejected {
                    ts_ns,
                    connection,
                    reason: e.kind(),
                });
                debug!("[ControlLoop] rejected payload from {}: {}", connection, e);
                if let Some(tx) = reply {
                    let _ = tx.try_send(Reply::Rejected(e));
                }
                None
            }
        }
    }

    fn apply_command(&mut self, pending: Pending) -> ActuatorTarget {
        let target = self.mapper.map(&pending.command);
        self.driver.apply(target);

        let latency_us = pending.received_at.elapsed().as_micros() as u64;
        {
            let mut m = self.metrics.lock();
            m.commands_applied += 1;
            push_capped_u64(&mut m.queue_latency_us, latency_us);
        }
        self.event_recorder
            .record(Event::target_applied(self.event_recorder.now_ns(), &target));
        target
    }

    fn force_neutral(&mut self, fail_safe: FailSafe) {
        self.driver.apply_neutral();
        self.metrics.lock().record_failsafe(fail_safe.reason);
        self.event_recorder.record(Event::FailSafe {
            ts_ns: self.event_recorder.now_ns(),
            connection: fail_safe.connection,
            reason: fail_safe.reason,
        });
        warn!(
            "[ControlLoop] fail-safe ({}) on {}, actuators neutral",
            fail_safe.reason, fail_safe.connection
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::{
        MotorDirection,
        peripheral::PwmConfig,
        simulated::{SimulatedBoard, SimulatedOutput, SimulatedPwm},
    };
    use crate::transport::{EventSender, EventQueue, event_queue};
    use crate::utils::metrics::Metrics;
    use crossbeam::channel::bounded;
    use parking_lot::Mutex;

    type TestLoop = ControlLoop<EventQueue, SimulatedOutput, SimulatedPwm>;

    fn rig() -> (TestLoop, EventSender, SimulatedBoard, SharedMetrics) {
        let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
        let recorder = Arc::new(EventRecorder::new());
        let (tx, rx) = event_queue(64, metrics.clone(), recorder.clone());
        let board = SimulatedBoard::new(PwmConfig::MOTOR, PwmConfig::SERVO);
        let control = ControlLoop::new(
            rx,
            board.driver(),
            LoopSettings::default(),
            Arc::new(AtomicBool::new(true)),
            metrics.clone(),
            recorder,
        );
        (control, tx, board, metrics)
    }

    fn send(tx: &EventSender, connection: ConnectionId, frame: &str) {
        tx.submit(CommandPayload::frame(connection, frame.as_bytes().to_vec()))
            .unwrap();
    }

    #[test]
    fn frame_is_decoded_mapped_and_applied() {
        let (mut control, tx, board, _) = rig();
        let id = tx.open_connection();
        send(&tx, id, "120,-50");

        let report = control.step(Instant::now());
        let applied = report.applied.unwrap();
        assert_eq!(applied.motor_duty(), 120);
        assert_eq!(applied.motor_direction(), MotorDirection::Forward);
        assert_eq!(applied.servo_angle_deg(), 112);
        assert_eq!(board.snapshot().motor_duty, 120);
    }

    #[test]
    fn only_latest_command_in_a_drain_is_applied() {
        let (mut control, tx, board, metrics) = rig();
        let id = tx.open_connection();
        send(&tx, id, "10,0");
        send(&tx, id, "20,0");
        send(&tx, id, "30,0");

        let report = control.step(Instant::now());
        assert_eq!(report.applied.map(|t| t.motor_duty()), Some(30));
        assert_eq!(board.motor_duty_history(), vec![30]);
        let m = metrics.lock();
        assert_eq!((m.commands_applied, m.commands_superseded), (1, 2));
    }

    #[test]
    fn rejected_payload_leaves_hardware_untouched() {
        let (mut control, tx, board, metrics) = rig();
        let id = tx.open_connection();
        send(&tx, id, "200,0");
        control.step(Instant::now());
        let before = control.driver().last_applied();

        send(&tx, id, "abc");
        send(&tx, id, "100");
        let report = control.step(Instant::now());

        assert_eq!(report.rejected, 2);
        assert!(report.applied.is_none());
        assert_eq!(control.driver().last_applied(), before);
        assert_eq!(board.snapshot().motor_duty, 200);
        assert_eq!(metrics.lock().commands_rejected, 2);
    }

    #[test]
    fn disconnect_forces_neutral_and_discards_earlier_commands() {
        let (mut control, tx, board, metrics) = rig();
        let id = tx.open_connection();
        send(&tx, id, "200,0");
        control.step(Instant::now());

        send(&tx, id, "150,20");
        tx.close_connection(id);
        let report = control.step(Instant::now());

        assert!(report.applied.is_none());
        assert_eq!(report.fail_safes.len(), 1);
        assert_eq!(control.driver().last_applied(), Some(ActuatorTarget::NEUTRAL));
        assert_eq!(board.snapshot().motor_duty, 0);
        assert_eq!(metrics.lock().failsafe_disconnect, 1);
    }

    #[test]
    fn command_after_disconnect_in_same_drain_survives() {
        let (mut control, tx, _, _) = rig();
        let a = tx.open_connection();
        tx.close_connection(a);
        send(&tx, ConnectionId::IMPLICIT, "50,0");

        let report = control.step(Instant::now());
        assert_eq!(report.applied.map(|t| t.motor_duty()), Some(50));
    }

    #[test]
    fn silence_forces_neutral_once() {
        let (mut control, tx, board, metrics) = rig();
        let t0 = Instant::now();
        let id = tx.open_connection();
        send(&tx, id, "200,0");
        control.step(t0);

        assert!(control.step(t0 + Duration::from_millis(100)).fail_safes.is_empty());

        let report = control.step(t0 + Duration::from_millis(400));
        assert_eq!(report.fail_safes[0].reason, FailSafeReason::IdleTimeout);
        assert_eq!(board.snapshot().motor_duty, 0);

        assert!(control.step(t0 + Duration::from_millis(800)).fail_safes.is_empty());
        assert_eq!(metrics.lock().failsafe_idle, 1);
        assert_eq!(control.supervisor().state(id), LinkState::Idle);
    }

    #[test]
    fn query_payload_gets_a_reply() {
        let (mut control, tx, _, _) = rig();
        let (reply_tx, reply_rx) = bounded(1);
        tx.submit(CommandPayload::query(
            ConnectionId::IMPLICIT,
            "speed=-80&turn=100".to_string(),
            reply_tx,
        ))
        .unwrap();

        let report = control.step(Instant::now());
        assert_eq!(reply_rx.try_recv(), Ok(Reply::Accepted));
        let target = report.applied.unwrap();
        assert_eq!(target.motor_direction(), MotorDirection::Reverse);
        assert_eq!(target.servo_angle_deg(), 45);

        let (reply_tx, reply_rx) = bounded(1);
        tx.submit(CommandPayload::query(ConnectionId::IMPLICIT, "speed=1".to_string(), reply_tx))
            .unwrap();
        control.step(Instant::now());
        assert_eq!(
            reply_rx.try_recv(),
            Ok(Reply::Rejected(DecodeError::MissingField("turn")))
        );
    }

    #[test]
    fn run_exits_on_flag_and_leaves_neutral() {
        let (mut control, tx, board, metrics) = rig();
        let id = tx.open_connection();
        send(&tx, id, "255,100");
        control.step(Instant::now());
        assert_eq!(board.snapshot().motor_duty, 255);

        control.running.store(false, Ordering::Release);
        control.run();

        assert_eq!(control.driver().last_applied(), Some(ActuatorTarget::NEUTRAL));
        assert_eq!(board.snapshot().motor_duty, 0);
        assert_eq!(metrics.lock().total_cycles, 0);
    }
}
