//! Host-side stand-in for the vehicle's pin/PWM peripherals.
//!
//! Each output is a handle into one shared `BoardState`, so the binary, tests
//! and benches can observe exactly what the actuator driver wrote.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::actuation::{
    driver::ActuatorDriver,
    peripheral::{DigitalOutput, Level, PwmChannel, PwmConfig},
};

const HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pin {
    In1,
    In2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Motor,
    Servo,
}

/// Pin levels and duty registers as last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub in1: Level,
    pub in2: Level,
    pub motor_duty: u32,
    pub servo_duty: u32,
    pub writes: u64,
}

#[derive(Debug)]
struct BoardState {
    snapshot: BoardSnapshot,
    motor_history: VecDeque<u32>,
}

#[derive(Clone)]
pub struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
    motor: PwmConfig,
    servo: PwmConfig,
}

impl SimulatedBoard {
    /// Board with all outputs low and both duty registers at zero.
    pub fn new(motor: PwmConfig, servo: PwmConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState {
                snapshot: BoardSnapshot {
                    in1: Level::Low,
                    in2: Level::Low,
                    motor_duty: 0,
                    servo_duty: 0,
                    writes: 0,
                },
                motor_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            })),
            motor,
            servo,
        }
    }

    /// Hands out the board's peripherals wrapped in an actuator driver.
    /// Build one driver per board; it is meant to be the only writer.
    pub fn driver(&self) -> ActuatorDriver<SimulatedOutput, SimulatedPwm> {
        ActuatorDriver::new(
            SimulatedOutput { pin: Pin::In1, state: self.state.clone() },
            SimulatedOutput { pin: Pin::In2, state: self.state.clone() },
            SimulatedPwm { channel: Channel::Motor, config: self.motor, state: self.state.clone() },
            SimulatedPwm { channel: Channel::Servo, config: self.servo, state: self.state.clone() },
        )
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.state.lock().snapshot
    }

    /// Motor duty writes in order (most recent 256).
    pub fn motor_duty_history(&self) -> Vec<u32> {
        self.state.lock().motor_history.iter().copied().collect()
    }

    pub fn clear_history(&self) {
        self.state.lock().motor_history.clear();
    }
}

pub struct SimulatedOutput {
    pin: Pin,
    state: Arc<Mutex<BoardState>>,
}

impl DigitalOutput for SimulatedOutput {
    fn set_level(&mut self, level: Level) {
        let mut s = self.state.lock();
        match self.pin {
            Pin::In1 => s.snapshot.in1 = level,
            Pin::In2 => s.snapshot.in2 = level,
        }
        s.snapshot.writes += 1;
    }
}

pub struct SimulatedPwm {
    channel: Channel,
    config: PwmConfig,
    state: Arc<Mutex<BoardState>>,
}

impl PwmChannel for SimulatedPwm {
    fn config(&self) -> PwmConfig {
        self.config
    }

    fn write_duty(&mut self, duty: u32) {
        let duty = duty.min(self.config.resolution_max());
        let mut s = self.state.lock();
        match self.channel {
            Channel::Motor => {
                s.snapshot.motor_duty = duty;
                if s.motor_history.len() >= HISTORY_CAPACITY {
                    s.motor_history.pop_front();
                }
                s.motor_history.push_back(duty);
            }
            Channel::Servo => s.snapshot.servo_duty = duty,
        }
        s.snapshot.writes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_board_is_idle() {
        let board = SimulatedBoard::new(PwmConfig::MOTOR, PwmConfig::SERVO);
        let snap = board.snapshot();
        assert_eq!((snap.in1, snap.in2), (Level::Low, Level::Low));
        assert_eq!((snap.motor_duty, snap.servo_duty, snap.writes), (0, 0, 0));
    }

    #[test]
    fn history_is_bounded() {
        let board = SimulatedBoard::new(PwmConfig::MOTOR, PwmConfig::SERVO);
        let mut driver = board.driver();
        for _ in 0..(HISTORY_CAPACITY + 10) {
            driver.apply_neutral();
        }
        assert_eq!(board.motor_duty_history().len(), HISTORY_CAPACITY);
    }
}
