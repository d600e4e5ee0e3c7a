//! driver.rs
//! Actuator driver: the only code that writes motor and servo hardware.
//!
//! - Motor: two direction outputs (IN1/IN2) + one PWM enable channel
//! - Servo: one PWM channel, angle → pulse width → duty
//!
//! | direction | IN1  | IN2  | duty          |
//! |-----------|------|------|---------------|
//! | Forward   | High | Low  | motor_duty    |
//! | Reverse   | Low  | High | motor_duty    |
//! | Stop      | Low  | Low  | 0             |
//!
//! Lives on the control-loop thread; there is exactly one writer, so no locking.

use log::{debug, trace};

use crate::actuation::{
    ActuatorTarget, MotorDirection,
    peripheral::{DigitalOutput, Level, PwmChannel},
};

pub const SERVO_MIN_PULSE_US: u32 = 500;
pub const SERVO_MAX_PULSE_US: u32 = 2_500;
pub const SERVO_RANGE_DEG: u32 = 180;

/// Servo pulse width for an angle: 0° → 500 µs, 180° → 2500 µs.
#[inline]
pub fn servo_pulse_width_us(angle_deg: u8) -> u32 {
    let angle = u32::from(angle_deg).min(SERVO_RANGE_DEG);
    SERVO_MIN_PULSE_US + angle * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / SERVO_RANGE_DEG
}

/// Duty value producing `pulse_width_us` on a channel with the given period.
/// Computed in u64 so `pulse * resolution_max` cannot overflow.
#[inline]
pub fn pulse_to_duty(pulse_width_us: u32, resolution_max: u32, period_us: u32) -> u32 {
    let duty = u64::from(pulse_width_us) * u64::from(resolution_max) / u64::from(period_us.max(1));
    duty.min(u64::from(resolution_max)) as u32
}

pub struct ActuatorDriver<O, P>
where
    O: DigitalOutput,
    P: PwmChannel,
{
    in1: O,
    in2: O,
    motor_pwm: P,
    servo_pwm: P,
    last_applied: Option<ActuatorTarget>,
}

impl<O, P> ActuatorDriver<O, P>
where
    O: DigitalOutput,
    P: PwmChannel,
{
    /// Takes exclusive ownership of the motor and servo peripherals.
    /// Nothing is written until the first `apply`.
    pub fn new(in1: O, in2: O, motor_pwm: P, servo_pwm: P) -> Self {
        Self {
            in1,
            in2,
            motor_pwm,
            servo_pwm,
            last_applied: None,
        }
    }

    /// Drive both actuators to `target`. Safe to repeat with the same target.
    pub fn apply(&mut self, target: ActuatorTarget) {
        self.apply_motor(target.motor_direction(), target.motor_duty());
        self.apply_servo(target.servo_angle_deg());
        self.last_applied = Some(target);
    }

    /// Force the neutral target (stopped, centered).
    pub fn apply_neutral(&mut self) {
        self.apply(ActuatorTarget::NEUTRAL);
    }

    /// Leave the hardware stopped and centered; called once when the loop exits.
    pub fn shutdown(&mut self) {
        self.apply_neutral();
        debug!("[ActuatorDriver] shutdown, outputs neutral");
    }

    /// The target most recently written to hardware, `None` before the first write.
    #[inline]
    pub fn last_applied(&self) -> Option<ActuatorTarget> {
        self.last_applied
    }

    fn apply_motor(&mut self, direction: MotorDirection, duty: u8) {
        let previous = self.last_applied.map(|t| t.motor_direction());

        // Never reverse the bridge while it is still being driven.
        if previous.is_some_and(|p| p != direction) {
            self.motor_pwm.write_duty(0);
        }

        let (in1, in2) = match direction {
            MotorDirection::Forward => (Level::High, Level::Low),
            MotorDirection::Reverse => (Level::Low, Level::High),
            MotorDirection::Stop => (Level::Low, Level::Low),
        };
        self.in1.set_level(in1);
        self.in2.set_level(in2);
        self.motor_pwm.write_duty(u32::from(duty));

        trace!("[ActuatorDriver] motor {} duty={}", direction, duty);
    }

    fn apply_servo(&mut self, angle_deg: u8) {
        let cfg = self.servo_pwm.config();
        let pulse_us = servo_pulse_width_us(angle_deg);
        let duty = pulse_to_duty(pulse_us, cfg.resolution_max(), cfg.period_us());
        self.servo_pwm.write_duty(duty);

        trace!(
            "[ActuatorDriver] servo {}deg pulse={}us duty={}",
            angle_deg, pulse_us, duty
        );
    }
}
