//! Actuation side of the pipeline.
//! - `peripheral`: digital output / PWM channel traits (the board's given services)
//! - `driver`: the single owner of motor + servo hardware writes
//! - `simulated`: host-side board used by the binary, tests and benches

pub mod driver;
pub mod peripheral;
pub mod simulated;

use std::fmt;

pub const SERVO_CENTER_DEG: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorDirection {
    Forward,
    Reverse,
    Stop,
}

impl fmt::Display for MotorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotorDirection::Forward => "forward",
            MotorDirection::Reverse => "reverse",
            MotorDirection::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// What the actuators should be doing right now.
///
/// `motor_direction == Stop` exactly when `motor_duty == 0`. Only the signal
/// mapper and `ActuatorTarget::NEUTRAL` construct targets, which keeps that
/// invariant and the safe servo range intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActuatorTarget {
    motor_duty: u8,
    motor_direction: MotorDirection,
    servo_angle_deg: u8,
}

impl ActuatorTarget {
    /// No motion, centered steering.
    pub const NEUTRAL: ActuatorTarget = ActuatorTarget {
        motor_duty: 0,
        motor_direction: MotorDirection::Stop,
        servo_angle_deg: SERVO_CENTER_DEG,
    };

    /// Derives direction from the sign of `throttle`; duty is its magnitude.
    pub(crate) fn from_parts(throttle: i16, servo_angle_deg: u8) -> Self {
        let motor_direction = match throttle {
            t if t > 0 => MotorDirection::Forward,
            t if t < 0 => MotorDirection::Reverse,
            _ => MotorDirection::Stop,
        };
        Self {
            motor_duty: throttle.unsigned_abs().min(u8::MAX as u16) as u8,
            motor_direction,
            servo_angle_deg,
        }
    }

    #[inline]
    pub fn motor_duty(&self) -> u8 {
        self.motor_duty
    }

    #[inline]
    pub fn motor_direction(&self) -> MotorDirection {
        self.motor_direction
    }

    #[inline]
    pub fn servo_angle_deg(&self) -> u8 {
        self.servo_angle_deg
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

impl fmt::Display for ActuatorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duty={} dir={} servo={}deg",
            self.motor_duty, self.motor_direction, self.servo_angle_deg
        )
    }
}
