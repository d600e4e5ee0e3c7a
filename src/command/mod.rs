//! Inbound side of the pipeline: operator intent in, actuator targets out.
//! decoder parses transport payloads into `ControlCommand`s,
//! mapper turns a command into an `ActuatorTarget` (pure, no side effects).

pub mod decoder;
pub mod mapper;

pub const THROTTLE_MIN: i32 = -255;
pub const THROTTLE_MAX: i32 = 255;
pub const STEERING_MIN: i32 = -100;
pub const STEERING_MAX: i32 = 100;

/// One decoded operator command. Both axes are always within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCommand {
    throttle: i16,
    steering: i16,
}

impl ControlCommand {
    /// Builds a command, clamping each axis to its declared range.
    pub fn new(throttle: i64, steering: i64) -> Self {
        Self {
            throttle: throttle.clamp(THROTTLE_MIN as i64, THROTTLE_MAX as i64) as i16,
            steering: steering.clamp(STEERING_MIN as i64, STEERING_MAX as i64) as i16,
        }
    }

    #[inline]
    pub fn throttle(&self) -> i16 {
        self.throttle
    }

    #[inline]
    pub fn steering(&self) -> i16 {
        self.steering
    }
}
