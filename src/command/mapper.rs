//! mapper.rs
//! Operator units → actuator units.
//! - throttle passes through as a signed motor command (duty = |throttle|)
//! - steering maps linearly and inverted onto the servo's safe arc
//!   (full left → left limit, full right → right limit, 0 → midpoint)

use crate::actuation::ActuatorTarget;
use crate::command::{ControlCommand, STEERING_MAX, STEERING_MIN};

pub const DEFAULT_SERVO_LEFT_DEG: u8 = 135;
pub const DEFAULT_SERVO_RIGHT_DEG: u8 = 45;
/// Mechanical safe arc of the steering linkage. Calibrated limits are
/// always kept inside it; the full 0..=180 servo range is never used.
pub const SERVO_SAFE_MIN_DEG: u8 = 45;
pub const SERVO_SAFE_MAX_DEG: u8 = 135;
pub const SERVO_CENTER_DEG: u8 = 90;

/// Maps commands with the default chassis calibration (135° left, 45° right).
pub fn map(command: &ControlCommand) -> ActuatorTarget {
    SignalMapper::default().map(command)
}

/// Pure command → target mapping for one steering calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalMapper {
    left_deg: u8,
    right_deg: u8,
}

impl Default for SignalMapper {
    fn default() -> Self {
        Self::new(DEFAULT_SERVO_LEFT_DEG, DEFAULT_SERVO_RIGHT_DEG)
    }
}

impl SignalMapper {
    /// `left_deg` is the servo angle at full-left steering (-100),
    /// `right_deg` the angle at full-right (+100). Both are pulled into the
    /// safe arc. Callers keep the pair symmetric around 90° (see
    /// `is_symmetric`); `Config::validate` enforces it.
    pub fn new(left_deg: u8, right_deg: u8) -> Self {
        Self {
            left_deg: left_deg.clamp(SERVO_SAFE_MIN_DEG, SERVO_SAFE_MAX_DEG),
            right_deg: right_deg.clamp(SERVO_SAFE_MIN_DEG, SERVO_SAFE_MAX_DEG),
        }
    }

    /// True when both limits lie in the safe arc, differ, and center on 90°.
    pub fn is_symmetric(left_deg: u16, right_deg: u16) -> bool {
        let safe = u16::from(SERVO_SAFE_MIN_DEG)..=u16::from(SERVO_SAFE_MAX_DEG);
        safe.contains(&left_deg)
            && safe.contains(&right_deg)
            && left_deg != right_deg
            && left_deg + right_deg == 2 * u16::from(SERVO_CENTER_DEG)
    }

    pub fn map(&self, command: &ControlCommand) -> ActuatorTarget {
        ActuatorTarget::from_parts(command.throttle(), self.steering_to_angle(command.steering()))
    }

    /// Linear interpolation of steering onto [left, right], rounded to the
    /// nearest degree (ties to even) and clamped to the calibrated arc.
    pub fn steering_to_angle(&self, steering: i16) -> u8 {
        let left = i64::from(self.left_deg);
        let right = i64::from(self.right_deg);
        let in_span = i64::from(STEERING_MAX - STEERING_MIN);
        let offset = i64::from(steering) - i64::from(STEERING_MIN);

        // angle * in_span, kept exact until the single rounding step
        let scaled = left * in_span + offset * (right - left);
        let angle = div_round_half_even(scaled, in_span);

        angle.clamp(left.min(right), left.max(right)) as u8
    }
}

/// Integer division rounding to nearest, exact halves to the even quotient.
/// `den` must be positive.
fn div_round_half_even(num: i64, den: i64) -> i64 {
    let q = num.div_euclid(den);
    let twice_rem = 2 * num.rem_euclid(den);
    if twice_rem > den || (twice_rem == den && q % 2 != 0) {
        q + 1
    } else {
        q
    }
}
