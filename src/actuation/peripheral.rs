//! Peripheral interfaces consumed by the actuator driver.
//!
//! These are the board's given services: pins and PWM channels are configured
//! once at startup and writes are assumed not to fail (control register writes),
//! so none of the methods return a `Result`.

/// Logic level of a digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Fixed frequency/resolution of a PWM channel, established at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    pub frequency_hz: u32,
    pub resolution_bits: u8,
}

impl PwmConfig {
    /// Motor channel: 20 kHz, 8-bit.
    pub const MOTOR: PwmConfig = PwmConfig {
        frequency_hz: 20_000,
        resolution_bits: 8,
    };

    /// Servo channel: 50 Hz, 16-bit.
    pub const SERVO: PwmConfig = PwmConfig {
        frequency_hz: 50,
        resolution_bits: 16,
    };

    /// Number of duty steps per period (`2^bits`, 65536 for 16-bit).
    #[inline]
    pub fn resolution_max(&self) -> u32 {
        1u32 << self.resolution_bits.min(31)
    }

    /// Length of one PWM period in microseconds (20000 at 50 Hz).
    #[inline]
    pub fn period_us(&self) -> u32 {
        1_000_000 / self.frequency_hz.max(1)
    }
}

pub trait DigitalOutput {
    fn set_level(&mut self, level: Level);
}

pub trait PwmChannel {
    fn config(&self) -> PwmConfig;

    /// Write a raw duty value in `0..=resolution_max()`.
    fn write_duty(&mut self, duty: u32);
}
