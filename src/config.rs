//! Runtime configuration, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) gives the stock
//! vehicle: both transports, 200 ms idle timeout, 10 ms loop, 20 kHz/8-bit
//! motor, 50 Hz/16-bit servo with 135°/45° steering limits.

use std::{
    fs,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::Deserialize;

use crate::actuation::peripheral::PwmConfig;
use crate::command::mapper::{
    DEFAULT_SERVO_LEFT_DEG, DEFAULT_SERVO_RIGHT_DEG, SERVO_SAFE_MAX_DEG, SignalMapper,
};
use crate::control::control_loop::LoopSettings;
use crate::error::ConfigError;

/// Idle timeout must span at least this many loop periods.
const MIN_CYCLES_PER_IDLE_WINDOW: u64 = 5;
const MAX_RESOLUTION_BITS: u8 = 16;
const MIN_MOTOR_RESOLUTION_BITS: u8 = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub control: ControlConfig,
    pub motor: MotorConfig,
    pub servo: ServoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Http,
    Socket,
    #[default]
    Both,
}

impl TransportMode {
    pub fn http(self) -> bool {
        matches!(self, TransportMode::Http | TransportMode::Both)
    }

    pub fn socket(self) -> bool {
        matches!(self, TransportMode::Socket | TransportMode::Both)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub http_addr: SocketAddr,
    pub socket_addr: SocketAddr,
    pub queue_capacity: usize,
    /// How long an HTTP request waits for the control loop's verdict.
    pub reply_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Both,
            http_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8080)),
            socket_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8081)),
            queue_capacity: 64,
            reply_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub idle_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_timeout_ms: 200 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub loop_period_ms: u64,
    /// Pin the control thread to this core id, if present.
    pub core: Option<usize>,
    pub realtime_priority: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: 10,
            core: None,
            realtime_priority: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotorConfig {
    pub frequency_hz: u32,
    pub resolution_bits: u8,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            frequency_hz: PwmConfig::MOTOR.frequency_hz,
            resolution_bits: PwmConfig::MOTOR.resolution_bits,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServoConfig {
    pub frequency_hz: u32,
    pub resolution_bits: u8,
    /// Angle at full-left steering.
    pub left_deg: u16,
    /// Angle at full-right steering.
    pub right_deg: u16,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            frequency_hz: PwmConfig::SERVO.frequency_hz,
            resolution_bits: PwmConfig::SERVO.resolution_bits,
            left_deg: u16::from(DEFAULT_SERVO_LEFT_DEG),
            right_deg: u16::from(DEFAULT_SERVO_RIGHT_DEG),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub events_csv: PathBuf,
    pub summary_csv: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            events_csv: PathBuf::from("data/logs/control_events.csv"),
            summary_csv: PathBuf::from("data/logs/session_summary.csv"),
        }
    }
}

impl Config {
    /// Load and validate. `None` means built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let loop_ms = self.control.loop_period_ms;
        let idle_ms = self.session.idle_timeout_ms;

        if loop_ms == 0 {
            return Err(ConfigError::Zero("control.loop_period_ms"));
        }
        if idle_ms == 0 {
            return Err(ConfigError::Zero("session.idle_timeout_ms"));
        }
        let window_ok = loop_ms
            .checked_mul(MIN_CYCLES_PER_IDLE_WINDOW)
            .is_some_and(|needed| needed <= idle_ms);
        if !window_ok {
            return Err(ConfigError::LoopTooSlow {
                loop_period_ms: loop_ms,
                idle_timeout_ms: idle_ms,
            });
        }
        if self.transport.queue_capacity == 0 {
            return Err(ConfigError::Zero("transport.queue_capacity"));
        }
        if self.transport.reply_timeout_ms == 0 {
            return Err(ConfigError::Zero("transport.reply_timeout_ms"));
        }
        if self.motor.frequency_hz == 0 {
            return Err(ConfigError::Zero("motor.frequency_hz"));
        }
        if self.servo.frequency_hz == 0 {
            return Err(ConfigError::Zero("servo.frequency_hz"));
        }

        let motor_bits = self.motor.resolution_bits;
        if !(MIN_MOTOR_RESOLUTION_BITS..=MAX_RESOLUTION_BITS).contains(&motor_bits) {
            return Err(ConfigError::Resolution { channel: "motor", bits: motor_bits });
        }
        let servo_bits = self.servo.resolution_bits;
        if !(1..=MAX_RESOLUTION_BITS).contains(&servo_bits) {
            return Err(ConfigError::Resolution { channel: "servo", bits: servo_bits });
        }

        let (left, right) = (self.servo.left_deg, self.servo.right_deg);
        if !SignalMapper::is_symmetric(left, right) {
            return Err(ConfigError::ServoLimits { left_deg: left, right_deg: right });
        }
        Ok(())
    }

    pub fn motor_pwm(&self) -> PwmConfig {
        PwmConfig {
            frequency_hz: self.motor.frequency_hz,
            resolution_bits: self.motor.resolution_bits,
        }
    }

    pub fn servo_pwm(&self) -> PwmConfig {
        PwmConfig {
            frequency_hz: self.servo.frequency_hz,
            resolution_bits: self.servo.resolution_bits,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        let max = u16::from(SERVO_SAFE_MAX_DEG);
        LoopSettings {
            period: Duration::from_millis(self.control.loop_period_ms),
            idle_timeout: Duration::from_millis(self.session.idle_timeout_ms),
            mapper: SignalMapper::new(
                self.servo.left_deg.min(max) as u8,
                self.servo.right_deg.min(max) as u8,
            ),
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.reply_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.transport.mode, TransportMode::Both);
        assert_eq!(config.transport.http_addr.port(), 8080);
        assert_eq!(config.transport.socket_addr.port(), 8081);
        assert_eq!(config.session.idle_timeout_ms, 200);
        assert_eq!(config.motor_pwm(), PwmConfig::MOTOR);
        assert_eq!(config.servo_pwm(), PwmConfig::SERVO);

        let settings = config.loop_settings();
        assert_eq!(settings.period, Duration::from_millis(10));
        assert_eq!(settings.mapper, SignalMapper::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml_content = r#"
            [transport]
            mode = "socket"
            socket_addr = "127.0.0.1:9000"

            [servo]
            left_deg = 120
            right_deg = 60
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        config.validate().unwrap();
        assert!(config.transport.mode.socket());
        assert!(!config.transport.mode.http());
        assert_eq!(config.transport.socket_addr.port(), 9000);
        assert_eq!(config.transport.queue_capacity, 64);
        assert_eq!(config.loop_settings().mapper, SignalMapper::new(120, 60));
    }

    #[test]
    fn loop_must_fit_five_times_in_idle_window() {
        let mut config = Config::default();
        config.control.loop_period_ms = 40;
        assert!(config.validate().is_ok());

        config.control.loop_period_ms = 41;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LoopTooSlow { loop_period_ms: 41, idle_timeout_ms: 200 })
        ));
    }

    #[test]
    fn rejects_bad_peripheral_settings() {
        let mut config = Config::default();
        config.servo.resolution_bits = 17;
        assert!(matches!(config.validate(), Err(ConfigError::Resolution { channel: "servo", .. })));

        let mut config = Config::default();
        config.motor.resolution_bits = 6;
        assert!(matches!(config.validate(), Err(ConfigError::Resolution { channel: "motor", .. })));

        let mut config = Config::default();
        config.servo.frequency_hz = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero("servo.frequency_hz"))));

        let mut config = Config::default();
        config.servo.left_deg = 200;
        assert!(matches!(config.validate(), Err(ConfigError::ServoLimits { .. })));

        let mut config = Config::default();
        config.servo.right_deg = 135;
        assert!(matches!(config.validate(), Err(ConfigError::ServoLimits { .. })));
    }

    #[test]
    fn servo_limits_stay_in_safe_arc_and_centered() {
        let config: Config = toml::from_str("[servo]\nleft_deg = 180\nright_deg = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServoLimits { left_deg: 180, right_deg: 0 })
        ));

        let config: Config = toml::from_str("[servo]\nleft_deg = 130\nright_deg = 45\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServoLimits { left_deg: 130, right_deg: 45 })
        ));

        let config: Config = toml::from_str("[servo]\nleft_deg = 100\nright_deg = 80\n").unwrap();
        config.validate().unwrap();
        let mapper = config.loop_settings().mapper;
        assert_eq!(mapper.steering_to_angle(0), 90);
        assert_eq!(mapper.steering_to_angle(-100), 100);
        assert_eq!(mapper.steering_to_angle(100), 80);
    }

    #[test]
    fn huge_loop_period_is_rejected_without_overflow() {
        let mut config = Config::default();
        config.control.loop_period_ms = u64::MAX;
        config.session.idle_timeout_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::LoopTooSlow { .. })));

        config.control.loop_period_ms = u64::MAX / 4;
        assert!(matches!(config.validate(), Err(ConfigError::LoopTooSlow { .. })));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<Config>("[session]\nidle_ms = 5\n");
        assert!(err.is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = std::env::temp_dir().join("rc_drive_no_such_config.toml");
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Read { .. })));
        assert!(Config::load(None).is_ok());
    }
}
