//! Error types shared across the pipeline.
//!
//! Only decode failures travel on the hot path; configuration and transport
//! errors surface at startup.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Why an inbound payload was rejected. A rejected payload never touches the actuators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("missing ',' delimiter between throttle and steering")]
    MissingDelimiter,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a decimal integer: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

impl DecodeError {
    /// Short tag used in the event trace.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty",
            DecodeError::NotUtf8 => "not_utf8",
            DecodeError::MissingDelimiter => "missing_delimiter",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::InvalidNumber { .. } => "invalid_number",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("loop period {loop_period_ms} ms is too slow for idle timeout {idle_timeout_ms} ms")]
    LoopTooSlow {
        loop_period_ms: u64,
        idle_timeout_ms: u64,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{channel} PWM resolution of {bits} bits is out of range")]
    Resolution { channel: &'static str, bits: u8 },

    #[error("servo limits {left_deg}/{right_deg} must be distinct, within 45..=135 and centered on 90")]
    ServoLimits { left_deg: u16, right_deg: u16 },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("http server error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
