//! decoder.rs
//! Parses transport payloads into `ControlCommand`s.
//! - socket frames: `"<throttle>,<steering>"`
//! - request/response endpoint: query string with `speed` and `turn`
//!
//! Either both axes decode or the whole message is rejected. Numbers outside
//! the declared ranges are clamped, not rejected.

use std::{borrow::Cow, num::IntErrorKind};

use percent_encoding::percent_decode_str;

use crate::command::ControlCommand;
use crate::error::DecodeError;

pub const FRAME_DELIMITER: char = ',';
pub const QUERY_THROTTLE_FIELD: &str = "speed";
pub const QUERY_STEERING_FIELD: &str = "turn";

/// Decode a raw transport payload (UTF-8 text frame).
pub fn decode_bytes(payload: &[u8]) -> Result<ControlCommand, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    decode_frame(text)
}

/// Decode a `throttle,steering` text frame.
pub fn decode_frame(frame: &str) -> Result<ControlCommand, DecodeError> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (throttle, steering) = frame
        .split_once(FRAME_DELIMITER)
        .ok_or(DecodeError::MissingDelimiter)?;

    let throttle = parse_axis("throttle", throttle)?;
    let steering = parse_axis("steering", steering)?;
    Ok(ControlCommand::new(throttle, steering))
}

/// Decode the query string of a request (`speed=120&turn=-50`).
/// A leading `?` is accepted; unknown parameters are ignored and the first
/// occurrence of a repeated parameter wins. Values are percent-decoded.
pub fn decode_query(query: &str) -> Result<ControlCommand, DecodeError> {
    let query = query.strip_prefix('?').unwrap_or(query);

    let mut speed = None;
    let mut turn = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            QUERY_THROTTLE_FIELD if speed.is_none() => speed = Some(value),
            QUERY_STEERING_FIELD if turn.is_none() => turn = Some(value),
            _ => {}
        }
    }

    let speed = speed.ok_or(DecodeError::MissingField(QUERY_THROTTLE_FIELD))?;
    let turn = turn.ok_or(DecodeError::MissingField(QUERY_STEERING_FIELD))?;

    let throttle = parse_axis(QUERY_THROTTLE_FIELD, &unescape(speed)?)?;
    let steering = parse_axis(QUERY_STEERING_FIELD, &unescape(turn)?)?;
    Ok(ControlCommand::new(throttle, steering))
}

fn unescape(value: &str) -> Result<Cow<'_, str>, DecodeError> {
    percent_decode_str(value)
        .decode_utf8()
        .map_err(|_| DecodeError::NotUtf8)
}

/// Parse one signed decimal axis value. Values too large for i64 saturate
/// toward their sign so they clamp like any other out-of-range value.
fn parse_axis(field: &'static str, text: &str) -> Result<i64, DecodeError> {
    let text = text.trim();
    match text.parse::<i64>() {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Ok(i64::MAX),
            IntErrorKind::NegOverflow => Ok(i64::MIN),
            _ => Err(DecodeError::InvalidNumber {
                field,
                value: text.to_string(),
            }),
        },
    }
}
