//! rc_drive: realtime command pipeline for a remotely operated vehicle.
//!
//! transport → decode → map → drive, with a session supervisor that forces
//! the actuators to neutral on disconnect or silence.

pub mod actuation;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod transport;
pub mod utils;
