//! Control side: session liveness and the loop that owns the actuators.
pub mod control_loop;
pub mod supervisor;
