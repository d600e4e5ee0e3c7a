//! supervisor.rs
//! Per-connection liveness tracking and the fail-safe contract.
//!
//! ```text
//! Disconnected --connect--> Connected --command--> Active
//!                               |                  ^    |
//!                               +--silence--> Idle +    +--silence--> Idle
//! any state --disconnect--> Disconnected (session removed)
//! ```
//!
//! The supervisor never touches hardware. It returns `FailSafe` decisions and
//! the control loop turns each one into `apply(neutral)`.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use log::{info, warn};

use crate::transport::ConnectionId;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailSafeReason {
    Disconnect,
    IdleTimeout,
    /// Loop is stopping; not a session event.
    Shutdown,
}

impl fmt::Display for FailSafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailSafeReason::Disconnect => "disconnect",
            FailSafeReason::IdleTimeout => "idle_timeout",
            FailSafeReason::Shutdown => "shutdown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Active,
    Idle,
}

/// A forced-neutral decision for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailSafe {
    pub connection: ConnectionId,
    pub reason: FailSafeReason,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    state: LinkState,
    /// Last accepted command, or the connect time before the first one.
    last_seen: Instant,
}

pub struct SessionSupervisor {
    idle_timeout: Duration,
    sessions: HashMap<ConnectionId, Session>,
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionSupervisor {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: HashMap::new(),
        }
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Register a new connection. A repeated connect restarts its idle window.
    pub fn on_connect(&mut self, connection: ConnectionId, now: Instant) {
        self.sessions.insert(
            connection,
            Session {
                state: LinkState::Connected,
                last_seen: now,
            },
        );
        info!("[Supervisor] {} connected", connection);
    }

    /// Remove the session. Always yields a fail-safe, known connection or not.
    pub fn on_disconnect(&mut self, connection: ConnectionId) -> FailSafe {
        if self.sessions.remove(&connection).is_none() {
            warn!("[Supervisor] disconnect for unknown {}", connection);
        } else {
            info!("[Supervisor] {} disconnected", connection);
        }
        FailSafe {
            connection,
            reason: FailSafeReason::Disconnect,
        }
    }

    /// Record a valid command received at `at`. Unknown connections get an
    /// implicit session.
    pub fn on_command(&mut self, connection: ConnectionId, at: Instant) {
        let session = self.sessions.entry(connection).or_insert_with(|| Session {
            state: LinkState::Connected,
            last_seen: at,
        });
        if session.state == LinkState::Idle {
            info!("[Supervisor] {} active again", connection);
        }
        session.state = LinkState::Active;
        session.last_seen = session.last_seen.max(at);
    }

    /// Move sessions silent for longer than the idle timeout to `Idle`,
    /// pushing one fail-safe per transition. Returns how many were pushed.
    pub fn poll(&mut self, now: Instant, out: &mut Vec<FailSafe>) -> usize {
        let before = out.len();
        for (&connection, session) in self.sessions.iter_mut() {
            if session.state == LinkState::Idle {
                continue;
            }
            if now.saturating_duration_since(session.last_seen) > self.idle_timeout {
                session.state = LinkState::Idle;
                out.push(FailSafe {
                    connection,
                    reason: FailSafeReason::IdleTimeout,
                });
            }
        }
        out.len() - before
    }

    /// `Disconnected` for connections without a session.
    pub fn state(&self, connection: ConnectionId) -> LinkState {
        self.sessions
            .get(&connection)
            .map_or(LinkState::Disconnected, |s| s.state)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
