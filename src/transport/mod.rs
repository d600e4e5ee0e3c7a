//! Transport adapters: everything between the network and the control loop.
//!
//! Both bindings (request/response HTTP endpoint, persistent WebSocket) are
//! producers into one bounded event queue. The control loop is the single
//! consumer and sees them through `TransportAdapter::poll_events`, so the
//! decoder, mapper and driver never know which transport a command came from.
//!
//! - Connection events use a blocking send: a disconnect must never be lost.
//! - Command payloads use `try_send`: on a full queue they are dropped,
//!   since control messages are perishable and the next one supersedes them.

pub mod http;
pub mod socket;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, error};

use crate::error::DecodeError;
use crate::utils::metrics::{Event, EventRecorder, SharedMetrics};

/// Identifies one transport connection (one session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The single session shared by all stateless request/response clients.
    pub const IMPLICIT: ConnectionId = ConnectionId(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadBody {
    /// WebSocket text message, raw UTF-8 bytes.
    Frame(Vec<u8>),
    /// Query string of a request/response call (`speed=..&turn=..`).
    Query(String),
}

/// Outcome reported back to request/response clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Accepted,
    Rejected(DecodeError),
}

#[derive(Debug)]
pub struct CommandPayload {
    pub connection: ConnectionId,
    pub body: PayloadBody,
    pub received_at: Instant,
    /// Present only for transports that answer the client.
    pub reply: Option<Sender<Reply>>,
}

impl CommandPayload {
    pub fn frame(connection: ConnectionId, bytes: Vec<u8>) -> Self {
        Self {
            connection,
            body: PayloadBody::Frame(bytes),
            received_at: Instant::now(),
            reply: None,
        }
    }

    pub fn query(connection: ConnectionId, query: String, reply: Sender<Reply>) -> Self {
        Self {
            connection,
            body: PayloadBody::Query(query),
            received_at: Instant::now(),
            reply: Some(reply),
        }
    }
}

#[derive(Debug)]
pub enum InboundEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Command(CommandPayload),
}

/// Source of inbound events for the control loop.
pub trait TransportAdapter {
    /// Move every pending event into `out`, oldest first, without blocking.
    /// Returns the number of events added.
    fn poll_events(&mut self, out: &mut Vec<InboundEvent>) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue full; payload dropped.
    Full,
    /// Control loop gone.
    Closed,
}

/// Producer half of the event queue, cloned into every transport.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<InboundEvent>,
    next_id: Arc<AtomicU64>,
    metrics: SharedMetrics,
    recorder: Arc<EventRecorder>,
}

impl EventSender {
    /// Allocate an id for a new persistent connection and announce it.
    pub fn open_connection(&self) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.tx.send(InboundEvent::Connected(id)).is_err() {
            error!("[Transport] control loop gone, {} not announced", id);
        }
        id
    }

    pub fn close_connection(&self, id: ConnectionId) {
        if self.tx.send(InboundEvent::Disconnected(id)).is_err() {
            error!("[Transport] control loop gone, close of {} not delivered", id);
        }
    }

    /// Non-blocking enqueue of a command payload.
    pub fn submit(&self, payload: CommandPayload) -> Result<(), SubmitError> {
        let connection = payload.connection;
        match self.tx.try_send(InboundEvent::Command(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.lock().payloads_dropped += 1;
                self.recorder.record(Event::PayloadDropped {
                    ts_ns: self.recorder.now_ns(),
                    connection,
                });
                debug!("[Transport] queue full, dropped payload from {}", connection);
                Err(SubmitError::Full)
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
        }
    }
}

/// Consumer half, owned by the control loop.
pub struct EventQueue {
    rx: Receiver<InboundEvent>,
}

impl TransportAdapter for EventQueue {
    fn poll_events(&mut self, out: &mut Vec<InboundEvent>) -> usize {
        let before = out.len();
        out.extend(self.rx.try_iter());
        out.len() - before
    }
}

/// Bounded inbound queue shared by all transports.
pub fn event_queue(
    capacity: usize,
    metrics: SharedMetrics,
    recorder: Arc<EventRecorder>,
) -> (EventSender, EventQueue) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventSender {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            metrics,
            recorder,
        },
        EventQueue { rx },
    )
}
