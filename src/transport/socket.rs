//! socket.rs
//! Persistent-socket transport: a WebSocket server, one connection per
//! operator, one text message per command (`"<throttle>,<steering>"`).
//!
//! - completed handshake → `Connected`
//! - close frame / EOF / protocol error / oversized message → `Disconnected`
//! - text messages are forwarded raw; decoding happens on the control loop
//! - binary messages are ignored, nothing is ever sent back but control frames
//!
//! Runs on the tokio runtime with `tokio-tungstenite`; the listener is built
//! with `socket2` so the port can be rebound right after a restart.

use std::{net::SocketAddr, time::Duration};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tokio_tungstenite::{
    WebSocketStream, accept_async_with_config,
    tungstenite::{
        Message,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};

use crate::error::TransportError;
use crate::transport::{CommandPayload, ConnectionId, EventSender, SubmitError};

/// Longest accepted command message.
pub const MAX_FRAME_BYTES: usize = 64;

/// Hard cap handed to the WebSocket codec; anything above it is a protocol
/// error before it is ever buffered whole.
const MAX_MESSAGE_BYTES: usize = 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(200);
const LISTEN_BACKLOG: i32 = 128;

pub struct SocketTransport {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SocketTransport {
    /// Bind `addr` and start accepting on the current tokio runtime.
    pub async fn start(addr: SocketAddr, events: EventSender) -> Result<Self, TransportError> {
        let listener = bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(accept_loop(listener, events, shutdown_rx));
        info!("[Socket] listening on ws://{}/", local_addr);

        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close every connection (each reported as a disconnect) and stop accepting.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("[Socket] accept task failed: {}", e);
        }
        info!("[Socket] stopped");
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    let bind_err = |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

async fn accept_loop(listener: TcpListener, events: EventSender, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let events = events.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        handle_connection(stream, peer, events, shutdown).await;
                    });
                }
                Err(e) => error!("[Socket] accept failed: {}", e),
            },
            // Reap finished connections.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
}

fn codec_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_BYTES);
    config.max_frame_size = Some(MAX_MESSAGE_BYTES);
    config
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[Socket] set_nodelay failed for {}: {}", peer, e);
    }

    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        accept_async_with_config(stream, Some(codec_config())),
    );
    let mut ws = tokio::select! {
        _ = shutdown.changed() => return,
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!("[Socket] handshake with {} failed: {}", peer, e);
                return;
            }
            Err(_) => {
                debug!("[Socket] handshake with {} timed out", peer);
                return;
            }
        },
    };

    let opener = events.clone();
    let id = match tokio::task::spawn_blocking(move || opener.open_connection()).await {
        Ok(id) => id,
        Err(e) => {
            error!("[Socket] could not register {}: {}", peer, e);
            return;
        }
    };
    info!("[Socket] {} connected as {}", peer, id);

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => None,
            message = ws.next() => Some(message),
        };
        let Some(message) = message else {
            close(&mut ws, CloseCode::Away, "server shutting down").await;
            break;
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if text.len() > MAX_FRAME_BYTES {
                    warn!("[Socket] {} sent a message over {} bytes, closing", id, MAX_FRAME_BYTES);
                    close(&mut ws, CloseCode::Size, "command too long").await;
                    break;
                }
                if !forward(&events, id, text.into_bytes()) {
                    close(&mut ws, CloseCode::Away, "control loop stopped").await;
                    break;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                debug!("[Socket] ignoring {}-byte binary message from {}", bytes.len(), id);
            }
            // Pings are answered by the codec.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                debug!("[Socket] {} closed: {:?}", id, frame);
                break;
            }
            Some(Err(e)) => {
                debug!("[Socket] {} dropped: {}", id, e);
                break;
            }
            None => break,
        }
    }

    let closer = events.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || closer.close_connection(id)).await {
        error!("[Socket] could not report close of {}: {}", id, e);
    }
    info!("[Socket] {} ({}) disconnected", id, peer);
}

async fn close(ws: &mut WebSocketStream<TcpStream>, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, ws.close(Some(frame))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[Socket] close handshake failed: {}", e),
        Err(_) => debug!("[Socket] close handshake timed out"),
    }
}

/// Returns false once the control loop is gone.
fn forward(events: &EventSender, id: ConnectionId, frame: Vec<u8>) -> bool {
    match events.submit(CommandPayload::frame(id, frame)) {
        Ok(()) | Err(SubmitError::Full) => true,
        Err(SubmitError::Closed) => false,
    }
}
