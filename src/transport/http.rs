//! http.rs
//! Request/response transport on `tiny_http`.
//!
//! - `GET /`            → operator page (static asset, socket port filled in)
//! - `GET /data?speed=<throttle>&turn=<steering>` → `200 OK` / `400 Error` / `503 Busy`
//!
//! All clients share the implicit session. A request waits for the control
//! loop's verdict for at most `reply_timeout`; past that the answer is `Busy`
//! (the command may still be applied).

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{RecvTimeoutError, bounded};
use log::{debug, error, info};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::error::TransportError;
use crate::transport::{CommandPayload, ConnectionId, EventSender, Reply};

pub const INDEX_HTML: &str = include_str!("../../assets/index.html");
const SOCKET_PORT_SLOT: &str = "{{SOCKET_PORT}}";

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Status code and body for one `/data` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    Ok,
    Error,
    Busy,
}

impl DataStatus {
    pub fn code(self) -> u16 {
        match self {
            DataStatus::Ok => 200,
            DataStatus::Error => 400,
            DataStatus::Busy => 503,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            DataStatus::Ok => "OK",
            DataStatus::Error => "Error",
            DataStatus::Busy => "Busy",
        }
    }
}

/// Running HTTP endpoint. Stops on `stop()` or drop.
pub struct HttpTransport {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HttpTransport {
    /// Bind `addr` and serve on a dedicated thread. `socket_port` is where the
    /// operator page opens its WebSocket; `None` keeps the page on `/data`.
    pub fn start(
        addr: SocketAddr,
        events: EventSender,
        reply_timeout: Duration,
        socket_port: Option<u16>,
    ) -> Result<Self, TransportError> {
        let server = Server::http(addr).map_err(|e| TransportError::Http(e.to_string()))?;
        let local_addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| TransportError::Http("listener has no IP address".to_string()))?;

        let page = render_index(socket_port);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("http_transport".to_string())
            .spawn(move || serve(server, events, reply_timeout, &page, flag))?;

        info!("[HTTP] listening on http://{}", local_addr);
        Ok(Self {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[HTTP] server thread panicked");
            }
            info!("[HTTP] stopped");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Operator page with the WebSocket port substituted (empty when disabled).
pub fn render_index(socket_port: Option<u16>) -> String {
    let port = socket_port.map(|p| p.to_string()).unwrap_or_default();
    INDEX_HTML.replace(SOCKET_PORT_SLOT, &port)
}

fn serve(
    server: Server,
    events: EventSender,
    reply_timeout: Duration,
    page: &str,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => handle_request(request, &events, reply_timeout, page),
            Ok(None) => {}
            Err(e) => {
                error!("[HTTP] accept failed: {}", e);
                break;
            }
        }
    }
}

fn handle_request(request: Request, events: &EventSender, reply_timeout: Duration, page: &str) {
    if *request.method() != Method::Get {
        respond(request, Response::from_string("Method Not Allowed").with_status_code(405));
        return;
    }

    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));

    match path {
        "/" | "/index.html" => {
            let mut response = Response::from_string(page);
            if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
                response = response.with_header(header);
            }
            respond(request, response);
        }
        "/data" => {
            let status = submit_query(events, query, reply_timeout);
            respond(
                request,
                Response::from_string(status.body()).with_status_code(status.code()),
            );
        }
        _ => respond(request, Response::from_string("Not Found").with_status_code(404)),
    }
}

/// Hand the query to the control loop and wait for its verdict.
pub fn submit_query(events: &EventSender, query: &str, reply_timeout: Duration) -> DataStatus {
    let (tx, rx) = bounded(1);
    let payload = CommandPayload::query(ConnectionId::IMPLICIT, query.to_string(), tx);
    if events.submit(payload).is_err() {
        return DataStatus::Busy;
    }

    match rx.recv_timeout(reply_timeout) {
        Ok(Reply::Accepted) => DataStatus::Ok,
        Ok(Reply::Rejected(e)) => {
            debug!("[HTTP] rejected {:?}: {}", query, e);
            DataStatus::Error
        }
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => DataStatus::Busy,
    }
}

fn respond<R: std::io::Read>(request: Request, response: Response<R>) {
    if let Err(e) = request.respond(response) {
        debug!("[HTTP] failed to send response: {}", e);
    }
}
