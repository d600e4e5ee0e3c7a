//! End-to-end over the request/response endpoint on an ephemeral port.

mod common;

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    sync::Arc,
    time::Duration,
};

use common::{Rig, servo_duty, wait_until};
use parking_lot::Mutex;
use rc_drive::actuation::peripheral::Level;
use rc_drive::control::control_loop::LoopSettings;
use rc_drive::transport::{event_queue, http::HttpTransport};
use rc_drive::utils::metrics::{EventRecorder, Metrics, SharedMetrics};

const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    )
    .unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

fn patient() -> LoopSettings {
    LoopSettings {
        idle_timeout: Duration::from_secs(30),
        ..LoopSettings::default()
    }
}

#[test]
fn accepted_command_answers_ok_and_drives_board() {
    let mut rig = Rig::start(patient());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, None).unwrap();

    assert_eq!(get(http.local_addr(), "/data?speed=120&turn=-50"), (200, "OK".to_string()));

    let board = rig.board.clone();
    assert!(wait_until(Duration::from_secs(1), || board.snapshot().motor_duty == 120));
    let snap = board.snapshot();
    assert_eq!((snap.in1, snap.in2), (Level::High, Level::Low));
    assert_eq!(snap.servo_duty, servo_duty(112));

    http.stop();
    rig.stop();
}

#[test]
fn malformed_queries_answer_error_without_actuation() {
    let mut rig = Rig::start(patient());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, None).unwrap();
    let addr = http.local_addr();

    assert_eq!(get(addr, "/data?speed=abc&turn=0"), (400, "Error".to_string()));
    assert_eq!(get(addr, "/data?speed=10"), (400, "Error".to_string()));
    assert_eq!(get(addr, "/data"), (400, "Error".to_string()));

    assert_eq!(rig.metrics.lock().commands_rejected, 3);
    assert_eq!(rig.metrics.lock().commands_applied, 0);
    assert_eq!(rig.board.snapshot().writes, 0);

    http.stop();
    rig.stop();
}

#[test]
fn out_of_range_values_clamp_and_extra_params_are_ignored() {
    let mut rig = Rig::start(patient());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, None).unwrap();

    let (status, _) = get(
        http.local_addr(),
        "/data?cam=1&speed=-99999999999999999999999&turn=400",
    );
    assert_eq!(status, 200);

    let board = rig.board.clone();
    assert!(wait_until(Duration::from_secs(1), || board.snapshot().motor_duty == 255));
    let snap = board.snapshot();
    assert_eq!((snap.in1, snap.in2), (Level::Low, Level::High));
    assert_eq!(snap.servo_duty, servo_duty(45));

    http.stop();
    rig.stop();
}

#[test]
fn percent_encoded_values_are_accepted() {
    let mut rig = Rig::start(patient());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, None).unwrap();

    assert_eq!(get(http.local_addr(), "/data?speed=%2D40&turn=%2B100"), (200, "OK".to_string()));

    let board = rig.board.clone();
    assert!(wait_until(Duration::from_secs(1), || board.snapshot().motor_duty == 40));
    let snap = board.snapshot();
    assert_eq!((snap.in1, snap.in2), (Level::Low, Level::High));
    assert_eq!(snap.servo_duty, servo_duty(45));

    http.stop();
    rig.stop();
}

#[test]
fn serves_operator_page_and_404() {
    let mut rig = Rig::start(patient());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, Some(8081))
            .unwrap();
    let addr = http.local_addr();

    let (status, body) = get(addr, "/");
    assert_eq!(status, 200);
    assert!(body.contains(r#"id="speed""#));
    assert!(body.contains(r#"id="turn""#));
    assert!(body.contains("/data?speed="));
    assert!(body.contains("new WebSocket("));
    assert!(body.contains("const SOCKET_PORT = '8081';"));

    assert_eq!(get(addr, "/missing").0, 404);

    http.stop();
    rig.stop();
}

#[test]
fn no_control_loop_answers_busy() {
    let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
    let (events, _queue) = event_queue(8, metrics, Arc::new(EventRecorder::new()));
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), events, Duration::from_millis(30), None).unwrap();

    assert_eq!(get(http.local_addr(), "/data?speed=1&turn=1"), (503, "Busy".to_string()));
    http.stop();
}

#[test]
fn stateless_clients_idle_to_neutral() {
    let mut rig = Rig::start(LoopSettings::default());
    let mut http =
        HttpTransport::start("127.0.0.1:0".parse().unwrap(), rig.events.clone(), REPLY_TIMEOUT, None).unwrap();

    assert_eq!(get(http.local_addr(), "/data?speed=200&turn=0").0, 200);
    let board = rig.board.clone();
    assert!(wait_until(Duration::from_secs(1), || board.snapshot().motor_duty == 200));
    assert!(wait_until(Duration::from_secs(2), || board.snapshot().motor_duty == 0));
    let metrics = rig.metrics.clone();
    assert!(wait_until(Duration::from_secs(1), || metrics.lock().failsafe_idle == 1));

    http.stop();
    rig.stop();
}
