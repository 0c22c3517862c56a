use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use googletest::prelude::*;
use rstest::rstest;

use super::DispatcherReactor;
use lircd_common::config::RuntimeConfig;

fn test_config(dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        client_socket_path: dir.join("lircd"),
        pidfile_path: dir.join("lircd.pid"),
        nodaemon: true,
        allow_simulate: true,
        ..RuntimeConfig::default()
    }
}

fn connect(path: &Path) -> UnixStream {
    let stream = UnixStream::connect(path).expect("endpoint accepts connections");
    stream
        .set_nonblocking(true)
        .expect("nonblocking test client should be configurable");
    stream
}

fn drain_into(stream: &mut UnixStream, sink: &mut Vec<u8>) {
    let mut chunk = [0_u8; 512];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(read_len) => sink.extend_from_slice(&chunk[..read_len]),
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return,
        }
    }
}

fn pump_until_contains(
    reactor: &mut DispatcherReactor,
    stream: &mut UnixStream,
    sink: &mut Vec<u8>,
    needle: &str,
) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        let _ = reactor.poll_once().expect("reactor poll should succeed");
        drain_into(stream, sink);
        if String::from_utf8_lossy(sink).contains(needle) {
            return;
        }
    }
    panic!("timed out waiting for {needle:?}");
}

/// Walks a fake backend through the registration handshake.
///
/// Returns the backend's command socket, the fifo write end and the (now unlinked) fifo path.
fn register_fake_backend(
    reactor: &mut DispatcherReactor,
    config: &RuntimeConfig,
    name: &str,
    device: &str,
) -> (UnixStream, std::fs::File, PathBuf) {
    let mut backend = connect(&config.backend_socket_path());
    let mut received = Vec::new();
    pump_until_contains(reactor, &mut backend, &mut received, "GET_BACKEND_INFO\n");
    backend
        .write_all(
            format!("BEGIN\nGET_BACKEND_INFO\nSUCCESS\nDATA\n1\nstd 42 {name} {device}\nEND\n")
                .as_bytes(),
        )
        .expect("info reply should be writable");

    received.clear();
    pump_until_contains(reactor, &mut backend, &mut received, "\n");
    let text = String::from_utf8_lossy(&received).into_owned();
    let assignment = text
        .lines()
        .find(|line| line.starts_with("SET_DATA_SOCKET "))
        .expect("fifo assignment arrives");
    let fifo_path = PathBuf::from(assignment.trim_start_matches("SET_DATA_SOCKET ").trim());

    // The backend opens its event fifo before confirming, while the name still exists.
    let writer = std::fs::OpenOptions::new()
        .write(true)
        .open(&fifo_path)
        .expect("fifo is held open for reading");
    backend
        .write_all(b"BEGIN\nSET_DATA_SOCKET\nSUCCESS\nEND\n")
        .expect("confirmation should be writable");

    let deadline = Instant::now() + Duration::from_secs(3);
    while reactor.engine.default_backend().is_none() && Instant::now() < deadline {
        let _ = reactor.poll_once().expect("reactor poll should succeed");
    }
    assert_that!(reactor.engine.default_backend().is_some(), eq(true));
    (backend, writer, fifo_path)
}

#[rstest]
fn legacy_command_without_backend_gets_an_error_reply() {
    let dir = tempfile::tempdir().expect("scratch dir");
    let config = test_config(dir.path());
    let mut reactor = DispatcherReactor::bind(config.clone()).expect("reactor bind should succeed");

    let mut client = connect(&config.client_socket_path);
    client
        .write_all(b"SEND_ONCE x y\n")
        .expect("directive should be writable");

    let mut received = Vec::new();
    pump_until_contains(&mut reactor, &mut client, &mut received, "END\n");
    let reply = String::from_utf8_lossy(&received).into_owned();
    assert_that!(
        reply,
        eq("BEGIN\nSEND_ONCE x y\nERROR\nDATA\n1\nBackend unavailable\nEND\n")
    );
}

#[rstest]
fn backend_registers_and_control_commands_round_trip() {
    let dir = tempfile::tempdir().expect("scratch dir");
    let config = test_config(dir.path());
    let mut reactor = DispatcherReactor::bind(config.clone()).expect("reactor bind should succeed");

    let (mut backend, _writer, fifo_path) =
        register_fake_backend(&mut reactor, &config, "lame", "/dev/null");
    assert_that!(fifo_path.exists(), eq(false));

    let mut control = connect(&config.control_socket_path());
    control
        .write_all(b"LIST_BACKENDS\n")
        .expect("directive should be writable");
    let mut received = Vec::new();
    pump_until_contains(&mut reactor, &mut control, &mut received, "END\n");
    assert_that!(
        String::from_utf8_lossy(&received).into_owned(),
        eq("BEGIN\nLIST_BACKENDS\nSUCCESS\nDATA\n1\nlame@/dev/null\nEND\n")
    );

    control
        .write_all(b"SEND_ONCE lame@/dev/null Vol+\n")
        .expect("directive should be writable");
    let mut forwarded = Vec::new();
    pump_until_contains(&mut reactor, &mut backend, &mut forwarded, "\n");
    assert_that!(
        String::from_utf8_lossy(&forwarded).into_owned(),
        eq("SEND_ONCE Vol+\n")
    );

    let reply = "BEGIN\nSEND_ONCE Vol+\nSUCCESS\nEND\n";
    backend
        .write_all(reply.as_bytes())
        .expect("reply should be writable");
    let mut received = Vec::new();
    pump_until_contains(&mut reactor, &mut control, &mut received, "END\n");
    assert_that!(String::from_utf8_lossy(&received).into_owned(), eq(reply));
}

#[rstest]
fn fifo_events_reach_every_unbound_client_in_order() {
    let dir = tempfile::tempdir().expect("scratch dir");
    let config = test_config(dir.path());
    let mut reactor = DispatcherReactor::bind(config.clone()).expect("reactor bind should succeed");

    let (_backend, mut writer, _fifo_path) =
        register_fake_backend(&mut reactor, &config, "lame", "/dev/null");
    let mut first = connect(&config.client_socket_path);
    let mut second = connect(&config.client_socket_path);
    // Let the reactor accept both clients before the events flow.
    let deadline = Instant::now() + Duration::from_secs(3);
    while reactor.engine.table().client_streams().len() < 2 && Instant::now() < deadline {
        let _ = reactor.poll_once().expect("reactor poll should succeed");
    }
    assert_that!(reactor.engine.table().client_streams().len(), eq(2_usize));

    writer
        .write_all(b"ev-one\nev-two\nev-three\n")
        .expect("fifo should accept events");

    let mut seen_first = Vec::new();
    pump_until_contains(&mut reactor, &mut first, &mut seen_first, "ev-three\n");
    assert_that!(
        String::from_utf8_lossy(&seen_first).into_owned(),
        eq("ev-one\nev-two\nev-three\n")
    );
    let mut seen_second = Vec::new();
    pump_until_contains(&mut reactor, &mut second, &mut seen_second, "ev-three\n");
    assert_that!(
        String::from_utf8_lossy(&seen_second).into_owned(),
        eq("ev-one\nev-two\nev-three\n")
    );
}

#[rstest]
fn silent_backend_times_out_and_frees_the_caller() {
    let dir = tempfile::tempdir().expect("scratch dir");
    let config = test_config(dir.path());
    let mut reactor = DispatcherReactor::bind(config.clone()).expect("reactor bind should succeed");

    let (mut backend, _writer, _fifo_path) =
        register_fake_backend(&mut reactor, &config, "lame", "/dev/null");
    let mut control = connect(&config.control_socket_path());
    control
        .write_all(b"SEND_ONCE lame@/dev/null Vol+\n")
        .expect("directive should be writable");

    let started = Instant::now();
    let mut received = Vec::new();
    pump_until_contains(&mut reactor, &mut control, &mut received, "TIMEOUT");
    assert_that!(started.elapsed() < Duration::from_secs(3), eq(true));
    assert_that!(
        String::from_utf8_lossy(&received).contains("ERROR"),
        eq(true)
    );

    // The same connection can issue the next command, and it succeeds once the backend talks.
    let mut stale = Vec::new();
    drain_into(&mut backend, &mut stale);
    control
        .write_all(b"LIST_REMOTES lame@/dev/null\n")
        .expect("directive should be writable");
    let mut forwarded = Vec::new();
    pump_until_contains(&mut reactor, &mut backend, &mut forwarded, "LIST_REMOTES\n");
    backend
        .write_all(b"BEGIN\nLIST_REMOTES\nSUCCESS\nDATA\n1\ntv\nEND\n")
        .expect("reply should be writable");
    let mut received = Vec::new();
    pump_until_contains(&mut reactor, &mut control, &mut received, "END\n");
    assert_that!(
        String::from_utf8_lossy(&received).contains("SUCCESS"),
        eq(true)
    );
}
