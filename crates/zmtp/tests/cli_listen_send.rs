#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_zmtp");

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port should be available")
}

fn spawn_listener(port: u16, extra: &[&str]) -> Child {
    Command::new(BIN)
        .args(["--log-level", "error", "--format", "json", "listen"])
        .args(["--port", &port.to_string(), "--count", "1"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen command should start")
}

/// Run `send` until the listener is up (connection refused maps to exit 3).
fn send_until_accepted(port: u16, extra: &[&str]) -> Output {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let output = Command::new(BIN)
            .args(["--log-level", "error", "--format", "json", "send", "127.0.0.1"])
            .args(["--port", &port.to_string()])
            .args(extra)
            .output()
            .expect("send command should run");
        if output.status.code() != Some(3) || Instant::now() >= deadline {
            return output;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_for_exit(child: &mut Child) -> (i32, String) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("listener did not exit");
        }
        thread::sleep(Duration::from_millis(25));
    };
    let mut stdout = String::new();
    child
        .stdout
        .take()
        .expect("stdout is piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be utf-8");
    (status.code().unwrap_or(-1), stdout)
}

#[test]
fn listen_prints_message_sent_by_send() {
    let port = free_port();
    let mut listener = spawn_listener(port, &[]);

    let sent = send_until_accepted(port, &["--data", "hello"]);
    assert!(sent.status.success(), "send failed: {sent:?}");

    let (code, stdout) = wait_for_exit(&mut listener);
    assert_eq!(code, 0);
    let line = stdout.lines().next().expect("one message line");
    let value: serde_json::Value = serde_json::from_str(line).expect("json output");
    assert_eq!(value["payload"], "hello");
    assert_eq!(value["size"], 5);
    assert_eq!(value["more"], false);
    assert_eq!(value["command"], false);
}

#[test]
fn echo_reply_is_printed_by_send_wait() {
    let port = free_port();
    let mut listener = spawn_listener(port, &["--echo"]);

    let sent = send_until_accepted(port, &["--data", "ping", "--wait"]);
    assert!(sent.status.success(), "send failed: {sent:?}");
    let stdout = String::from_utf8(sent.stdout).expect("utf-8 output");
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("reply should be json");
    assert_eq!(value["payload"], "ping");

    let (code, _) = wait_for_exit(&mut listener);
    assert_eq!(code, 0);
}

#[test]
fn send_without_listener_is_a_transport_error() {
    let port = free_port();
    let output = Command::new(BIN)
        .args(["--log-level", "error", "send", "127.0.0.1"])
        .args(["--port", &port.to_string(), "--data", "x"])
        .output()
        .expect("send command should run");
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"), "stderr: {stderr}");
}

#[test]
fn version_prints_name() {
    let output = Command::new(BIN)
        .args(["version", "--extended"])
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: zmtp"));
    assert!(stdout.contains("ZMTP 3.0"));
}
