//! End-to-end protocol tests against a spawned agent binary.
//!
//! Each test owns its agent on a distinct unlikely port so the tests can
//! run in parallel. Commands are sent as separate segments with a short
//! gap: the agent treats one read as one message.

use assert_cmd::prelude::*;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

const SECRET: &str = "S3CR3T";

struct Agent {
    child: Child,
    port: u16,
}

impl Agent {
    fn spawn(port: u16) -> Agent {
        let mut cmd = Command::cargo_bin("pulse_agent").expect("binary exists");
        cmd.env("PULSE_AGENT_SECRET", SECRET)
            .env("PULSE_AGENT_ACCEPT_PAUSE_MS", "10")
            .env("RUST_LOG", "error")
            .arg("-p")
            .arg(port.to_string());
        let child = cmd.spawn().expect("spawn agent");
        let agent = Agent { child, port };
        agent.await_bind();
        agent
    }

    // Poll until the listener answers; the probe connection is dropped
    // unused and the agent simply cycles back to accept.
    fn await_bind(&self) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                // give the agent time to reap the probe and re-accept
                std::thread::sleep(Duration::from_millis(100));
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("agent did not bind port {}", self.port);
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        stream
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn send(stream: &mut TcpStream, msg: &str) {
    stream.write_all(msg.as_bytes()).expect("write");
    // let the agent consume this segment before the next one lands
    std::thread::sleep(Duration::from_millis(80));
}

fn read_reply(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).expect("read reply");
    String::from_utf8(buf[..n].to_vec()).expect("utf-8 reply")
}

fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected silent close, got {n} bytes"),
        // a reset also proves the agent tore the connection down
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => panic!("expected close, got error {e}"),
    }
}

fn assert_well_formed(record: &str) {
    let fields: Vec<&str> = record.split(':').collect();
    assert_eq!(fields.len(), 9, "bad record {record:?}");
    for idx in [0, 5, 8] {
        let (_, frac) = fields[idx]
            .split_once('.')
            .unwrap_or_else(|| panic!("field {idx} not fractional in {record:?}"));
        assert_eq!(frac.len(), 4, "field {idx} precision in {record:?}");
        let v: f64 = fields[idx].parse().expect("float field");
        assert!(v.is_finite());
    }
    assert!(matches!(fields[1], "0" | "1"), "db flag in {record:?}");
    for idx in [2, 3, 4, 6, 7] {
        fields[idx]
            .parse::<u32>()
            .unwrap_or_else(|_| panic!("field {idx} not integral in {record:?}"));
    }
}

#[test]
fn wrong_secret_closes_with_zero_bytes() {
    let agent = Agent::spawn(50910);
    let mut stream = agent.connect();
    send(&mut stream, "wrong");
    expect_eof(&mut stream);
}

#[test]
fn command_before_auth_closes_with_zero_bytes() {
    let agent = Agent::spawn(50911);
    let mut stream = agent.connect();
    send(&mut stream, "get-snapshot");
    expect_eof(&mut stream);
}

#[test]
fn snapshot_flow_yields_repeated_records() {
    let agent = Agent::spawn(50912);
    let mut stream = agent.connect();
    send(&mut stream, SECRET);
    send(&mut stream, "get-snapshot");
    let first = read_reply(&mut stream);
    assert_well_formed(&first);

    send(&mut stream, "get-snapshot");
    let second = read_reply(&mut stream);
    assert_well_formed(&second);

    send(&mut stream, "close");
    expect_eof(&mut stream);
}

#[test]
fn oversized_message_closes_the_connection() {
    let agent = Agent::spawn(50913);
    let mut stream = agent.connect();
    let oversized = vec![b'x'; 600];
    stream.write_all(&oversized).expect("write oversized");
    expect_eof(&mut stream);
}

#[test]
fn unknown_tokens_after_auth_are_ignored() {
    let agent = Agent::spawn(50914);
    let mut stream = agent.connect();
    send(&mut stream, SECRET);
    send(&mut stream, "bogus-command");
    send(&mut stream, "get-snapshot");
    let record = read_reply(&mut stream);
    assert_well_formed(&record);
}

#[test]
fn terminate_stops_the_agent_with_exit_zero() {
    let mut agent = Agent::spawn(50915);
    {
        let mut stream = agent.connect();
        send(&mut stream, SECRET);
        send(&mut stream, "terminate-agent");
        expect_eof(&mut stream);
    }

    let status = agent.child.wait().expect("agent exit status");
    assert_eq!(status.code(), Some(0), "terminate must exit cleanly");

    // nothing listens any more
    assert!(TcpStream::connect(("127.0.0.1", agent.port)).is_err());
}
