//! Shared harness for integration tests: spawns the real `kvraftd` binary
//! and drives it over a real TCP socket with line-delimited JSON, matching
//! how an actual client talks to the server.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

static NEXT_PORT: AtomicU16 = AtomicU16::new(17000);

fn claim_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

pub struct Node {
    pub port: u16,
    pub id: String,
    child: Child,
}

impl Node {
    /// Starts a node with the given `id` and `peers` in a fresh scratch
    /// directory, waiting until it accepts connections.
    pub fn start(id: &str, peers: &[u16], dir: &Path) -> Self {
        Self::start_on_port(id, peers, dir, claim_port())
    }

    /// Starts a node reusing `dir` and `port` — the way a restart-after-
    /// crash scenario reconnects to the same on-disk state.
    pub fn start_on_port(id: &str, peers: &[u16], dir: &Path, port: u16) -> Self {
        let peers_arg = peers.iter().map(|p| format!("127.0.0.1:{p}")).collect::<Vec<_>>().join(",");

        let child = escargot::CargoBuild::new()
            .bin("kvraftd")
            .current_release()
            .run()
            .expect("build kvraftd")
            .command()
            .arg("--port")
            .arg(port.to_string())
            .arg("--id")
            .arg(id)
            .arg("--peers")
            .arg(peers_arg)
            .env("KV_STORE_FILE", dir.join("kv_store.wal"))
            .spawn()
            .expect("spawn kvraftd");

        let node = Self { port, id: id.to_string(), child };
        node.wait_until_accepting();
        node
    }

    fn wait_until_accepting(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("node {} never started listening on {}", self.id, self.port);
    }

    /// Sends one command and returns the parsed response envelope.
    pub fn send(&self, command: Value) -> Value {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        let mut payload = serde_json::to_vec(&command).unwrap();
        payload.push(b'\n');
        stream.write_all(&payload).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response");
        serde_json::from_str(line.trim()).expect("parse response")
    }

    /// Sends a write, following up to `max_hops` redirects to the leader.
    pub fn send_with_redirect(&self, command: Value, cluster: &[&Node], max_hops: usize) -> Value {
        let mut current = self;
        let mut response = current.send(command.clone());
        for _ in 0..max_hops {
            let Some(redirect) = response.get("redirect").and_then(Value::as_str) else { break };
            if response.get("status").and_then(Value::as_str) != Some("error") {
                break;
            }
            let Some(target) = cluster.iter().find(|n| format!("127.0.0.1:{}", n.port) == redirect) else {
                break;
            };
            current = target;
            response = current.send(command.clone());
        }
        response
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn set(key: &str, value: impl Into<Value>) -> Value {
    json!({"command": "SET", "key": key, "value": value.into()})
}

pub fn get(key: &str) -> Value {
    json!({"command": "GET", "key": key})
}
