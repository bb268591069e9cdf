//! Peer RPC transport: a single JSON request over a freshly-dialed TCP
//! connection, followed by one JSON reply, followed by close. Any failure
//! (dial, timeout, malformed reply) is reported as "no response" — the
//! caller treats that as a retry-on-next-heartbeat, never as a client error.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub const RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Sends `request` to `addr` and returns the parsed reply, or `None` on any
/// failure within `timeout`.
pub fn call<Req: Serialize, Resp: DeserializeOwned>(
    addr: &str,
    request: &Req,
    timeout: Duration,
) -> Option<Resp> {
    let socket_addr = addr.parse().ok().or_else(|| {
        use std::net::ToSocketAddrs;
        addr.to_socket_addrs().ok()?.next()
    })?;
    let mut stream = TcpStream::connect_timeout(&socket_addr, timeout).ok()?;
    stream.set_read_timeout(Some(timeout)).ok()?;
    stream.set_write_timeout(Some(timeout)).ok()?;

    let mut payload = serde_json::to_vec(request).ok()?;
    payload.push(b'\n');
    stream.write_all(&payload).ok()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    if line.trim().is_empty() {
        return None;
    }
    serde_json::from_str(line.trim()).ok()
}
