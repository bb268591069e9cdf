//! Session front-end: accept loop, per-connection command parsing, and
//! dispatch to either the consensus RPC handler or the client command
//! handler.
//!
//! One thread is spawned per accepted connection. A connection's commands
//! are read and answered strictly in order; nothing within a connection
//! runs concurrently with itself, though separate connections proceed
//! independently and may be served out of order relative to each other.

mod protocol;

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use serde_json::Value;

use crate::raft::{self, rpc};
use crate::store::Store;
use protocol::{ClientRequest, error_from, error_msg, error_redirect, success};

/// Everything a connection handler needs to answer a request.
pub struct AppState {
    pub store: Arc<Store>,
    pub raft: raft::Handle,
}

/// Runs the accept loop until `shutdown` is set. To unblock the final
/// `accept`, the caller connects to its own listening address once after
/// setting the flag.
pub fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        let state = state.clone();
        std::thread::spawn(move || handle_connection(stream, state));
    }
}

fn handle_connection(stream: TcpStream, state: Arc<AppState>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(err) => {
            warn!("failed to clone connection from {peer}: {err}");
            return;
        }
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch_line(&state, line.trim());
        let mut buf = match serde_json::to_vec(&response) {
            Ok(b) => b,
            Err(err) => {
                warn!("failed to serialize response for {peer}: {err}");
                break;
            }
        };
        buf.push(b'\n');
        if writer.write_all(&buf).is_err() {
            break;
        }
    }
    debug!("connection from {peer} closed");
}

fn dispatch_line(state: &AppState, line: &str) -> Value {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return error_msg("Invalid JSON"),
    };
    let is_peer_rpc = matches!(parsed.get("type").and_then(Value::as_str), Some("RequestVote") | Some("AppendEntries"));
    if is_peer_rpc { dispatch_peer(state, parsed) } else { dispatch_client(state, parsed) }
}

fn dispatch_peer(state: &AppState, parsed: Value) -> Value {
    match serde_json::from_value::<rpc::PeerRequest>(parsed) {
        Ok(rpc::PeerRequest::RequestVote(req)) => state
            .raft
            .handle_request_vote(req)
            .and_then(|resp| serde_json::to_value(resp).ok())
            .unwrap_or(Value::Null),
        Ok(rpc::PeerRequest::AppendEntries(req)) => state
            .raft
            .handle_append_entries(req)
            .and_then(|resp| serde_json::to_value(resp).ok())
            .unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

fn dispatch_client(state: &AppState, parsed: Value) -> Value {
    let request: ClientRequest = match serde_json::from_value(parsed) {
        Ok(r) => r,
        Err(err) => return error_msg(format!("Protocol error: {err}")),
    };
    match request {
        ClientRequest::Get { key } => {
            let status = state.raft.status();
            if status.role != raft::Role::Leader {
                return error_redirect("Not Leader", status.leader_address);
            }
            match state.store.get(&key) {
                Some(value) => success(value),
                None => error_msg("Key not found"),
            }
        }
        ClientRequest::Set { key, value, simulate_failure } => {
            match state.raft.propose(raft::Command::Set { key, value, simulate_failure }) {
                Ok(value) => success(value),
                Err(err) => error_from(err),
            }
        }
        ClientRequest::Delete { key } => {
            match state.raft.propose(raft::Command::Delete { key }) {
                Ok(_) => success(Value::String("OK".into())),
                Err(err) => error_from(err),
            }
        }
        ClientRequest::Incr { key, amount } => {
            match state.raft.propose(raft::Command::Incr { key, amount }) {
                Ok(value) => success(value),
                Err(err) => error_from(err),
            }
        }
        ClientRequest::BulkSet { items, simulate_failure } => {
            match state.raft.propose(raft::Command::BulkSet { items, simulate_failure }) {
                Ok(_) => success(Value::String("OK".into())),
                Err(err) => error_from(err),
            }
        }
        ClientRequest::Search { query, top_k } => {
            let results = state.store.search(&query, top_k);
            success(Value::Array(
                results.into_iter().map(|(key, score)| serde_json::json!({"key": key, "score": score})).collect(),
            ))
        }
        ClientRequest::SemanticSearch { query, top_k } => {
            let results = state.store.semantic_search(&query, top_k);
            success(Value::Array(
                results
                    .into_iter()
                    .map(|(key, similarity)| serde_json::json!({"key": key, "similarity": similarity}))
                    .collect(),
            ))
        }
        ClientRequest::QueryIndex { field, value } => match state.store.query_index(&field, &value) {
            Ok(keys) => success(Value::Array(keys.into_iter().map(Value::String).collect())),
            Err(err) => error_msg(err.to_string()),
        },
        ClientRequest::CreateIndex { field } => {
            state.store.create_index(&field);
            success(Value::String(format!("Index created on field '{field}'")))
        }
    }
}
