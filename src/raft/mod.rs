//! Minimal Raft consensus: leader election, log replication, commit-index
//! advancement, and state-machine apply.
//!
//! The module is modeled as a single-threaded actor: one dedicated thread
//! owns all consensus state and is reachable only through a [`Handle`]'s
//! channel. RPC handlers, the propose path, and timers never touch
//! [`Actor`] fields directly.

pub mod log;
pub mod rpc;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport;
use log::{Entry, Index, Log};
use rpc::{AppendEntriesRequest, AppendEntriesResponse, PeerRequest, RequestVoteRequest, RequestVoteResponse};

pub type Term = u64;
pub type NodeId = String;

fn default_amount() -> i64 {
    1
}

/// A client write, as proposed through consensus. This is the Raft log
/// entry's `command` payload as well as the shape submitted to the
/// batching writer once applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    #[serde(rename = "SET")]
    Set {
        key: String,
        value: Value,
        #[serde(default)]
        simulate_failure: bool,
    },
    #[serde(rename = "DELETE")]
    Delete { key: String },
    #[serde(rename = "INCR")]
    Incr {
        key: String,
        #[serde(default = "default_amount")]
        amount: i64,
    },
    #[serde(rename = "BULK_SET")]
    BulkSet {
        items: Vec<(String, Value)>,
        #[serde(default)]
        simulate_failure: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A snapshot of the actor's role and known leader, for the session
/// front-end to decide whether to serve a request locally or redirect it.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub role: Role,
    pub leader_address: Option<String>,
    pub term: Term,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub node_id: NodeId,
    pub peers: Vec<String>,
    pub self_address: String,
    pub election_timeout: (Duration, Duration),
    pub heartbeat_interval: Duration,
    pub proposal_deadline: Duration,
    pub rpc_timeout: Duration,
}

impl Config {
    pub fn defaults(node_id: NodeId, peers: Vec<String>, self_address: String) -> Self {
        Self {
            node_id,
            peers,
            self_address,
            election_timeout: (Duration::from_millis(1500), Duration::from_millis(3000)),
            heartbeat_interval: Duration::from_millis(500),
            proposal_deadline: Duration::from_secs(2),
            rpc_timeout: transport::RPC_TIMEOUT,
        }
    }
}

/// Callback invoked once per committed entry, on every node, to perform the
/// in-memory mutation and durable WAL submission. Returns the value to
/// report back to the client that originated the write (only meaningful on
/// the leader that proposed it).
pub type ApplyFn = Arc<dyn Fn(&Command) -> Result<Value> + Send + Sync>;

enum Message {
    RequestVote(RequestVoteRequest, Sender<RequestVoteResponse>),
    AppendEntries(AppendEntriesRequest, Sender<AppendEntriesResponse>),
    Propose(Command, Sender<Result<Value>>),
    VoteReply { peer: String, term_sent: Term, response: Option<RequestVoteResponse> },
    AppendReply {
        peer: String,
        term_sent: Term,
        prev_log_index: Index,
        num_entries: usize,
        response: Option<AppendEntriesResponse>,
    },
    Status(Sender<StatusSnapshot>),
    Shutdown,
}

/// A cheaply cloneable reference to a running consensus actor.
#[derive(Clone)]
pub struct Handle {
    tx: Sender<Message>,
    proposal_deadline: Duration,
}

impl Handle {
    pub fn status(&self) -> StatusSnapshot {
        let (reply_tx, reply_rx) = channel::bounded(1);
        if self.tx.send(Message::Status(reply_tx)).is_err() {
            return StatusSnapshot { role: Role::Follower, leader_address: None, term: 0 };
        }
        reply_rx.recv().unwrap_or(StatusSnapshot { role: Role::Follower, leader_address: None, term: 0 })
    }

    pub fn handle_request_vote(&self, req: RequestVoteRequest) -> Option<RequestVoteResponse> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx.send(Message::RequestVote(req, reply_tx)).ok()?;
        reply_rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    pub fn handle_append_entries(&self, req: AppendEntriesRequest) -> Option<AppendEntriesResponse> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx.send(Message::AppendEntries(req, reply_tx)).ok()?;
        reply_rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    /// Proposes a write through consensus, blocking until it commits, is
    /// rejected (non-leader), or times out.
    pub fn propose(&self, command: Command) -> Result<Value> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx
            .send(Message::Propose(command, reply_tx))
            .map_err(|_| Error::Internal("consensus actor is not running".into()))?;
        reply_rx
            .recv_timeout(self.proposal_deadline + Duration::from_secs(1))
            .unwrap_or(Err(Error::ProposalTimeout))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

struct Waiter {
    reply: Sender<Result<Value>>,
    deadline: Instant,
}

struct Actor {
    config: Config,
    log: Log,
    role: Role,
    leader_address: Option<String>,
    last_applied: Index,
    next_index: HashMap<String, Index>,
    match_index: HashMap<String, Index>,
    votes_received: HashSet<String>,
    waiters: BTreeMap<Index, Waiter>,
    next_deadline: Instant,
    self_tx: Sender<Message>,
    apply_fn: ApplyFn,
}

/// Spawns the consensus actor on a dedicated thread and returns a [`Handle`]
/// plus its [`JoinHandle`] for coordinated shutdown.
pub fn spawn(config: Config, log: Log, apply_fn: ApplyFn) -> (Handle, JoinHandle<()>) {
    let (tx, rx) = channel::unbounded();
    let handle = Handle { tx: tx.clone(), proposal_deadline: config.proposal_deadline };
    let mut actor = Actor {
        config,
        log,
        role: Role::Follower,
        leader_address: None,
        last_applied: 0,
        next_index: HashMap::new(),
        match_index: HashMap::new(),
        votes_received: HashSet::new(),
        waiters: BTreeMap::new(),
        next_deadline: Instant::now(),
        self_tx: tx,
        apply_fn,
    };
    let join = std::thread::spawn(move || actor.run(rx));
    (handle, join)
}

impl Actor {
    fn current_term(&self) -> Term {
        self.log.term_vote().0
    }

    fn run(&mut self, rx: Receiver<Message>) {
        self.start();
        loop {
            let timeout = self.next_deadline.saturating_duration_since(Instant::now());
            channel::select! {
                recv(rx) -> msg => match msg {
                    Ok(Message::Shutdown) | Err(_) => {
                        self.fail_all_waiters();
                        return;
                    }
                    Ok(msg) => self.handle_message(msg),
                },
                recv(channel::after(timeout)) -> _ => self.handle_timeout(),
            }
            self.expire_waiters();
        }
    }

    fn start(&mut self) {
        if self.config.peers.is_empty() {
            if self.current_term() == 0 {
                let _ = self.log.set_term_vote(1, None);
            }
            self.role = Role::Leader;
            self.leader_address = Some(self.config.self_address.clone());
            self.next_deadline = Instant::now() + self.config.heartbeat_interval;
        } else {
            self.reset_election_deadline();
        }
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::RequestVote(req, reply) => {
                let _ = reply.send(self.handle_request_vote(req));
            }
            Message::AppendEntries(req, reply) => {
                let _ = reply.send(self.handle_append_entries(req));
            }
            Message::Propose(command, reply) => self.propose(command, reply),
            Message::VoteReply { peer, term_sent, response } => {
                self.handle_vote_reply(peer, term_sent, response)
            }
            Message::AppendReply { peer, term_sent, prev_log_index, num_entries, response } => {
                self.handle_append_reply(peer, term_sent, prev_log_index, num_entries, response)
            }
            Message::Status(reply) => {
                let _ = reply.send(StatusSnapshot {
                    role: self.role,
                    leader_address: self.leader_address.clone(),
                    term: self.current_term(),
                });
            }
            Message::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_timeout(&mut self) {
        match self.role {
            Role::Leader => {
                for peer in self.config.peers.clone() {
                    self.send_append_entries(peer);
                }
                self.next_deadline = Instant::now() + self.config.heartbeat_interval;
            }
            Role::Follower | Role::Candidate => self.start_election(),
        }
    }

    fn reset_election_deadline(&mut self) {
        let (min, max) = self.config.election_timeout;
        let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        self.next_deadline = Instant::now() + Duration::from_millis(millis);
    }

    fn become_follower(&mut self, term: Term) {
        let _ = self.log.set_term_vote(term, None);
        self.role = Role::Follower;
        self.fail_all_waiters();
        self.reset_election_deadline();
    }

    fn start_election(&mut self) {
        let term = self.current_term() + 1;
        if self.log.set_term_vote(term, Some(self.config.node_id.clone())).is_err() {
            return;
        }
        self.role = Role::Candidate;
        self.leader_address = None;
        self.votes_received.clear();
        self.reset_election_deadline();

        let request = RequestVoteRequest {
            term,
            candidate_id: self.config.node_id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in &self.config.peers {
            let peer = peer.clone();
            let tx = self.self_tx.clone();
            let req = request.clone();
            let timeout = self.config.rpc_timeout;
            std::thread::spawn(move || {
                let response = transport::call::<PeerRequest, RequestVoteResponse>(
                    &peer,
                    &PeerRequest::RequestVote(req),
                    timeout,
                );
                let _ = tx.send(Message::VoteReply { peer, term_sent: term, response });
            });
        }
    }

    fn handle_vote_reply(&mut self, peer: String, term_sent: Term, response: Option<RequestVoteResponse>) {
        if term_sent != self.current_term() || self.role != Role::Candidate {
            return;
        }
        let Some(response) = response else { return };
        if response.term > self.current_term() {
            self.become_follower(response.term);
            return;
        }
        if response.vote_granted {
            self.votes_received.insert(peer);
        }
        let quorum = (self.config.peers.len() + 1) / 2 + 1;
        if self.votes_received.len() + 1 >= quorum {
            self.become_leader();
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_address = Some(self.config.self_address.clone());
        self.next_index.clear();
        self.match_index.clear();
        for peer in &self.config.peers {
            self.next_index.insert(peer.clone(), self.log.last_index() + 1);
            self.match_index.insert(peer.clone(), 0);
        }
        // No-op entry so prior-term entries can be committed (Raft §5.4.2).
        let _ = self.log.append(None);
        for peer in self.config.peers.clone() {
            self.send_append_entries(peer);
        }
        self.next_deadline = Instant::now() + self.config.heartbeat_interval;
    }

    fn send_append_entries(&mut self, peer: String) {
        let next_index = *self.next_index.entry(peer.clone()).or_insert(self.log.last_index() + 1);
        let prev_log_index = next_index.saturating_sub(1);
        let prev_log_term =
            if prev_log_index == 0 { 0 } else { self.log.get(prev_log_index).map(|e| e.term).unwrap_or(0) };
        let entries = self.log.entries_after(prev_log_index);
        let num_entries = entries.len();
        let request = AppendEntriesRequest {
            term: self.current_term(),
            leader_id: self.config.node_id.clone(),
            leader_address: self.config.self_address.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.log.commit_index(),
        };
        let term_sent = request.term;
        let tx = self.self_tx.clone();
        let timeout = self.config.rpc_timeout;
        let peer_for_reply = peer.clone();
        std::thread::spawn(move || {
            let response = transport::call::<PeerRequest, AppendEntriesResponse>(
                &peer,
                &PeerRequest::AppendEntries(request),
                timeout,
            );
            let _ = tx.send(Message::AppendReply {
                peer: peer_for_reply,
                term_sent,
                prev_log_index,
                num_entries,
                response,
            });
        });
    }

    fn handle_append_reply(
        &mut self,
        peer: String,
        term_sent: Term,
        prev_log_index: Index,
        num_entries: usize,
        response: Option<AppendEntriesResponse>,
    ) {
        if term_sent != self.current_term() || self.role != Role::Leader {
            return;
        }
        let Some(response) = response else { return };
        if response.term > self.current_term() {
            self.become_follower(response.term);
            return;
        }
        if response.success {
            if num_entries > 0 {
                let match_index = prev_log_index + num_entries as Index;
                self.match_index.insert(peer.clone(), match_index);
                self.next_index.insert(peer, match_index + 1);
            }
            self.recompute_commit_index();
        } else {
            let next = self.next_index.entry(peer.clone()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
        }
    }

    fn recompute_commit_index(&mut self) {
        let mut indices: Vec<Index> = self.match_index.values().copied().collect();
        indices.push(self.log.last_index());
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_pos = (self.config.peers.len() + 1) / 2;
        let Some(&quorum_index) = indices.get(quorum_pos) else { return };
        if quorum_index > self.log.commit_index()
            && self.log.get(quorum_index).map(|e| e.term) == Some(self.current_term())
        {
            self.log.commit(quorum_index);
            self.apply_committed();
            for peer in self.config.peers.clone() {
                self.send_append_entries(peer);
            }
        }
    }

    fn propose(&mut self, command: Command, reply: Sender<Result<Value>>) {
        if self.role != Role::Leader {
            let _ = reply.send(Err(Error::NotLeader { redirect: self.leader_address.clone() }));
            return;
        }
        let Ok(index) = self.log.append(Some(command)) else {
            let _ = reply.send(Err(Error::Internal("failed to append log entry".into())));
            return;
        };
        self.waiters.insert(index, Waiter { reply, deadline: Instant::now() + self.config.proposal_deadline });
        if self.config.peers.is_empty() {
            self.log.commit(index);
            self.apply_committed();
        } else {
            for peer in self.config.peers.clone() {
                self.send_append_entries(peer);
            }
        }
    }

    fn apply_committed(&mut self) {
        while self.log.commit_index() > self.last_applied {
            self.last_applied += 1;
            let Some(entry) = self.log.get(self.last_applied).cloned() else { break };
            let result = match &entry.command {
                Some(command) => (self.apply_fn)(command),
                None => Ok(Value::Null),
            };
            if let Some(waiter) = self.waiters.remove(&entry.index) {
                let _ = waiter.reply.send(result);
            }
        }
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let expired: Vec<Index> =
            self.waiters.iter().filter(|(_, w)| w.deadline <= now).map(|(i, _)| *i).collect();
        for index in expired {
            if let Some(waiter) = self.waiters.remove(&index) {
                let _ = waiter.reply.send(Err(Error::ProposalTimeout));
            }
        }
    }

    fn fail_all_waiters(&mut self) {
        for (_, waiter) in std::mem::take(&mut self.waiters) {
            let _ = waiter.reply.send(Err(Error::ProposalTimeout));
        }
    }

    fn handle_request_vote(&mut self, req: RequestVoteRequest) -> RequestVoteResponse {
        if req.term > self.current_term() {
            self.become_follower(req.term);
        }
        let current_term = self.current_term();
        let mut vote_granted = false;
        if req.term >= current_term {
            let (_, voted_for) = self.log.term_vote();
            if voted_for.is_none() || voted_for.as_ref() == Some(&req.candidate_id) {
                let (my_last_index, my_last_term) = (self.log.last_index(), self.log.last_term());
                let log_ok = req.last_log_term > my_last_term
                    || (req.last_log_term == my_last_term && req.last_log_index >= my_last_index);
                if log_ok {
                    vote_granted = true;
                    let _ = self.log.set_term_vote(current_term, Some(req.candidate_id.clone()));
                    self.reset_election_deadline();
                }
            }
        }
        RequestVoteResponse { term: current_term, vote_granted }
    }

    fn handle_append_entries(&mut self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        if req.term > self.current_term() {
            self.become_follower(req.term);
        }
        let current_term = self.current_term();
        if req.term < current_term {
            return AppendEntriesResponse { term: current_term, success: false };
        }

        self.role = Role::Follower;
        self.leader_address = Some(req.leader_address.clone());
        self.reset_election_deadline();

        if req.prev_log_index > self.log.last_index() {
            return AppendEntriesResponse { term: current_term, success: false };
        }
        let prev_matches = req.prev_log_index == 0
            || self.log.get(req.prev_log_index).map(|e| e.term) == Some(req.prev_log_term);
        if !prev_matches {
            let _ = self.log.truncate_to(req.prev_log_index);
            return AppendEntriesResponse { term: current_term, success: false };
        }

        if !req.entries.is_empty() {
            if self.log.splice(req.entries).is_err() {
                return AppendEntriesResponse { term: current_term, success: false };
            }
        }

        if req.leader_commit > self.log.commit_index() {
            let new_commit = req.leader_commit.min(self.log.last_index());
            self.log.commit(new_commit);
            self.apply_committed();
        }

        AppendEntriesResponse { term: current_term, success: true }
    }
}
