//! Wire shapes for the peer RPC protocol.

use serde::{Deserialize, Serialize};

use super::log::{Entry, Index};
use super::{NodeId, Term};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    #[serde(rename = "candidateId")]
    pub candidate_id: NodeId,
    #[serde(rename = "lastLogIndex")]
    pub last_log_index: Index,
    #[serde(rename = "lastLogTerm")]
    pub last_log_term: Term,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    #[serde(rename = "voteGranted")]
    pub vote_granted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    #[serde(rename = "leaderId")]
    pub leader_id: NodeId,
    #[serde(rename = "leaderAddress")]
    pub leader_address: String,
    #[serde(rename = "prevLogIndex")]
    pub prev_log_index: Index,
    #[serde(rename = "prevLogTerm")]
    pub prev_log_term: Term,
    pub entries: Vec<Entry>,
    #[serde(rename = "leaderCommit")]
    pub leader_commit: Index,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
}

/// A tagged peer request, dispatched on `"type"` by the session front-end.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerRequest {
    RequestVote(RequestVoteRequest),
    AppendEntries(AppendEntriesRequest),
}
