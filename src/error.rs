//! Error and Result types shared across the crate.

use std::fmt::{self, Display};

/// The error kinds a command handler or internal subsystem can surface.
///
/// `Transport` failures (peer RPC dial/timeout/malformed reply) are
/// deliberately not a variant here: they are caught at the RPC boundary,
/// logged, and treated as "no response" by the consensus module. They never
/// reach a client.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed request: bad JSON, missing fields, unknown command.
    Protocol(String),
    /// A write was attempted on a non-leader node.
    NotLeader { redirect: Option<String> },
    /// A read or delete targeted a key that doesn't exist.
    NotFound(String),
    /// An INCR targeted a key whose value is not an integer.
    TypeError(String),
    /// The leader could not replicate an entry within the proposal deadline.
    ProposalTimeout,
    /// The batching writer could not complete a durable flush.
    Durability(String),
    /// No secondary index exists on the requested field.
    NoSuchIndex(String),
    /// Catch-all for I/O, encoding, and other unexpected failures.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(msg) => write!(f, "{msg}"),
            Error::NotLeader { .. } => write!(f, "Not Leader"),
            Error::NotFound(key) => write!(f, "Key '{key}' not found"),
            Error::TypeError(msg) => write!(f, "{msg}"),
            Error::ProposalTimeout => {
                write!(f, "Raft Proposal Failed (Timeout or Leadership lost)")
            }
            Error::Durability(msg) => write!(f, "durability failure: {msg}"),
            Error::NoSuchIndex(field) => write!(f, "No index on field '{field}'"),
            Error::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
