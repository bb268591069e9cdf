//! A replicated, persistent key-value store: Raft consensus over a
//! durable write-ahead log, with in-memory secondary indexes for
//! exact-match, BM25, and TF-IDF queries.

pub mod apply;
pub mod batch;
pub mod config;
pub mod error;
pub mod index;
pub mod raft;
pub mod server;
pub mod store;
pub mod transport;
