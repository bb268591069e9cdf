//! WAL record shapes, one JSON object per line on disk: an `"op"`
//! discriminant alongside the operation's fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single write-ahead log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Record {
    #[serde(rename = "SET")]
    Set { key: String, value: Value },
    #[serde(rename = "DELETE")]
    Delete { key: String },
    #[serde(rename = "INCR")]
    Incr { key: String, amount: i64 },
}

impl Record {
    pub fn key(&self) -> &str {
        match self {
            Record::Set { key, .. } => key,
            Record::Delete { key } => key,
            Record::Incr { key, .. } => key,
        }
    }
}
