//! Client command shapes and response envelope helpers for the
//! line-delimited JSON protocol.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Error;

fn default_amount() -> i64 {
    1
}

fn default_top_k() -> usize {
    10
}

#[derive(Deserialize)]
#[serde(tag = "command")]
pub enum ClientRequest {
    #[serde(rename = "SET")]
    Set {
        key: String,
        value: Value,
        #[serde(default)]
        simulate_failure: bool,
    },
    #[serde(rename = "GET")]
    Get { key: String },
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
    #[serde(rename = "SEARCH")]
    Search {
        #[serde(default)]
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    #[serde(rename = "SEMANTIC_SEARCH")]
    SemanticSearch {
        #[serde(default)]
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    #[serde(rename = "QUERY_INDEX")]
    QueryIndex { field: String, value: Value },
    #[serde(rename = "CREATE_INDEX")]
    CreateIndex { field: String },
}

pub fn success(result: Value) -> Value {
    json!({"status": "success", "result": result})
}

pub fn error_msg(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

pub fn error_redirect(message: &str, redirect: Option<String>) -> Value {
    json!({"status": "error", "message": message, "redirect": redirect})
}

/// Renders a propose/store error as a response envelope, special-casing
/// `NotLeader` for its redirect hint.
pub fn error_from(err: Error) -> Value {
    match err {
        Error::NotLeader { redirect } => error_redirect("Not Leader", redirect),
        other => error_msg(other.to_string()),
    }
}
