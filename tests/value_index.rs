//! A value index created before any matching data exists, then populated
//! and queried.

mod common;

use common::Node;
use serde_json::json;

#[test]
fn create_index_then_query_tracks_live_keys() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::start_on_port("solo", &[], dir.path(), 17140);

    let response = node.send(json!({"command": "CREATE_INDEX", "field": "category"}));
    assert_eq!(response["status"], "success");

    node.send(common::set("a", json!({"category": "fruit"})));
    node.send(common::set("b", json!({"category": "fruit"})));
    node.send(common::set("c", json!({"category": "veg"})));

    let response = node.send(json!({"command": "QUERY_INDEX", "field": "category", "value": "fruit"}));
    let mut keys: Vec<&str> = response["result"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);

    node.send(json!({"command": "DELETE", "key": "a"}));
    let response = node.send(json!({"command": "QUERY_INDEX", "field": "category", "value": "fruit"}));
    let keys: Vec<&str> = response["result"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(keys, vec!["b"]);
}

#[test]
fn query_unknown_index_errors() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::start_on_port("solo", &[], dir.path(), 17141);

    let response = node.send(json!({"command": "QUERY_INDEX", "field": "missing", "value": "x"}));
    assert_eq!(response["status"], "error");
}
