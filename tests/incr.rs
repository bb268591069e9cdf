//! INCR arithmetic and its type-error message.

mod common;

use common::Node;
use serde_json::json;

#[test]
fn incr_arithmetic_and_type_error() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::start_on_port("solo", &[], dir.path(), 17110);

    let response = node.send(common::set("score", 100));
    assert_eq!(response["status"], "success");

    let response = node.send(json!({"command": "INCR", "key": "score", "amount": 10}));
    assert_eq!(response["status"], "success");
    assert_eq!(response["result"], 110);

    let response = node.send(common::get("score"));
    assert_eq!(response["result"], 110);

    let response = node.send(common::set("score", "x"));
    assert_eq!(response["status"], "success");

    let response = node.send(json!({"command": "INCR", "key": "score", "amount": 1}));
    assert_eq!(response["status"], "error");
    assert_eq!(response["message"], "Key 'score' cannot be incremented: value is not an integer.");
}
