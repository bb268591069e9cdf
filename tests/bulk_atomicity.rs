//! A BULK_SET acknowledged before a crash leaves every item in the group
//! durable after restart.

mod common;

use common::Node;
use serde_json::json;

#[test]
fn bulk_set_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let node = Node::start_on_port("solo", &[], dir.path(), 17120);
        let response = node.send(json!({
            "command": "BULK_SET",
            "items": [["k1", "v1"], ["k2", "v2"]],
        }));
        assert_eq!(response["status"], "success");
        assert_eq!(response["result"], "OK");
    }

    let node = Node::start_on_port("solo", &[], dir.path(), 17121);
    assert_eq!(node.send(common::get("k1"))["result"], "v1");
    assert_eq!(node.send(common::get("k2"))["result"], "v2");
}
