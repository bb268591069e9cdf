//! A single node's acknowledged writes survive a restart.

mod common;

use common::Node;

#[test]
fn set_then_restart_preserves_value() {
    let dir = tempfile::tempdir().unwrap();

    {
        let node = Node::start_on_port("solo", &[], dir.path(), 17100);
        let response = node.send(common::set("name", "Alice"));
        assert_eq!(response["status"], "success");
        assert_eq!(response["result"], "OK");

        let response = node.send(common::get("name"));
        assert_eq!(response["status"], "success");
        assert_eq!(response["result"], "Alice");
    }

    let node = Node::start_on_port("solo", &[], dir.path(), 17101);
    let response = node.send(common::get("name"));
    assert_eq!(response["status"], "success");
    assert_eq!(response["result"], "Alice");
}
