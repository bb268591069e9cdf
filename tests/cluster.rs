//! A three-node cluster elects a leader, redirects a write issued against
//! a follower, and survives the leader's death.

mod common;

use std::time::Duration;

use common::Node;

fn is_leader(node: &Node) -> bool {
    let response = node.send(common::get("__probe__"));
    response["status"] == "error" && response["message"] == "Key not found"
}

#[test]
fn redirect_then_failover() {
    let dir = tempfile::tempdir().unwrap();
    let ports = [17150u16, 17151, 17152];
    let ids = ["n1", "n2", "n3"];

    let mut nodes: Vec<Node> = (0..3)
        .map(|i| {
            let peers: Vec<u16> = ports.iter().copied().filter(|&p| p != ports[i]).collect();
            Node::start_on_port(ids[i], &peers, dir.path(), ports[i])
        })
        .collect();

    // Give the cluster time to elect a leader.
    std::thread::sleep(Duration::from_secs(4));

    let refs: Vec<&Node> = nodes.iter().collect();
    let response = nodes[0].send_with_redirect(common::set("cluster_key", "replicated_val"), &refs, 3);
    assert_eq!(response["status"], "success", "write never reached the leader: {response}");

    let leader_index = nodes.iter().position(is_leader).expect("a leader should exist");
    nodes.remove(leader_index);

    std::thread::sleep(Duration::from_secs(5));

    let refs: Vec<&Node> = nodes.iter().collect();
    let response = nodes[0].send_with_redirect(common::get("cluster_key"), &refs, refs.len());
    assert_eq!(response["status"], "success", "survivors never re-elected a leader: {response}");
    assert_eq!(response["result"], "replicated_val");
}
