//! Rank-based leader election over real nodes

mod common;

use common::*;
use minizab::zab::messages::{routes, WriteResponse};
use std::time::Duration;

#[tokio::test]
async fn test_election_moves_to_highest_live_member() {
    let (a, b, c) = three_nodes().await;

    let resp: serde_json::Value = http()
        .post(a.url(routes::ELECT_LEADER))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["outcome"], "deferred");
    assert_eq!(resp["candidate"], b.id.as_str());

    for node in [&a, &b, &c] {
        let expected = c.id.clone();
        assert!(
            eventually(Duration::from_secs(5), move || {
                let expected = expected.clone();
                async move { node.ab.leader() == expected }
            })
            .await,
            "{} does not follow the new leader",
            node.id
        );
    }

    // writes now commit through the new leader
    let committed: WriteResponse = http()
        .post(a.url(routes::WRITE))
        .json(&write_body("after-election", "2026-01-01T00:00:09Z"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(committed.leader, c.id);
    assert_eq!(committed.node_id, 1);
}

#[tokio::test]
async fn test_dead_member_is_skipped() {
    let nodes = start_ensemble(3, &[2], |_| Vec::new(), |_, _| {}).await;
    let a = nodes[0].as_ref().unwrap();
    let b = nodes[1].as_ref().unwrap();

    let resp: serde_json::Value = http()
        .post(b.url(routes::ELECT_LEADER))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["outcome"], "elected");
    assert!(b.ab.is_leader());
    assert!(eventually(Duration::from_secs(5), move || async move { a.ab.leader() == b.id }).await);
}

#[tokio::test]
async fn test_failure_trigger_for_leader_starts_election() {
    let listeners = bind_listeners(2).await;
    let servers: Vec<String> = listeners.iter().map(|(id, _)| id.clone()).collect();
    let (a_id, b_id) = (servers[0].clone(), servers[1].clone());

    // only B runs; it still believes A leads
    let mut listeners = listeners.into_iter();
    drop(listeners.next());
    let (_, listener) = listeners.next().unwrap();
    let config = node_config(&b_id, &servers, &a_id);
    let node = minizab::ZabNode::new(
        config,
        std::sync::Arc::new(minizab::ztree::MemoryStore::new()),
    )
    .unwrap();
    let ab = node.engine();
    let trigger = node.election_trigger();
    let _server = tokio::spawn(node.serve(listener));

    trigger
        .send(minizab::zab::ElectionTrigger::failure(a_id.clone()))
        .await
        .unwrap();
    let ab_ref = &ab;
    assert!(eventually(Duration::from_secs(5), move || async move { ab_ref.is_leader() }).await);
}
