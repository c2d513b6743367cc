//! Client writes through the ordering queue and the two-phase commit

mod common;

use common::*;
use minizab::zab::messages::{routes, WriteResponse, FORWARDED_HEADER};
use minizab::zab::ProposalState;
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::time::Duration;

#[tokio::test]
async fn test_write_via_follower_reaches_every_store() {
    let (a, b, c) = three_nodes().await;

    let resp = http()
        .post(b.url(routes::WRITE))
        .json(&write_body("x", "2026-01-01T00:00:01Z"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let committed: WriteResponse = resp.json().await.unwrap();
    assert_eq!(committed.node_id, 1);
    assert_eq!(committed.leader, a.id);

    for node in [&a, &b, &c] {
        assert!(
            eventually(Duration::from_secs(5), move || async move { node.records().len() == 1 }).await,
            "{} never committed",
            node.id
        );
    }

    let leader_copy = a.records().remove(0);
    assert_eq!(leader_copy.payload, "x");
    assert_eq!(leader_copy.origin, b.id);
    assert_eq!(leader_copy.leader, a.id);
    assert_eq!(b.records(), vec![leader_copy.clone()]);
    assert_eq!(c.records(), vec![leader_copy]);
    assert_eq!(a.ab.proposal().current().state, ProposalState::Committed);
}

#[tokio::test]
async fn test_earlier_timestamp_is_proposed_first() {
    let (a, _b, _c) = three_nodes().await;

    // hold the leader's queue so that both writes wait behind it
    let queue = a.ab.queue();
    let blocker = queue.enqueue("0").await;

    let late = {
        let url = a.url(routes::WRITE);
        tokio::spawn(async move {
            http()
                .post(url)
                .json(&write_body("second", "2026-01-01T00:00:02Z"))
                .send()
                .await
                .unwrap()
                .json::<WriteResponse>()
                .await
                .unwrap()
        })
    };
    assert!(eventually(Duration::from_secs(5), move || async move { queue.len() == 2 }).await);

    let early = {
        let url = a.url(routes::WRITE);
        tokio::spawn(async move {
            http()
                .post(url)
                .json(&write_body("first", "2026-01-01T00:00:01Z"))
                .send()
                .await
                .unwrap()
                .json::<WriteResponse>()
                .await
                .unwrap()
        })
    };
    assert!(eventually(Duration::from_secs(5), move || async move { queue.len() == 3 }).await);

    blocker.dequeue();
    let early = early.await.unwrap();
    let late = late.await.unwrap();

    assert_eq!(early.node_id, 1);
    assert_eq!(late.node_id, 2);
    let records = a.records();
    assert_eq!(records[0].payload, "first");
    assert_eq!(records[1].payload, "second");
}

#[tokio::test]
async fn test_concurrent_writes_get_unique_ids() {
    let (a, b, c) = three_nodes().await;
    let targets = [a.url(routes::WRITE), b.url(routes::WRITE), c.url(routes::WRITE)];

    let mut handles = Vec::new();
    for i in 0..9u64 {
        let url = targets[i as usize % 3].clone();
        handles.push(tokio::spawn(async move {
            let resp = http()
                .post(url)
                .json(&write_body(
                    &format!("w{}", i),
                    &format!("2026-01-01T00:01:{:02}Z", i),
                ))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            resp.json::<WriteResponse>().await.unwrap().node_id
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()), "node id reused");
    }
    assert_eq!(ids, (1..=9).collect::<BTreeSet<u64>>());

    for node in [&a, &b, &c] {
        assert!(eventually(Duration::from_secs(5), move || async move { node.records().len() == 9 }).await);
    }
    assert_eq!(a.records(), b.records());
    assert_eq!(a.records(), c.records());
}

#[tokio::test]
async fn test_forwarded_write_is_not_forwarded_again() {
    let (a, b, _c) = three_nodes().await;

    let resp = http()
        .post(b.url(routes::WRITE))
        .header(FORWARDED_HEADER, "127.0.0.1:1")
        .json(&write_body("x", "2026-01-01T00:00:01Z"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::MISDIRECTED_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["leader"], a.id.as_str());
    assert!(a.records().is_empty());
}

#[tokio::test]
async fn test_read_surface() {
    let (a, _b, c) = three_nodes().await;
    let c = &c;

    let resp = http()
        .get(c.url("/metadata/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    http()
        .post(a.url(routes::WRITE))
        .json(&write_body("x", "2026-01-01T00:00:01Z"))
        .send()
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(5), move || async move { c.records().len() == 1 }).await);

    let record: minizab::Metadata = http()
        .get(c.url("/metadata/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record.payload, "x");

    let all: Vec<minizab::Metadata> = http()
        .get(c.url(routes::METADATA))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all, vec![record]);

    let status: serde_json::Value = http()
        .get(a.url(routes::ADMIN_STATUS))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["role"], "leading");
    assert_eq!(status["highest_id"], 1);
    assert_eq!(status["proposal"]["state"], "COMMITTED");
    assert_eq!(status["queue_depth"], 0);
    assert!(status["admitted"].is_null());
}
