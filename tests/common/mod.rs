//! Shared harness: real nodes on ephemeral localhost ports with in-memory logs

#![allow(dead_code)]

use minizab::common::{NodeConfig, StorageBackend};
use minizab::ztree::{MemoryStore, Metadata};
use minizab::{AtomicBroadcast, ZabNode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct TestNode {
    pub id: String,
    pub ab: Arc<AtomicBroadcast>,
    handle: JoinHandle<()>,
}

impl TestNode {
    pub fn url(&self, route: &str) -> String {
        format!("http://{}{}", self.id, route)
    }

    pub fn records(&self) -> Vec<Metadata> {
        self.ab.store().records_after(0).unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reserve `n` ports; the listeners stay bound until handed to a node
pub async fn bind_listeners(n: usize) -> Vec<(String, TcpListener)> {
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let id = listener.local_addr().unwrap().to_string();
        listeners.push((id, listener));
    }
    listeners
}

pub fn node_config(id: &str, servers: &[String], leader: &str) -> NodeConfig {
    NodeConfig {
        id: id.to_string(),
        bind_addr: id.parse().unwrap(),
        servers: servers.to_vec(),
        leader: leader.to_string(),
        storage: StorageBackend::Memory,
        sync_on_startup: false,
        wakeup_delay_ms: 50,
        rpc_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub fn start_node(config: NodeConfig, listener: TcpListener, records: Vec<Metadata>) -> TestNode {
    let store = Arc::new(MemoryStore::with_records(records));
    let id = config.id.clone();
    let node = ZabNode::new(config, store).unwrap();
    let ab = node.engine();
    let handle = tokio::spawn(async move {
        node.serve(listener).await.unwrap();
    });
    TestNode { id, ab, handle }
}

/// Start every member whose index is not in `down`; the first member leads.
/// `down` members keep their address in the ensemble but never listen.
pub async fn start_ensemble(
    n: usize,
    down: &[usize],
    preload: impl Fn(usize) -> Vec<Metadata>,
    tweak: impl Fn(usize, &mut NodeConfig),
) -> Vec<Option<TestNode>> {
    let listeners = bind_listeners(n).await;
    let servers: Vec<String> = listeners.iter().map(|(id, _)| id.clone()).collect();
    let leader = servers[0].clone();

    let mut nodes = Vec::with_capacity(n);
    for (i, (id, listener)) in listeners.into_iter().enumerate() {
        if down.contains(&i) {
            drop(listener);
            nodes.push(None);
            continue;
        }
        let mut config = node_config(&id, &servers, &leader);
        tweak(i, &mut config);
        nodes.push(Some(start_node(config, listener, preload(i))));
    }
    nodes
}

/// Three live members, A leading, empty logs
pub async fn three_nodes() -> (TestNode, TestNode, TestNode) {
    let mut nodes = start_ensemble(3, &[], |_| Vec::new(), |_, _| {}).await;
    let c = nodes.pop().unwrap().unwrap();
    let b = nodes.pop().unwrap().unwrap();
    let a = nodes.pop().unwrap().unwrap();
    (a, b, c)
}

pub fn record(node_id: u64, payload: &str, leader: &str) -> Metadata {
    Metadata {
        node_id,
        origin: leader.to_string(),
        leader: leader.to_string(),
        servers: Vec::new(),
        timestamp: format!("2026-01-01T00:00:{:02}Z", node_id),
        payload: payload.to_string(),
    }
}

pub fn write_body(payload: &str, timestamp: &str) -> serde_json::Value {
    serde_json::json!({ "payload": payload, "timestamp": timestamp })
}

pub fn http() -> reqwest::Client {
    reqwest::Client::new()
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
