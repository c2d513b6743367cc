//! Atomic broadcast engine
//!
//! Owns everything the coordinators share: ensemble membership, the leader
//! marker, the metadata store handle, both state machines and the ordering
//! queue. Coordinators get an `Arc<AtomicBroadcast>` at construction and
//! never reach each other through it.

use crate::common::{Ensemble, Error, NodeConfig, Result};
use crate::zab::peer_client::{PeerClient, RelayedResponse};
use crate::zab::queue::OrderingQueue;
use crate::zab::state::{ProposalState, Round, StateMachine, SyncState};
use crate::ztree::{InsertOutcome, Metadata, MetadataStore};
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leading,
    Following,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leading => write!(f, "Leader"),
            Role::Following => write!(f, "Follower"),
        }
    }
}

/// Snapshot served by `/admin/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub leader: String,
    pub role: Role,
    pub servers: Vec<String>,
    pub proposal: Round<ProposalState>,
    pub sync: Round<SyncState>,
    pub synced: bool,
    pub highest_id: u64,
    pub records: usize,
    pub queue_depth: usize,
    /// Timestamp of the write currently holding the queue
    pub admitted: Option<String>,
}

pub struct AtomicBroadcast {
    ensemble: Ensemble,
    leader: RwLock<String>,
    store: Arc<dyn MetadataStore>,
    peers: PeerClient,
    proposal: StateMachine<ProposalState>,
    sync: StateMachine<SyncState>,
    queue: Arc<OrderingQueue>,
    round_timeout: Option<Duration>,
    synced: watch::Sender<bool>,
}

impl AtomicBroadcast {
    pub fn new(config: &NodeConfig, store: Arc<dyn MetadataStore>) -> Result<Self> {
        let ensemble = config.validate()?;
        let peers = PeerClient::new(ensemble.me(), config.rpc_timeout())?;

        Ok(Self {
            leader: RwLock::new(config.leader.clone()),
            ensemble,
            store,
            peers,
            proposal: StateMachine::new(ProposalState::Idle),
            sync: StateMachine::new(SyncState::Idle),
            queue: Arc::new(OrderingQueue::new()),
            round_timeout: config.round_timeout(),
            // a node that skips the startup round serves immediately
            synced: watch::channel(!config.sync_on_startup).0,
        })
    }

    pub fn me(&self) -> &str {
        self.ensemble.me()
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn leader(&self) -> String {
        self.leader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the leader marker; returns the previous leader
    pub fn set_leader(&self, leader: &str) -> String {
        let mut current = self.leader.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, leader.to_string())
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == self.me()
    }

    pub fn role(&self) -> Role {
        if self.is_leader() {
            Role::Leading
        } else {
            Role::Following
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn peers(&self) -> &PeerClient {
        &self.peers
    }

    pub fn proposal(&self) -> &StateMachine<ProposalState> {
        &self.proposal
    }

    pub fn sync(&self) -> &StateMachine<SyncState> {
        &self.sync
    }

    pub fn queue(&self) -> &Arc<OrderingQueue> {
        &self.queue
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout
    }

    /// Has a sync round reached SYNCED since startup or the last election?
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Leadership changed; fresh writes wait for the next sync round
    pub fn clear_synced(&self) {
        self.synced.send_replace(false);
    }

    /// Resolve once this node has caught up, bounded by `limit` when set
    pub async fn wait_synced(&self, limit: Option<Duration>) -> Result<()> {
        let mut rx = self.synced.subscribe();
        let closed = |_: watch::error::RecvError| Error::Internal("sync flag closed".into());
        match limit {
            None => rx.wait_for(|synced| *synced).await.map(|_| ()).map_err(closed),
            Some(limit) => tokio::time::timeout(limit, rx.wait_for(|synced| *synced))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("{} not synced after {:?}", self.me(), limit))
                })?
                .map(|_| ())
                .map_err(closed),
        }
    }

    /// Concurrent one-way RPC to every other member. Waits for all sends to
    /// finish and returns the peers that failed; failures are logged only.
    pub async fn broadcast<T: Serialize + Sync + ?Sized>(&self, route: &str, body: &T) -> Vec<String> {
        let sends = self.ensemble.others().map(|peer| async move {
            let res = self.peers.send(peer, route, body).await;
            (peer, res)
        });

        let mut failed = Vec::new();
        for (peer, res) in join_all(sends).await {
            if let Err(e) = res {
                warn!(node = %self.me(), peer = %peer, route, "Peer request failed: {}", e);
                failed.push(peer.clone());
            }
        }
        failed
    }

    /// One-way RPC to a single member, failures are logged only
    pub async fn send_to<T: Serialize + ?Sized>(&self, peer: &str, route: &str, body: &T) -> bool {
        match self.peers.send(peer, route, body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(node = %self.me(), peer = %peer, route, "Peer request failed: {}", e);
                false
            }
        }
    }

    /// Replay a raw client request against the current leader
    pub async fn forward_to_leader(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<RelayedResponse> {
        let leader = self.leader();
        debug!(node = %self.me(), leader = %leader, "Forwarding write to leader");
        self.peers
            .forward(&leader, method, path_and_query, headers, body)
            .await
    }

    /// Write a committed record through to the local store.
    /// A record already present is left untouched; differing content is logged.
    pub fn apply(&self, record: &Metadata) -> Result<InsertOutcome> {
        let outcome = self.store.insert_if_absent(record)?;
        match &outcome {
            InsertOutcome::Inserted => {
                info!(node = %self.me(), zxid = record.node_id, "Applied record");
            }
            InsertOutcome::Existing(kept) if kept.same_content(record) => {
                debug!(node = %self.me(), zxid = record.node_id, "Record already applied");
            }
            InsertOutcome::Existing(_) => {
                warn!(
                    node = %self.me(),
                    zxid = record.node_id,
                    "Divergent record for existing id, keeping the stored one"
                );
            }
        }
        Ok(outcome)
    }

    pub fn status(&self) -> Result<NodeStatus> {
        Ok(NodeStatus {
            id: self.me().to_string(),
            leader: self.leader(),
            role: self.role(),
            servers: self.ensemble.servers().to_vec(),
            proposal: self.proposal.current(),
            sync: self.sync.current(),
            synced: self.is_synced(),
            highest_id: self.store.highest_id()?,
            records: self.store.len()?,
            queue_depth: self.queue.len(),
            admitted: self.queue.admitted(),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_engine(me: &str, servers: &[&str], leader: &str) -> Arc<AtomicBroadcast> {
    let config = NodeConfig {
        id: me.to_string(),
        servers: servers.iter().map(|s| s.to_string()).collect(),
        leader: leader.to_string(),
        storage: crate::common::StorageBackend::Memory,
        sync_on_startup: false,
        rpc_timeout_ms: 500,
        ..Default::default()
    };
    let store = Arc::new(crate::ztree::MemoryStore::new());
    Arc::new(AtomicBroadcast::new(&config, store).unwrap())
}
