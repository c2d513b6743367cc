//! Node server

use crate::common::{NodeConfig, Result, StorageBackend};
use crate::zab::broadcast::AtomicBroadcast;
use crate::zab::election::{ElectionOps, ElectionTrigger};
use crate::zab::http::{create_router, ZabState};
use crate::zab::proposal::ProposalOps;
use crate::zab::sync::SyncOps;
use crate::ztree::{MemoryStore, MetadataStore, RocksStore};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const ELECTION_TRIGGER_CAPACITY: usize = 16;

/// A fully wired node that has not started serving yet
pub struct ZabNode {
    config: NodeConfig,
    ab: Arc<AtomicBroadcast>,
    sync: SyncOps,
    election: ElectionOps,
    router: Router,
    triggers_tx: mpsc::Sender<ElectionTrigger>,
    triggers_rx: mpsc::Receiver<ElectionTrigger>,
}

impl ZabNode {
    pub fn new(config: NodeConfig, store: Arc<dyn MetadataStore>) -> Result<Self> {
        let ab = Arc::new(AtomicBroadcast::new(&config, store)?);
        let proposal = ProposalOps::new(ab.clone());
        let sync = SyncOps::new(ab.clone());
        let election = ElectionOps::new(ab.clone(), sync.clone());

        let router = create_router(ZabState {
            ab: ab.clone(),
            proposal,
            sync: sync.clone(),
            election: election.clone(),
            max_body_bytes: config.max_body_bytes,
        });
        let (triggers_tx, triggers_rx) = mpsc::channel(ELECTION_TRIGGER_CAPACITY);

        Ok(Self {
            config,
            ab,
            sync,
            election,
            router,
            triggers_tx,
            triggers_rx,
        })
    }

    pub fn engine(&self) -> Arc<AtomicBroadcast> {
        self.ab.clone()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Channel for failure detectors; a wakeup or a failed leader starts an election
    pub fn election_trigger(&self) -> mpsc::Sender<ElectionTrigger> {
        self.triggers_tx.clone()
    }

    /// Serve on an already bound listener, running the startup tasks
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Self {
            config,
            ab,
            sync,
            election,
            router,
            triggers_tx,
            triggers_rx,
        } = self;

        tokio::spawn(election.listen(triggers_rx));

        if config.elect_on_wakeup {
            let delay = config.wakeup_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = triggers_tx.send(ElectionTrigger::wakeup()).await;
            });
        }

        if config.sync_on_startup {
            let delay = config.wakeup_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match sync.run().await {
                    Ok(report) => tracing::info!(
                        round = report.round,
                        highest = report.highest_after,
                        "Startup sync complete"
                    ),
                    Err(e) => tracing::warn!("Startup sync failed: {}", e),
                }
            });
        }

        tracing::info!(
            "✓ Node {} ready ({}, leader {}, ensemble {})",
            ab.me(),
            ab.role(),
            ab.leader(),
            ab.ensemble().joined()
        );
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Binds the configured address and serves a node
pub struct ZabServer {
    config: NodeConfig,
}

impl ZabServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub fn open_store(config: &NodeConfig) -> Result<Arc<dyn MetadataStore>> {
        Ok(match config.storage {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Rocksdb => Arc::new(RocksStore::open(&config.db_path)?),
        })
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting node: {}", self.config.id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Ensemble: {}", self.config.servers.join(","));
        tracing::info!("  Leader: {}", self.config.leader);
        match self.config.storage {
            StorageBackend::Memory => tracing::info!("  Storage: memory"),
            StorageBackend::Rocksdb => {
                tracing::info!("  DB path: {}", self.config.db_path.display())
            }
        }

        let store = Self::open_store(&self.config)?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        ZabNode::new(self.config, store)?.serve(listener).await
    }
}
