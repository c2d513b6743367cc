//! Leader-election entry points
//!
//! Failure detection lives outside this crate: health checkers push an
//! [`ElectionTrigger`] into the channel handed out by the server. The policy
//! is rank-based: members are ranked by their position in the server list,
//! and an election is handed upward to the first live higher-ranked member.
//! The member that finds nobody alive above it declares itself leader, tells
//! every other member, then catches up as the new leader.

use crate::common::{Error, Result};
use crate::zab::broadcast::AtomicBroadcast;
use crate::zab::messages::{routes, ElectionRequest, LeaderAnnouncement};
use crate::zab::sync::SyncOps;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Event that may start an election
#[derive(Debug, Clone, Default)]
pub struct ElectionTrigger {
    /// Member reported as failed by a health checker
    pub failed: Option<String>,
    /// The local node just (re)joined the ensemble
    pub wakeup: bool,
}

impl ElectionTrigger {
    pub fn wakeup() -> Self {
        Self {
            failed: None,
            wakeup: true,
        }
    }

    pub fn failure(member: impl Into<String>) -> Self {
        Self {
            failed: Some(member.into()),
            wakeup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "candidate", rename_all = "lowercase")]
pub enum ElectionOutcome {
    /// This node declared itself leader
    Elected,
    /// The election moved to a live higher-ranked member
    Deferred(String),
}

#[derive(Clone)]
pub struct ElectionOps {
    ab: Arc<AtomicBroadcast>,
    sync: SyncOps,
}

impl ElectionOps {
    pub fn new(ab: Arc<AtomicBroadcast>, sync: SyncOps) -> Self {
        Self { ab, sync }
    }

    /// Consume triggers until every sender is gone
    pub async fn listen(self, mut triggers: mpsc::Receiver<ElectionTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            let leader = self.ab.leader();
            let leader_failed = trigger.failed.as_deref() == Some(leader.as_str());
            if !(trigger.wakeup || leader_failed) {
                continue;
            }

            if trigger.wakeup {
                info!(node = %self.ab.me(), "Joining, starting election");
            } else {
                info!(node = %self.ab.me(), leader = %leader, "Leader failed, starting election");
            }
            if let Err(e) = self.start_election().await {
                error!(node = %self.ab.me(), "Election failed: {}", e);
            }
        }
    }

    /// `/electLeader`: run the election from this node
    pub async fn start_election(&self) -> Result<ElectionOutcome> {
        for candidate in self.ab.ensemble().higher_ranked() {
            if !self.ab.peers().probe(&candidate).await {
                continue;
            }
            info!(node = %self.ab.me(), candidate = %candidate, "Handing election to higher-ranked member");
            let ab = self.ab.clone();
            let target = candidate.clone();
            tokio::spawn(async move {
                let request = ElectionRequest {
                    incoming: Some(ab.me().to_string()),
                };
                ab.send_to(&target, routes::ELECT_LEADER, &request).await;
            });
            return Ok(ElectionOutcome::Deferred(candidate));
        }

        self.declare_leadership().await;
        Ok(ElectionOutcome::Elected)
    }

    async fn declare_leadership(&self) {
        let me = self.ab.me().to_string();
        // writes wait until the post-election sync has caught this node up
        self.ab.clear_synced();
        let previous = self.ab.set_leader(&me);
        info!(node = %me, previous = %previous, "Declaring leadership");

        let announcement = LeaderAnnouncement {
            incoming: me.clone(),
        };
        let failed = self
            .ab
            .broadcast(routes::DECLARE_LEADER_RECEIVE, &announcement)
            .await;
        if !failed.is_empty() {
            warn!(node = %me, ?failed, "Leadership not announced to every member");
        }

        let sync = self.sync.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.run().await {
                warn!("Post-election sync failed: {}", e);
            }
        });
    }

    /// `/declareLeaderReceive`
    pub fn receive_declaration(&self, sender: &str, announcement: LeaderAnnouncement) -> Result<()> {
        if !self.ab.ensemble().contains(&announcement.incoming) {
            warn!(sender, leader = %announcement.incoming, "Ignoring leader declaration from a non-member");
            return Err(Error::InvalidRequest(format!(
                "{} is not an ensemble member",
                announcement.incoming
            )));
        }
        let previous = self.ab.set_leader(&announcement.incoming);
        info!(
            node = %self.ab.me(),
            leader = %announcement.incoming,
            previous = %previous,
            "New leader declared"
        );
        Ok(())
    }
}
