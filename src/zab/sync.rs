//! Catch-up protocol for joining and recovering nodes
//!
//! 1. initiator opens a round in PREPARED and probes every peer
//! 2. each peer answers with its highest committed id
//! 3. more than half the ensemble answering moves the round to ACKED
//! 4. initiator asks each peer for every record above its own highest id;
//!    the peer pushes them back through `/updateMetadata`
//! 5. records are merged by id (existing ids are never overwritten), then SYNCED

use crate::common::{quorum_reached, Error, Result};
use crate::zab::broadcast::AtomicBroadcast;
use crate::zab::messages::{
    routes, MergeSummary, MetadataBatch, MetadataRequest, SyncAck, SyncProbe, SyncReport,
};
use crate::zab::state::{SyncState, Vote};
use crate::ztree::{InsertOutcome, Metadata};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SyncOps {
    ab: Arc<AtomicBroadcast>,
}

impl SyncOps {
    pub fn new(ab: Arc<AtomicBroadcast>) -> Self {
        Self { ab }
    }

    /// Run one sync round with this node as initiator
    pub async fn run(&self) -> Result<SyncReport> {
        let ops = self.clone();
        tokio::spawn(async move { ops.sync_metadata().await })
            .await
            .map_err(|e| Error::Internal(format!("sync task failed: {}", e)))?
    }

    async fn sync_metadata(&self) -> Result<SyncReport> {
        let machine = self.ab.sync();
        let round = machine.begin(SyncState::Prepared).await?;
        info!(node = %self.ab.me(), round, "Starting sync round");

        let failed = self
            .ab
            .broadcast(routes::SYNC_REQUEST, &SyncProbe { round })
            .await;
        if !failed.is_empty() {
            warn!(round, ?failed, "Sync probe not delivered to every peer");
        }
        if self.ab.ensemble().size() == 1 {
            machine.advance(round, SyncState::Prepared, SyncState::Acked);
        }

        let what = format!("sync round {}", round);
        let reached = machine
            .wait_until_within(self.ab.round_timeout(), &what, |r| {
                r.id != round || r.state != SyncState::Prepared
            })
            .await;
        match reached {
            Ok(r) if r.id == round && r.state == SyncState::Acked => {}
            Ok(r) => return Err(Error::Aborted(format!("{} ended in {}", what, r.state))),
            Err(e) => {
                machine.abort(round, SyncState::Aborted);
                warn!(round, "Sync aborted: {}", e);
                return Err(e);
            }
        }

        let highest_before = match self.ab.store().highest_id() {
            Ok(id) => id,
            Err(e) => {
                machine.abort(round, SyncState::Aborted);
                return Err(e);
            }
        };

        let mut merged = MergeSummary::default();
        let mut peers_failed = Vec::new();
        for peer in self.ab.ensemble().others() {
            debug!(round, peer = %peer, after = highest_before, "Requesting metadata");
            let request = MetadataRequest {
                node_id: highest_before,
            };
            match self
                .ab
                .peers()
                .call::<_, MergeSummary>(peer, routes::REQUEST_METADATA, &request)
                .await
            {
                Ok(summary) => merged.absorb(summary),
                Err(e) => {
                    warn!(round, peer = %peer, "Metadata request failed: {}", e);
                    peers_failed.push(peer.clone());
                }
            }
        }

        let highest_after = self.ab.store().highest_id().unwrap_or(highest_before);
        machine.advance(round, SyncState::Acked, SyncState::Synced);
        self.ab.mark_synced();
        info!(
            round,
            highest_before,
            highest_after,
            inserted = merged.inserted,
            conflicts = merged.conflicts,
            "Finished syncing"
        );

        Ok(SyncReport {
            round,
            highest_before,
            highest_after,
            merged,
            peers_failed,
        })
    }

    /// Peer side of `/syncRequest`: report our highest id to the initiator
    pub fn handle_sync_request(&self, sender: &str, probe: SyncProbe) {
        let ab = self.ab.clone();
        let sender = sender.to_string();
        tokio::spawn(async move {
            let node_id = match ab.store().highest_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(round = probe.round, "Cannot read highest id: {}", e);
                    return;
                }
            };
            let ack = SyncAck {
                round: probe.round,
                node_id,
            };
            ab.send_to(&sender, routes::SYNC_RESPONSE, &ack).await;
        });
    }

    /// Initiator side of `/syncResponse`
    pub fn handle_sync_response(&self, sender: &str, ack: SyncAck) -> Vote {
        let size = self.ab.ensemble().size();
        let vote = self
            .ab
            .sync()
            .vote(ack.round, SyncState::Prepared, SyncState::Acked, |n| {
                quorum_reached(n, size)
            });
        debug!(round = ack.round, sender, peer_highest = ack.node_id, ?vote, "Sync response");
        vote
    }

    /// Peer side of `/requestMetadata`: push every newer record to the
    /// initiator and relay what its merge did
    pub async fn handle_request_metadata(
        &self,
        sender: &str,
        request: MetadataRequest,
    ) -> Result<MergeSummary> {
        let records = self.ab.store().records_after(request.node_id)?;
        debug!(peer = %sender, after = request.node_id, count = records.len(), "Sending metadata");
        self.ab
            .peers()
            .call(sender, routes::UPDATE_METADATA, &MetadataBatch { records })
            .await
    }

    /// Initiator side of `/updateMetadata`
    pub fn handle_update_metadata(&self, sender: &str, batch: MetadataBatch) -> MergeSummary {
        let summary = self.merge(&batch.records);
        debug!(peer = %sender, ?summary, "Merged metadata");
        summary
    }

    /// Insert each record whose id is not held yet. Per-record storage
    /// errors are counted and the merge carries on.
    pub fn merge(&self, records: &[Metadata]) -> MergeSummary {
        let mut summary = MergeSummary {
            received: records.len(),
            ..Default::default()
        };
        for record in records {
            match self.ab.store().insert_if_absent(record) {
                Ok(InsertOutcome::Inserted) => summary.inserted += 1,
                Ok(InsertOutcome::Existing(kept)) if kept.same_content(record) => {
                    summary.skipped += 1
                }
                Ok(InsertOutcome::Existing(kept)) => {
                    summary.conflicts += 1;
                    warn!(
                        zxid = record.node_id,
                        kept = %kept.payload,
                        offered = %record.payload,
                        "Divergent record during sync, keeping the stored one"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(zxid = record.node_id, "Failed to store synced record: {}", e);
                }
            }
        }
        summary
    }
}
