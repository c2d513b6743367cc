//! Two-phase write commit
//!
//! The leader runs one proposal at a time:
//!   1. open a round in PROPOSED and assign the next record id
//!   2. fan the proposal out to every follower and wait for all sends
//!   3. wait for follower acknowledgments to exceed half the ensemble (ACKNOWLEDGED)
//!   4. apply the record locally and move to COMMITTED
//!
//! Every acknowledging follower is told to commit once the leader has
//! committed the record itself.
//!
//! A leader only proposes once it has caught up with the ensemble: writes
//! wait for the startup or post-election sync round, and for any sync round
//! in flight, before an id is assigned.

use crate::common::{quorum_reached, Error, Result};
use crate::zab::broadcast::AtomicBroadcast;
use crate::zab::messages::{routes, Acknowledgment, Proposal, WriteRequest, WriteResponse};
use crate::zab::state::{Phase, ProposalState, Vote};
use crate::ztree::{InsertOutcome, Metadata};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ProposalOps {
    ab: Arc<AtomicBroadcast>,
}

impl ProposalOps {
    pub fn new(ab: Arc<AtomicBroadcast>) -> Self {
        Self { ab }
    }

    /// Commit a client write through this node, which must be the leader.
    ///
    /// The round runs on its own task so that a client hanging up does not
    /// leave the machine stuck halfway.
    pub async fn submit(&self, request: WriteRequest, origin: String) -> Result<WriteResponse> {
        if !self.ab.is_leader() {
            return Err(Error::NotLeader(self.ab.leader()));
        }
        if !self.ab.is_synced() {
            debug!(node = %self.ab.me(), "Write waiting for sync");
        }
        self.ab.wait_synced(self.ab.round_timeout()).await?;
        self.ab
            .sync()
            .wait_until_within(self.ab.round_timeout(), "sync round in flight", |r| {
                !r.state.in_flight()
            })
            .await?;

        let ops = self.clone();
        tokio::spawn(async move { ops.start_proposal(request, origin).await })
            .await
            .map_err(|e| Error::Internal(format!("proposal task failed: {}", e)))?
    }

    async fn start_proposal(&self, request: WriteRequest, origin: String) -> Result<WriteResponse> {
        let machine = self.ab.proposal();
        let round = machine.begin(ProposalState::Proposed).await?;

        let node_id = match self.ab.store().highest_id() {
            Ok(highest) => highest + 1,
            Err(e) => {
                machine.abort(round, ProposalState::Aborted);
                return Err(e);
            }
        };
        let leader = self.ab.me().to_string();
        let record = Metadata {
            node_id,
            origin,
            leader: leader.clone(),
            servers: self.ab.ensemble().servers().to_vec(),
            timestamp: request.timestamp,
            payload: request.payload,
        };
        info!(node = %leader, round, zxid = node_id, "Proposing write");

        let proposal = Proposal {
            round,
            record: record.clone(),
        };
        let failed = self.ab.broadcast(routes::PROPOSE_WRITE, &proposal).await;
        if !failed.is_empty() {
            warn!(round, zxid = node_id, ?failed, "Proposal not delivered to every follower");
        }

        // nothing to replicate to
        if self.ab.ensemble().size() == 1 {
            machine.advance(round, ProposalState::Proposed, ProposalState::Acknowledged);
        }

        let what = format!("proposal round {} (zxid {})", round, node_id);
        let reached = machine
            .wait_until_within(self.ab.round_timeout(), &what, |r| {
                r.id != round || r.state != ProposalState::Proposed
            })
            .await;
        match reached {
            Ok(r) if r.id == round && r.state == ProposalState::Acknowledged => {}
            Ok(r) => {
                return Err(Error::Aborted(format!("{} ended in {}", what, r.state)));
            }
            Err(e) => {
                machine.abort(round, ProposalState::Aborted);
                warn!(round, zxid = node_id, "Proposal aborted: {}", e);
                return Err(e);
            }
        }

        match self.ab.apply(&record) {
            Ok(InsertOutcome::Existing(kept)) if !kept.same_content(&record) => {
                machine.abort(round, ProposalState::Aborted);
                return Err(Error::Conflict(format!(
                    "zxid {} was committed with other content",
                    node_id
                )));
            }
            Ok(_) => {}
            Err(e) => {
                machine.abort(round, ProposalState::Aborted);
                return Err(e);
            }
        }
        machine.advance(round, ProposalState::Acknowledged, ProposalState::Committed);
        info!(round, zxid = node_id, "Write committed");

        Ok(WriteResponse {
            node_id,
            leader,
            round,
        })
    }

    /// Follower side of `/proposeWrite`: acknowledge to the proposer.
    /// An id already committed here with other content is never acknowledged.
    pub fn handle_propose(&self, sender: &str, proposal: Proposal) -> Result<()> {
        let leader = self.ab.leader();
        if sender != leader {
            warn!(
                node = %self.ab.me(),
                sender,
                leader = %leader,
                "Proposal from a member that is not our leader"
            );
        }
        if let Some(stored) = self.ab.store().get(proposal.record.node_id)? {
            if !stored.same_content(&proposal.record) {
                warn!(
                    node = %self.ab.me(),
                    sender,
                    zxid = proposal.record.node_id,
                    "Proposal reuses a committed id, not acknowledging"
                );
                return Err(Error::Conflict(format!(
                    "zxid {} is already committed",
                    proposal.record.node_id
                )));
            }
        }
        debug!(round = proposal.round, zxid = proposal.record.node_id, "Acknowledging proposal");

        let ab = self.ab.clone();
        let sender = sender.to_string();
        tokio::spawn(async move {
            let ack = Acknowledgment {
                round: proposal.round,
                record: proposal.record,
            };
            ab.send_to(&sender, routes::ACKNOWLEDGE_PROPOSAL, &ack).await;
        });
        Ok(())
    }

    /// Leader side of `/acknowledgeProposal`
    pub fn handle_acknowledge(&self, sender: &str, ack: Acknowledgment) -> Vote {
        if sender == self.ab.me() {
            warn!(node = %self.ab.me(), "Acknowledgment sent by ourselves");
        }
        let size = self.ab.ensemble().size();
        let vote = self.ab.proposal().vote(
            ack.round,
            ProposalState::Proposed,
            ProposalState::Acknowledged,
            |acks| quorum_reached(acks, size),
        );
        match vote {
            Vote::Reached(acks) => info!(round = ack.round, acks, "Proposal acknowledged by quorum"),
            Vote::Counted(acks) => debug!(round = ack.round, acks, sender, "Acknowledgment counted"),
            Vote::Late | Vote::Stale => {
                debug!(round = ack.round, sender, ?vote, "Acknowledgment not counted")
            }
        }

        self.notify_commit(sender.to_string(), ack);
        vote
    }

    /// Tell `follower` to commit once the round is over, provided the leader
    /// holds exactly the record the follower acknowledged.
    fn notify_commit(&self, follower: String, ack: Acknowledgment) {
        let ab = self.ab.clone();
        tokio::spawn(async move {
            let round = ack.round;
            let finished = ab
                .proposal()
                .wait_until(|r| r.id != round || !r.state.in_flight())
                .await;
            if finished.is_err() {
                return;
            }

            let committed = match ab.store().get(ack.record.node_id) {
                Ok(Some(stored)) => stored.same_content(&ack.record),
                Ok(None) => false,
                Err(e) => {
                    warn!(round, zxid = ack.record.node_id, "Store read failed: {}", e);
                    false
                }
            };
            if !committed {
                debug!(round, follower = %follower, "Round did not commit, no commit sent");
                return;
            }

            let commit = Proposal {
                round,
                record: ack.record,
            };
            ab.send_to(&follower, routes::COMMIT_WRITE, &commit).await;
        });
    }

    /// Follower side of `/commitWrite`
    pub fn handle_commit(&self, sender: &str, commit: Proposal) -> Result<InsertOutcome> {
        let leader = self.ab.leader();
        if sender != leader {
            warn!(node = %self.ab.me(), sender, leader = %leader, "Commit from a member that is not our leader");
        }
        self.ab.apply(&commit.record)
    }

    /// `/writeMetadata`: apply one record locally
    pub fn write_metadata(&self, record: &Metadata) -> Result<InsertOutcome> {
        self.ab.apply(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zab::broadcast::test_engine;
    use crate::ztree::sample_record;
    use std::time::Duration;

    const A: &str = "127.0.0.1:7000";
    const B: &str = "127.0.0.1:7001";
    const C: &str = "127.0.0.1:7002";

    fn write(payload: &str, timestamp: &str) -> WriteRequest {
        WriteRequest {
            payload: payload.to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_node_commits_alone() {
        let ab = test_engine(A, &[A], A);
        let ops = ProposalOps::new(ab.clone());

        let first = ops.submit(write("x", "t1"), A.into()).await.unwrap();
        let second = ops.submit(write("y", "t2"), A.into()).await.unwrap();
        assert_eq!(first.node_id, 1);
        assert_eq!(second.node_id, 2);
        assert_eq!(second.round, first.round + 1);

        let stored = ab.store().get(2).unwrap().unwrap();
        assert_eq!(stored.payload, "y");
        assert_eq!(stored.leader, A);
        assert_eq!(ab.proposal().current().state, ProposalState::Committed);
    }

    #[tokio::test]
    async fn test_follower_rejects_submit() {
        let ab = test_engine(B, &[A, B], A);
        let ops = ProposalOps::new(ab);
        let err = ops.submit(write("x", "t1"), B.into()).await.unwrap_err();
        assert!(matches!(err, Error::NotLeader(leader) if leader == A));
    }

    #[tokio::test]
    async fn test_round_aborts_without_quorum() {
        // B and C are not running: no acknowledgment ever arrives
        let config = crate::common::NodeConfig {
            id: A.into(),
            servers: vec![A.into(), B.into(), C.into()],
            leader: A.into(),
            sync_on_startup: false,
            round_timeout_ms: Some(200),
            rpc_timeout_ms: 200,
            ..Default::default()
        };
        let store = Arc::new(crate::ztree::MemoryStore::new());
        let ab = Arc::new(AtomicBroadcast::new(&config, store).unwrap());
        let ops = ProposalOps::new(ab.clone());

        let err = ops.submit(write("x", "t1"), A.into()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(ab.proposal().current().state, ProposalState::Aborted);
        assert!(ab.store().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_one_ack_of_three_does_not_commit() {
        let ab = test_engine(A, &[A, B, C], A);
        let ops = ProposalOps::new(ab.clone());
        let round = ab.proposal().try_begin(ProposalState::Proposed).unwrap();

        let ack = Acknowledgment {
            round,
            record: sample_record(1, "x"),
        };
        assert_eq!(ops.handle_acknowledge(B, ack.clone()), Vote::Counted(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ab.proposal().current().state, ProposalState::Proposed);

        assert_eq!(ops.handle_acknowledge(C, ack), Vote::Reached(2));
        assert_eq!(ab.proposal().current().state, ProposalState::Acknowledged);
    }

    #[tokio::test]
    async fn test_propose_for_committed_id_is_refused() {
        let ab = test_engine(B, &[A, B], A);
        let ops = ProposalOps::new(ab.clone());
        ab.apply(&sample_record(1, "p1")).unwrap();

        let reused = Proposal {
            round: 1,
            record: sample_record(1, "new"),
        };
        assert!(matches!(ops.handle_propose(A, reused), Err(Error::Conflict(_))));

        let replayed = Proposal {
            round: 1,
            record: sample_record(1, "p1"),
        };
        assert!(ops.handle_propose(A, replayed).is_ok());
        let fresh = Proposal {
            round: 2,
            record: sample_record(2, "p2"),
        };
        assert!(ops.handle_propose(A, fresh).is_ok());
        assert_eq!(ab.store().get(1).unwrap().unwrap().payload, "p1");
    }

    #[tokio::test]
    async fn test_unsynced_leader_waits_then_uses_next_free_id() {
        let config = crate::common::NodeConfig {
            id: A.into(),
            servers: vec![A.into()],
            leader: A.into(),
            sync_on_startup: true,
            ..Default::default()
        };
        let store = Arc::new(crate::ztree::MemoryStore::new());
        let ab = Arc::new(AtomicBroadcast::new(&config, store).unwrap());
        let ops = ProposalOps::new(ab.clone());

        let waiting = {
            let ops = ops.clone();
            tokio::spawn(async move { ops.submit(write("new", "t9"), A.into()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        assert!(ab.store().is_empty().unwrap());

        // records learned while catching up come first
        ab.apply(&sample_record(1, "p1")).unwrap();
        ab.mark_synced();
        let committed = waiting.await.unwrap().unwrap();
        assert_eq!(committed.node_id, 2);
        assert_eq!(ab.store().get(1).unwrap().unwrap().payload, "p1");
    }

    #[tokio::test]
    async fn test_commit_and_write_metadata_are_idempotent() {
        let ab = test_engine(B, &[A, B], A);
        let ops = ProposalOps::new(ab.clone());
        let commit = Proposal {
            round: 1,
            record: sample_record(1, "x"),
        };
        assert!(ops.handle_commit(A, commit.clone()).unwrap().inserted());
        assert!(!ops.handle_commit(A, commit).unwrap().inserted());
        assert!(!ops.write_metadata(&sample_record(1, "x")).unwrap().inserted());
        assert!(ops.write_metadata(&sample_record(2, "z")).unwrap().inserted());
        assert_eq!(ab.store().len().unwrap(), 2);
    }
}
