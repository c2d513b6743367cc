//! Wire bodies and routes shared by every ensemble member
//!
//! All peer traffic is JSON over HTTP POST. Each peer request names its sender
//! in [`SENDER_HEADER`]; receivers use it to route the reply and to check it
//! against the leader they believe in.

use crate::ztree::Metadata;
use serde::{Deserialize, Serialize};

/// Identity of the sending ensemble member
pub const SENDER_HEADER: &str = "X-Zab-Sender";

/// Set on writes a follower forwards to its leader
pub const FORWARDED_HEADER: &str = "X-Zab-Forwarded";

pub mod routes {
    // client surface
    pub const WRITE: &str = "/write";
    pub const METADATA: &str = "/metadata";
    pub const METADATA_BY_ID: &str = "/metadata/:id";

    // proposal protocol
    pub const PROPOSE_WRITE: &str = "/proposeWrite";
    pub const ACKNOWLEDGE_PROPOSAL: &str = "/acknowledgeProposal";
    pub const COMMIT_WRITE: &str = "/commitWrite";
    pub const WRITE_METADATA: &str = "/writeMetadata";

    // sync protocol
    pub const SYNC_REQUEST: &str = "/syncRequest";
    pub const SYNC_RESPONSE: &str = "/syncResponse";
    pub const REQUEST_METADATA: &str = "/requestMetadata";
    pub const UPDATE_METADATA: &str = "/updateMetadata";

    // leader election
    pub const ELECT_LEADER: &str = "/electLeader";
    pub const DECLARE_LEADER_RECEIVE: &str = "/declareLeaderReceive";

    // operations
    pub const HEALTH: &str = "/health";
    pub const HEALTH_LIVE: &str = "/health/live";
    pub const HEALTH_READY: &str = "/health/ready";
    pub const ADMIN_STATUS: &str = "/admin/status";
    pub const ADMIN_SYNC: &str = "/admin/sync";
}

/// Client write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub payload: String,
    /// Ordering key; RFC 3339 timestamps compare correctly as strings
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Deserialize)]
struct OrderingKey {
    timestamp: String,
}

/// Read the ordering timestamp out of a raw write body.
/// `None` when the body is not JSON or carries no string timestamp.
pub fn ordering_key(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<OrderingKey>(body)
        .ok()
        .map(|key| key.timestamp)
}

/// Outcome of a committed client write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub node_id: u64,
    pub leader: String,
    pub round: u64,
}

/// Leader to follower: proposal, and later the commit instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub round: u64,
    pub record: Metadata,
}

/// Follower to leader: echoes the record it accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub round: u64,
    pub record: Metadata,
}

/// Sync initiator to peers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncProbe {
    pub round: u64,
}

/// Peer to sync initiator: its highest committed id
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncAck {
    pub round: u64,
    pub node_id: u64,
}

/// "Send me everything after `node_id`"
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub node_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataBatch {
    pub records: Vec<Metadata>,
}

/// What one merge did to the initiator's log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub received: usize,
    pub inserted: usize,
    /// Already present with the same content
    pub skipped: usize,
    /// Already present with different content; the stored record was kept
    pub conflicts: usize,
    /// Storage errors
    pub failed: usize,
}

impl MergeSummary {
    pub fn absorb(&mut self, other: MergeSummary) {
        self.received += other.received;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

/// Result of a whole sync round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub round: u64,
    pub highest_before: u64,
    pub highest_after: u64,
    pub merged: MergeSummary,
    /// Peers whose records could not be fetched
    pub peers_failed: Vec<String>,
}

/// Body of `/electLeader`: the member that started or handed over the election
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionRequest {
    #[serde(default)]
    pub incoming: Option<String>,
}

/// Body of `/declareLeaderReceive`: the new leader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderAnnouncement {
    pub incoming: String,
}
