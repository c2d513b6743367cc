//! ZNode metadata log
//!
//! The committed log is append-only and ordered by `node_id`. The broadcast
//! core only talks to it through [`MetadataStore`]; both backends serialize
//! their writers so that the existence check and the insert are one step.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::common::Result;
use serde::{Deserialize, Serialize};

/// One replicated ZNode record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Log position, assigned by the leader when it opens the proposal
    pub node_id: u64,
    /// Member that accepted the client write
    pub origin: String,
    /// Leader that proposed the record
    pub leader: String,
    /// Ensemble members in configuration order
    pub servers: Vec<String>,
    /// Client ordering timestamp
    pub timestamp: String,
    /// Opaque application content
    pub payload: String,
}

impl Metadata {
    /// Same id and same content. Leader and origin may legitimately differ
    /// between copies received from different peers.
    pub fn same_content(&self, other: &Metadata) -> bool {
        self.node_id == other.node_id
            && self.timestamp == other.timestamp
            && self.payload == other.payload
    }
}

/// Result of an existence-checked insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The id was already present; the stored record is returned untouched
    Existing(Metadata),
}

impl InsertOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Storage interface consumed by the broadcast engine
pub trait MetadataStore: Send + Sync {
    /// Insert `record` unless its id already exists
    fn insert_if_absent(&self, record: &Metadata) -> Result<InsertOutcome>;

    fn get(&self, node_id: u64) -> Result<Option<Metadata>>;

    /// Highest committed id, 0 for an empty log
    fn highest_id(&self) -> Result<u64>;

    /// Every record with an id strictly greater than `node_id`, ascending
    fn records_after(&self, node_id: u64) -> Result<Vec<Metadata>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush to disk
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_record(node_id: u64, payload: &str) -> Metadata {
    Metadata {
        node_id,
        origin: "127.0.0.1:7001".to_string(),
        leader: "127.0.0.1:7000".to_string(),
        servers: vec![
            "127.0.0.1:7000".to_string(),
            "127.0.0.1:7001".to_string(),
            "127.0.0.1:7002".to_string(),
        ],
        timestamp: format!("t{}", node_id),
        payload: payload.to_string(),
    }
}
