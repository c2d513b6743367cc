//! In-memory metadata log

use super::{InsertOutcome, Metadata, MetadataStore};
use crate::common::{Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

/// Metadata log kept in a `BTreeMap`, for tests and throwaway nodes
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<u64, Metadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store
    pub fn with_records(records: impl IntoIterator<Item = Metadata>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.node_id, r)).collect()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<u64, Metadata>>> {
        self.records
            .lock()
            .map_err(|_| Error::Internal("metadata store lock poisoned".into()))
    }
}

impl MetadataStore for MemoryStore {
    fn insert_if_absent(&self, record: &Metadata) -> Result<InsertOutcome> {
        let mut records = self.lock()?;
        if let Some(existing) = records.get(&record.node_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        records.insert(record.node_id, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, node_id: u64) -> Result<Option<Metadata>> {
        Ok(self.lock()?.get(&node_id).cloned())
    }

    fn highest_id(&self) -> Result<u64> {
        Ok(self.lock()?.keys().next_back().copied().unwrap_or(0))
    }

    fn records_after(&self, node_id: u64) -> Result<Vec<Metadata>> {
        Ok(self
            .lock()?
            .range((Bound::Excluded(node_id), Bound::Unbounded))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}
