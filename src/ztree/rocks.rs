//! Metadata log using RocksDB
//!
//! Keys are big-endian `node_id`s so that RocksDB's byte order is log order;
//! values are bincode-encoded [`Metadata`].

use super::{InsertOutcome, Metadata, MetadataStore};
use crate::common::{Error, Result};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Mutex;

const CF_ZNODES: &str = "znodes";

/// Persistent metadata log
pub struct RocksStore {
    db: DB,
    // serializes the existence check with the put
    writer: Mutex<()>,
}

fn encode_id(node_id: u64) -> [u8; 8] {
    node_id.to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::MetadataCorrupted(format!("bad key length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_record(bytes: &[u8]) -> Result<Metadata> {
    bincode::deserialize(bytes).map_err(|e| Error::MetadataCorrupted(e.to_string()))
}

impl RocksStore {
    /// Open or create metadata log
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_ZNODES])?;

        Ok(Self {
            db,
            writer: Mutex::new(()),
        })
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_ZNODES)
            .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family {}", CF_ZNODES)))
    }

    fn read(&self, node_id: u64) -> Result<Option<Metadata>> {
        match self.db.get_cf(self.cf()?, encode_id(node_id))? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl MetadataStore for RocksStore {
    fn insert_if_absent(&self, record: &Metadata) -> Result<InsertOutcome> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| Error::Internal("metadata writer lock poisoned".into()))?;

        if let Some(existing) = self.read(record.node_id)? {
            return Ok(InsertOutcome::Existing(existing));
        }
        let value = bincode::serialize(record)?;
        self.db.put_cf(self.cf()?, encode_id(record.node_id), value)?;
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, node_id: u64) -> Result<Option<Metadata>> {
        self.read(node_id)
    }

    fn highest_id(&self) -> Result<u64> {
        let mut iter = self.db.iterator_cf(self.cf()?, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                decode_id(&key)
            }
            None => Ok(0),
        }
    }

    fn records_after(&self, node_id: u64) -> Result<Vec<Metadata>> {
        let Some(start) = node_id.checked_add(1) else {
            return Ok(Vec::new());
        };
        let start = encode_id(start);
        let iter = self
            .db
            .iterator_cf(self.cf()?, IteratorMode::From(&start[..], Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (_, value) = item?;
            records.push(decode_record(&value)?);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ztree::sample_record;
    use tempfile::tempdir;

    #[test]
    fn test_rocks_log_order() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("zab.db")).unwrap();
        assert_eq!(store.highest_id().unwrap(), 0);

        // ids above 255 would sort wrongly with little-endian keys
        for id in [3u64, 300, 1, 256, 2] {
            store.insert_if_absent(&sample_record(id, "p")).unwrap();
        }

        assert_eq!(store.highest_id().unwrap(), 300);
        assert_eq!(store.len().unwrap(), 5);
        let ids: Vec<u64> = store
            .records_after(2)
            .unwrap()
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(ids, vec![3, 256, 300]);
    }

    #[test]
    fn test_rocks_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zab.db");
        {
            let store = RocksStore::open(&path).unwrap();
            store.insert_if_absent(&sample_record(1, "x")).unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(&path).unwrap();
        assert!(store.get(2).unwrap().is_none());
        assert_eq!(store.get(1).unwrap().unwrap().payload, "x");
        assert!(!store
            .insert_if_absent(&sample_record(1, "y"))
            .unwrap()
            .inserted());
    }
}
