//! Timestamp-ordered admission queue for client writes
//!
//! Concurrent writes at one node are admitted one at a time, smallest client
//! timestamp first; equal timestamps keep arrival order. A request holds its
//! [`QueueTicket`] for the whole ordering-dependent stage and leaves the queue
//! when the ticket is dropped, including when the request itself is cancelled.
//!
//! Timestamps are compared as plain strings. A write whose body carries no
//! timestamp is queued under the empty string, which sorts before every real
//! timestamp.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

type ItemKey = (String, u64);

#[derive(Default)]
struct QueueInner {
    pending: BTreeSet<ItemKey>,
    admitted: Option<u64>,
    next_seq: u64,
}

#[derive(Default)]
pub struct OrderingQueue {
    inner: Mutex<QueueInner>,
    changed: Notify,
}

impl OrderingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // the critical sections never panic midway, a poisoned guard is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a request item and wait until it is the head of the queue and
    /// no other item is being processed.
    pub async fn enqueue(self: &Arc<Self>, timestamp: impl Into<String>) -> QueueTicket {
        let ticket = self.insert(timestamp.into());
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_admit(&ticket.key) {
                return ticket;
            }
            notified.await;
        }
    }

    fn insert(self: &Arc<Self>, timestamp: String) -> QueueTicket {
        let mut inner = self.lock();
        let key = (timestamp, inner.next_seq);
        inner.next_seq += 1;
        inner.pending.insert(key.clone());
        QueueTicket {
            queue: Arc::clone(self),
            key,
        }
    }

    fn try_admit(&self, key: &ItemKey) -> bool {
        let mut inner = self.lock();
        if inner.admitted.is_none() && inner.pending.first() == Some(key) {
            inner.admitted = Some(key.1);
            true
        } else {
            false
        }
    }

    fn remove(&self, key: &ItemKey) {
        {
            let mut inner = self.lock();
            inner.pending.remove(key);
            if inner.admitted == Some(key.1) {
                inner.admitted = None;
            }
        }
        self.changed.notify_waiters();
    }

    /// Items waiting or in progress
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the item currently being processed
    pub fn admitted(&self) -> Option<String> {
        let inner = self.lock();
        let seq = inner.admitted?;
        inner
            .pending
            .iter()
            .find(|(_, s)| *s == seq)
            .map(|(ts, _)| ts.clone())
    }
}

/// Position of one request in the [`OrderingQueue`]
pub struct QueueTicket {
    queue: Arc<OrderingQueue>,
    key: ItemKey,
}

impl QueueTicket {
    pub fn timestamp(&self) -> &str {
        &self.key.0
    }

    /// Leave the queue, letting the next item in
    pub fn dequeue(self) {}
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.queue.remove(&self.key);
    }
}
