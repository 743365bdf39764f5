use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use crate::imap::UidMeta;

/// One UID waiting to be downloaded, with whatever per-protocol metadata
/// came back from the listing that discovered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub uid: u32,
    /// Drains before non-inbox entries so fresh mail lands ahead of
    /// backfill.
    pub inbox: bool,
    /// Deep-backfill entries; the drain loop pauses between their batches
    /// to leave bandwidth for live folders.
    pub throttled: bool,
    pub g_msgid: Option<u64>,
    pub g_thrid: Option<u64>,
}

impl QueueEntry {
    pub fn bare(uid: u32) -> Self {
        Self {
            uid,
            inbox: false,
            throttled: false,
            g_msgid: None,
            g_thrid: None,
        }
    }

    pub fn from_meta(meta: &UidMeta) -> Self {
        Self {
            uid: meta.uid,
            inbox: meta
                .labels
                .as_deref()
                .map_or(false, |labels| labels.iter().any(|l| l == "\\Inbox")),
            throttled: false,
            g_msgid: meta.g_msgid,
            g_thrid: meta.g_thrid,
        }
    }
}

/// Work queue shared between the drain loop and the change-detector task.
/// A mutable vector under a lock rather than a channel: pruning vanished
/// UIDs and removing a whole thread at once both need point removal.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds entries whose UID is not already queued. Returns how many were
    /// actually added.
    pub fn push(&self, entries: impl IntoIterator<Item = QueueEntry>) -> usize {
        let mut queued = self.lock();
        let mut added = 0;
        for entry in entries {
            if queued.iter().any(|e| e.uid == entry.uid) {
                continue;
            }
            queued.push(entry);
            added += 1;
        }
        added
    }

    /// Removes and returns the best entry: inbox-flagged first, then
    /// unthrottled, then highest UID.
    pub fn pop(&self) -> Option<QueueEntry> {
        let mut queued = self.lock();
        let best = queued
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.inbox, !e.throttled, e.uid))
            .map(|(i, _)| i)?;
        Some(queued.swap_remove(best))
    }

    /// Whether the next `pop` would return a throttled entry, i.e. only
    /// deep backfill is left.
    pub fn next_is_throttled(&self) -> bool {
        self.lock()
            .iter()
            .max_by_key(|e| (e.inbox, !e.throttled, e.uid))
            .map_or(false, |e| e.throttled)
    }

    /// Pops up to `limit` entries in drain order.
    pub fn pop_batch(&self, limit: usize) -> Vec<QueueEntry> {
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            match self.pop() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    /// Removes every queued entry with the given thread id and returns
    /// them; one download of any thread member covers the rest.
    pub fn remove_thread(&self, g_thrid: u64) -> Vec<QueueEntry> {
        let mut queued = self.lock();
        let mut removed = Vec::new();
        let mut index = 0;
        while index < queued.len() {
            if queued[index].g_thrid == Some(g_thrid) {
                removed.push(queued.swap_remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Drops entries whose UID is no longer in the remote listing. Returns
    /// how many were pruned.
    pub fn retain_known(&self, remote: &BTreeSet<u32>) -> usize {
        let mut queued = self.lock();
        let before = queued.len();
        queued.retain(|e| remote.contains(&e.uid));
        before - queued.len()
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.lock().iter().any(|e| e.uid == uid)
    }

    pub fn uids(&self) -> BTreeSet<u32> {
        self.lock().iter().map(|e| e.uid).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uid: u32, inbox: bool, g_thrid: Option<u64>) -> QueueEntry {
        QueueEntry {
            uid,
            inbox,
            throttled: false,
            g_msgid: None,
            g_thrid,
        }
    }

    #[test]
    fn inbox_entries_drain_before_newer_backfill() {
        let queue = DownloadQueue::new();
        queue.push([
            entry(500, false, None),
            entry(10, true, None),
            entry(400, false, None),
            entry(20, true, None),
        ]);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|e| e.uid).collect();
        assert_eq!(order, vec![20, 10, 500, 400]);
    }

    #[test]
    fn throttled_entries_drain_last() {
        let queue = DownloadQueue::new();
        let mut deep = entry(900, false, None);
        deep.throttled = true;
        queue.push([deep, entry(3, false, None)]);

        assert!(!queue.next_is_throttled());
        assert_eq!(queue.pop().map(|e| e.uid), Some(3));
        assert!(queue.next_is_throttled());
        assert_eq!(queue.pop().map(|e| e.uid), Some(900));
        assert!(!queue.next_is_throttled());
    }

    #[test]
    fn duplicate_uids_are_not_queued_twice() {
        let queue = DownloadQueue::new();
        assert_eq!(queue.push([entry(1, false, None), entry(2, false, None)]), 2);
        assert_eq!(queue.push([entry(2, false, None), entry(3, false, None)]), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn removing_a_thread_takes_every_member() {
        let queue = DownloadQueue::new();
        queue.push([
            entry(1, false, Some(7)),
            entry(2, false, Some(8)),
            entry(3, false, Some(7)),
        ]);

        let removed = queue.remove_thread(7);
        assert_eq!(removed.len(), 2);
        assert!(!queue.contains(1));
        assert!(!queue.contains(3));
        assert!(queue.contains(2));
    }

    #[test]
    fn vanished_uids_are_pruned() {
        let queue = DownloadQueue::new();
        queue.push([entry(1, false, None), entry(2, false, None), entry(3, false, None)]);

        let remote = BTreeSet::from([1, 3]);
        assert_eq!(queue.retain_known(&remote), 1);
        assert_eq!(queue.uids(), BTreeSet::from([1, 3]));
    }

    #[test]
    fn batches_respect_the_limit() {
        let queue = DownloadQueue::new();
        queue.push((1..=5).map(|uid| entry(uid, false, None)));

        let batch = queue.pop_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.len(), 2);
    }
}
