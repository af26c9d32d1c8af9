use tokio_util::sync::CancellationToken;

use crate::preload::DownloadHandle;
use crate::request::{DownloadId, RevisionKey, StationId};

#[derive(Debug)]
struct InFlight {
    handle: DownloadHandle,
    abort: CancellationToken,
}

/// Downloads currently in flight, most recently requested first.
///
/// Holds at most one entry per key. Capacity is a preemption target only:
/// [`DownloadList::insert`] never refuses an entry.
#[derive(Debug)]
pub struct DownloadList {
    capacity: usize,
    next_id: u64,
    entries: Vec<InFlight>,
}

impl DownloadList {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            entries: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, key: &RevisionKey) -> bool {
        self.position(key).is_some()
    }

    pub fn next_id(&mut self) -> DownloadId {
        let id = DownloadId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Existing handle for `key`, moved to the front as most recently requested.
    pub fn touch(&mut self, key: &RevisionKey) -> Option<DownloadHandle> {
        let pos = self.position(key)?;
        let entry = self.entries.remove(pos);
        let handle = entry.handle.clone();
        self.entries.insert(0, entry);
        Some(handle)
    }

    pub fn insert(&mut self, handle: DownloadHandle, abort: CancellationToken) {
        if let Some(pos) = self.position(handle.key()) {
            self.entries.remove(pos).abort.cancel();
        }
        self.entries.insert(0, InFlight { handle, abort });
    }

    /// Least recently requested key for which `protected` is false.
    pub fn preemption_candidate(
        &self,
        protected: impl Fn(&RevisionKey) -> bool,
    ) -> Option<RevisionKey> {
        self.entries
            .iter()
            .rev()
            .map(|e| e.handle.key())
            .find(|k| !protected(k))
            .cloned()
    }

    /// Signal abort to the download for `key` and forget it.
    pub fn abort(&mut self, key: &RevisionKey) -> bool {
        let Some(pos) = self.position(key) else {
            return false;
        };
        self.entries.remove(pos).abort.cancel();
        true
    }

    pub fn abort_station(&mut self, station: &StationId) -> Vec<RevisionKey> {
        let mut aborted = Vec::new();
        self.entries.retain(|e| {
            if e.handle.key().station == *station {
                e.abort.cancel();
                aborted.push(e.handle.key().clone());
                false
            } else {
                true
            }
        });
        aborted
    }

    /// Forget the entry started as `id`, if it is still listed.
    ///
    /// Matching on the id keeps a finished download from removing a newer
    /// download of the same key.
    pub fn finish(&mut self, id: DownloadId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle.id() != id);
        self.entries.len() != before
    }

    /// Keys from most to least recently requested.
    pub fn keys(&self) -> Vec<RevisionKey> {
        self.entries.iter().map(|e| e.handle.key().clone()).collect()
    }

    fn position(&self, key: &RevisionKey) -> Option<usize> {
        self.entries.iter().position(|e| e.handle.key() == key)
    }
}
