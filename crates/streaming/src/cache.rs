use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::{FaceSet, Resolution};
use crate::request::{RevisionKey, StationId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("image cache is full ({capacity} entries) and every entry is visible or locked")]
    NoEvictableEntries { capacity: usize },
    #[error("{what} capacity must be at least 1")]
    ZeroCapacity { what: &'static str },
}

#[derive(Debug, Clone)]
struct LoadedEntry {
    faces: FaceSet,
    inserted_tick: u64,
}

/// Loaded station revisions, bounded by entry count.
///
/// Notes on eviction:
/// - Entries are keyed in a `BTreeMap` for stable traversal order.
/// - The victim is the least-recently *inserted* unprotected entry, with a
///   tie-break by key ordering. Reads do not refresh an entry.
/// - A full-resolution upgrade counts as a fresh insertion.
#[derive(Debug)]
pub struct LoadedCache {
    capacity: usize,
    tick: u64,
    entries: BTreeMap<RevisionKey, LoadedEntry>,
}

impl LoadedCache {
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity {
                what: "image cache",
            });
        }
        Ok(Self {
            capacity,
            tick: 0,
            entries: BTreeMap::new(),
        })
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

    pub fn contains(&self, key: &RevisionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn resolution(&self, key: &RevisionKey) -> Option<Resolution> {
        self.entries.get(key).map(|e| e.faces.resolution)
    }

    pub fn faces(&self, key: &RevisionKey) -> Option<&FaceSet> {
        self.entries.get(key).map(|e| &e.faces)
    }

    /// Keys from oldest to newest insertion.
    pub fn keys_by_insertion(&self) -> Vec<RevisionKey> {
        let mut keys: Vec<(&RevisionKey, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k, e.inserted_tick))
            .collect();
        keys.sort_by(|(ka, ta), (kb, tb)| ta.cmp(tb).then_with(|| ka.cmp(kb)));
        keys.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Record `faces` for `key` and evict down to capacity.
    ///
    /// A lower resolution never replaces a higher one. Entries for which
    /// `protected` returns true are never evicted, and neither is `key`
    /// itself. If nothing can be evicted the insertion is rolled back.
    pub fn insert(
        &mut self,
        key: RevisionKey,
        faces: FaceSet,
        protected: impl Fn(&RevisionKey) -> bool,
    ) -> Result<Vec<RevisionKey>, CacheError> {
        if let Some(existing) = self.entries.get(&key) {
            if existing.faces.resolution > faces.resolution {
                return Ok(Vec::new());
            }
        }

        self.tick += 1;
        let replaced = self.entries.insert(
            key.clone(),
            LoadedEntry {
                faces,
                inserted_tick: self.tick,
            },
        );
        if replaced.is_some() {
            // Upgrades never change the entry count.
            return Ok(Vec::new());
        }

        let mut evicted: Vec<RevisionKey> = Vec::new();
        while self.entries.len() > self.capacity {
            let candidate = self
                .entries
                .iter()
                .filter(|(k, _)| **k != key && !protected(k))
                .min_by(|(ka, ea), (kb, eb)| {
                    ea.inserted_tick
                        .cmp(&eb.inserted_tick)
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(k, _)| k.clone());

            let Some(victim) = candidate else {
                self.entries.remove(&key);
                return Err(CacheError::NoEvictableEntries {
                    capacity: self.capacity,
                });
            };

            self.entries.remove(&victim);
            evicted.push(victim);
        }
        Ok(evicted)
    }

    pub fn remove(&mut self, key: &RevisionKey) -> Option<FaceSet> {
        self.entries.remove(key).map(|e| e.faces)
    }

    /// Drop every revision of `station`.
    pub fn remove_station(&mut self, station: &StationId) -> Vec<RevisionKey> {
        let keys: Vec<RevisionKey> = self
            .entries
            .keys()
            .filter(|k| k.station == *station)
            .cloned()
            .collect();
        for k in &keys {
            self.entries.remove(k);
        }
        keys
    }
}
