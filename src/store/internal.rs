//! In-Process Greylist Store
//!
//! A single map from triplet fingerprint to first-seen Unix timestamp,
//! guarded by one mutex for all read/modify/insert/delete operations. The
//! map is small (one `u64 -> i64` pair per active triplet) and every
//! critical section is a few instructions, so one lock is plenty; the
//! contended path of this daemon is the network, not this map.
//!
//! Active expiry is the [sweeper's](crate::store::sweeper) job; the store
//! itself also refuses to report an aged-out record in [`InternalStore::observe`]
//! so that a record the sweeper has not reached yet still resets correctly.

use std::collections::HashMap;
use std::sync::Mutex;

/// The in-process greylist map.
#[derive(Debug, Default)]
pub struct InternalStore {
    records: Mutex<HashMap<u64, i64>>,
}

impl InternalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a fingerprint, recording it when absent or aged out.
    ///
    /// Returns `Some(first_seen)` when a live record exists, leaving it
    /// untouched. Returns `None` when the fingerprint was unknown or its
    /// record was older than `expire` seconds; either way the record is
    /// (re)written with `now` before the lock is released, so concurrent
    /// callers for one fingerprint agree on a single first-seen time.
    pub fn observe(&self, fingerprint: u64, now: i64, expire: i64) -> Option<i64> {
        let mut records = self.records.lock().unwrap();
        match records.get(&fingerprint) {
            Some(&first_seen) if now - first_seen <= expire => Some(first_seen),
            _ => {
                records.insert(fingerprint, now);
                None
            }
        }
    }

    /// Reads a record without modifying anything.
    pub fn get(&self, fingerprint: u64) -> Option<i64> {
        self.records.lock().unwrap().get(&fingerprint).copied()
    }

    /// Writes a record unconditionally.
    pub fn insert(&self, fingerprint: u64, first_seen: i64) {
        self.records.lock().unwrap().insert(fingerprint, first_seen);
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    /// Deletes all records older than `expire` seconds, in one critical
    /// section over the whole table. Returns how many were deleted.
    pub fn sweep(&self, now: i64, expire: i64) -> usize {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, first_seen| now - *first_seen <= expire);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn observe_records_first_sighting() {
        let store = InternalStore::new();
        assert_eq!(store.observe(1, 1000, 14400), None);
        assert_eq!(store.get(1), Some(1000));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn observe_returns_live_record_unchanged() {
        let store = InternalStore::new();
        store.insert(1, 1000);
        assert_eq!(store.observe(1, 1100, 14400), Some(1000));
        // Repeat sightings never refresh the first-seen time
        assert_eq!(store.get(1), Some(1000));
    }

    #[test]
    fn observe_resets_an_aged_out_record() {
        let store = InternalStore::new();
        store.insert(1, 1000);
        assert_eq!(store.observe(1, 1000 + 14401, 14400), None);
        assert_eq!(store.get(1), Some(1000 + 14401));
    }

    #[test]
    fn observe_keeps_a_record_exactly_at_the_expiry_boundary() {
        let store = InternalStore::new();
        store.insert(1, 1000);
        assert_eq!(store.observe(1, 1000 + 14400, 14400), Some(1000));
    }

    #[test]
    fn sweep_deletes_only_aged_records() {
        let store = InternalStore::new();
        store.insert(1, 1000);
        store.insert(2, 5000);
        store.insert(3, 20000);

        let deleted = store.sweep(20000, 14400);
        assert_eq!(deleted, 1);
        assert_eq!(store.get(1), None);
        assert_eq!(store.get(2), Some(5000));
        assert_eq!(store.get(3), Some(20000));
    }

    #[test]
    fn concurrent_first_sightings_create_one_record() {
        let store = Arc::new(InternalStore::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.observe(99, 1234, 14400).is_none()
            }));
        }

        let first_sightings = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        // Exactly one caller won the insert; everyone else saw its record
        assert_eq!(first_sightings, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(99), Some(1234));
    }
}
