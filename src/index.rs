//! The concurrent address index (spec §3, §4.3).
//!
//! Workers only ever call [`AddressIndex::lookup`], which takes the table's
//! read lock; the Indexer alone calls [`AddressIndex::insert_unique`] and
//! [`AddressIndex::resize_if_overfull`]. Ordinary inserts share the read
//! lock with lookups and serialize only against the bucket they land in
//! (lock striping); only a resize takes the write lock, which is the one
//! point where concurrent lookups actually block (§4.3 "Concurrent workers
//! are blocked only during this rehash").

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHasher;

use crate::error::{IndexError, Result};
use crate::location::{Location, LocationArray};

/// Canonical address key, as produced by the extractor. Cheaply cloneable
/// since every worker and the emitter share ownership of the same entry's
/// key.
pub type AddressKey = Arc<str>;

/// Hard cap on total entries (spec §4.3, §7 "Index cap exceeded").
pub const MAX_ENTRIES: usize = 10_000_000;

/// Hard cap on bucket count, reached long before `MAX_ENTRIES` would push
/// load factor past 0.8 on the last ladder rung.
pub const MAX_BUCKETS: usize = 25_165_843;

/// Resize when occupancy passes this fraction of bucket count (§4.3).
const LOAD_FACTOR_THRESHOLD: f64 = 0.8;

/// Check load factor after every this many successful inserts (§4.3).
pub const RESIZE_CHECK_INTERVAL: u64 = 4096;

/// Classic doubling-prime growth table (the same ladder used by a number of
/// long-lived hash-table implementations), capped at [`MAX_BUCKETS`].
const GROWTH_LADDER: &[usize] = &[
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433,
    1572869, 3145739, 6291469, 12582917, 25165843,
];

fn hash_key(key: &str) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// One unique address and its per-worker location slots.
///
/// Each slot is touched by exactly one worker thread for the lifetime of a
/// file; the `Mutex` around it is never contended in practice (no other
/// thread ever locks slot `k` but worker `k`), so it costs nothing beyond
/// the safety of not reaching for raw aliasing.
pub struct AddressEntry {
    pub key: AddressKey,
    slots: Vec<Mutex<LocationArray>>,
    counters: Vec<AtomicU64>,
    total: AtomicU64,
    /// When this key was first inserted into the index. Observability only
    /// (spec §3 "Address entry"); never consulted by lookup, insert, or
    /// emission logic.
    first_seen: Instant,
}

impl AddressEntry {
    fn new(key: AddressKey, worker_count: usize) -> Self {
        let mut slots = Vec::with_capacity(worker_count);
        let mut counters = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            slots.push(Mutex::new(LocationArray::new()));
            counters.push(AtomicU64::new(0));
        }
        AddressEntry {
            key,
            slots,
            counters,
            total: AtomicU64::new(0),
            first_seen: Instant::now(),
        }
    }

    /// When this entry was first inserted (observability only, spec §3).
    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    /// Record one occurrence in worker `worker_id`'s own slot.
    pub fn record(&self, worker_id: usize, loc: Location) {
        self.slots[worker_id].lock().push(loc);
        self.counters[worker_id].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Occurrence count contributed by one worker's slot (spec §3 "an
    /// occurrence counter" per worker slot). `total()` is always the sum of
    /// these across every worker.
    pub fn worker_occurrences(&self, worker_id: usize) -> u64 {
        self.counters[worker_id].load(Ordering::Relaxed)
    }

    /// Snapshot every worker's locations, each sorted ascending by
    /// `(line, field)`, ready for the emitter's k-way merge. Called only
    /// after ingest has quiesced, so the locks below are uncontended.
    pub fn sorted_slots(&self) -> Vec<LocationArray> {
        self.slots
            .iter()
            .map(|slot| {
                let mut arr = slot.lock().clone();
                arr.sort();
                arr
            })
            .collect()
    }
}

struct Bucket {
    entries: Mutex<Vec<Arc<AddressEntry>>>,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            entries: Mutex::new(Vec::new()),
        }
    }
}

struct Table {
    buckets: Vec<Bucket>,
    ladder_pos: usize,
}

impl Table {
    fn new() -> Self {
        Table {
            buckets: (0..GROWTH_LADDER[0]).map(|_| Bucket::new()).collect(),
            ladder_pos: 0,
        }
    }

    fn bucket_for(&self, key: &str) -> &Bucket {
        let idx = (hash_key(key) as usize) % self.buckets.len();
        &self.buckets[idx]
    }
}

/// The global, concurrently-readable address index for one file.
pub struct AddressIndex {
    table: RwLock<Table>,
    worker_count: usize,
    entry_count: AtomicU64,
    inserts_since_check: AtomicU64,
}

impl AddressIndex {
    pub fn new(worker_count: usize) -> Self {
        AddressIndex {
            table: RwLock::new(Table::new()),
            worker_count,
            entry_count: AtomicU64::new(0),
            inserts_since_check: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared read-path lookup. Called by workers on every extracted
    /// address.
    pub fn lookup(&self, key: &str) -> Option<Arc<AddressEntry>> {
        let table = self.table.read();
        let bucket = table.bucket_for(key);
        let chain = bucket.entries.lock();
        chain.iter().find(|e| &*e.key == key).cloned()
    }

    /// Called only by the Indexer thread. Resolves the race where two
    /// workers both observed "absent": if the key is now present, the op
    /// becomes an append to the existing entry's slot for `worker_id`;
    /// otherwise a fresh entry is created and linked into its bucket.
    pub fn insert_unique(
        &self,
        key: AddressKey,
        worker_id: usize,
        loc: Location,
    ) -> Result<Arc<AddressEntry>> {
        let table = self.table.read();
        let bucket = table.bucket_for(&key);
        let mut chain = bucket.entries.lock();

        if let Some(existing) = chain.iter().find(|e| e.key == key) {
            existing.record(worker_id, loc);
            return Ok(existing.clone());
        }

        if self.entry_count.load(Ordering::Relaxed) as usize >= MAX_ENTRIES {
            return Err(IndexError::ResourceLimitExceeded(format!(
                "index cap of {MAX_ENTRIES} entries exceeded"
            )));
        }

        let entry = Arc::new(AddressEntry::new(key, self.worker_count));
        entry.record(worker_id, loc);
        chain.push(entry.clone());
        drop(chain);
        drop(table);

        self.entry_count.fetch_add(1, Ordering::Relaxed);
        self.inserts_since_check.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    /// After every [`RESIZE_CHECK_INTERVAL`] inserts, check whether a rehash
    /// is due. Called by the Indexer between op-queue drains.
    pub fn maybe_resize(&self) -> Result<()> {
        if self.inserts_since_check.load(Ordering::Relaxed) < RESIZE_CHECK_INTERVAL {
            return Ok(());
        }
        self.inserts_since_check.store(0, Ordering::Relaxed);
        self.resize_if_overfull()
    }

    pub fn resize_if_overfull(&self) -> Result<()> {
        let bucket_count = self.table.read().buckets.len();
        let load = self.entry_count.load(Ordering::Relaxed) as f64 / bucket_count as f64;
        if load <= LOAD_FACTOR_THRESHOLD {
            return Ok(());
        }

        let mut table = self.table.write();
        // Re-check under the write lock: another resize may have already
        // run while we waited for it.
        let load = self.entry_count.load(Ordering::Relaxed) as f64 / table.buckets.len() as f64;
        if load <= LOAD_FACTOR_THRESHOLD {
            return Ok(());
        }

        let next_pos = table.ladder_pos + 1;
        let new_size = *GROWTH_LADDER
            .get(next_pos)
            .ok_or_else(|| IndexError::ResourceLimitExceeded(format!(
                "bucket cap of {MAX_BUCKETS} exceeded; growth ladder exhausted"
            )))?;
        if new_size > MAX_BUCKETS {
            return Err(IndexError::ResourceLimitExceeded(format!(
                "bucket cap of {MAX_BUCKETS} exceeded"
            )));
        }

        let mut new_buckets: Vec<Bucket> = (0..new_size).map(|_| Bucket::new()).collect();
        for bucket in &table.buckets {
            let chain = bucket.entries.lock();
            for entry in chain.iter() {
                let idx = (hash_key(&entry.key) as usize) % new_size;
                new_buckets[idx].entries.lock().push(entry.clone());
            }
        }

        table.buckets = new_buckets;
        table.ladder_pos = next_pos;
        Ok(())
    }

    /// Walk every entry currently in the table. Intended for the Emitter,
    /// called only after ingest has quiesced.
    pub fn snapshot_entries(&self) -> Vec<Arc<AddressEntry>> {
        let table = self.table.read();
        let mut out = Vec::with_capacity(self.len());
        for bucket in &table.buckets {
            out.extend(bucket.entries.lock().iter().cloned());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AddressKey {
        Arc::from(s)
    }

    #[test]
    fn insert_then_lookup_finds_entry() {
        let index = AddressIndex::new(2);
        index
            .insert_unique(key("10.0.0.1"), 0, Location::new(1, 1))
            .unwrap();
        let found = index.lookup("10.0.0.1").unwrap();
        assert_eq!(&*found.key, "10.0.0.1");
        assert_eq!(found.total(), 1);
    }

    #[test]
    fn insert_unique_second_call_appends_not_duplicates() {
        let index = AddressIndex::new(2);
        index
            .insert_unique(key("10.0.0.1"), 0, Location::new(1, 1))
            .unwrap();
        index
            .insert_unique(key("10.0.0.1"), 1, Location::new(2, 1))
            .unwrap();
        assert_eq!(index.len(), 1);
        let entry = index.lookup("10.0.0.1").unwrap();
        assert_eq!(entry.total(), 2);
    }

    #[test]
    fn lookup_miss_returns_none() {
        let index = AddressIndex::new(2);
        assert!(index.lookup("10.0.0.1").is_none());
    }

    #[test]
    fn resize_preserves_all_entries() {
        let index = AddressIndex::new(1);
        for i in 0..500u64 {
            let k = format!("10.0.{}.{}", i / 256, i % 256);
            index
                .insert_unique(key(&k), 0, Location::new(i + 1, 1))
                .unwrap();
            index.maybe_resize().unwrap();
        }
        index.resize_if_overfull().unwrap();
        assert_eq!(index.len(), 500);
        for i in 0..500u64 {
            let k = format!("10.0.{}.{}", i / 256, i % 256);
            assert!(index.lookup(&k).is_some());
        }
    }

    #[test]
    fn per_worker_slots_stay_independent() {
        let index = AddressIndex::new(3);
        let entry = index
            .insert_unique(key("10.0.0.1"), 0, Location::new(1, 1))
            .unwrap();
        entry.record(1, Location::new(2, 1));
        entry.record(2, Location::new(3, 1));
        let slots = entry.sorted_slots();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].as_slice(), &[Location::new(1, 1)]);
        assert_eq!(slots[1].as_slice(), &[Location::new(2, 1)]);
        assert_eq!(slots[2].as_slice(), &[Location::new(3, 1)]);
    }

    #[test]
    fn per_worker_counters_sum_to_total() {
        let index = AddressIndex::new(2);
        let entry = index
            .insert_unique(key("10.0.0.1"), 0, Location::new(1, 1))
            .unwrap();
        entry.record(0, Location::new(2, 1));
        entry.record(1, Location::new(3, 1));

        assert_eq!(entry.worker_occurrences(0), 2);
        assert_eq!(entry.worker_occurrences(1), 1);
        assert_eq!(entry.total(), 3);
    }

    #[test]
    fn first_seen_is_stamped_at_creation() {
        let before = std::time::Instant::now();
        let index = AddressIndex::new(1);
        let entry = index
            .insert_unique(key("10.0.0.1"), 0, Location::new(1, 1))
            .unwrap();
        assert!(entry.first_seen() >= before);
    }
}
