//! The concurrent chunk registry: a reader-writer-locked map from
//! [`ChunkPos`] to [`ChunkRecord`] (spec.md §4.1.4).
//!
//! Lookups and iteration take the shared (read) side of the lock; insertion
//! and removal take the exclusive (write) side. A record's *existence* in
//! the map is what the lock protects -- mutating a record's own fields
//! (state, dirty, pin count) under only a shared lock is fine, because those
//! fields are independently protected by atomics and the state-machine
//! protocol (spec.md §4.1.4, §5).

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHasher;

use crate::chunk::{ChunkRecord, ChunkState, JobToken, PinExt, PinGuard};
use crate::coord::ChunkPos;
use crate::error::WorldError;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Hands out strictly increasing job tokens, one per record creation
/// (spec.md §3 I4: "assigned once at record creation and never changes").
#[derive(Default)]
struct TokenAllocator(AtomicU32);

impl TokenAllocator {
    fn next(&self) -> JobToken {
        JobToken(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct ChunkRegistry {
    records: RwLock<HashMap<ChunkPos, Arc<ChunkRecord>, FxBuildHasher>>,
    tokens: TokenAllocator,
}

impl Default for ChunkRegistry {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::default()),
            tokens: TokenAllocator::default(),
        }
    }
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an existing record without creating one. Takes the shared
    /// lock only for the duration of the map lookup; the returned `Arc`
    /// keeps the record alive after the lock is released (I1: a record has a
    /// stable address for the lifetime of its registry membership).
    pub fn get(&self, pos: ChunkPos) -> Option<Arc<ChunkRecord>> {
        self.records.read().get(&pos).cloned()
    }

    /// Look up an existing record and pin it in the same critical section,
    /// so the pin is taken *while the shared lock that proved the record
    /// exists is still held* (spec.md §4.2, §4.4 step 3: "only after
    /// pinning may the worker release the registry lock"). A plain `get`
    /// followed by a separate `.pin()` call would leave a window, after the
    /// lock is dropped and before the pin lands, in which a concurrent
    /// eviction pass could free a record that nothing yet protects.
    pub fn get_and_pin(&self, pos: ChunkPos) -> Option<(Arc<ChunkRecord>, PinGuard)> {
        let records = self.records.read();
        let record = records.get(&pos)?;
        let guard = record.pin();
        Some((Arc::clone(record), guard))
    }

    /// spec.md §3: "A record is created by `getOrCreateChunk(cx, cz)` in
    /// state `missing`, `pin_count=0`, `dirty=true`, with a fresh job_token."
    ///
    /// Takes the shared lock first (the common case: the record already
    /// exists) and only escalates to the exclusive lock when it doesn't,
    /// re-checking after acquiring it in case another thread raced to insert
    /// the same record in between. Reserves map capacity before inserting so
    /// an allocation failure surfaces as `WorldError::AllocationFailed`
    /// (spec.md §7 class 1) instead of aborting the process.
    pub fn get_or_create(&self, pos: ChunkPos) -> Result<Arc<ChunkRecord>, WorldError> {
        if let Some(existing) = self.get(pos) {
            return Ok(existing);
        }

        let mut records = self.records.write();
        if let Some(existing) = records.get(&pos) {
            return Ok(Arc::clone(existing));
        }

        records
            .try_reserve(1)
            .map_err(|_| WorldError::AllocationFailed)?;
        let record = Arc::new(ChunkRecord::new(pos, self.tokens.next()));
        records.insert(pos, Arc::clone(&record));
        Ok(record)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.records.read().contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every currently-registered record, for callers that need
    /// to scan the whole registry (tick step 2, render, eviction). Cloning
    /// the `Arc`s out under the shared lock means the rest of the scan
    /// doesn't hold the registry lock at all.
    pub fn snapshot(&self) -> Vec<Arc<ChunkRecord>> {
        self.records.read().values().cloned().collect()
    }

    /// Eviction pass (spec.md §4.1.1 step 4). Takes the exclusive lock for
    /// the whole pass, consistent with spec.md calling eviction out as an
    /// "under exclusive registry lock" operation; `should_evict` is checked
    /// again under the lock in case a worker raced a state/pin change
    /// between the snapshot that selected candidates and this call.
    pub fn evict_if<F>(&self, mut should_evict: F) -> Vec<Arc<ChunkRecord>>
    where
        F: FnMut(&ChunkRecord) -> bool,
    {
        let mut evicted = Vec::new();
        let mut records = self.records.write();
        records.retain(|_, record| {
            if should_evict(record) {
                evicted.push(Arc::clone(record));
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Reset every record in a "reserved" state back to its pre-reservation
    /// state, used by `pause()` (spec.md §4.1.2). Runs under the exclusive
    /// lock so no worker can observe a partially-reset registry mid-pass.
    pub fn reset_in_flight_states(&self) {
        let records = self.records.write();
        for record in records.values() {
            let state = record.state();
            if state.compare_exchange(ChunkState::Generating, ChunkState::Missing) {
                continue;
            }
            state.compare_exchange(ChunkState::Meshing, ChunkState::Generated);
        }
    }
}
