//! The chunk record: the unit of registry storage, its lifecycle state
//! machine, and the pin protocol that lets worker threads safely hold raw
//! references to records (and their neighbors) without blocking the
//! orchestrator's eviction pass (spec.md §3, §4.2).

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collaborators::MeshSlot;
use crate::coord::ChunkPos;
use crate::voxel::VoxelGrid;

/// Lifecycle state of a chunk record (spec.md §3). Stored as a single
/// `AtomicU8` behind a newtype so nothing outside this module touches the
/// raw integer representation, mirroring how `notcraft-common`'s `Chunk`
/// wraps its atomics in named accessor methods rather than exposing them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ChunkState {
    Missing = 0,
    Generating = 1,
    Generated = 2,
    Meshing = 3,
    MeshReady = 4,
    Uploading = 5,
    Renderable = 6,
}

impl ChunkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChunkState::Missing,
            1 => ChunkState::Generating,
            2 => ChunkState::Generated,
            3 => ChunkState::Meshing,
            4 => ChunkState::MeshReady,
            5 => ChunkState::Uploading,
            6 => ChunkState::Renderable,
            other => unreachable!("invalid chunk state byte {other}"),
        }
    }

    /// I2: these states must never be evicted regardless of pin count.
    pub fn blocks_eviction(self) -> bool {
        matches!(
            self,
            ChunkState::Generating
                | ChunkState::Meshing
                | ChunkState::MeshReady
                | ChunkState::Uploading
        )
    }
}

/// Atomic cell for [`ChunkState`]. A thin wrapper rather than a bare
/// `AtomicU8` so every read/write site reads as a state transition, not an
/// integer store.
#[derive(Debug)]
pub struct AtomicChunkState(AtomicU8);

impl AtomicChunkState {
    fn new(state: ChunkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ChunkState {
        ChunkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ChunkState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition from `expected` to `new`, returning whether it happened.
    /// Used anywhere two threads could race to claim the same record (e.g. a
    /// stale-job reset racing a fresh enqueue).
    pub fn compare_exchange(&self, expected: ChunkState, new: ChunkState) -> bool {
        self.0
            .compare_exchange(
                expected as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A per-record identifier for the "generation of jobs" currently valid for
/// this record (spec.md §3 I4/I5, §4.4). Assigned once at record creation and
/// never changes; a processor whose job carries a stale token does nothing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JobToken(pub u32);

/// RAII guard returned by pinning a record through an `Arc`. Its `Drop` impl
/// calls `unpin()`, so "unpin on every exit path, including error paths"
/// (spec.md §4.2) falls out of ordinary control flow instead of needing a
/// manual call at every return site -- the same kind of guard the teacher
/// reaches for with `util::Defer` and `OrphanWriteGuard` anywhere a
/// balanced acquire/release pair has to survive early returns.
///
/// The guard owns its own clone of the record's `Arc` rather than borrowing
/// it, so a pin taken while a lock is held (e.g.
/// [`crate::registry::ChunkRegistry::get_and_pin`]) stays valid long after
/// that lock is released -- spec.md §4.2 requires pinning to happen "while
/// still holding the registry's shared lock that proved those records
/// existed", with the lock only droppable *after* the pin.
pub struct PinGuard {
    record: Arc<ChunkRecord>,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.record.unpin();
    }
}

/// Pins a chunk record reached through a shared `Arc`. Implemented as an
/// extension trait on `Arc<ChunkRecord>` (rather than an inherent method on
/// `ChunkRecord` itself) because the guard it returns must own an `Arc`
/// clone, and `ChunkRecord` has no way to reconstruct one from `&self`.
pub trait PinExt {
    fn pin(&self) -> PinGuard;
}

impl PinExt for Arc<ChunkRecord> {
    /// Bump the pin count and return a guard that releases it on drop.
    /// Callers must pin while still holding the registry's shared lock that
    /// proved this record exists (spec.md §4.2) -- `pin` itself doesn't and
    /// can't enforce that; it's a calling-convention invariant upheld by
    /// [`crate::registry::ChunkRegistry`]'s lookup methods.
    fn pin(&self) -> PinGuard {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        PinGuard {
            record: Arc::clone(self),
        }
    }
}

pub struct ChunkRecord {
    pub cx: i32,
    pub cz: i32,
    state: AtomicChunkState,
    dirty: std::sync::atomic::AtomicBool,
    job_token: AtomicU32,
    pin_count: AtomicU32,
    pub voxels: RwLock<VoxelGrid>,
    pub mesh: Mutex<MeshSlot>,
}

impl ChunkRecord {
    /// A fresh record created by `getOrCreateChunk`: state `Missing`,
    /// `pin_count == 0`, `dirty == true`, a fresh token (spec.md §3).
    pub fn new(pos: ChunkPos, token: JobToken) -> Self {
        Self {
            cx: pos.cx,
            cz: pos.cz,
            state: AtomicChunkState::new(ChunkState::Missing),
            dirty: std::sync::atomic::AtomicBool::new(true),
            job_token: AtomicU32::new(token.0),
            pin_count: AtomicU32::new(0),
            voxels: RwLock::new(VoxelGrid::default()),
            mesh: Mutex::new(MeshSlot::default()),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.cx, self.cz)
    }

    pub fn state(&self) -> &AtomicChunkState {
        &self.state
    }

    pub fn token(&self) -> JobToken {
        JobToken(self.job_token.load(Ordering::Acquire))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    fn unpin(&self) {
        let previous = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pin_count underflow");
    }

    /// I3: safe to evict only once nothing holds a reference.
    pub fn is_unpinned(&self) -> bool {
        self.pin_count() == 0
    }
}
