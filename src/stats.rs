//! World statistics snapshot (spec.md §4.1.3, §8): cheap counters the
//! orchestrator updates during `update` and `render`, exposed as a plain
//! `Copy` struct rather than living atomics, so a caller's snapshot can't
//! tear mid-read.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Running counters maintained by [`crate::world::World`]. Each `update`
/// call refreshes the registry-derived counts; each `render` call refreshes
/// the per-frame counts.
#[derive(Default)]
pub struct StatsCounters {
    chunks_loaded: AtomicU32,
    chunks_generating: AtomicU32,
    chunks_meshing: AtomicU32,
    chunks_renderable: AtomicU32,
    frame_total: AtomicU32,
    frame_rendered: AtomicU32,
    frame_culled: AtomicU32,
    frame_vertices: AtomicU64,
}

/// Point-in-time copy of [`StatsCounters`], safe to hand to callers without
/// holding anything alive.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WorldStats {
    pub chunks_loaded: u32,
    pub chunks_generating: u32,
    pub chunks_meshing: u32,
    pub chunks_renderable: u32,
    pub frame_total: u32,
    pub frame_rendered: u32,
    pub frame_culled: u32,
    pub frame_vertices: u64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_registry_counts(&self, loaded: u32, generating: u32, meshing: u32, renderable: u32) {
        self.chunks_loaded.store(loaded, Ordering::Relaxed);
        self.chunks_generating.store(generating, Ordering::Relaxed);
        self.chunks_meshing.store(meshing, Ordering::Relaxed);
        self.chunks_renderable.store(renderable, Ordering::Relaxed);
    }

    pub fn set_frame_counts(&self, total: u32, rendered: u32, culled: u32, vertices: u64) {
        self.frame_total.store(total, Ordering::Relaxed);
        self.frame_rendered.store(rendered, Ordering::Relaxed);
        self.frame_culled.store(culled, Ordering::Relaxed);
        self.frame_vertices.store(vertices, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorldStats {
        WorldStats {
            chunks_loaded: self.chunks_loaded.load(Ordering::Relaxed),
            chunks_generating: self.chunks_generating.load(Ordering::Relaxed),
            chunks_meshing: self.chunks_meshing.load(Ordering::Relaxed),
            chunks_renderable: self.chunks_renderable.load(Ordering::Relaxed),
            frame_total: self.frame_total.load(Ordering::Relaxed),
            frame_rendered: self.frame_rendered.load(Ordering::Relaxed),
            frame_culled: self.frame_culled.load(Ordering::Relaxed),
            frame_vertices: self.frame_vertices.load(Ordering::Relaxed),
        }
    }
}
