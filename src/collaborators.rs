//! Trait boundaries for the three external collaborators (spec.md §6): the
//! terrain generator, the mesh builder, and the render backend. The core
//! only depends on these interfaces; noise functions, greedy meshing, and
//! any particular graphics API are explicitly out of scope (spec.md §1).
//!
//! This module also carries the deterministic fakes the test suite needs to
//! exercise spec.md §8's testable properties and end-to-end scenarios,
//! following the teacher's habit of keeping test-support types (like
//! `ChunkSnapshotCache`) in the library proper rather than duplicated per
//! test file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::voxel::{BlockType, Neighbors, VoxelGrid, CHUNK_HEIGHT};

/// Shared with a [`crate::queue::PriorityJobQueue`]; long-running processors
/// (generation, primarily) poll this during work and exit early once it is
/// set (spec.md §4.3 "Abort signal", §5 "Abort").
#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Populates a chunk's voxel grid. Must poll `abort` during lengthy work and
/// return promptly once it is set; must be deterministic (spec.md P6: same
/// seed and coordinates imply byte-identical output).
pub trait TerrainGenerator: Send + Sync {
    fn generate(&self, cx: i32, cz: i32, voxels: &mut VoxelGrid, abort: &AbortFlag);
}

/// Opaque mesh handle owned by the chunk record, mutated by the mesh worker
/// and the uploader. The core treats the contents as opaque; only the
/// backend collaborator interprets them.
#[derive(Default)]
pub struct MeshSlot {
    pub cpu_data: Option<MeshData>,
    pub gpu_handle: Option<GpuMeshHandle>,
    pub vertex_count: u32,
}

/// CPU-side triangle data emitted by the mesh builder. Kept deliberately
/// opaque beyond a vertex count -- the actual vertex format is a render
/// backend concern (out of scope per spec.md §1).
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub opaque_vertices: u32,
    pub translucent_vertices: u32,
}

/// Backend-owned GPU resource handle. Opaque to the core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GpuMeshHandle(pub u64);

/// Consumes this chunk's voxels plus up to four neighbor voxel grids and
/// emits triangles into `mesh`. Must treat an absent neighbor as all-air
/// (spec.md §6).
pub trait MeshBuilder: Send + Sync {
    fn build(&self, mesh: &mut MeshSlot, voxels: &VoxelGrid, neighbors: Neighbors<'_>);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RenderPass {
    Opaque,
    Translucent,
}

/// Transfers CPU-side mesh buffers to GPU-owned storage and draws them.
/// Windowing, shader source, and any specific graphics API are out of scope;
/// this is purely the seam the core calls through.
pub trait RenderBackend: Send + Sync {
    fn upload(&self, mesh: &mut MeshSlot) -> Result<(), BackendError>;
    fn release(&self, mesh: &mut MeshSlot);
    fn set_model_matrix(&self, matrix: glam::Mat4);
    fn draw(&self, mesh: &MeshSlot, pass: RenderPass);
    /// Blocks until all GPU work in flight completes; called during world
    /// teardown (spec.md §6).
    fn wait_idle(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("render backend upload failed")]
    UploadFailed,
}

/// Deterministic terrain generator fake: fills the chunk solid with `block`
/// from y=0 up to `surface_height`, everything above is air. Matches
/// spec.md §8 scenario 1's "stone at y=0..64" and satisfies P6 (same seed
/// and position always produce the same output; the "seed" here is just
/// folded into `surface_height` for test legibility).
pub struct DeterministicTerrain {
    pub surface_height: usize,
    pub block: BlockType,
}

impl DeterministicTerrain {
    pub fn new(surface_height: usize, block: BlockType) -> Self {
        Self {
            surface_height,
            block,
        }
    }
}

impl TerrainGenerator for DeterministicTerrain {
    fn generate(&self, _cx: i32, _cz: i32, voxels: &mut VoxelGrid, abort: &AbortFlag) {
        use crate::voxel::VoxelIndex;

        let height = self.surface_height.min(CHUNK_HEIGHT);
        if height == 0 {
            voxels.fill(BlockType::AIR);
            return;
        }

        // Fill column-by-column so a slow/aborted test generator has somewhere
        // natural to poll the abort flag, matching the "lengthy inner work"
        // shape spec.md §4.3 describes for real terrain generation.
        for x in 0..crate::voxel::CHUNK_WIDTH {
            if abort.is_set() {
                return;
            }
            for z in 0..crate::voxel::CHUNK_WIDTH {
                for y in 0..height {
                    voxels.set(VoxelIndex { x, y, z }, self.block);
                }
            }
        }
    }
}

/// Deterministic mesh builder fake: counts one opaque vertex per exposed
/// boundary face against an absent (air) neighbor, ignoring interior faces.
/// Good enough to exercise the pipeline end to end without depending on a
/// real greedy mesher (explicitly out of scope, spec.md §1).
pub struct CountingMeshBuilder;

impl MeshBuilder for CountingMeshBuilder {
    fn build(&self, mesh: &mut MeshSlot, voxels: &VoxelGrid, neighbors: Neighbors<'_>) {
        let mut opaque = 0u32;
        let sides = [
            neighbors.pos_x,
            neighbors.neg_x,
            neighbors.pos_z,
            neighbors.neg_z,
        ];
        for side in sides {
            if side.is_none() {
                opaque += 1;
            }
        }
        if matches!(voxels, VoxelGrid::Homogeneous(b) if !b.is_air()) {
            opaque += 1;
        }
        mesh.cpu_data = Some(MeshData {
            opaque_vertices: opaque,
            translucent_vertices: 0,
        });
        mesh.vertex_count = opaque;
    }
}

/// Recording render backend fake: remembers every call instead of touching a
/// GPU, so tests can assert on upload/release/draw counts.
#[derive(Default)]
pub struct RecordingBackend {
    pub uploads: std::sync::atomic::AtomicU32,
    pub releases: std::sync::atomic::AtomicU32,
    pub draws: std::sync::atomic::AtomicU32,
    pub fail_next_upload: AtomicBool,
}

impl RenderBackend for RecordingBackend {
    fn upload(&self, mesh: &mut MeshSlot) -> Result<(), BackendError> {
        if self.fail_next_upload.swap(false, Ordering::AcqRel) {
            return Err(BackendError::UploadFailed);
        }
        mesh.gpu_handle = Some(GpuMeshHandle(
            self.uploads.fetch_add(1, Ordering::AcqRel) as u64,
        ));
        Ok(())
    }

    fn release(&self, mesh: &mut MeshSlot) {
        mesh.gpu_handle = None;
        self.releases.fetch_add(1, Ordering::AcqRel);
    }

    fn set_model_matrix(&self, _matrix: glam::Mat4) {}

    fn draw(&self, _mesh: &MeshSlot, _pass: RenderPass) {
        self.draws.fetch_add(1, Ordering::AcqRel);
    }

    fn wait_idle(&self) {}
}
