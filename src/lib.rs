//! Concurrent chunk streaming core for a horizontally-tiled voxel world.
//!
//! Given a moving observer, this crate decides which chunks must exist in
//! memory, drives each through generate -> mesh -> upload -> render, and
//! retires chunks that leave the working set. One orchestrating thread (the
//! render thread) drives [`world::World::update`] and [`world::World::render`]
//! once per frame; a fixed pool of worker threads per pipeline stage produces
//! the generated voxels and built meshes concurrently.

pub mod chunk;
pub mod collaborators;
pub mod coord;
pub mod error;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod util;
pub mod velocity;
pub mod voxel;
pub mod worker;
pub mod world;

pub mod prelude {
    pub use crate::chunk::{ChunkRecord, ChunkState};
    pub use crate::collaborators::{MeshBuilder, RenderBackend, RenderPass, TerrainGenerator};
    pub use crate::coord::ChunkPos;
    pub use crate::error::WorldError;
    pub use crate::voxel::{BlockType, VoxelGrid};
    pub use crate::world::World;

    pub type Result<T, E = WorldError> = std::result::Result<T, E>;
}
