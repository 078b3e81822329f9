//! `set_block` writes are visible to `get_block` immediately, and dirty the
//! edited chunk (and any boundary-adjacent neighbor) so the next mesh pass
//! picks the edit up.

use std::sync::Arc;
use std::time::Duration;

use chunk_streamer::collaborators::{CountingMeshBuilder, DeterministicTerrain, RecordingBackend};
use chunk_streamer::coord::ChunkPos;
use chunk_streamer::prelude::*;
use chunk_streamer::velocity::WorldPos;

fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

#[test]
fn set_block_is_visible_immediately_and_triggers_remesh() {
    let world = World::new(
        1,
        Arc::new(DeterministicTerrain::new(64, BlockType(1))),
        Arc::new(CountingMeshBuilder),
        Arc::new(RecordingBackend::default()),
        2,
        2,
    );

    for _ in 0..4 {
        world.update(WorldPos { x: 0.0, z: 0.0 }, 0.016).unwrap();
        settle();
    }
    let origin = world.registry().get(ChunkPos::new(0, 0)).expect("origin chunk loaded");
    assert_eq!(origin.state().load(), ChunkState::Renderable);

    world.set_block(0, 64, 0, BlockType::AIR).unwrap();

    // The read reflects the write straight away, with no dependency on the
    // mesh/upload pipeline having caught up yet.
    assert_eq!(world.get_block(0, 64, 0), BlockType::AIR);
    assert!(origin.is_dirty());

    // One more tick re-promotes the dirty renderable chunk back into the
    // meshing pipeline, and it eventually reaches renderable again.
    for _ in 0..4 {
        world.update(WorldPos { x: 0.0, z: 0.0 }, 0.016).unwrap();
        settle();
    }
    assert_eq!(origin.state().load(), ChunkState::Renderable);
    assert_eq!(world.get_block(0, 64, 0), BlockType::AIR);

    world.shutdown();
}

#[test]
fn edit_on_a_chunk_boundary_dirties_the_abutting_neighbor() {
    let world = World::new(
        1,
        Arc::new(DeterministicTerrain::new(64, BlockType(1))),
        Arc::new(CountingMeshBuilder),
        Arc::new(RecordingBackend::default()),
        2,
        2,
    );
    for _ in 0..4 {
        world.update(WorldPos { x: 0.0, z: 0.0 }, 0.016).unwrap();
        settle();
    }

    let neighbor = world.registry().get(ChunkPos::new(1, 0)).expect("neighbor loaded");
    neighbor.set_dirty(false);

    // x = 15 is the last column of chunk (0, 0): it's the shared boundary
    // face with chunk (1, 0).
    world.set_block(15, 64, 0, BlockType::AIR).unwrap();

    assert!(neighbor.is_dirty(), "boundary edit should dirty the abutting neighbor");

    world.shutdown();
}
