//! Cold start, radius 2, stationary observer: every chunk within the render
//! disk reaches `renderable` within a handful of ticks, and no chunk outside
//! it is ever created.

use std::sync::Arc;
use std::time::Duration;

use chunk_streamer::collaborators::{CountingMeshBuilder, DeterministicTerrain, RecordingBackend};
use chunk_streamer::prelude::*;
use chunk_streamer::velocity::WorldPos;

fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

#[test]
fn all_in_radius_chunks_reach_renderable_within_a_few_ticks() {
    let world = World::new(
        2,
        Arc::new(DeterministicTerrain::new(64, BlockType(1))),
        Arc::new(CountingMeshBuilder),
        Arc::new(RecordingBackend::default()),
        3,
        2,
    );

    for _ in 0..5 {
        world.update(WorldPos { x: 0.0, z: 0.0 }, 0.016).unwrap();
        settle();
    }

    let stats = world.stats();
    assert_eq!(stats.chunks_loaded, 13, "disk of radius 2 holds exactly 13 chunks");
    assert_eq!(
        stats.chunks_renderable, 13,
        "every in-radius chunk must have reached renderable"
    );

    world.shutdown();
}
