//! A moving observer: the working set follows the observer's chunk, and
//! chunks left behind past the unload buffer get evicted.

use std::sync::Arc;
use std::time::Duration;

use chunk_streamer::collaborators::{CountingMeshBuilder, DeterministicTerrain, RecordingBackend};
use chunk_streamer::coord::ChunkPos;
use chunk_streamer::prelude::*;
use chunk_streamer::velocity::WorldPos;

fn settle() {
    std::thread::sleep(Duration::from_millis(120));
}

#[test]
fn walking_along_x_tracks_the_observer_and_evicts_the_trail() {
    const RENDER_DISTANCE: i32 = 2;
    const EVICTION_BUFFER: i32 = 2;

    let world = World::new(
        RENDER_DISTANCE,
        Arc::new(DeterministicTerrain::new(64, BlockType(1))),
        Arc::new(CountingMeshBuilder),
        Arc::new(RecordingBackend::default()),
        3,
        2,
    );

    // Walk 8 blocks/sec along +x for 10 one-second ticks: ends exactly five
    // chunks over (16 blocks/chunk), at a speed safely above the velocity
    // tracker's "heading known" threshold.
    let mut pos = WorldPos { x: 0.0, z: 0.0 };
    for _ in 0..10 {
        pos.x += 8.0;
        world.update(pos, 1.0).unwrap();
        settle();
    }
    // Let the trailing edge finish evicting and the leading edge finish
    // rendering at the final position.
    for _ in 0..3 {
        world.update(pos, 1.0).unwrap();
        settle();
    }

    let final_chunk = ChunkPos::new(5, 0);
    assert_eq!(final_chunk, ChunkPos::new((pos.x / 16.0).floor() as i32, 0));

    let registry = world.registry();
    for dx in -RENDER_DISTANCE..=RENDER_DISTANCE {
        for dz in -RENDER_DISTANCE..=RENDER_DISTANCE {
            let candidate = ChunkPos::new(final_chunk.cx + dx, final_chunk.cz + dz);
            if final_chunk.distance_squared(candidate) > (RENDER_DISTANCE as i64).pow(2) {
                continue;
            }
            let record = registry.get(candidate).unwrap_or_else(|| {
                panic!("expected {candidate:?} to be loaded near the final observer position")
            });
            assert_eq!(
                record.state().load(),
                ChunkState::Renderable,
                "{candidate:?} should have reached renderable"
            );
        }
    }

    let evict_threshold = (RENDER_DISTANCE + EVICTION_BUFFER) as i64;
    for record in registry.snapshot() {
        let distance = record.pos().distance_squared(final_chunk);
        assert!(
            distance <= evict_threshold * evict_threshold,
            "chunk {:?} at distance^2 {distance} from {final_chunk:?} should have been evicted",
            record.pos(),
        );
    }

    world.shutdown();
}
