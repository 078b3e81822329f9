//! A generation job that's still running when the observer teleports far
//! away must never corrupt state or panic, whether it resolves by the
//! record being reclaimed by a later eviction pass or by the in-flight job
//! finishing and handing control back to the orchestrator normally.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use chunk_streamer::collaborators::{
    AbortFlag, CountingMeshBuilder, DeterministicTerrain, RecordingBackend, TerrainGenerator,
};
use chunk_streamer::coord::ChunkPos;
use chunk_streamer::prelude::*;
use chunk_streamer::velocity::WorldPos;
use chunk_streamer::voxel::VoxelGrid;

/// Wraps a real generator but blocks indefinitely on `gate` the first time
/// it's asked to generate `target`, signalling `entered` right before it
/// starts waiting so the test can deterministically know the worker is
/// parked inside the call rather than guessing with a sleep.
struct GatedGenerator {
    inner: DeterministicTerrain,
    target: ChunkPos,
    entered: Arc<(Mutex<bool>, Condvar)>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl TerrainGenerator for GatedGenerator {
    fn generate(&self, cx: i32, cz: i32, voxels: &mut VoxelGrid, abort: &AbortFlag) {
        if ChunkPos::new(cx, cz) == self.target {
            {
                let (lock, cvar) = &*self.entered;
                let mut started = lock.lock();
                *started = true;
                cvar.notify_all();
            }
            let (lock, cvar) = &*self.gate;
            let mut released = lock.lock();
            while !*released {
                cvar.wait(&mut released);
            }
        }
        self.inner.generate(cx, cz, voxels, abort);
    }
}

fn wait_for(flag: &Arc<(Mutex<bool>, Condvar)>, timeout: Duration) -> bool {
    let (lock, cvar) = &**flag;
    let mut guard = lock.lock();
    if *guard {
        return true;
    }
    let result = cvar.wait_for(&mut guard, timeout);
    *guard || !result.timed_out()
}

#[test]
fn teleporting_away_mid_generation_never_panics_or_corrupts_state() {
    let entered = Arc::new((Mutex::new(false), Condvar::new()));
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let target = ChunkPos::new(0, 0);

    let generator = GatedGenerator {
        inner: DeterministicTerrain::new(64, BlockType(1)),
        target,
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    };

    let world = World::new(
        2,
        Arc::new(generator),
        Arc::new(CountingMeshBuilder),
        Arc::new(RecordingBackend::default()),
        1, // single generation worker: the gated chunk monopolizes it
        1,
    );

    world.update(WorldPos { x: 0.0, z: 0.0 }, 0.016).unwrap();
    assert!(
        wait_for(&entered, Duration::from_secs(2)),
        "worker should have entered the gated generate() call"
    );

    // Teleport far away while the worker is still parked inside generate().
    world.update(WorldPos { x: 16_000.0, z: 16_000.0 }, 0.016).unwrap();
    for _ in 0..10 {
        world.update(WorldPos { x: 16_000.0, z: 16_000.0 }, 0.016).unwrap();
    }

    {
        let (lock, cvar) = &*gate;
        let mut released = lock.lock();
        *released = true;
        cvar.notify_all();
    }

    // Give the unblocked worker and a few more ticks time to settle into a
    // consistent final state, however that resolves.
    std::thread::sleep(Duration::from_millis(200));
    for _ in 0..5 {
        world.update(WorldPos { x: 16_000.0, z: 16_000.0 }, 0.016).unwrap();
        std::thread::sleep(Duration::from_millis(100));
    }

    match world.registry().get(target) {
        None => {} // reclaimed by eviction: acceptable.
        Some(record) => {
            let state = record.state().load();
            assert_ne!(
                state,
                ChunkState::Generating,
                "chunk should not be left stuck mid-generation"
            );
        }
    }

    world.shutdown();
}
