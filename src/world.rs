//! The orchestrator (spec.md §4.1): ties the registry, the two priority job
//! queues, their worker pools, and the render backend together behind a
//! single `update`/`render` frame loop.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::{ChunkRecord, ChunkState, PinExt, PinGuard};
use crate::collaborators::{MeshBuilder, RenderBackend, RenderPass, TerrainGenerator};
use crate::coord::ChunkPos;
use crate::error::WorldError;
use crate::queue::{Job, JobKind, PriorityJobQueue};
use crate::registry::ChunkRegistry;
use crate::stats::{StatsCounters, WorldStats};
use crate::util::floor_div;
use crate::velocity::{VelocityTracker, WorldPos};
use crate::voxel::{BlockType, Neighbors, VoxelIndex, CHUNK_HEIGHT, CHUNK_WIDTH};
use crate::worker::WorkerPool;

/// How many chunks beyond `render_distance` a chunk must drift before it
/// becomes eligible for eviction (spec.md §4.1.1 step 4's "R+B" hysteresis
/// band, which keeps a chunk that oscillates across the boundary from being
/// evicted and immediately regenerated every tick).
const DEFAULT_EVICTION_BUFFER: i32 = 2;

/// Upper bound on GPU uploads performed per `update` call, so a burst of
/// newly-meshed chunks can't stall the orchestrator thread behind the
/// backend (spec.md §4.1.1 step 3).
const MAX_UPLOADS_PER_TICK: usize = 4;

/// Shared, lock-free home for "where is the observer right now", read by
/// worker threads performing the staleness check (spec.md §4.4 step 2) and
/// written once per `update` call by the orchestrator.
struct ObserverChunk {
    cx: AtomicI32,
    cz: AtomicI32,
}

impl ObserverChunk {
    fn new() -> Self {
        Self {
            cx: AtomicI32::new(0),
            cz: AtomicI32::new(0),
        }
    }

    fn set(&self, pos: ChunkPos) {
        self.cx.store(pos.cx, Ordering::Release);
        self.cz.store(pos.cz, Ordering::Release);
    }

    fn get(&self) -> ChunkPos {
        ChunkPos::new(self.cx.load(Ordering::Acquire), self.cz.load(Ordering::Acquire))
    }
}

/// A chunk is stale for a worker to act on if it has drifted more than this
/// many chunks past the render radius since its job was queued (spec.md
/// §4.4 step 2: "reject work for chunks that have fallen far out of
/// range").
fn is_stale_for_distance(pos: ChunkPos, observer: ChunkPos, render_distance: i32, eviction_buffer: i32) -> bool {
    let threshold = (render_distance + eviction_buffer) as i64;
    pos.distance_squared(observer) > threshold * threshold
}

pub struct World {
    registry: Arc<ChunkRegistry>,
    render_distance: i32,
    eviction_buffer: i32,
    observer_chunk: Arc<ObserverChunk>,
    velocity: Mutex<VelocityTracker>,
    gen_queue: Arc<PriorityJobQueue>,
    mesh_queue: Arc<PriorityJobQueue>,
    gen_pool: Option<WorkerPool>,
    mesh_pool: Option<WorkerPool>,
    backend: Arc<dyn RenderBackend>,
    paused: AtomicBool,
    stats: StatsCounters,
}

impl World {
    /// Build a world with `gen_workers` generation threads and `mesh_workers`
    /// meshing threads (spec.md §4.4's "2-4" / "2-3" guidance left as caller
    /// choice rather than a hardcoded constant, since the right count is a
    /// deployment concern, not a core one).
    pub fn new(
        render_distance: i32,
        generator: Arc<dyn TerrainGenerator>,
        mesh_builder: Arc<dyn MeshBuilder>,
        backend: Arc<dyn RenderBackend>,
        gen_workers: usize,
        mesh_workers: usize,
    ) -> Self {
        let registry = Arc::new(ChunkRegistry::new());
        let gen_queue = Arc::new(PriorityJobQueue::new());
        let mesh_queue = Arc::new(PriorityJobQueue::new());
        let observer_chunk = Arc::new(ObserverChunk::new());

        let gen_pool = {
            let registry = Arc::clone(&registry);
            let generator = Arc::clone(&generator);
            let observer_chunk = Arc::clone(&observer_chunk);
            let abort = gen_queue.abort_flag().clone();
            WorkerPool::spawn("chunk-gen", gen_workers.max(1), Arc::clone(&gen_queue), move |job| {
                process_generation_job(
                    &registry,
                    generator.as_ref(),
                    &observer_chunk,
                    render_distance,
                    DEFAULT_EVICTION_BUFFER,
                    &abort,
                    job,
                );
            })
        };

        let mesh_pool = {
            let registry = Arc::clone(&registry);
            let mesh_builder = Arc::clone(&mesh_builder);
            let observer_chunk = Arc::clone(&observer_chunk);
            WorkerPool::spawn("chunk-mesh", mesh_workers.max(1), Arc::clone(&mesh_queue), move |job| {
                process_meshing_job(
                    &registry,
                    mesh_builder.as_ref(),
                    &observer_chunk,
                    render_distance,
                    DEFAULT_EVICTION_BUFFER,
                    job,
                );
            })
        };

        Self {
            registry,
            render_distance,
            eviction_buffer: DEFAULT_EVICTION_BUFFER,
            observer_chunk,
            velocity: Mutex::new(VelocityTracker::new()),
            gen_queue,
            mesh_queue,
            gen_pool: Some(gen_pool),
            mesh_pool: Some(mesh_pool),
            backend,
            paused: AtomicBool::new(false),
            stats: StatsCounters::new(),
        }
    }

    fn observer_chunk_of(&self, pos: WorldPos) -> ChunkPos {
        ChunkPos::new(
            floor_div(pos.x as i32, CHUNK_WIDTH as i32),
            floor_div(pos.z as i32, CHUNK_WIDTH as i32),
        )
    }

    /// One frame's worth of bookkeeping (spec.md §4.1.1): reconsider the
    /// neighborhood, promote generated chunks into meshing, drain a bounded
    /// number of uploads, and evict chunks that fell far enough out of
    /// range. No-ops (besides tracking velocity) while paused.
    ///
    /// Returns `Err` if the registry or a job queue couldn't grow to
    /// accommodate new work (spec.md §7 class 1); the tick may then be left
    /// partially advanced, but every invariant still holds, and the next
    /// `update` picks up wherever this one stopped.
    pub fn update(&self, observer_pos: WorldPos, dt: f32) -> Result<(), WorldError> {
        let observer = self.observer_chunk_of(observer_pos);
        self.velocity.lock().update(observer_pos, dt);

        self.observer_chunk.set(observer);
        self.gen_queue.update_observer(observer);
        self.mesh_queue.update_observer(observer);

        if self.paused.load(Ordering::Acquire) {
            return Ok(());
        }

        self.reconsider_neighborhood(observer)?;
        self.promote_generated_to_meshing()?;
        self.drain_uploads();
        self.evict(observer);
        self.refresh_registry_stats();
        Ok(())
    }

    fn reconsider_neighborhood(&self, observer: ChunkPos) -> Result<(), WorldError> {
        for pos in observer.disk(self.render_distance) {
            let record = self.registry.get_or_create(pos)?;
            if record.state().compare_exchange(ChunkState::Missing, ChunkState::Generating) {
                let delta_cx = pos.cx - observer.cx;
                let delta_cz = pos.cz - observer.cz;
                let weight = self.velocity.lock().weight(delta_cx, delta_cz);
                let base = observer.distance_squared(pos);
                let priority = (base as f32 * weight) as i64;
                self.gen_queue.push(Job {
                    kind: JobKind::Generation,
                    pos,
                    job_token: record.token(),
                    priority,
                })?;
            }
        }
        Ok(())
    }

    /// spec.md §4.1.1 step 2: "transition to meshing, enqueue a meshing job
    /// with velocity-weighted priority" -- the same `d2 * velocity_weight`
    /// rule §4.3 states applies to both queues, so this mirrors
    /// `reconsider_neighborhood`'s generation-side weighting rather than
    /// using a plain squared distance.
    fn promote_generated_to_meshing(&self) -> Result<(), WorldError> {
        let observer = self.observer_chunk.get();
        for record in self.registry.snapshot() {
            if !record.is_dirty() {
                continue;
            }
            let promoted = record.state().compare_exchange(ChunkState::Generated, ChunkState::Meshing)
                || record.state().compare_exchange(ChunkState::Renderable, ChunkState::Meshing);
            if promoted {
                let pos = record.pos();
                let delta_cx = pos.cx - observer.cx;
                let delta_cz = pos.cz - observer.cz;
                let weight = self.velocity.lock().weight(delta_cx, delta_cz);
                let base = observer.distance_squared(pos);
                let priority = (base as f32 * weight) as i64;
                self.mesh_queue.push(Job {
                    kind: JobKind::Meshing,
                    pos,
                    job_token: record.token(),
                    priority,
                })?;
            }
        }
        Ok(())
    }

    fn drain_uploads(&self) {
        let mut uploaded = 0usize;
        for record in self.registry.snapshot() {
            if uploaded >= MAX_UPLOADS_PER_TICK {
                break;
            }
            if !record.state().compare_exchange(ChunkState::MeshReady, ChunkState::Uploading) {
                continue;
            }
            let _pin = record.pin();
            let mut mesh = record.mesh.lock();
            match self.backend.upload(&mut mesh) {
                Ok(()) => {
                    drop(mesh);
                    let transitioned = record.state().compare_exchange(ChunkState::Uploading, ChunkState::Renderable);
                    debug_assert!(transitioned, "nothing else transitions out of Uploading");
                }
                Err(err) => {
                    log::warn!("upload failed for chunk ({}, {}): {err}", record.cx, record.cz);
                    drop(mesh);
                    record.set_dirty(true);
                    let reverted = record.state().compare_exchange(ChunkState::Uploading, ChunkState::Generated);
                    debug_assert!(reverted, "nothing else transitions out of Uploading");
                }
            }
            uploaded += 1;
        }
    }

    fn evict(&self, observer: ChunkPos) {
        let threshold = (self.render_distance + self.eviction_buffer) as i64;
        let threshold_sq = threshold * threshold;
        let evicted = self.registry.evict_if(|record| {
            record.is_unpinned()
                && !record.state().load().blocks_eviction()
                && record.pos().distance_squared(observer) > threshold_sq
        });
        for record in evicted {
            let mut mesh = record.mesh.lock();
            if mesh.gpu_handle.is_some() {
                self.backend.release(&mut mesh);
            }
        }
    }

    fn refresh_registry_stats(&self) {
        let snapshot = self.registry.snapshot();
        let mut generating = 0u32;
        let mut meshing = 0u32;
        let mut renderable = 0u32;
        for record in &snapshot {
            match record.state().load() {
                ChunkState::Generating => generating += 1,
                ChunkState::Meshing => meshing += 1,
                ChunkState::Renderable => renderable += 1,
                _ => {}
            }
        }
        self.stats
            .set_registry_counts(snapshot.len() as u32, generating, meshing, renderable);
    }

    /// Draw every renderable, frustum-visible chunk: one pass for opaque
    /// geometry, one for translucent, matching the two-phase draw order
    /// spec.md §4.1.3 calls out for correct blending (spec.md leaves the
    /// renderer itself out of scope, but the orchestrator still needs to
    /// decide which mesh slots are worth handing to it).
    pub fn render(&self, view_proj: glam::Mat4, observer_pos: WorldPos) {
        let _ = observer_pos;
        let frustum = Frustum::from_view_proj(view_proj);

        let mut total = 0u32;
        let mut rendered = 0u32;
        let mut culled = 0u32;
        let mut vertices = 0u64;

        let mut visible = Vec::new();
        for record in self.registry.snapshot() {
            if record.state().load() != ChunkState::Renderable {
                continue;
            }
            total += 1;
            if frustum.intersects_chunk(record.pos()) {
                rendered += 1;
                visible.push(record);
            } else {
                culled += 1;
            }
        }

        for record in &visible {
            let mesh = record.mesh.lock();
            vertices += mesh.vertex_count as u64;
            self.backend.draw(&mesh, RenderPass::Opaque);
        }
        for record in &visible {
            let mesh = record.mesh.lock();
            self.backend.draw(&mesh, RenderPass::Translucent);
        }

        self.stats.set_frame_counts(total, rendered, culled, vertices);
    }

    /// Freeze the pipeline: queues stop handing out work and any chunk
    /// mid-flight gets reset to the state before it was reserved (spec.md
    /// §4.1.2). Workers that are already running a job finish it; they just
    /// won't be handed a new one until `resume`.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.gen_queue.set_paused(true);
        self.mesh_queue.set_paused(true);
        self.registry.reset_in_flight_states();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.gen_queue.set_paused(false);
        self.mesh_queue.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn voxel_coords(world_x: i32, world_y: i32, world_z: i32) -> (ChunkPos, VoxelIndex) {
        let cx = floor_div(world_x, CHUNK_WIDTH as i32);
        let cz = floor_div(world_z, CHUNK_WIDTH as i32);
        let local_x = crate::util::floor_mod(world_x, CHUNK_WIDTH as i32) as usize;
        let local_z = crate::util::floor_mod(world_z, CHUNK_WIDTH as i32) as usize;
        (
            ChunkPos::new(cx, cz),
            VoxelIndex {
                x: local_x,
                y: world_y.clamp(0, CHUNK_HEIGHT as i32 - 1) as usize,
                z: local_z,
            },
        )
    }

    /// Returns `BlockType::AIR` for any chunk not currently loaded, rather
    /// than forcing a load -- reads must not have side effects (spec.md §6).
    pub fn get_block(&self, world_x: i32, world_y: i32, world_z: i32) -> BlockType {
        let (chunk_pos, index) = Self::voxel_coords(world_x, world_y, world_z);
        match self.registry.get(chunk_pos) {
            Some(record) => record.voxels.read().get(index),
            None => BlockType::AIR,
        }
    }

    /// Writes always succeed by creating the chunk if it doesn't exist yet
    /// (spec.md §6). Marks the edited chunk dirty, and -- since the mesh
    /// builder reads across chunk boundaries -- also marks any neighbor
    /// whose mesh depends on the edited voxel (spec.md §4.5's propagation
    /// rule extended to direct edits, not just generation completing).
    ///
    /// Returns `Err` if the registry couldn't grow to hold a newly-created
    /// chunk (spec.md §7 class 1).
    pub fn set_block(
        &self,
        world_x: i32,
        world_y: i32,
        world_z: i32,
        block: BlockType,
    ) -> Result<(), WorldError> {
        let (chunk_pos, index) = Self::voxel_coords(world_x, world_y, world_z);
        let record = self.registry.get_or_create(chunk_pos)?;
        record.voxels.write().set(index, block);
        record.set_dirty(true);

        let mut boundary_neighbors = Vec::new();
        if index.x == 0 {
            boundary_neighbors.push(ChunkPos::new(chunk_pos.cx - 1, chunk_pos.cz));
        } else if index.x == CHUNK_WIDTH - 1 {
            boundary_neighbors.push(ChunkPos::new(chunk_pos.cx + 1, chunk_pos.cz));
        }
        if index.z == 0 {
            boundary_neighbors.push(ChunkPos::new(chunk_pos.cx, chunk_pos.cz - 1));
        } else if index.z == CHUNK_WIDTH - 1 {
            boundary_neighbors.push(ChunkPos::new(chunk_pos.cx, chunk_pos.cz + 1));
        }
        for neighbor_pos in boundary_neighbors {
            if let Some(neighbor) = self.registry.get(neighbor_pos) {
                neighbor.set_dirty(true);
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> WorldStats {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    /// Stop both queues, join their worker pools, and wait for the backend
    /// to retire in-flight GPU work. Consumes `self` so no caller can reach
    /// a `World` mid-teardown.
    pub fn shutdown(mut self) {
        self.gen_queue.stop();
        self.mesh_queue.stop();
        if let Some(pool) = self.gen_pool.take() {
            pool.join();
        }
        if let Some(pool) = self.mesh_pool.take() {
            pool.join();
        }
        self.backend.wait_idle();
    }
}

/// Per-job contract for the generation worker pool (spec.md §4.4): look the
/// record up fresh (never trust the job payload beyond the position and
/// token) and pin it while the lookup's shared lock is still held
/// (`get_and_pin`, spec.md §4.2/§4.4 step 3), bail out silently on any
/// staleness signal, generate, then publish the new state -- unpinning
/// happens automatically via `PinGuard` on every return path.
fn process_generation_job(
    registry: &ChunkRegistry,
    generator: &dyn TerrainGenerator,
    observer_chunk: &ObserverChunk,
    render_distance: i32,
    eviction_buffer: i32,
    abort: &crate::collaborators::AbortFlag,
    job: Job,
) {
    let Some((record, _pin)) = registry.get_and_pin(job.pos) else {
        return;
    };

    if record.token() != job.job_token {
        return;
    }
    if record.state().load() != ChunkState::Generating {
        return;
    }
    if is_stale_for_distance(job.pos, observer_chunk.get(), render_distance, eviction_buffer) {
        record.state().compare_exchange(ChunkState::Generating, ChunkState::Missing);
        return;
    }

    abort.clear();
    {
        let mut voxels = record.voxels.write();
        generator.generate(job.pos.cx, job.pos.cz, &mut voxels, abort);
    }

    if abort.is_set() {
        record.state().compare_exchange(ChunkState::Generating, ChunkState::Missing);
        return;
    }

    record.set_dirty(true);
    record.state().compare_exchange(ChunkState::Generating, ChunkState::Generated);
    propagate_neighbor_remesh(registry, job.pos);
}

/// spec.md §4.5: the four planar neighbors' meshes assumed "air" at the
/// boundary this chunk just generated, so they need remeshing. A neighbor
/// already `Renderable` is demoted straight to `Generated` so the next tick
/// re-meshes it; a neighbor mid-pipeline (`Meshing`/`MeshReady`/`Uploading`)
/// is only marked dirty, since the tick loop demotes dirty `Renderable`
/// chunks back to `Generated` itself (spec.md §4.1.1 step 2) once that
/// neighbor finishes the stage it's already in. A neighbor that is
/// `Missing`/`Generating` needs no action: it will pick up fresh boundary
/// data naturally once it reaches meshing.
fn propagate_neighbor_remesh(registry: &ChunkRegistry, pos: ChunkPos) {
    for neighbor_pos in pos.planar_neighbors() {
        let Some(neighbor) = registry.get(neighbor_pos) else {
            continue;
        };
        match neighbor.state().load() {
            ChunkState::Renderable => {
                // Demoting alone isn't enough: `promote_generated_to_meshing`
                // only re-promotes a `Generated` record when it's dirty, so
                // this has to set both together or the neighbor would sit in
                // `Generated` forever without ever being re-meshed.
                neighbor.set_dirty(true);
                neighbor.state().compare_exchange(ChunkState::Renderable, ChunkState::Generated);
            }
            ChunkState::MeshReady | ChunkState::Uploading | ChunkState::Meshing => {
                neighbor.set_dirty(true);
            }
            _ => {}
        }
    }
}

/// Per-job contract for the meshing worker pool: pin this record and every
/// existing planar neighbor -- each via `get_and_pin`, so the pin lands while
/// the lookup's shared lock is still held -- before touching any of their
/// voxel data, so an eviction pass running concurrently can't free memory out
/// from under the mesh builder (spec.md §4.2, §4.4).
fn process_meshing_job(
    registry: &ChunkRegistry,
    mesh_builder: &dyn MeshBuilder,
    observer_chunk: &ObserverChunk,
    render_distance: i32,
    eviction_buffer: i32,
    job: Job,
) {
    let Some((record, _pin)) = registry.get_and_pin(job.pos) else {
        return;
    };

    if record.token() != job.job_token {
        return;
    }
    if record.state().load() != ChunkState::Meshing {
        return;
    }
    if is_stale_for_distance(job.pos, observer_chunk.get(), render_distance, eviction_buffer) {
        record.state().compare_exchange(ChunkState::Meshing, ChunkState::Generated);
        return;
    }

    let neighbor_positions = job.pos.planar_neighbors();
    // Keep each neighbor's `Arc` and `PinGuard` alive together for the whole
    // build call, so the pin can't be dropped while its read guard survives.
    let neighbor_entries: Vec<Option<(Arc<ChunkRecord>, PinGuard)>> = neighbor_positions
        .iter()
        .map(|&pos| registry.get_and_pin(pos))
        .collect();
    let neighbor_guards: Vec<Option<parking_lot::RwLockReadGuard<'_, crate::voxel::VoxelGrid>>> = neighbor_entries
        .iter()
        .map(|slot| slot.as_ref().map(|(r, _)| r.voxels.read()))
        .collect();

    let neighbors = Neighbors {
        pos_x: neighbor_guards[0].as_deref(),
        neg_x: neighbor_guards[1].as_deref(),
        pos_z: neighbor_guards[2].as_deref(),
        neg_z: neighbor_guards[3].as_deref(),
    };

    let self_voxels = record.voxels.read();
    let mut mesh = record.mesh.lock();
    mesh_builder.build(&mut mesh, &self_voxels, neighbors);
    drop(mesh);
    drop(self_voxels);
    drop(neighbor_guards);

    record.set_dirty(false);
    record.state().compare_exchange(ChunkState::Meshing, ChunkState::MeshReady);
}

/// View-frustum planes extracted from a combined view-projection matrix
/// (Gribb/Hartmann method), used to cull whole chunk columns before handing
/// them to the render backend. Frustum culling and the math behind it are
/// squarely an "ambient" rendering concern the distilled pipeline spec
/// doesn't dictate the internals of, but a real per-frame render step always
/// has one.
struct Frustum {
    planes: [glam::Vec4; 6],
}

impl Frustum {
    fn from_view_proj(m: glam::Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let planes = [
            (rows[3] + rows[0]).normalize(),
            (rows[3] - rows[0]).normalize(),
            (rows[3] + rows[1]).normalize(),
            (rows[3] - rows[1]).normalize(),
            (rows[3] + rows[2]).normalize(),
            (rows[3] - rows[2]).normalize(),
        ];
        Self { planes }
    }

    /// Conservative AABB-vs-frustum test against the chunk's full-height
    /// bounding box. A chunk is culled only if it lies entirely on the
    /// outside of some plane.
    fn intersects_chunk(&self, pos: ChunkPos) -> bool {
        let min = glam::Vec3::new(
            (pos.cx * CHUNK_WIDTH as i32) as f32,
            0.0,
            (pos.cz * CHUNK_WIDTH as i32) as f32,
        );
        let max = min + glam::Vec3::new(CHUNK_WIDTH as f32, CHUNK_HEIGHT as f32, CHUNK_WIDTH as f32);

        for plane in &self.planes {
            let normal = glam::Vec3::new(plane.x, plane.y, plane.z);
            let positive = glam::Vec3::new(
                if normal.x >= 0.0 { max.x } else { min.x },
                if normal.y >= 0.0 { max.y } else { min.y },
                if normal.z >= 0.0 { max.z } else { min.z },
            );
            if normal.dot(positive) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}
