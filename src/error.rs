//! Error taxonomy (spec.md §7). Allocation failure is the only class that
//! propagates to the caller of [`crate::world::World::update`]/`set_block`;
//! backend failures, mesh-build failures, stale jobs, and aborts are handled
//! in place by workers and are never surfaced as `Err` (they are logged via
//! `log::warn!`/`log::error!` instead, matching how `notcraft-common`'s own
//! `world::mod::generate_world` logs and recovers rather than bubbling
//! per-chunk failures up through an ECS system's `Result`).

use thiserror::Error;

/// Returned by [`crate::world::World::update`] and
/// [`crate::world::World::set_block`] when the orchestrator thread can't
/// grow the registry or a job queue to accommodate new work. Every other
/// error class in spec.md §7 (backend failure, mesh-build failure, stale
/// job, abort, logic violation) is handled in place by workers and never
/// surfaced here.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("failed to allocate memory for the chunk streaming pipeline")]
    AllocationFailed,
}
