//! Fixed-size named worker thread pools (spec.md §4.4).
//!
//! The teacher's old `ChunkManager::new` (in the root `noisy`-era crate)
//! spawns a single OS thread named for what it does and drives it from an
//! `mpsc` channel; this generalizes that to a small, fixed, joinable set of
//! named threads pulling from a [`crate::queue::PriorityJobQueue`] instead
//! of `rayon::spawn`-ing one-off tasks onto a shared global pool, because
//! spec.md requires the pool to be independently sized, pausable via the
//! queue, and cleanly joinable at shutdown.
//!
//! This module only owns the threads and the pop/dispatch loop. The actual
//! per-job contract -- staleness checks, pinning, invoking the terrain
//! generator or mesh builder, unpinning -- lives in `World` (spec.md §4.1.5,
//! §4.4), since that contract needs the registry and the collaborator
//! handles the pool itself doesn't know about.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::queue::{Job, Popped, PriorityJobQueue};

/// A fixed set of named threads pulling jobs from a shared queue and
/// dispatching each one to `process`. Threads exit once the queue is
/// stopped and [`Popped::Closed`] is returned.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` threads named `"{name_prefix}-{n}"`, each looping on
    /// `queue.pop()` and calling `process` for every job it receives.
    pub fn spawn<F>(name_prefix: &str, count: usize, queue: Arc<PriorityJobQueue>, process: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        let process = Arc::new(process);
        let handles = (0..count)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let process = Arc::clone(&process);
                let name = format!("{name_prefix}-{index}");
                thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || loop {
                        match queue.pop() {
                            Popped::Job(job) => process(job),
                            Popped::Closed => break,
                        }
                    })
                    .unwrap_or_else(|err| panic!("failed to spawn worker thread {name}: {err}"))
            })
            .collect();
        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Join every worker thread. Callers must have already stopped the
    /// queue this pool reads from, or this blocks forever.
    pub fn join(self) {
        for handle in self.handles {
            if let Err(payload) = handle.join() {
                log::error!("chunk worker thread panicked: {payload:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::JobToken;
    use crate::coord::ChunkPos;
    use crate::queue::JobKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn spawned_threads_process_pushed_jobs_then_join_on_stop() {
        let queue = Arc::new(PriorityJobQueue::new());
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);

        let pool = WorkerPool::spawn("test-worker", 2, Arc::clone(&queue), move |_job| {
            counter.fetch_add(1, Ordering::AcqRel);
        });
        assert_eq!(pool.worker_count(), 2);

        for _ in 0..5 {
            queue
                .push(Job {
                    kind: JobKind::Generation,
                    pos: ChunkPos::new(0, 0),
                    job_token: JobToken(0),
                    priority: 0,
                })
                .unwrap();
        }

        // Give the pool a moment to drain, then shut down and join.
        thread::sleep(Duration::from_millis(50));
        queue.stop();
        pool.join();

        assert_eq!(processed.load(Ordering::Acquire), 5);
    }
}
