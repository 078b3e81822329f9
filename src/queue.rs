//! Thread-safe priority job queue (spec.md §4.3): a bounded-priority FIFO
//! of pending work, pauseable and stoppable, shared between the orchestrator
//! thread (which pushes) and a [`crate::worker::WorkerPool`] (which pops).
//!
//! Built on `parking_lot`'s `Mutex` + `Condvar` rather than
//! `crossbeam-channel` (which the teacher's own queues use elsewhere, e.g.
//! `WorldGenerator::finished_chunks`) because `crossbeam-channel` has no
//! priority ordering or pause semantics, both of which spec.md requires.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::chunk::JobToken;
use crate::coord::ChunkPos;
use crate::error::WorldError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JobKind {
    Generation,
    Meshing,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Job {
    pub kind: JobKind,
    pub pos: ChunkPos,
    pub job_token: JobToken,
    pub priority: i64,
}

/// Wraps a [`Job`] with an insertion sequence number so jobs that tie on
/// priority are served in the order they were pushed, and orders by
/// priority ascending (lower number = higher priority, per spec.md §4.3)
/// even though [`BinaryHeap`] is a max-heap.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct QueuedJob {
    job: Job,
    sequence: u64,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap pops the greatest element, and we want the
        // smallest priority (and, among ties, the smallest sequence) first.
        other
            .job
            .priority
            .cmp(&self.job.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Returned by [`PriorityJobQueue::pop`].
pub enum Popped {
    Job(Job),
    Closed,
}

struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    paused: bool,
    stopped: bool,
    observer: ChunkPos,
}

pub struct PriorityJobQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    sequence: AtomicU64,
    /// Polled by long-running processors so they can exit early
    /// (spec.md §4.3 "Abort signal").
    abort_worker: crate::collaborators::AbortFlag,
}

impl Default for PriorityJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                paused: false,
                stopped: false,
                observer: ChunkPos::new(0, 0),
            }),
            not_empty: Condvar::new(),
            sequence: AtomicU64::new(0),
            abort_worker: crate::collaborators::AbortFlag::new(),
        }
    }

    pub fn abort_flag(&self) -> &crate::collaborators::AbortFlag {
        &self.abort_worker
    }

    /// Insert in priority order. No-ops once the queue is stopped (shutdown
    /// is strictly monotonic, spec.md §4.3); reserves heap capacity before
    /// inserting so a failure to grow surfaces as
    /// `WorldError::AllocationFailed` (spec.md §7 class 1: "allocation
    /// failure (from registry insertion, queue push, mesh buffer growth)")
    /// instead of aborting the process.
    pub fn push(&self, job: Job) -> Result<(), WorldError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Ok(());
        }
        state
            .heap
            .try_reserve(1)
            .map_err(|_| WorldError::AllocationFailed)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        state.heap.push(QueuedJob { job, sequence });
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until a job is available, or the queue is stopped. While
    /// paused, blocks even if jobs are queued (spec.md §4.3).
    pub fn pop(&self) -> Popped {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Popped::Closed;
            }
            if !state.paused {
                if let Some(queued) = state.heap.pop() {
                    return Popped::Job(queued.job);
                }
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        state.paused = paused;
        drop(state);
        // Wake every waiter: on pause they'll re-check and go back to
        // sleeping on the condvar; on unpause they can actually pop.
        self.not_empty.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Strictly monotonic: once stopped, a queue cannot be revived
    /// (spec.md §4.3 "Shutdown").
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Advise the queue that priorities should be recomputed relative to a
    /// new observer chunk. This implementation re-sorts in place using plain
    /// squared distance to the new observer (spec.md explicitly leaves the
    /// velocity-weighting component out of the queue's own re-sort: the
    /// queue has no notion of the observer's heading, only its position;
    /// velocity weighting only shapes the priority a job is *pushed* with).
    pub fn update_observer(&self, observer: ChunkPos) {
        let mut state = self.state.lock();
        state.observer = observer;
        let rescored: BinaryHeap<QueuedJob> = state
            .heap
            .drain()
            .map(|mut queued| {
                queued.job.priority = observer.distance_squared(queued.job.pos);
                queued
            })
            .collect();
        state.heap = rescored;
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn job(priority: i64) -> Job {
        Job {
            kind: JobKind::Generation,
            pos: ChunkPos::new(0, 0),
            job_token: JobToken(0),
            priority,
        }
    }

    #[test]
    fn pops_lowest_priority_first() {
        let queue = PriorityJobQueue::new();
        queue.push(job(5)).unwrap();
        queue.push(job(1)).unwrap();
        queue.push(job(3)).unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            match queue.pop() {
                Popped::Job(j) => order.push(j.priority),
                Popped::Closed => panic!("unexpected close"),
            }
        }
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let queue = PriorityJobQueue::new();
        for kind_pos in 0..3 {
            queue
                .push(Job {
                    kind: JobKind::Generation,
                    pos: ChunkPos::new(kind_pos, 0),
                    job_token: JobToken(0),
                    priority: 1,
                })
                .unwrap();
        }
        let mut order = Vec::new();
        for _ in 0..3 {
            if let Popped::Job(j) = queue.pop() {
                order.push(j.pos.cx);
            }
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn stop_wakes_blocked_popper_with_closed() {
        let queue = Arc::new(PriorityJobQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.pop(), Popped::Closed))
        };
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(popper.join().unwrap());
    }

    #[test]
    fn paused_queue_blocks_pop_even_with_jobs_present() {
        let queue = Arc::new(PriorityJobQueue::new());
        queue.push(job(1)).unwrap();
        queue.set_paused(true);

        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!popper.is_finished());

        queue.set_paused(false);
        let popped = popper.join().unwrap();
        assert!(matches!(popped, Popped::Job(_)));
    }

    #[test]
    fn stop_is_monotonic() {
        let queue = PriorityJobQueue::new();
        queue.stop();
        queue.set_paused(false);
        queue.push(job(1)).unwrap();
        assert_eq!(queue.len(), 0, "push after stop must be a no-op");
        assert!(matches!(queue.pop(), Popped::Closed));
    }

    #[test]
    fn update_observer_resorts_by_new_distance() {
        let queue = PriorityJobQueue::new();
        queue
            .push(Job {
                kind: JobKind::Generation,
                pos: ChunkPos::new(10, 0),
                job_token: JobToken(0),
                priority: 0,
            })
            .unwrap();
        queue
            .push(Job {
                kind: JobKind::Generation,
                pos: ChunkPos::new(1, 0),
                job_token: JobToken(0),
                priority: 1000,
            })
            .unwrap();

        queue.update_observer(ChunkPos::new(0, 0));

        if let Popped::Job(j) = queue.pop() {
            assert_eq!(j.pos.cx, 1);
        } else {
            panic!("expected a job");
        }
    }
}
