// SPDX-License-Identifier: Apache-2.0

//! The per-worker main loop: select a runnable leaf, run its task, record
//! the outcome, repeat.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pflow_graph::Pipeline;

use crate::resource::Usage;
use crate::scheduler::Scheduler;
use crate::task::TaskTable;

/// The largest worker id a `Worker` may be constructed with, matching the
/// module-side `parent_tasks`/`children_overload` bookkeeping's assumption
/// of a small, stable worker count.
pub const MAX_WORKERS: u8 = 64;

/// A source of wall-clock nanoseconds, abstracted so tests can drive the
/// worker loop without real time passing.
pub trait Clock: Send {
    fn now_ns(&self) -> u64;
}

/// The default [`Clock`], backed by [`std::time::Instant`].
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// One worker: a CPU affinity, a clock, a cycle counter snapshot, and its
/// own `Scheduler`. Does not own the `Pipeline` or `TaskTable` it runs
/// against -- those are shared state whose mutation is coordinated
/// externally by pausing all workers.
pub struct Worker {
    id: u8,
    numa_node: u8,
    scheduler: Scheduler,
    clock: Box<dyn Clock>,
    cycles: AtomicU64,
    stop: Arc<AtomicBool>,
}

impl Worker {
    /// Fails if `id >= MAX_WORKERS`.
    pub fn new(id: u8, numa_node: u8, clock: Box<dyn Clock>) -> Option<Self> {
        if id >= MAX_WORKERS {
            return None;
        }
        Some(Worker {
            id,
            numa_node,
            scheduler: Scheduler::new(id),
            clock,
            cycles: AtomicU64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub fn numa_node(&self) -> u8 {
        self.numa_node
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// A handle the control plane can use to request termination from
    /// another thread.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Reads the worker's cycle counter and wall-clock nanoseconds and
    /// returns them. There is no hardware cycle counter available in safe,
    /// portable Rust, so cycles are a per-worker monotonic call counter: a
    /// relative measure, good enough for `WeightedFair`/`RateLimit`
    /// bookkeeping that only ever compares two readings from the same
    /// worker.
    fn tick(&self) -> (u64, u64) {
        let cycles = self.cycles.fetch_add(1, Ordering::Relaxed);
        (cycles, self.clock.now_ns())
    }

    /// One iteration of the loop described in the framework's worker-loop
    /// design: select a leaf, run its task, record the outcome. Returns
    /// `true` if a task ran, `false` if nothing was runnable this round.
    pub fn run_once(&mut self, pipeline: &mut Pipeline, tasks: &mut TaskTable) -> bool {
        let (_cycles, now_ns) = self.tick();

        let Some(leaf) = self.scheduler.select_leaf(tasks, now_ns) else {
            return false;
        };
        let Some(task_id) = self.scheduler.get(leaf).and_then(|n| n.leaf_task()) else {
            return false;
        };
        let Some((module, arg)) = tasks.get(task_id).map(|t| (t.module(), t.arg())) else {
            return false;
        };

        let result = pipeline.run_task(module, arg).unwrap_or_else(|err| {
            tracing::warn!(worker = self.id, ?module, %err, "task run failed, treating as blocked");
            pflow_graph::TaskResult { block: true, packets: 0, bits: 0 }
        });
        let usage = Usage {
            invocations: 1,
            packets: u64::from(result.packets),
            bits: result.bits,
            cycles: 1,
        };
        self.scheduler.record_result(tasks, leaf, usage, result.block);
        true
    }

    /// Runs [`Worker::run_once`] until `should_stop`, sleeping (capped at
    /// one millisecond) when nothing is runnable rather than spinning.
    pub fn run_loop(&mut self, pipeline: &mut Pipeline, tasks: &mut TaskTable) {
        while !self.should_stop() {
            if !self.run_once(pipeline, tasks) {
                let now_ns = self.clock.now_ns();
                let wake = self.scheduler.next_wake(now_ns);
                let sleep_ns = wake.map(|w| w.saturating_sub(now_ns)).unwrap_or(1_000_000).min(1_000_000);
                if sleep_ns > 0 {
                    std::thread::sleep(std::time::Duration::from_nanos(sleep_ns));
                }
            }
        }
    }
}
