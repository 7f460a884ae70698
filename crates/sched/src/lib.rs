// SPDX-License-Identifier: Apache-2.0

//! Task-graph maintenance and the class-based scheduler that picks which
//! task each worker runs next.
//!
//! A [`Scheduler`] is one worker's tree of [`TrafficClass`] nodes; leaves
//! own [`Task`]s drawn from a shared [`TaskTable`]. [`task_graph`] derives
//! each module's `parent_tasks` set from the pipeline graph and pushes it
//! into [`pflow_graph::Pipeline`] so backpressure signalling has somewhere
//! to propagate to; [`placement`] checks that a proposed worker assignment
//! respects every module's `max_allowed_workers` and NUMA constraint.

mod error;
mod ids;
mod placement;
mod resource;
mod scheduler;
mod task;
mod task_graph;
mod traffic_class;
mod worker;

pub use error::Error;
pub use ids::{TaskId, TcId};
pub use placement::validate_worker_placement;
pub use resource::{Resource, Usage};
pub use scheduler::{ChildWeight, Scheduler};
pub use task::{Task, TaskTable};
pub use task_graph::update_task_graph;
pub use traffic_class::TrafficClass;
pub use worker::{Clock, SystemClock, Worker, MAX_WORKERS};

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_batch::PacketBatch;
    use pflow_graph::{Module, ModuleClass, ModuleClassRegistry, ModuleContext, Pipeline, TaskResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FakeClock(Arc<AtomicU64>);
    impl Clock for FakeClock {
        fn now_ns(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    struct CountingSource {
        emitted: Arc<AtomicU64>,
        block: bool,
    }
    impl Module for CountingSource {
        fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, _batch: PacketBatch) {}
        fn run_task(&mut self, ctx: &mut ModuleContext<'_>, _arg: u64) -> TaskResult {
            self.emitted.fetch_add(1, Ordering::Relaxed);
            let mut batch = PacketBatch::new();
            batch.add(pflow_batch::Packet::new(b"x", 0));
            ctx.emit(0, batch);
            TaskResult {
                block: self.block,
                packets: 1,
                bits: 8,
            }
        }
        fn is_task(&self) -> bool {
            true
        }
    }

    struct Sink;
    impl Module for Sink {
        fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, _batch: PacketBatch) {}
    }

    fn registry(emitted: Arc<AtomicU64>, block: bool) -> ModuleClassRegistry {
        let mut r = ModuleClassRegistry::new();
        r.register(ModuleClass::new("Source", 0, 1, move || {
            Box::new(CountingSource {
                emitted: emitted.clone(),
                block,
            })
        }));
        r.register(ModuleClass::new("Sink", 1, 0, || Box::new(Sink)));
        r
    }

    #[test]
    fn priority_picks_the_highest_priority_unblocked_leaf() {
        let mut sched = Scheduler::new(0);
        let root = sched.new_priority("root");
        sched.set_root(root).unwrap();
        let low = sched.new_leaf("low");
        let high = sched.new_leaf("high");
        sched.add_child(root, low, ChildWeight::Priority(1)).unwrap();
        sched.add_child(root, high, ChildWeight::Priority(10)).unwrap();

        let mut tasks = TaskTable::new();
        // module identity is irrelevant to this selection test
        let t_low = tasks.create(pflow_graph::ModuleId::default(), 0);
        let t_high = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, low, t_low, None).unwrap();
        sched.attach_task(&mut tasks, high, t_high, None).unwrap();

        let chosen = sched.select_leaf(&tasks, 0).unwrap();
        assert_eq!(chosen, high);
    }

    #[test]
    fn round_robin_cycles_through_children() {
        let mut sched = Scheduler::new(0);
        let root = sched.new_round_robin("root");
        sched.set_root(root).unwrap();
        let mut tasks = TaskTable::new();
        let mut leaves = Vec::new();
        for _ in 0..3 {
            let leaf = sched.new_leaf("leaf");
            sched.add_child(root, leaf, ChildWeight::None).unwrap();
            let task = tasks.create(pflow_graph::ModuleId::default(), 0);
            sched.attach_task(&mut tasks, leaf, task, None).unwrap();
            leaves.push(leaf);
        }

        let mut picked = Vec::new();
        for _ in 0..6 {
            let chosen = sched.select_leaf(&tasks, 0).unwrap();
            picked.push(chosen);
            sched.record_result(&mut tasks, chosen, Usage::default(), false);
        }
        assert_eq!(picked, [leaves[0], leaves[1], leaves[2], leaves[0], leaves[1], leaves[2]]);
    }

    #[test]
    fn weighted_fair_favors_the_lower_share_child_less_often() {
        let mut sched = Scheduler::new(0);
        let root = sched.new_weighted_fair("root", Resource::Invocations);
        sched.set_root(root).unwrap();
        let mut tasks = TaskTable::new();
        let heavy = sched.new_leaf("heavy");
        let light = sched.new_leaf("light");
        sched.add_child(root, heavy, ChildWeight::Share(10)).unwrap();
        sched.add_child(root, light, ChildWeight::Share(1)).unwrap();
        let t_heavy = tasks.create(pflow_graph::ModuleId::default(), 0);
        let t_light = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, heavy, t_heavy, None).unwrap();
        sched.attach_task(&mut tasks, light, t_light, None).unwrap();

        let mut counts: HashMap<TcId, u32> = HashMap::new();
        for _ in 0..20 {
            let chosen = sched.select_leaf(&tasks, 0).unwrap();
            *counts.entry(chosen).or_default() += 1;
            // Same nominal amount of work however many of each ran, so the
            // ratio of picks tracks the ratio of shares (10:1).
            sched.record_result(&mut tasks, chosen, Usage { invocations: 10, ..Default::default() }, false);
        }
        assert!(counts.get(&heavy).copied().unwrap_or(0) > counts.get(&light).copied().unwrap_or(0));
    }

    #[test]
    fn rate_limit_blocks_once_the_bucket_is_empty() {
        let mut sched = Scheduler::new(0);
        let leaf = sched.new_leaf("leaf");
        let root = sched.new_rate_limit("limiter", Resource::Invocations, 1, 2, leaf).unwrap();
        sched.set_root(root).unwrap();
        let mut tasks = TaskTable::new();
        let task = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, leaf, task, None).unwrap();

        assert!(sched.select_leaf(&tasks, 0).is_some());
        sched.record_result(&mut tasks, leaf, Usage { invocations: 1, ..Default::default() }, false);
        assert!(sched.select_leaf(&tasks, 0).is_some());
        sched.record_result(&mut tasks, leaf, Usage { invocations: 1, ..Default::default() }, false);
        // bucket (max_burst 2) is now empty; no time has passed to refill it
        assert!(sched.select_leaf(&tasks, 0).is_none());
        // a full second later, the 1-token/s bucket has refilled
        assert!(sched.select_leaf(&tasks, 1_000_000_000).is_some());
    }

    #[test]
    fn a_blocked_task_unblocks_the_leaf_until_the_next_result() {
        let mut sched = Scheduler::new(0);
        let leaf = sched.new_leaf("leaf");
        sched.set_root(leaf).unwrap();
        let mut tasks = TaskTable::new();
        let task = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, leaf, task, None).unwrap();

        assert!(sched.select_leaf(&tasks, 0).is_some());
        sched.record_result(&mut tasks, leaf, Usage::default(), true);
        assert!(sched.select_leaf(&tasks, 0).is_none());
        sched.record_result(&mut tasks, leaf, Usage::default(), false);
        assert!(sched.select_leaf(&tasks, 0).is_some());
    }

    #[test]
    fn attaching_to_a_new_leaf_detaches_from_the_old_one_first() {
        let mut sched = Scheduler::new(0);
        let root = sched.new_round_robin("root");
        sched.set_root(root).unwrap();
        let l1 = sched.new_leaf("l1");
        let l2 = sched.new_leaf("l2");
        sched.add_child(root, l1, ChildWeight::None).unwrap();
        sched.add_child(root, l2, ChildWeight::None).unwrap();

        let mut tasks = TaskTable::new();
        let task = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, l1, task, None).unwrap();
        assert_eq!(tasks.get(task).unwrap().leaf(), Some((0, l1)));

        sched.attach_task(&mut tasks, l2, task, None).unwrap();
        assert_eq!(tasks.get(task).unwrap().leaf(), Some((0, l2)));

        // l1 was vacated, so a fresh task can take it...
        let other = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched.attach_task(&mut tasks, l1, other, None).unwrap();

        // ...and detaching l1 now returns `other`, not the task that moved to l2.
        assert_eq!(sched.detach_task(&mut tasks, l1), Some(other));
        assert_eq!(sched.detach_task(&mut tasks, l2), Some(task));
    }

    #[test]
    fn cross_worker_reattach_requires_the_other_scheduler() {
        let mut sched_a = Scheduler::new(0);
        let leaf_a = sched_a.new_leaf("leaf-a");
        sched_a.set_root(leaf_a).unwrap();
        let mut sched_b = Scheduler::new(1);
        let leaf_b = sched_b.new_leaf("leaf-b");
        sched_b.set_root(leaf_b).unwrap();

        let mut tasks = TaskTable::new();
        let task = tasks.create(pflow_graph::ModuleId::default(), 0);
        sched_a.attach_task(&mut tasks, leaf_a, task, None).unwrap();

        // without a handle to worker 0's scheduler, worker 1 can't move it
        let err = sched_b.attach_task(&mut tasks, leaf_b, task, None).unwrap_err();
        assert_eq!(err, Error::CrossWorkerReattach { task, worker_id: 0 });
        assert_eq!(tasks.get(task).unwrap().leaf(), Some((0, leaf_a)));

        // with it, the move clears worker 0's bookkeeping too
        sched_b.attach_task(&mut tasks, leaf_b, task, Some(&mut sched_a)).unwrap();
        assert_eq!(tasks.get(task).unwrap().leaf(), Some((1, leaf_b)));
        assert_eq!(sched_a.detach_task(&mut tasks, leaf_a), None);
    }

    #[test]
    fn worker_loop_runs_a_source_into_a_sink() {
        let emitted = Arc::new(AtomicU64::new(0));
        let r = registry(emitted.clone(), false);
        let mut pipeline = Pipeline::new(192);
        let src = pipeline.create_module(&r, "Source", "src").unwrap();
        let sink = pipeline.create_module(&r, "Sink", "sink").unwrap();
        pipeline.connect_modules(src, 0, sink, 0).unwrap();

        let mut tasks = TaskTable::new();
        let task = tasks.create(src, 0);
        let clock_ns = Arc::new(AtomicU64::new(0));
        let mut worker = Worker::new(0, 0, Box::new(FakeClock(clock_ns))).unwrap();
        let leaf = worker.scheduler_mut().new_leaf("src-leaf");
        worker.scheduler_mut().set_root(leaf).unwrap();
        worker.scheduler_mut().attach_task(&mut tasks, leaf, task, None).unwrap();

        for _ in 0..3 {
            assert!(worker.run_once(&mut pipeline, &mut tasks));
        }
        assert_eq!(emitted.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn task_graph_credits_every_downstream_module_to_its_task_root() {
        let emitted = Arc::new(AtomicU64::new(0));
        let r = registry(emitted, false);
        let mut pipeline = Pipeline::new(192);
        let src = pipeline.create_module(&r, "Source", "src").unwrap();
        let sink = pipeline.create_module(&r, "Sink", "sink").unwrap();
        pipeline.connect_modules(src, 0, sink, 0).unwrap();

        update_task_graph(&mut pipeline);
        assert_eq!(pipeline.parent_tasks(sink), &[src]);
        assert!(pipeline.parent_tasks(src).is_empty());
    }

    #[test]
    fn placement_rejects_a_single_worker_module_reached_by_two_workers() {
        let emitted = Arc::new(AtomicU64::new(0));
        let r = registry(emitted, false);
        let mut pipeline = Pipeline::new(192);
        let src_a = pipeline.create_module(&r, "Source", "a").unwrap();
        let src_b = pipeline.create_module(&r, "Source", "b").unwrap();
        // a second igate-equivalent: route both sources into their own
        // sink instances would not share a module, so reuse one sink with
        // two igates instead.
        let mut r2 = r;
        r2.register(ModuleClass::new("Sink2", 2, 0, || Box::new(Sink)));
        let sink = pipeline.create_module(&r2, "Sink2", "sink").unwrap();
        pipeline.connect_modules(src_a, 0, sink, 0).unwrap();
        pipeline.connect_modules(src_b, 0, sink, 1).unwrap();

        let worker_numa = HashMap::from([(0u8, 0u8), (1u8, 0u8)]);
        let err = validate_worker_placement(&pipeline, &[(0, src_a), (1, src_b)], &worker_numa).unwrap_err();
        assert!(matches!(err, Error::WorkerConstraintViolation { module, .. } if module == sink));
    }

    #[test]
    fn placement_accepts_disjoint_single_worker_modules() {
        let emitted = Arc::new(AtomicU64::new(0));
        let r = registry(emitted, false);
        let mut pipeline = Pipeline::new(192);
        let src = pipeline.create_module(&r, "Source", "src").unwrap();
        let sink = pipeline.create_module(&r, "Sink", "sink").unwrap();
        pipeline.connect_modules(src, 0, sink, 0).unwrap();

        let worker_numa = HashMap::from([(0u8, 0u8)]);
        validate_worker_placement(&pipeline, &[(0, src)], &worker_numa).unwrap();
    }
}
