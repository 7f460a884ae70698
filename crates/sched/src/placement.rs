// SPDX-License-Identifier: Apache-2.0

//! Worker placement validation: each module's reachable-worker set must fit
//! inside its declared `max_allowed_workers`, and inside its effective NUMA
//! constraint.

use std::collections::{HashMap, HashSet};

use pflow_graph::{ModuleId, Pipeline};
use pflow_metadata::GraphView;

use crate::error::Error;

/// Checks every module reachable from `task_roots` (pairs of `(worker id,
/// task-root module)`) against its `max_allowed_workers` and NUMA
/// constraint, given each worker's NUMA node in `worker_numa_node`.
///
/// Traversal stops at (but still counts) a downstream task-root module, the
/// same boundary [`crate::task_graph::update_task_graph`] draws.
pub fn validate_worker_placement(pipeline: &Pipeline, task_roots: &[(u8, ModuleId)], worker_numa_node: &HashMap<u8, u8>) -> Result<(), Error> {
    let mut reachable: HashMap<ModuleId, HashSet<u8>> = HashMap::new();
    for &(worker, root) in task_roots {
        reachable.entry(root).or_default().insert(worker);
        let mut visited: HashSet<ModuleId> = HashSet::new();
        let mut stack = pipeline.downstream(root);
        while let Some(m) = stack.pop() {
            if !visited.insert(m) {
                continue;
            }
            reachable.entry(m).or_default().insert(worker);
            if pipeline.is_task(m) {
                continue;
            }
            stack.extend(pipeline.downstream(m));
        }
    }

    for (&module, workers) in &reachable {
        let max = pipeline.max_allowed_workers(module);
        if workers.len() as u8 > max {
            let worker = *workers.iter().min().unwrap();
            return Err(Error::WorkerConstraintViolation {
                module,
                worker,
                reason: "module is reachable by more workers than max_allowed_workers permits",
            });
        }

        let constraint = pipeline.effective_node_constraint(module);
        for &worker in workers {
            let Some(&node) = worker_numa_node.get(&worker) else { continue };
            if node < 64 && constraint & (1u64 << node) == 0 {
                return Err(Error::WorkerConstraintViolation {
                    module,
                    worker,
                    reason: "worker's NUMA node is outside the module's effective constraint",
                });
            }
        }
    }
    Ok(())
}
