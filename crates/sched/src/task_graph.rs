// SPDX-License-Identifier: Apache-2.0

//! Task-graph maintenance: recomputing each module's `parent_tasks` set
//! (the task-root modules whose execution can reach it) by walking
//! downstream from every task-owning module.

use std::collections::{HashMap, HashSet};

use pflow_graph::{ModuleId, Pipeline};
use pflow_metadata::GraphView;

/// Recomputes and installs `parent_tasks` for every module in `pipeline`.
///
/// A traversal starts at each module whose handler overrides `run_task`
/// and walks downstream, crediting every module it reaches with that
/// task-root as a parent. The traversal stops at (but still credits) a
/// module that is itself a task root: that module's own task pulls its
/// downstream batches independently, so it does not forward its
/// upstream's task-root credit any further.
pub fn update_task_graph(pipeline: &mut Pipeline) {
    let ids = pipeline.module_ids();
    let task_roots: Vec<ModuleId> = ids.iter().copied().filter(|&m| pipeline.is_task(m)).collect();

    let mut parents: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
    for &root in &task_roots {
        let mut visited: HashSet<ModuleId> = HashSet::new();
        let mut stack = pipeline.downstream(root);
        while let Some(m) = stack.pop() {
            if !visited.insert(m) {
                continue;
            }
            parents.entry(m).or_default().push(root);
            if pipeline.is_task(m) {
                continue;
            }
            stack.extend(pipeline.downstream(m));
        }
    }

    for id in ids {
        pipeline.set_parent_tasks(id, parents.remove(&id).unwrap_or_default());
    }
}
