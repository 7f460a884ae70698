// SPDX-License-Identifier: Apache-2.0

//! Tasks: a non-owning reference to the module they drive and the leaf
//! class they are currently attached to, if any.

use slotmap::SlotMap;

use pflow_graph::ModuleId;

use crate::ids::{TaskId, TcId};

/// One task: a module to invoke and an opaque argument fixed at creation.
/// A task is attached to at most one leaf `TrafficClass`, in at most one
/// worker's scheduler, at a time.
pub struct Task {
    pub module: ModuleId,
    pub arg: u64,
    /// Set by the scheduler after a round where `TaskResult::block` was
    /// true; cleared by an explicit unblock or the next successful round.
    pub(crate) blocked: bool,
    /// `(worker id, leaf class id)` this task is currently attached to.
    pub(crate) leaf: Option<(u8, TcId)>,
}

impl Task {
    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    #[must_use]
    pub fn arg(&self) -> u64 {
        self.arg
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    #[must_use]
    pub fn leaf(&self) -> Option<(u8, TcId)> {
        self.leaf
    }
}

/// The process-wide set of tasks, independent of which scheduler's leaf
/// currently owns each one. A `Scheduler` only ever holds `TaskId`s into
/// this table, mirroring the source's separation of task identity from
/// traffic-class tree position.
#[derive(Default)]
pub struct TaskTable {
    tasks: SlotMap<TaskId, Task>,
}

impl TaskTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unattached task. Newly created tasks start unblocked so
    /// they are immediately eligible once attached to a leaf.
    pub fn create(&mut self, module: ModuleId, arg: u64) -> TaskId {
        self.tasks.insert(Task {
            module,
            arg,
            blocked: false,
            leaf: None,
        })
    }

    /// Removes a task outright. Callers must detach it from its leaf first;
    /// this does not touch any scheduler's tree.
    pub fn destroy(&mut self, task: TaskId) -> Option<Task> {
        self.tasks.remove(task)
    }

    #[must_use]
    pub fn get(&self, task: TaskId) -> Option<&Task> {
        self.tasks.get(task)
    }

    pub fn get_mut(&mut self, task: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(task)
    }

    #[must_use]
    pub fn is_blocked(&self, task: TaskId) -> bool {
        self.tasks.get(task).map(|t| t.blocked).unwrap_or(true)
    }

    pub fn set_blocked(&mut self, task: TaskId, blocked: bool) {
        if let Some(t) = self.tasks.get_mut(task) {
            t.blocked = blocked;
        }
    }

    pub(crate) fn set_leaf(&mut self, task: TaskId, leaf: Option<(u8, TcId)>) {
        if let Some(t) = self.tasks.get_mut(task) {
            t.leaf = leaf;
        }
    }
}
