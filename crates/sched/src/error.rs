// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by traffic-class tree construction, task attachment, and
//! worker placement.

use crate::ids::{TaskId, TcId};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No class with this id exists in the scheduler.
    #[error("unknown traffic class {0:?}")]
    UnknownClass(TcId),

    /// No task with this id exists in the task table.
    #[error("unknown task {0:?}")]
    UnknownTask(TaskId),

    /// Attempted to attach a task to a class that is not a leaf.
    #[error("traffic class {0:?} is not a leaf and cannot own a task")]
    NotALeaf(TcId),

    /// The leaf named already owns a different task.
    #[error("leaf {0:?} already owns a task")]
    LeafOccupied(TcId),

    /// A child reference pointed at a class that is not actually a child of
    /// the parent it was added through.
    #[error("{0:?} is not a child of {1:?}")]
    NotAChild(TcId, TcId),

    /// Attempted to add a child to a class whose variant does not own an
    /// ordered child set of the kind the caller asked for (e.g. adding a
    /// priority child to a `RoundRobin` node).
    #[error("{0:?} does not accept children of this kind")]
    WrongKind(TcId),

    /// A module exposed to more than one worker declares `max_allowed_workers() == 1`.
    #[error("module {module:?} cannot be reached by worker {worker}: {reason}")]
    WorkerConstraintViolation {
        module: pflow_graph::ModuleId,
        worker: u8,
        reason: &'static str,
    },

    /// `attach_task` found the task already attached to a leaf on a
    /// different worker's scheduler, and no handle to that scheduler was
    /// given to detach it from first.
    #[error("task {task:?} is attached to worker {worker_id}'s scheduler; pass that scheduler to attach_task to move it")]
    CrossWorkerReattach { task: TaskId, worker_id: u8 },
}
