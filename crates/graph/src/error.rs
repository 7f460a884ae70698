// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by graph mutation and module-class registration.

use crate::ids::ModuleId;

/// Errors surfaced by [`crate::Pipeline`]'s control-plane surface.
///
/// All of these are configuration-time errors: they are reported
/// synchronously to the caller and leave the graph unchanged. There is no
/// runtime/per-packet error variant here -- malformed packets are dropped or
/// routed to the drop sentinel, never surfaced as an `Error`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No module with this id exists in the pipeline.
    #[error("unknown module {module:?}")]
    UnknownModule { module: ModuleId },

    /// A gate index exceeded the module class's declared gate count.
    #[error("module {module:?} has no {direction} gate at index {index} (class declares {declared})")]
    BadGate {
        module: ModuleId,
        direction: &'static str,
        index: usize,
        declared: usize,
    },

    /// The output gate already has a paired input gate.
    #[error("ogate {ogate_idx} of module {module:?} is already connected")]
    AlreadyConnected { module: ModuleId, ogate_idx: usize },

    /// Attempted to disconnect a gate pairing that does not exist.
    #[error("igate {igate_idx} of module {module:?} is not connected")]
    NotConnected { module: ModuleId, igate_idx: usize },

    /// A module class is not registered under this name.
    #[error("unknown module class {class:?}")]
    UnknownClass { class: String },

    /// A module requested more tasks than its class allows.
    #[error("module {module:?} cannot own another task")]
    TaskCreationFailed { module: ModuleId },

    /// A configuration would expose a single-worker module to more than one
    /// worker, or would route a task to a worker outside the module's NUMA
    /// constraint.
    #[error("module {module:?} cannot be reached by worker {worker}: {reason}")]
    WorkerConstraintViolation {
        module: ModuleId,
        worker: u8,
        reason: &'static str,
    },

    /// A module-specific command rejected its argument.
    #[error("command {command:?} on module {module:?} failed: {reason}")]
    CommandFailed {
        module: ModuleId,
        command: String,
        reason: String,
    },

    /// Metadata attribute registration or recomputation failed.
    #[error(transparent)]
    Metadata(#[from] pflow_metadata::Error),
}
