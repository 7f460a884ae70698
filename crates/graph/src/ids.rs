// SPDX-License-Identifier: Apache-2.0

//! Stable integer handles into a [`crate::Pipeline`]'s arenas.

slotmap::new_key_type! {
    /// Handle to a module, stable across the module's lifetime in one
    /// pipeline. Never reused while any reference to it may still be held
    /// by a task or a gate pairing.
    pub struct ModuleId;

    /// Handle to one gate (input or output) belonging to some module.
    pub struct GateId;
}
