// SPDX-License-Identifier: Apache-2.0

//! Stable integer handles into a [`crate::Scheduler`]'s class arena and a
//! [`crate::TaskTable`]'s task arena.

slotmap::new_key_type! {
    pub struct TcId;
    pub struct TaskId;
}
