// SPDX-License-Identifier: Apache-2.0

//! Errors for metadata attribute registration and allocation.

/// Errors surfaced by metadata attribute registration and the offset
/// allocator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The same attribute name was registered with two different sizes
    /// somewhere in the pipeline.
    #[error("metadata attribute {name:?} registered with size {new_size}, but was already registered with size {old_size}")]
    SizeMismatch {
        name: String,
        old_size: u8,
        new_size: u8,
    },

    /// The allocator could not fit every scope component into the
    /// metadata region.
    #[error("no space left in the {total}-byte metadata region for attribute {name:?} ({size} bytes)")]
    NoSpace { name: String, size: u8, total: u16 },
}
