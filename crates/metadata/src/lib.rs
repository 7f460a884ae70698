// SPDX-License-Identifier: Apache-2.0

//! Per-packet metadata attribute declarations and the scope-component
//! offset allocator that packs them into a shared, fixed-size region.
//!
//! This crate knows nothing about gates, hooks, or modules as concrete
//! types: it operates entirely through the [`allocator::GraphView`] trait,
//! which the pipeline graph crate implements over its own module
//! representation. That keeps the allocator's traversal state (see
//! `allocator::Ctx`) a plain value passed by mutable reference rather than
//! a file-scope static, so a pipeline can be recomputed at any time without
//! touching global state.

mod allocator;
mod attribute;
mod error;
mod offset;

pub use allocator::{allocate, Allocation, GraphView, ModuleKey, OffsetTable, ScopeMap};
pub use attribute::{AccessMode, MetadataAttribute};
pub use error::Error;
pub use offset::{is_valid, Offset, DEFAULT_TOTAL_SIZE, NO_READ, NO_SPACE, NO_WRITE};

/// A set of attribute declarations for one pipeline, validating that
/// re-registrations of the same name agree on size. This is the piece
/// that the `ConnectModules`/`AddMetadataAttr` control-plane surface
/// calls directly; the allocator itself is agnostic to it.
///
/// Registrations of the same name are reference-counted so that
/// `register(n,s)` then `deregister(n)`, repeated any number of times,
/// always leaves the table in the state it started in.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    entries: std::collections::HashMap<String, (u8, u32)>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a declaration, checking it against any prior declaration of
    /// the same name.
    pub fn register(&mut self, attr: &MetadataAttribute) -> Result<(), Error> {
        match self.entries.get_mut(&attr.name) {
            Some((existing, _)) if *existing != attr.size => Err(Error::SizeMismatch {
                name: attr.name.clone(),
                old_size: *existing,
                new_size: attr.size,
            }),
            Some((_, count)) => {
                *count += 1;
                Ok(())
            }
            None => {
                self.entries.insert(attr.name.clone(), (attr.size, 1));
                Ok(())
            }
        }
    }

    /// Releases one prior registration of `name`. A no-op if `name` was
    /// never registered. Removes the entry once its reference count drops
    /// to zero.
    pub fn deregister(&mut self, name: &str) {
        if let Some((_, count)) = self.entries.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                self.entries.remove(name);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
