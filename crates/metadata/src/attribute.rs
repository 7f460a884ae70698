// SPDX-License-Identifier: Apache-2.0

//! Declarations of per-packet metadata scratch fields.

/// How a module intends to touch a metadata attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// The module only reads the attribute; it must have been written
    /// upstream.
    Read,
    /// The module only writes the attribute for modules downstream.
    Write,
    /// The module both reads and overwrites the attribute in place.
    Update,
}

/// A single (name, size, mode) declaration made by a module at init time.
///
/// Two declarations of the same `name` anywhere in a pipeline must agree on
/// `size`; this is checked when attributes are registered with a
/// [`crate::Pipeline`]-like collection, not by the allocator itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataAttribute {
    pub name: String,
    pub size: u8,
    pub mode: AccessMode,
}

impl MetadataAttribute {
    pub fn new(name: impl Into<String>, size: u8, mode: AccessMode) -> Self {
        MetadataAttribute {
            name: name.into(),
            size,
            mode,
        }
    }

    pub fn read(name: impl Into<String>, size: u8) -> Self {
        Self::new(name, size, AccessMode::Read)
    }

    pub fn write(name: impl Into<String>, size: u8) -> Self {
        Self::new(name, size, AccessMode::Write)
    }

    pub fn update(name: impl Into<String>, size: u8) -> Self {
        Self::new(name, size, AccessMode::Update)
    }
}
