// SPDX-License-Identifier: Apache-2.0

//! Packet handles and their per-packet metadata scratch region.
//!
//! A [`Packet`] owns a single contiguous buffer (headroom + data) plus a
//! fixed-size metadata region addressed by the offsets an allocator run
//! produces. The buffer itself is a plain byte vector; this crate does not
//! model mbuf-style pooled allocation, DMA rings, or NUMA-local pools, all of
//! which live below the line this core draws (see the crate root docs).

use pflow_metadata::{is_valid, Offset, DEFAULT_TOTAL_SIZE};

/// A packet handle: a byte buffer plus a scratch region for per-pipeline
/// metadata attributes.
///
/// The metadata region is a flat byte array sized by [`DEFAULT_TOTAL_SIZE`]
/// by default; callers that run the allocator with a different `total_size`
/// must construct packets with [`Packet::with_metadata_capacity`] to match.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Vec<u8>,
    /// Offset into `buf` where packet data begins; headroom precedes it.
    head: usize,
    data_len: usize,
    metadata: Vec<u8>,
}

impl Packet {
    /// Builds a packet from `data`, with `headroom` bytes of empty space
    /// reserved before it for header prepending, and a metadata region sized
    /// to [`DEFAULT_TOTAL_SIZE`].
    pub fn new(data: &[u8], headroom: usize) -> Self {
        Self::with_metadata_capacity(data, headroom, DEFAULT_TOTAL_SIZE)
    }

    /// Like [`Packet::new`], but with an explicit metadata region size,
    /// matching the `total_size` an allocator run was configured with.
    pub fn with_metadata_capacity(data: &[u8], headroom: usize, metadata_size: u16) -> Self {
        let mut buf = vec![0u8; headroom + data.len()];
        buf[headroom..].copy_from_slice(data);
        Packet {
            buf,
            head: headroom,
            data_len: data.len(),
            metadata: vec![0u8; metadata_size as usize],
        }
    }

    /// The packet's current data, excluding headroom and any unused tailroom.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..self.head + self.data_len]
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let end = self.head + self.data_len;
        &mut self.buf[self.head..end]
    }

    /// Bytes of data currently held.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.data_len
    }

    /// Bytes of unused headroom still available for prepending headers.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Prepends `n` bytes of zeroed space, consuming headroom. Returns
    /// `false` without modifying the packet if insufficient headroom
    /// remains.
    #[must_use]
    pub fn prepend(&mut self, n: usize) -> bool {
        if n > self.head {
            return false;
        }
        self.head -= n;
        self.data_len += n;
        true
    }

    /// Removes `n` bytes from the front of the data region, growing
    /// headroom. Returns `false` without modifying the packet if `n` exceeds
    /// the current data length.
    #[must_use]
    pub fn adjust(&mut self, n: usize) -> bool {
        if n > self.data_len {
            return false;
        }
        self.head += n;
        self.data_len -= n;
        true
    }

    /// Reads a `T` out of the metadata region at `offset`. Returns `None`
    /// for an invalid (sentinel) offset; callers that want the "no reachable
    /// writer reads as zero" contract should fall back to `T::default()`
    /// themselves.
    #[must_use]
    pub fn metadata_get<T: bytemuck::Pod>(&self, offset: Offset) -> Option<T> {
        if !is_valid(offset) {
            return None;
        }
        let start = offset as usize;
        let end = start + std::mem::size_of::<T>();
        self.metadata
            .get(start..end)
            .map(|bytes| bytemuck::pod_read_unaligned(bytes))
    }

    /// Writes `value` into the metadata region at `offset`. A no-op for an
    /// invalid offset (the attribute has no reachable reader and the
    /// allocator discarded its storage).
    pub fn metadata_set<T: bytemuck::Pod>(&mut self, offset: Offset, value: T) {
        if !is_valid(offset) {
            return;
        }
        let start = offset as usize;
        let end = start + std::mem::size_of::<T>();
        if let Some(slot) = self.metadata.get_mut(start..end) {
            slot.copy_from_slice(bytemuck::bytes_of(&value));
        }
    }

    /// Resets every byte of the metadata region to zero, e.g. before
    /// recycling a packet handle back into a pool.
    pub fn clear_metadata(&mut self) {
        self.metadata.iter_mut().for_each(|b| *b = 0);
    }
}
