// SPDX-License-Identifier: Apache-2.0

//! Sentinel-encoded byte offsets into a packet's metadata scratch region.

/// A byte offset into the per-packet metadata region, or one of the
/// reserved negative sentinels below. Kept signed so the sentinels don't
/// alias real offsets.
pub type Offset = i32;

/// No reachable upstream module writes this attribute; reads return the
/// zero value of the field's type. Surfaced to the control plane as a
/// warning, never a hard error.
pub const NO_READ: Offset = -1;

/// No reachable downstream module reads this attribute; the write was
/// discarded during allocation.
pub const NO_WRITE: Offset = -2;

/// The allocator could not fit this attribute's scope component into the
/// metadata region. A hard configuration error.
pub const NO_SPACE: Offset = -3;

/// Default size, in bytes, of the per-packet metadata scratch region.
pub const DEFAULT_TOTAL_SIZE: u16 = 192;

#[must_use]
pub const fn is_valid(offset: Offset) -> bool {
    offset >= 0
}
