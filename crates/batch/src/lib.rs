// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity packet batches, the packet handle they carry, and a
//! reusable TCP flow reassembly buffer.
//!
//! Batches are the unit of work that moves through the pipeline graph: a
//! source module's task fills one, and every downstream module's
//! `process_batch` consumes and re-emits sub-batches of it. Capacity is
//! fixed at [`MAX_BURST`] so the batch can be stack- or pool-allocated and
//! cache-line aligned for SIMD-friendly iteration, matching the burst size
//! the scheduler and traffic classes reason about.

mod flow_reconstruct;
mod packet;

pub use flow_reconstruct::TcpFlowReconstruct;
pub use packet::Packet;

/// Maximum number of packets a single [`PacketBatch`] can hold.
pub const MAX_BURST: usize = 32;

/// A fixed-capacity, cache-line-aligned array of packet handles plus a
/// count.
///
/// Invariant: `0 <= cnt() <= MAX_BURST`, upheld by every mutating method
/// here -- there is no public way to set `cnt` past capacity or to index
/// beyond it.
#[repr(align(64))]
#[derive(Debug, Clone)]
pub struct PacketBatch {
    pkts: [Option<Packet>; MAX_BURST],
    cnt: usize,
}

impl PacketBatch {
    #[must_use]
    pub fn new() -> Self {
        PacketBatch {
            pkts: std::array::from_fn(|_| None),
            cnt: 0,
        }
    }

    /// Empties the batch without deallocating the backing array.
    pub fn clear(&mut self) {
        for slot in &mut self.pkts[..self.cnt] {
            *slot = None;
        }
        self.cnt = 0;
    }

    /// Appends `pkt`. A no-op if the batch is already at [`MAX_BURST`];
    /// `cnt` never exceeds capacity.
    pub fn add(&mut self, pkt: Packet) {
        if self.cnt >= MAX_BURST {
            return;
        }
        self.pkts[self.cnt] = Some(pkt);
        self.cnt += 1;
    }

    #[must_use]
    pub fn cnt(&self) -> usize {
        self.cnt
    }

    /// Overwrites the batch's count directly, e.g. after a caller has
    /// written packets into `pkts_mut()` out of band. Clamped to
    /// [`MAX_BURST`].
    pub fn set_cnt(&mut self, cnt: usize) {
        self.cnt = cnt.min(MAX_BURST);
    }

    /// The batch's live packets, in arrival order.
    #[must_use]
    pub fn pkts(&self) -> &[Option<Packet>] {
        &self.pkts[..self.cnt]
    }

    #[must_use]
    pub fn pkts_mut(&mut self) -> &mut [Option<Packet>] {
        let cnt = self.cnt;
        &mut self.pkts[..cnt]
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.cnt >= MAX_BURST
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cnt == 0
    }
}

impl Default for PacketBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_respects_capacity() {
        let mut batch = PacketBatch::new();
        for i in 0..MAX_BURST {
            batch.add(Packet::new(&[i as u8], 0));
        }
        assert_eq!(batch.cnt(), MAX_BURST);
        assert!(batch.is_full());

        // one more add is a silent no-op
        batch.add(Packet::new(&[255], 0));
        assert_eq!(batch.cnt(), MAX_BURST);
    }

    #[test]
    fn clear_resets_count_and_drops_packets() {
        let mut batch = PacketBatch::new();
        batch.add(Packet::new(b"x", 0));
        batch.add(Packet::new(b"y", 0));
        batch.clear();
        assert_eq!(batch.cnt(), 0);
        assert!(batch.is_empty());
        assert!(batch.pkts().iter().all(Option::is_none));
    }

    #[test]
    fn set_cnt_is_clamped_to_capacity() {
        let mut batch = PacketBatch::new();
        batch.set_cnt(1000);
        assert_eq!(batch.cnt(), MAX_BURST);
    }

    #[test]
    fn batch_is_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<PacketBatch>(), 64);
    }
}
