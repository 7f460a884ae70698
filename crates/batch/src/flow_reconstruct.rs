// SPDX-License-Identifier: Apache-2.0

//! In-order TCP flow reassembly into a single growable byte buffer.

use std::collections::BTreeMap;

/// Accumulates TCP segments of one direction of a flow in sequence-number
/// order, merging overlapping or adjacent segments as they arrive.
///
/// Not a general TCP state machine: it tracks exactly one SYN-established
/// sequence space and does not retransmit, ACK, or window anything. Modules
/// that need full reassembly of both directions keep one instance per
/// direction.
#[derive(Debug)]
pub struct TcpFlowReconstruct {
    initialized: bool,
    init_seq: u32,
    buf: Vec<u8>,
    /// Sorted, pairwise-disjoint, eagerly-merged `[start, end)` intervals of
    /// bytes received so far, keyed by start offset from `init_seq`.
    received: BTreeMap<u32, u32>,
}

impl TcpFlowReconstruct {
    /// Builds a reconstructor with `initial_buflen` bytes of backing storage
    /// pre-allocated. The reconstructor does nothing until a SYN arrives.
    #[must_use]
    pub fn new(initial_buflen: usize) -> Self {
        TcpFlowReconstruct {
            initialized: false,
            init_seq: 0,
            buf: vec![0u8; initial_buflen],
            received: BTreeMap::new(),
        }
    }

    /// The reconstructed byte buffer. Bytes outside a received interval are
    /// unspecified (left over from a previous resize), not necessarily zero.
    #[must_use]
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn buf_size(&self) -> usize {
        self.buf.len()
    }

    /// The data sequence number extracted from the SYN, or `0` before one
    /// has arrived.
    #[must_use]
    pub fn init_seq(&self) -> u32 {
        self.init_seq
    }

    /// Length of the contiguous run of received bytes starting at offset 0.
    /// Zero if no segment starts at offset 0, regardless of how much data
    /// has otherwise arrived.
    #[must_use]
    pub fn contiguous_len(&self) -> usize {
        match self.received.iter().next() {
            Some((&start, &end)) if start == 0 => end as usize,
            _ => 0,
        }
    }

    /// Inserts one TCP segment, identified by its sequence number, SYN flag,
    /// and payload.
    ///
    /// A SYN arms the reconstructor (`init_seq = seq + 1`) and carries no
    /// payload by assumption. Returns `false` without effect if a non-SYN
    /// segment arrives before any SYN, or if `seq` precedes `init_seq` by
    /// the signed 32-bit wraparound check BESS uses. A pure ACK (empty
    /// payload) is accepted but does not touch the buffer or the interval
    /// set.
    pub fn insert_segment(&mut self, seq: u32, syn: bool, payload: &[u8]) -> bool {
        if syn {
            self.init_seq = seq.wrapping_add(1);
            self.initialized = true;
            return true;
        }

        if !self.initialized {
            return false;
        }

        // Signed 32-bit delta: a negative result means `seq` is behind
        // `init_seq`, including the wraparound case where `seq` has looped
        // past u32::MAX.
        if (seq.wrapping_sub(self.init_seq) as i32) < 0 {
            return false;
        }

        let buf_offset = seq.wrapping_sub(self.init_seq);
        let datalen = payload.len() as u32;

        if datalen == 0 {
            return true;
        }

        let needed = buf_offset as usize + datalen as usize;
        if needed > self.buf.len() {
            self.buf.resize(needed * 2, 0);
        }
        self.buf[buf_offset as usize..needed].copy_from_slice(payload);

        self.merge_segment(buf_offset, buf_offset + datalen);
        true
    }

    fn merge_segment(&mut self, mut start: u32, mut end: u32) {
        // The segment immediately before `start`'s lower bound may overlap
        // it; pull it into the merge if so.
        if let Some((&prev_start, &prev_end)) = self.received.range(..start).next_back() {
            if prev_end >= start {
                start = prev_start;
            }
        }

        let overlapping: Vec<u32> = self
            .received
            .range(start..)
            .take_while(|&(&s, _)| s <= end)
            .map(|(&s, _)| s)
            .collect();
        for key in overlapping {
            if let Some(seg_end) = self.received.remove(&key) {
                end = end.max(seg_end);
            }
        }

        self.received.insert(start, end);
    }
}

impl Default for TcpFlowReconstruct {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syn_then_in_order_segment_reconstructs() {
        let mut r = TcpFlowReconstruct::new(16);
        assert!(r.insert_segment(1000, true, &[]));
        assert_eq!(r.init_seq(), 1001);
        assert!(r.insert_segment(1001, false, b"hello"));
        assert_eq!(&r.buf()[..5], b"hello");
        assert_eq!(r.contiguous_len(), 5);
    }

    #[test]
    fn segment_before_syn_is_rejected() {
        let mut r = TcpFlowReconstruct::new(16);
        assert!(!r.insert_segment(1001, false, b"hello"));
    }

    #[test]
    fn out_of_order_segments_merge_once_the_gap_closes() {
        let mut r = TcpFlowReconstruct::new(16);
        r.insert_segment(0, true, &[]);
        assert!(r.insert_segment(6, false, b"world")); // offset 5
        assert_eq!(r.contiguous_len(), 0); // gap at the start
        assert!(r.insert_segment(1, false, b"hello")); // offset 0
        assert_eq!(r.contiguous_len(), 10);
        assert_eq!(&r.buf()[..10], b"helloworld");
    }

    #[test]
    fn overlapping_segments_merge_into_one_interval() {
        let mut r = TcpFlowReconstruct::new(16);
        r.insert_segment(0, true, &[]);
        r.insert_segment(1, false, b"AAAA"); // [0,4)
        r.insert_segment(3, false, b"BBBB"); // [2,6), overlaps
        assert_eq!(r.contiguous_len(), 6);
    }

    #[test]
    fn pure_ack_does_not_touch_the_buffer_or_intervals() {
        let mut r = TcpFlowReconstruct::new(16);
        r.insert_segment(0, true, &[]);
        assert!(r.insert_segment(1, false, &[]));
        assert_eq!(r.contiguous_len(), 0);
    }

    #[test]
    fn buffer_grows_to_twice_the_required_size() {
        let mut r = TcpFlowReconstruct::new(4);
        r.insert_segment(0, true, &[]);
        r.insert_segment(1, false, &[0u8; 10]); // offset 0, needs 10 bytes
        assert_eq!(r.buf_size(), 20);
    }

    #[test]
    fn wraparound_sequence_math_places_data_at_the_correct_offset() {
        // SYN at 0xFFFF_FFFE establishes init_seq = 0xFFFF_FFFF. A data
        // segment at seq 0 is one byte past init_seq once the sequence
        // space wraps, not two: (0u32).wrapping_sub(0xFFFF_FFFF) == 1.
        let mut r = TcpFlowReconstruct::new(16);
        r.insert_segment(0xFFFF_FFFE, true, &[]);
        assert_eq!(r.init_seq(), 0xFFFF_FFFF);
        r.insert_segment(0, false, &[0xAB; 10]);
        assert_eq!(r.buf()[0], 0);
        assert_eq!(r.buf()[1], 0xAB);
        assert_eq!(r.contiguous_len(), 0); // gap at offset 0
    }
}
