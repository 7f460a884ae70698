// SPDX-License-Identifier: Apache-2.0

//! The four resource dimensions a [`crate::TaskResult`]-producing task can
//! be metered on, as chosen per `WeightedFair`/`RateLimit` class.

/// One of the four countable dimensions of a task's work, used by
/// `WeightedFair` virtual-time advancement and `RateLimit` token
/// consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// One unit per scheduled invocation, regardless of its outcome.
    Invocations,
    Packets,
    Bits,
    Cycles,
}

/// A task's measured output for one scheduling round, in all four
/// dimensions at once so each class along the parent chain can read
/// whichever dimension it cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub invocations: u64,
    pub packets: u64,
    pub bits: u64,
    pub cycles: u64,
}

impl Usage {
    #[must_use]
    pub fn of(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Invocations => self.invocations,
            Resource::Packets => self.packets,
            Resource::Bits => self.bits,
            Resource::Cycles => self.cycles,
        }
    }
}
