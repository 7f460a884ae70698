// SPDX-License-Identifier: Apache-2.0

//! Gates: typed edge endpoints on a module, and the ordered hooks attached
//! to them.

use smallvec::SmallVec;

use pflow_batch::PacketBatch;

use crate::ids::{GateId, ModuleId};

/// A hook observes every batch crossing the gate it is attached to. Hooks
/// may read packet bytes and update their own counters; they must not
/// mutate which packets are in the batch.
pub trait GateHook: Send {
    /// A short tag identifying the hook's kind, e.g. for diagnostics.
    fn kind(&self) -> &'static str;

    fn on_batch(&mut self, batch: &PacketBatch);
}

struct HookEntry {
    priority: i32,
    seq: u64,
    hook: Box<dyn GateHook>,
}

/// Direction of a gate, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "input",
            Direction::Out => "output",
        }
    }
}

enum Pairing {
    /// Output gates point at exactly one input gate.
    Out(Option<GateId>),
    /// Input gates hold the set of output gates feeding them.
    In(SmallVec<[GateId; 4]>),
}

/// One gate belonging to a module.
pub struct Gate {
    pub module: ModuleId,
    pub direction: Direction,
    pub index: usize,
    hooks: Vec<HookEntry>,
    next_hook_seq: u64,
    pairing: Pairing,
}

impl Gate {
    pub(crate) fn new_out(module: ModuleId, index: usize) -> Self {
        Gate {
            module,
            direction: Direction::Out,
            index,
            hooks: Vec::new(),
            next_hook_seq: 0,
            pairing: Pairing::Out(None),
        }
    }

    pub(crate) fn new_in(module: ModuleId, index: usize) -> Self {
        Gate {
            module,
            direction: Direction::In,
            index,
            hooks: Vec::new(),
            next_hook_seq: 0,
            pairing: Pairing::In(SmallVec::new()),
        }
    }

    /// The paired input gate, for an output gate. `None` if unbound or if
    /// called on an input gate.
    #[must_use]
    pub fn paired_igate(&self) -> Option<GateId> {
        match &self.pairing {
            Pairing::Out(p) => *p,
            Pairing::In(_) => None,
        }
    }

    /// The output gates feeding this gate, for an input gate. Empty if
    /// called on an output gate.
    #[must_use]
    pub fn upstream_ogates(&self) -> &[GateId] {
        match &self.pairing {
            Pairing::In(v) => v,
            Pairing::Out(_) => &[],
        }
    }

    pub(crate) fn set_paired_igate(&mut self, igate: Option<GateId>) {
        if let Pairing::Out(p) = &mut self.pairing {
            *p = igate;
        }
    }

    pub(crate) fn add_upstream(&mut self, ogate: GateId) {
        if let Pairing::In(v) = &mut self.pairing {
            if !v.contains(&ogate) {
                v.push(ogate);
            }
        }
    }

    pub(crate) fn remove_upstream(&mut self, ogate: GateId) {
        if let Pairing::In(v) = &mut self.pairing {
            v.retain(|g| *g != ogate);
        }
    }

    pub(crate) fn clear_upstream(&mut self) {
        if let Pairing::In(v) = &mut self.pairing {
            v.clear();
        }
    }

    /// Inserts `hook`, keeping the hook list sorted by (priority ascending,
    /// insertion order).
    pub fn add_hook(&mut self, priority: i32, hook: Box<dyn GateHook>) {
        let seq = self.next_hook_seq;
        self.next_hook_seq += 1;
        let entry = HookEntry { priority, seq, hook };
        let pos = self
            .hooks
            .binary_search_by(|e| (e.priority, e.seq).cmp(&(entry.priority, entry.seq)))
            .unwrap_or_else(|p| p);
        self.hooks.insert(pos, entry);
    }

    pub(crate) fn run_hooks(&mut self, batch: &PacketBatch) {
        for entry in &mut self.hooks {
            entry.hook.on_batch(batch);
        }
    }

    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}
