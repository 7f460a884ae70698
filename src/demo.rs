// SPDX-License-Identifier: Apache-2.0

//! A handful of module classes used by `pflow_engine run` to exercise a
//! pipeline end to end without a control-plane RPC surface. These are not
//! protocol-aware: they generate, pass through, and discard fixed-size
//! packets, mirroring `source`/`bypass`/`sink` from the reference
//! framework's own bundled module set.

use pflow_batch::{Packet, PacketBatch, MAX_BURST};
use pflow_graph::{Module, ModuleClass, ModuleClassRegistry, ModuleContext, TaskResult};

/// Emits `burst` packets of `pkt_size` bytes each time its task runs. A
/// task root: the scheduler drives it, nothing upstream does.
pub struct Source {
    pkt_size: usize,
    burst: usize,
    generated: u64,
}

impl Source {
    #[must_use]
    pub fn new(pkt_size: usize, burst: usize) -> Self {
        Source { pkt_size, burst, generated: 0 }
    }
}

impl Module for Source {
    fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, _batch: PacketBatch) {}

    fn run_task(&mut self, ctx: &mut ModuleContext<'_>, _arg: u64) -> TaskResult {
        let mut batch = PacketBatch::new();
        let payload = vec![0u8; self.pkt_size];
        for _ in 0..self.burst.min(MAX_BURST) {
            batch.add(Packet::new(&payload, 0));
        }
        let packets = batch.cnt() as u32;
        let bits = u64::from(packets) * (self.pkt_size as u64) * 8;
        self.generated += u64::from(packets);
        ctx.emit(0, batch);
        TaskResult { block: false, packets, bits }
    }

    fn is_task(&self) -> bool {
        true
    }
}

/// Forwards every batch to output gate 0 unchanged.
#[derive(Default)]
pub struct Bypass;

impl Module for Bypass {
    fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
        ctx.emit(0, batch);
    }
}

/// Discards every batch it receives and counts the packets it has freed.
#[derive(Default)]
pub struct Sink {
    pub freed: u64,
}

impl Module for Sink {
    fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
        self.freed += batch.cnt() as u64;
    }
}

/// Registers `Source`, `Bypass`, and `Sink` under the names `run` in
/// `main.rs` connects together.
#[must_use]
pub fn registry() -> ModuleClassRegistry {
    let mut r = ModuleClassRegistry::new();
    r.register(ModuleClass::new("Source", 0, 1, || Box::new(Source::new(60, 32))).with_help("generates fixed-size packets when scheduled"));
    r.register(ModuleClass::new("Bypass", 1, 1, || Box::<Bypass>::default()).with_help("forwards packets without modification"));
    r.register(ModuleClass::new("Sink", 1, 0, || Box::<Sink>::default()).with_help("discards all packets"));
    r
}
