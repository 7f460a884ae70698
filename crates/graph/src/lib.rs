// SPDX-License-Identifier: Apache-2.0

//! The typed, mutable pipeline graph: modules connected by gates, the
//! hooks observing batches that cross those gates, and the traversal that
//! drives a batch from a source module's task to wherever it is dropped.
//!
//! This crate treats metadata attribute packing as someone else's problem:
//! [`Pipeline`] implements [`pflow_metadata::GraphView`] so the allocator
//! crate can compute offsets without knowing what a gate or a hook is.

mod error;
mod gate;
mod ids;
mod module;
mod pipeline;

pub use error::Error;
pub use gate::{Direction, Gate, GateHook};
pub use ids::{GateId, ModuleId};
pub use module::{Module, ModuleClass, ModuleClassRegistry, ModuleContext, TaskResult};
pub use pipeline::{Pipeline, DROP_GATE};

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_batch::PacketBatch;
    use pflow_metadata::{GraphView, MetadataAttribute};

    struct Bypass;
    impl Module for Bypass {
        fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
            ctx.emit(0, batch);
        }
    }

    struct Counter {
        attrs: Vec<MetadataAttribute>,
    }
    impl Module for Counter {
        fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
            ctx.emit(0, batch);
        }
        fn declare_attrs(&self) -> Vec<MetadataAttribute> {
            self.attrs.clone()
        }
    }

    struct Sink {
        received: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }
    impl Module for Sink {
        fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
            self.received.fetch_add(batch.cnt(), std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn bypass_registry() -> ModuleClassRegistry {
        let mut r = ModuleClassRegistry::new();
        r.register(ModuleClass::new("Bypass", 1, 1, || Box::new(Bypass)));
        r
    }

    #[test]
    fn connect_then_disconnect_restores_an_unpaired_graph() {
        let mut r = bypass_registry();
        r.register(ModuleClass::new("Sink", 1, 0, || {
            Box::new(Sink {
                received: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            })
        }));
        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let b = p.create_module(&r, "Sink", "b").unwrap();

        p.connect_modules(a, 0, b, 0).unwrap();
        p.disconnect_modules(a, 0).unwrap();

        assert_eq!(p.downstream(a), Vec::<ModuleId>::new());
        assert_eq!(p.upstream(b), Vec::<ModuleId>::new());

        // disconnecting twice is a no-op, not an error
        p.disconnect_modules(a, 0).unwrap();
    }

    #[test]
    fn connecting_an_already_connected_ogate_fails() {
        let mut r = bypass_registry();
        r.register(ModuleClass::new("Sink", 1, 0, || {
            Box::new(Sink {
                received: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            })
        }));
        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let b = p.create_module(&r, "Sink", "b").unwrap();
        let c = p.create_module(&r, "Sink", "c").unwrap();

        p.connect_modules(a, 0, b, 0).unwrap();
        let err = p.connect_modules(a, 0, c, 0).unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected { .. }));
    }

    #[test]
    fn bad_gate_index_is_rejected() {
        let r = bypass_registry();
        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let err = p.connect_modules(a, 5, a, 0).unwrap_err();
        assert!(matches!(err, Error::BadGate { .. }));
    }

    #[test]
    fn emit_runs_hooks_and_downstream_process_batch() {
        struct CountHook(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl GateHook for CountHook {
            fn kind(&self) -> &'static str {
                "count"
            }
            fn on_batch(&mut self, batch: &PacketBatch) {
                self.0.fetch_add(batch.cnt(), std::sync::atomic::Ordering::SeqCst);
            }
        }

        let mut r = bypass_registry();
        let received = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let received = received.clone();
            r.register(ModuleClass::new("Sink", 1, 0, move || Box::new(Sink { received: received.clone() })));
        }

        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let b = p.create_module(&r, "Sink", "b").unwrap();
        p.connect_modules(a, 0, b, 0).unwrap();

        let hook_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        p.add_hook(a, Direction::Out, 0, 0, Box::new(CountHook(hook_count.clone()))).unwrap();

        let mut batch = PacketBatch::new();
        batch.add(pflow_batch::Packet::new(b"hi", 0));
        batch.add(pflow_batch::Packet::new(b"yo", 0));
        p.emit(a, 0, batch).unwrap();

        assert_eq!(hook_count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_to_drop_gate_frees_the_batch() {
        let r = bypass_registry();
        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let mut batch = PacketBatch::new();
        batch.add(pflow_batch::Packet::new(b"x", 0));
        p.emit(a, DROP_GATE, batch).unwrap();
    }

    #[test]
    fn split_preserves_per_gate_relative_order() {
        struct Recorder {
            seen: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
        }
        impl Module for Recorder {
            fn process_batch(&mut self, _ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
                let mut seen = self.seen.lock().unwrap();
                for pkt in batch.pkts().iter().flatten() {
                    seen.push(pkt.data()[0]);
                }
            }
        }

        let mut r = ModuleClassRegistry::new();
        let evens = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let odds = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        r.register(ModuleClass::new("Source", 0, 2, || Box::new(Bypass)));
        {
            let evens = evens.clone();
            r.register(ModuleClass::new("Evens", 1, 0, move || Box::new(Recorder { seen: evens.clone() })));
        }
        {
            let odds = odds.clone();
            r.register(ModuleClass::new("Odds", 1, 0, move || Box::new(Recorder { seen: odds.clone() })));
        }

        let mut p = Pipeline::new(192);
        let src = p.create_module(&r, "Source", "src").unwrap();
        let e = p.create_module(&r, "Evens", "e").unwrap();
        let o = p.create_module(&r, "Odds", "o").unwrap();
        p.connect_modules(src, 0, e, 0).unwrap();
        p.connect_modules(src, 1, o, 0).unwrap();

        let mut batch = PacketBatch::new();
        let mut targets = Vec::new();
        for i in 0..6u8 {
            batch.add(pflow_batch::Packet::new(&[i], 0));
            targets.push(if i % 2 == 0 { 0 } else { 1 });
        }
        p.split(src, batch, &targets).unwrap();

        assert_eq!(*evens.lock().unwrap(), vec![0, 2, 4]);
        assert_eq!(*odds.lock().unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn metadata_attribute_size_mismatch_rejects_module_creation() {
        struct WriterA;
        impl Module for WriterA {
            fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
                ctx.emit(0, batch);
            }
            fn declare_attrs(&self) -> Vec<MetadataAttribute> {
                vec![MetadataAttribute::write("x", 2)]
            }
        }
        struct WriterB;
        impl Module for WriterB {
            fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, batch: PacketBatch) {
                ctx.emit(0, batch);
            }
            fn declare_attrs(&self) -> Vec<MetadataAttribute> {
                vec![MetadataAttribute::write("x", 4)]
            }
        }

        let mut r = ModuleClassRegistry::new();
        r.register(ModuleClass::new("A", 1, 1, || Box::new(WriterA)));
        r.register(ModuleClass::new("B", 1, 1, || Box::new(WriterB)));
        let mut p = Pipeline::new(192);
        p.create_module(&r, "A", "a").unwrap();
        let err = p.create_module(&r, "B", "b").unwrap_err();
        assert!(matches!(err, Error::Metadata(pflow_metadata::Error::SizeMismatch { .. })));
    }

    #[test]
    fn metadata_recompute_assigns_matching_offsets() {
        let mut r = ModuleClassRegistry::new();
        r.register(ModuleClass::new("Counter", 1, 1, || {
            Box::new(Counter {
                attrs: vec![MetadataAttribute::write("x", 4)],
            })
        }));
        r.register(ModuleClass::new("Reader", 1, 0, || {
            Box::new(Counter {
                attrs: vec![MetadataAttribute::read("x", 4)],
            })
        }));

        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Counter", "a").unwrap();
        let b = p.create_module(&r, "Reader", "b").unwrap();
        p.connect_modules(a, 0, b, 0).unwrap();
        p.recompute_metadata().unwrap();

        let off_a = p.attr_offset_by_name(a, "x").unwrap();
        let off_b = p.attr_offset_by_name(b, "x").unwrap();
        assert_eq!(off_a, off_b);
        assert!(pflow_metadata::is_valid(off_a));
    }

    #[test]
    fn backpressure_signal_propagates_to_parent_task_roots() {
        let r = bypass_registry();
        let mut p = Pipeline::new(192);
        let root = p.create_module(&r, "Bypass", "root").unwrap();
        let leaf = p.create_module(&r, "Bypass", "leaf").unwrap();
        p.set_parent_tasks(leaf, vec![root]);

        assert_eq!(p.children_overload(root), 0);
        p.signal_overload(leaf);
        assert_eq!(p.children_overload(root), 1);
        // signalling again while already overloaded is a no-op
        p.signal_overload(leaf);
        assert_eq!(p.children_overload(root), 1);
        p.signal_underload(leaf);
        assert_eq!(p.children_overload(root), 0);
    }

    #[test]
    fn backpressure_from_three_terminals_accumulates_on_one_root() {
        // t1 feeds m1, m2, m3, each of which reaches one of the terminal
        // tasks t2, t3, t4. Each terminal signals overload independently;
        // t1's children_overload tracks how many of its descendants are
        // currently overloaded, not just whether any are.
        let r = bypass_registry();
        let mut p = Pipeline::new(192);
        let t1 = p.create_module(&r, "Bypass", "t1").unwrap();
        let t2 = p.create_module(&r, "Bypass", "t2").unwrap();
        let t3 = p.create_module(&r, "Bypass", "t3").unwrap();
        let t4 = p.create_module(&r, "Bypass", "t4").unwrap();
        p.set_parent_tasks(t2, vec![t1]);
        p.set_parent_tasks(t3, vec![t1]);
        p.set_parent_tasks(t4, vec![t1]);

        assert_eq!(p.children_overload(t1), 0);
        p.signal_overload(t2);
        p.signal_overload(t3);
        p.signal_overload(t4);
        assert_eq!(p.children_overload(t1), 3);

        p.signal_underload(t2);
        p.signal_underload(t3);
        p.signal_underload(t4);
        assert_eq!(p.children_overload(t1), 0);
    }

    #[test]
    fn cyclic_topology_reenters_without_panicking() {
        // A -> B -> A, a genuine cycle. Each hop increments a shared
        // counter and the packet's own first byte; once the byte reaches
        // a cap the module drops it instead of forwarding, so the loop
        // terminates instead of bouncing forever. The point of the test
        // is that dispatching back into a module still on the call stack
        // queues instead of panicking on an already-checked-out handler.
        struct Hop {
            hops: std::sync::Arc<std::sync::atomic::AtomicUsize>,
            cap: u8,
        }
        impl Module for Hop {
            fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, _igate_idx: usize, mut batch: PacketBatch) {
                self.hops.fetch_add(batch.cnt(), std::sync::atomic::Ordering::SeqCst);
                for slot in batch.pkts_mut().iter_mut() {
                    if let Some(pkt) = slot {
                        let hop = pkt.data()[0] + 1;
                        if hop >= self.cap {
                            *slot = None;
                        } else {
                            pkt.data_mut()[0] = hop;
                        }
                    }
                }
                if !batch.is_empty() {
                    ctx.emit(0, batch);
                }
            }
        }

        let hops = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut r = ModuleClassRegistry::new();
        {
            let hops = hops.clone();
            r.register(ModuleClass::new("A", 1, 1, move || {
                Box::new(Hop { hops: hops.clone(), cap: 5 })
            }));
        }
        {
            let hops = hops.clone();
            r.register(ModuleClass::new("B", 1, 1, move || {
                Box::new(Hop { hops: hops.clone(), cap: 5 })
            }));
        }

        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "A", "a").unwrap();
        let b = p.create_module(&r, "B", "b").unwrap();
        p.connect_modules(a, 0, b, 0).unwrap();
        p.connect_modules(b, 0, a, 0).unwrap();

        let mut batch = PacketBatch::new();
        batch.add(pflow_batch::Packet::new(&[0u8], 0));
        p.emit(a, 0, batch).unwrap();

        assert_eq!(hops.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[test]
    fn destroy_module_severs_all_its_gates() {
        let r = bypass_registry();
        let mut p = Pipeline::new(192);
        let a = p.create_module(&r, "Bypass", "a").unwrap();
        let b = p.create_module(&r, "Bypass", "b").unwrap();
        p.connect_modules(a, 0, b, 0).unwrap();
        p.destroy_module(b).unwrap();
        assert_eq!(p.downstream(a), Vec::<ModuleId>::new());
        assert!(p.find("b").is_none());
    }
}
