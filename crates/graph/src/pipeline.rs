// SPDX-License-Identifier: Apache-2.0

//! The pipeline graph: a name-keyed collection of modules, their gates, and
//! the computed metadata offset table.
//!
//! Modules and gates live in two parallel `SlotMap` arenas addressed by
//! stable integer ids, replacing the source's raw-pointer module graph. All
//! graph mutation happens through `&mut self`; callers coordinate the
//! "paused workers" window this requires themselves (see the crate root
//! docs), since pausing workers is a scheduler-level concern this crate
//! does not own.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use indexmap::IndexMap;
use slotmap::SlotMap;

use pflow_batch::PacketBatch;
use pflow_metadata::{AttributeRegistry, MetadataAttribute, Offset, ScopeMap};

use crate::error::Error;
use crate::gate::{Direction, Gate, GateHook};
use crate::ids::{GateId, ModuleId};
use crate::module::{Module, ModuleClass, ModuleClassRegistry, ModuleContext, TaskResult};

/// Reserved output gate index meaning "free the batch silently". No real
/// gate is ever allocated at this index.
pub const DROP_GATE: usize = usize::MAX;

struct ModuleEntry {
    name: String,
    class: std::sync::Arc<ModuleClass>,
    igates: Vec<GateId>,
    ogates: Vec<GateId>,
    attrs: Vec<MetadataAttribute>,
    handler: Option<Box<dyn Module>>,
    /// Deliveries that arrived for this module while its handler was
    /// already checked out by an outer, still-running call -- a cyclic
    /// topology routing a batch back into a module before its own
    /// `process_batch` call has returned. Drained by whichever call has
    /// the handler checked out, once its own work finishes.
    pending: VecDeque<(usize, PacketBatch)>,
    /// Task-root modules (modules whose `run_task` execution can reach this
    /// module) -- the derived `parent_tasks_` set from task-graph
    /// maintenance, recomputed by `pflow-sched` via `set_parent_tasks`.
    parent_tasks: Vec<ModuleId>,
    /// Incremented/decremented only on a module that is itself a task
    /// root, by every distinct descendant module that currently has
    /// `overload == true` and names this module in its `parent_tasks`.
    children_overload: AtomicI32,
    overload: AtomicBool,
}

/// The module graph, gate hooks, and metadata offset table for one running
/// configuration.
pub struct Pipeline {
    modules: SlotMap<ModuleId, ModuleEntry>,
    gates: SlotMap<GateId, Gate>,
    names: HashMap<String, ModuleId>,
    /// Insertion order, used as the allocator's stable `module_ids()` order
    /// and the tie-break for degree-equal scope components.
    order: Vec<ModuleId>,
    attributes: AttributeRegistry,
    offsets: pflow_metadata::OffsetTable<ModuleId>,
    scope_maps: HashMap<ModuleId, ScopeMap>,
    metadata_total_size: u16,
}

impl Pipeline {
    #[must_use]
    pub fn new(metadata_total_size: u16) -> Self {
        Pipeline {
            modules: SlotMap::with_key(),
            gates: SlotMap::with_key(),
            names: HashMap::new(),
            order: Vec::new(),
            attributes: AttributeRegistry::new(),
            offsets: pflow_metadata::OffsetTable::default(),
            scope_maps: HashMap::new(),
            metadata_total_size,
        }
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    #[must_use]
    pub fn name(&self, module: ModuleId) -> Option<&str> {
        self.modules.get(module).map(|m| m.name.as_str())
    }

    /// Builds a module instance from `class`, registers its declared
    /// attributes, and allocates its gates. Fails (leaving the graph
    /// unchanged) only if an attribute name collides with a prior
    /// declaration at a different size.
    pub fn create_module(
        &mut self,
        registry: &ModuleClassRegistry,
        class_name: &str,
        name: impl Into<String>,
    ) -> Result<ModuleId, Error> {
        let name = name.into();
        let class = registry.lookup(class_name)?;
        let handler = class.build();
        let attrs = handler.declare_attrs();

        let mut registered: Vec<String> = Vec::with_capacity(attrs.len());
        for attr in &attrs {
            if let Err(e) = self.attributes.register(attr) {
                for done in &registered {
                    self.attributes.deregister(done);
                }
                return Err(e.into());
            }
            registered.push(attr.name.clone());
        }

        let id = self.modules.insert(ModuleEntry {
            name: name.clone(),
            class: class.clone(),
            igates: Vec::new(),
            ogates: Vec::new(),
            attrs,
            handler: Some(handler),
            pending: VecDeque::new(),
            parent_tasks: Vec::new(),
            children_overload: AtomicI32::new(0),
            overload: AtomicBool::new(false),
        });

        let igates: Vec<GateId> = (0..class.igates).map(|i| self.gates.insert(Gate::new_in(id, i))).collect();
        let ogates: Vec<GateId> = (0..class.ogates).map(|i| self.gates.insert(Gate::new_out(id, i))).collect();
        let entry = &mut self.modules[id];
        entry.igates = igates;
        entry.ogates = ogates;

        self.names.insert(name, id);
        self.order.push(id);

        let mut noop = |_: usize, _: PacketBatch| {};
        let mut handler = self.modules[id].handler.take().expect("handler present");
        let result = handler.init(&mut ModuleContext::new(id, &mut noop));
        self.modules[id].handler = Some(handler);
        if let Err(reason) = result {
            let _ = self.destroy_module(id);
            return Err(Error::CommandFailed {
                module: id,
                command: "init".to_string(),
                reason,
            });
        }

        Ok(id)
    }

    /// Tears a module down: severs every gate pairing touching it,
    /// deregisters its attributes, and removes it from the arena. Its
    /// gates are removed along with it.
    pub fn destroy_module(&mut self, module: ModuleId) -> Result<(), Error> {
        let entry = self.modules.get(module).ok_or(Error::UnknownModule { module })?;
        let igates = entry.igates.clone();
        let ogates = entry.ogates.clone();

        for (idx, _) in igates.iter().enumerate() {
            let _ = self.disconnect_upstream(module, idx);
        }
        for (idx, _) in ogates.iter().enumerate() {
            let _ = self.disconnect_modules(module, idx);
        }

        let mut entry = self.modules.remove(module).expect("checked above");
        if let Some(handler) = &mut entry.handler {
            let mut noop = |_: usize, _: PacketBatch| {};
            handler.deinit(&mut ModuleContext::new(module, &mut noop));
        }
        for attr in &entry.attrs {
            self.attributes.deregister(&attr.name);
        }
        for gate in igates.into_iter().chain(ogates) {
            self.gates.remove(gate);
        }
        self.names.remove(&entry.name);
        self.order.retain(|&id| id != module);

        Ok(())
    }

    fn ogate_id(&self, module: ModuleId, ogate_idx: usize) -> Result<GateId, Error> {
        let entry = self.modules.get(module).ok_or(Error::UnknownModule { module })?;
        entry.ogates.get(ogate_idx).copied().ok_or(Error::BadGate {
            module,
            direction: "output",
            index: ogate_idx,
            declared: entry.ogates.len(),
        })
    }

    fn igate_id(&self, module: ModuleId, igate_idx: usize) -> Result<GateId, Error> {
        let entry = self.modules.get(module).ok_or(Error::UnknownModule { module })?;
        entry.igates.get(igate_idx).copied().ok_or(Error::BadGate {
            module,
            direction: "input",
            index: igate_idx,
            declared: entry.igates.len(),
        })
    }

    /// Creates the edge `(src, ogate_idx) -> (dst, igate_idx)`.
    pub fn connect_modules(&mut self, src: ModuleId, ogate_idx: usize, dst: ModuleId, igate_idx: usize) -> Result<(), Error> {
        let ogate = self.ogate_id(src, ogate_idx)?;
        let igate = self.igate_id(dst, igate_idx)?;

        if self.gates[ogate].paired_igate().is_some() {
            return Err(Error::AlreadyConnected { module: src, ogate_idx });
        }

        self.gates[ogate].set_paired_igate(Some(igate));
        self.gates[igate].add_upstream(ogate);
        Ok(())
    }

    /// Severs the pairing on `src`'s `ogate_idx`, if any. A no-op if it was
    /// already unpaired.
    pub fn disconnect_modules(&mut self, src: ModuleId, ogate_idx: usize) -> Result<(), Error> {
        let ogate = self.ogate_id(src, ogate_idx)?;
        if let Some(igate) = self.gates[ogate].paired_igate() {
            self.gates[igate].remove_upstream(ogate);
            self.gates[ogate].set_paired_igate(None);
        }
        Ok(())
    }

    /// Severs every ogate feeding `dst`'s `igate_idx`. A no-op if none are
    /// connected.
    pub fn disconnect_upstream(&mut self, dst: ModuleId, igate_idx: usize) -> Result<(), Error> {
        let igate = self.igate_id(dst, igate_idx)?;
        let upstream: smallvec::SmallVec<[GateId; 4]> = self.gates[igate].upstream_ogates().into();
        for ogate in upstream {
            self.gates[ogate].set_paired_igate(None);
        }
        self.gates[igate].clear_upstream();
        Ok(())
    }

    /// Attaches `hook` to `module`'s gate (`direction`, `index`), ordered
    /// by `priority` ascending then insertion order.
    pub fn add_hook(&mut self, module: ModuleId, direction: Direction, index: usize, priority: i32, hook: Box<dyn GateHook>) -> Result<(), Error> {
        let gate = match direction {
            Direction::In => self.igate_id(module, index)?,
            Direction::Out => self.ogate_id(module, index)?,
        };
        self.gates[gate].add_hook(priority, hook);
        Ok(())
    }

    /// Emits `batch` on `module`'s output gate `ogate_idx`, running that
    /// gate's hooks, then the paired igate's hooks, then the downstream
    /// module's `process_batch` -- all on the caller's stack.
    ///
    /// `ogate_idx == DROP_GATE` or an unbound ogate silently frees the
    /// batch.
    pub fn emit(&mut self, module: ModuleId, ogate_idx: usize, batch: PacketBatch) -> Result<(), Error> {
        if ogate_idx == DROP_GATE {
            return Ok(());
        }
        let ogate = self.ogate_id(module, ogate_idx)?;
        self.gates[ogate].run_hooks(&batch);

        let Some(igate) = self.gates[ogate].paired_igate() else {
            return Ok(());
        };
        self.gates[igate].run_hooks(&batch);

        let dst_module = self.gates[igate].module;
        let dst_idx = self.gates[igate].index;
        self.dispatch(dst_module, dst_idx, batch)
    }

    /// Distributes `batch`'s packets across output gates named by
    /// `ogate_for_packet[i]` (or [`DROP_GATE`]), preserving each target
    /// gate's relative packet order, then emits each resulting sub-batch.
    pub fn split(&mut self, module: ModuleId, mut batch: PacketBatch, ogate_for_packet: &[usize]) -> Result<(), Error> {
        let mut scratch: IndexMap<usize, PacketBatch> = IndexMap::new();
        for (i, slot) in batch.pkts_mut().iter_mut().enumerate() {
            let target = ogate_for_packet.get(i).copied().unwrap_or(DROP_GATE);
            if target == DROP_GATE {
                *slot = None;
                continue;
            }
            if let Some(pkt) = slot.take() {
                scratch.entry(target).or_insert_with(PacketBatch::new).add(pkt);
            }
        }
        for (ogate_idx, sub_batch) in scratch {
            self.emit(module, ogate_idx, sub_batch)?;
        }
        Ok(())
    }

    /// Runs any deliveries queued for `module` while `handler` (already
    /// checked out of `self.modules[module]` by the caller) was busy --
    /// the trampoline that lets a cyclic graph route a batch back into a
    /// module that is still on the call stack without a second live
    /// `&mut` to the same handler.
    fn drain_pending(&mut self, module: ModuleId, handler: &mut Box<dyn Module>) {
        while let Some((igate_idx, batch)) = self.modules[module].pending.pop_front() {
            let mut emit_cb = |idx: usize, b: PacketBatch| {
                let _ = self.emit(module, idx, b);
            };
            let mut ctx = ModuleContext::new(module, &mut emit_cb);
            handler.process_batch(&mut ctx, igate_idx, batch);
        }
    }

    fn dispatch(&mut self, module: ModuleId, igate_idx: usize, batch: PacketBatch) -> Result<(), Error> {
        let Some(mut handler) = self.modules[module].handler.take() else {
            // `module` is already executing higher up this call stack: a
            // cyclic topology routed a batch back into it before that
            // call returned. Queue it; the in-progress call drains it
            // before handing the handler back.
            self.modules[module].pending.push_back((igate_idx, batch));
            return Ok(());
        };
        {
            let mut emit_cb = |idx: usize, b: PacketBatch| {
                // best-effort: a bad gate index from module logic is a
                // programmer error, not a runtime condition to propagate.
                let _ = self.emit(module, idx, b);
            };
            let mut ctx = ModuleContext::new(module, &mut emit_cb);
            handler.process_batch(&mut ctx, igate_idx, batch);
        }
        self.drain_pending(module, &mut handler);
        self.modules[module].handler = Some(handler);
        Ok(())
    }

    /// Invokes `module`'s `run_task` with `arg`, routing any emissions
    /// through the same gate traversal as [`Pipeline::emit`].
    pub fn run_task(&mut self, module: ModuleId, arg: u64) -> Result<TaskResult, Error> {
        let Some(mut handler) = self.modules.get_mut(module).ok_or(Error::UnknownModule { module })?.handler.take() else {
            // The task module is already running somewhere up this stack
            // (it is reachable from its own task through a cycle). There
            // is no second handler to run it on; report this round blocked.
            return Ok(TaskResult { block: true, ..TaskResult::default() });
        };
        let result = {
            let mut emit_cb = |idx: usize, b: PacketBatch| {
                let _ = self.emit(module, idx, b);
            };
            let mut ctx = ModuleContext::new(module, &mut emit_cb);
            handler.run_task(&mut ctx, arg)
        };
        self.drain_pending(module, &mut handler);
        self.modules[module].handler = Some(handler);
        Ok(result)
    }

    /// The module's declared task-root set, as maintained externally by
    /// the scheduler's task-graph pass.
    pub fn set_parent_tasks(&mut self, module: ModuleId, parents: Vec<ModuleId>) {
        if let Some(entry) = self.modules.get_mut(module) {
            entry.parent_tasks = parents;
        }
    }

    #[must_use]
    pub fn parent_tasks(&self, module: ModuleId) -> &[ModuleId] {
        self.modules.get(module).map(|m| m.parent_tasks.as_slice()).unwrap_or(&[])
    }

    /// The number of currently-overloaded descendants signaling back to
    /// this module, if it is itself a task root. Read with relaxed
    /// ordering, matching the cooperative, best-effort nature of
    /// backpressure.
    #[must_use]
    pub fn children_overload(&self, module: ModuleId) -> i32 {
        self.modules.get(module).map(|m| m.children_overload.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Raises backpressure from `module`: flips its own overload flag (a
    /// no-op if already set) and increments every parent task-root's
    /// counter.
    pub fn signal_overload(&mut self, module: ModuleId) {
        let Some(entry) = self.modules.get(module) else { return };
        if entry.overload.swap(true, Ordering::Relaxed) {
            return;
        }
        let parents = entry.parent_tasks.clone();
        for parent in parents {
            if let Some(p) = self.modules.get(parent) {
                p.children_overload.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// The symmetric decrement of [`Pipeline::signal_overload`].
    pub fn signal_underload(&mut self, module: ModuleId) {
        let Some(entry) = self.modules.get(module) else { return };
        if !entry.overload.swap(false, Ordering::Relaxed) {
            return;
        }
        let parents = entry.parent_tasks.clone();
        for parent in parents {
            if let Some(p) = self.modules.get(parent) {
                p.children_overload.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Runs the metadata allocator over the current graph, replacing the
    /// offset table. Fails with [`pflow_metadata::Error::NoSpace`] (wrapped
    /// as [`Error::Metadata`]) if any scope component did not fit, leaving
    /// the previous offset table in place.
    pub fn recompute_metadata(&mut self) -> Result<(), Error> {
        let alloc = pflow_metadata::allocate(self, self.metadata_total_size);
        if let Some((_, name, size)) = alloc.out_of_space.first() {
            return Err(Error::Metadata(pflow_metadata::Error::NoSpace {
                name: name.clone(),
                size: *size,
                total: self.metadata_total_size,
            }));
        }
        self.offsets = alloc.table;
        self.scope_maps = alloc.scope_maps;
        Ok(())
    }

    #[must_use]
    pub fn attr_offset(&self, module: ModuleId, attr_idx: usize) -> Offset {
        self.offsets.offset(module, attr_idx)
    }

    #[must_use]
    pub fn attr_offset_by_name(&self, module: ModuleId, name: &str) -> Option<Offset> {
        let entry = self.modules.get(module)?;
        let idx = entry.attrs.iter().position(|a| a.name == name)?;
        Some(self.offsets.offset(module, idx))
    }

    #[must_use]
    pub fn scope_owner(&self, module: ModuleId, byte: usize) -> Option<usize> {
        self.scope_maps.get(&module).and_then(|m| m.get(byte).copied().flatten())
    }

    /// True if `module`'s handler overrides [`Module::run_task`], i.e. it
    /// may own a task and act as a task-graph boundary. `false` for an
    /// unknown module.
    #[must_use]
    pub fn is_task(&self, module: ModuleId) -> bool {
        self.modules
            .get(module)
            .and_then(|m| m.handler.as_ref())
            .map(|h| h.is_task())
            .unwrap_or(false)
    }

    /// The maximum number of distinct workers allowed to reach `module`
    /// concurrently. `1` (the trait default) for an unknown module.
    #[must_use]
    pub fn max_allowed_workers(&self, module: ModuleId) -> u8 {
        self.modules
            .get(module)
            .and_then(|m| m.handler.as_ref())
            .map(|h| h.max_allowed_workers())
            .unwrap_or(1)
    }

    /// The NUMA node bitmask `module` itself declares, ignoring downstream
    /// modules. `u64::MAX` (no constraint) for an unknown module.
    #[must_use]
    pub fn node_constraints(&self, module: ModuleId) -> u64 {
        self.modules
            .get(module)
            .and_then(|m| m.handler.as_ref())
            .map(|h| h.node_constraints())
            .unwrap_or(u64::MAX)
    }

    /// The intersection of `module`'s own NUMA constraint with every
    /// module reachable downstream from it, stopping at (but including) the
    /// next task-root module -- mirroring the boundary
    /// [`crate::Pipeline::is_task`] draws for `parent_tasks` traversal.
    #[must_use]
    pub fn effective_node_constraint(&self, module: ModuleId) -> u64 {
        use pflow_metadata::GraphView;
        let mut mask = self.node_constraints(module);
        let mut visited = std::collections::HashSet::new();
        let mut stack = self.downstream(module);
        while let Some(m) = stack.pop() {
            if !visited.insert(m) {
                continue;
            }
            mask &= self.node_constraints(m);
            if self.is_task(m) {
                continue;
            }
            stack.extend(self.downstream(m));
        }
        mask
    }
}

impl pflow_metadata::GraphView for Pipeline {
    type Id = ModuleId;

    fn module_ids(&self) -> Vec<ModuleId> {
        self.order.clone()
    }

    fn attrs(&self, module: ModuleId) -> &[MetadataAttribute] {
        self.modules.get(module).map(|m| m.attrs.as_slice()).unwrap_or(&[])
    }

    fn downstream(&self, module: ModuleId) -> Vec<ModuleId> {
        let Some(entry) = self.modules.get(module) else { return Vec::new() };
        entry
            .ogates
            .iter()
            .filter_map(|&g| self.gates[g].paired_igate())
            .map(|igate| self.gates[igate].module)
            .collect()
    }

    fn upstream(&self, module: ModuleId) -> Vec<ModuleId> {
        let Some(entry) = self.modules.get(module) else { return Vec::new() };
        entry
            .igates
            .iter()
            .flat_map(|&g| self.gates[g].upstream_ogates().iter().copied())
            .map(|ogate| self.gates[ogate].module)
            .collect()
    }

    fn is_source(&self, module: ModuleId) -> bool {
        self.modules.get(module).map(|m| m.igates.is_empty()).unwrap_or(true)
    }
}
