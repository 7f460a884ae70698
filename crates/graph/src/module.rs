// SPDX-License-Identifier: Apache-2.0

//! The `Module` trait modules implement, and the class registry that
//! constructs them.
//!
//! Module polymorphism is an interface, not inheritance: a class is a
//! factory plus declared gate counts, registered once into a
//! [`ModuleClassRegistry`] at process start rather than via constructor side
//! effects on a mutable global.

use std::collections::HashMap;
use std::sync::Arc;

use pflow_batch::PacketBatch;
use pflow_metadata::MetadataAttribute;

use crate::error::Error;
use crate::ids::ModuleId;

/// Outcome of a module's task entry point: whether it wants to be retried
/// later, and how much work it did, for the scheduler's resource
/// bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskResult {
    /// The task should not be immediately rescheduled, e.g. because it
    /// observed backpressure or an empty source.
    pub block: bool,
    pub packets: u32,
    pub bits: u64,
}

/// The behavior every module implements.
///
/// `process_batch` and `run_task` both receive a [`ModuleContext`] through
/// which they emit batches to their own output gates rather than holding a
/// reference to the owning [`crate::Pipeline`] directly; that keeps the
/// trait object free of a lifetime parameter.
pub trait Module: Send {
    /// Called once after the module is registered and its gates are known,
    /// before any batch can reach it.
    fn init(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<(), String> {
        Ok(())
    }

    /// Called once as the module is removed from the pipeline.
    fn deinit(&mut self, _ctx: &mut ModuleContext<'_>) {}

    /// Consumes a batch arriving on `igate_idx`, typically transforming it
    /// and emitting to one or more output gates via `ctx`.
    fn process_batch(&mut self, ctx: &mut ModuleContext<'_>, igate_idx: usize, batch: PacketBatch);

    /// Source modules override this; it is invoked by a scheduled [`Task`]
    /// bound to this module rather than by an upstream `Emit`.
    ///
    /// [`Task`]: ../pflow_sched/struct.Task.html
    fn run_task(&mut self, _ctx: &mut ModuleContext<'_>, _arg: u64) -> TaskResult {
        TaskResult {
            block: true,
            ..TaskResult::default()
        }
    }

    /// True if this module overrides [`Module::run_task`]. The registry
    /// consults this once at construction to decide whether the module may
    /// own tasks; it is not re-checked per call.
    fn is_task(&self) -> bool {
        false
    }

    /// Declares this module's metadata attributes, in a stable order that
    /// becomes each attribute's index for offset lookups.
    fn declare_attrs(&self) -> Vec<MetadataAttribute> {
        Vec::new()
    }

    /// True if more than one worker may call `process_batch`/`run_task`
    /// concurrently on this instance. Defaults to `false`: most modules hold
    /// unsynchronized mutable state.
    fn max_allowed_workers(&self) -> u8 {
        1
    }

    /// Bitmask of NUMA nodes a worker must belong to in order to reach this
    /// module. Defaults to every node (bit `i` set for all `i`), i.e. no
    /// constraint.
    fn node_constraints(&self) -> u64 {
        u64::MAX
    }
}

/// The batch-emission surface a [`Module`] is given during `process_batch`
/// and `run_task`. A thin handle back into the owning pipeline's gate
/// traversal, scoped to one call.
pub struct ModuleContext<'a> {
    pub module: ModuleId,
    pub(crate) emit: &'a mut dyn FnMut(usize, PacketBatch),
}

impl<'a> ModuleContext<'a> {
    #[must_use]
    pub fn new(module: ModuleId, emit: &'a mut dyn FnMut(usize, PacketBatch)) -> Self {
        ModuleContext { module, emit }
    }

    /// Emits `batch` on this module's output gate `ogate_idx`. See
    /// [`crate::Pipeline::emit`] for the traversal semantics.
    pub fn emit(&mut self, ogate_idx: usize, batch: PacketBatch) {
        (self.emit)(ogate_idx, batch);
    }
}

/// A registered module class: a name, declared gate counts, help text, and
/// a factory that builds new instances.
pub struct ModuleClass {
    pub name: String,
    pub help: String,
    pub igates: usize,
    pub ogates: usize,
    factory: Box<dyn Fn() -> Box<dyn Module> + Send + Sync>,
}

impl std::fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleClass")
            .field("name", &self.name)
            .field("igates", &self.igates)
            .field("ogates", &self.ogates)
            .finish_non_exhaustive()
    }
}

impl ModuleClass {
    pub fn new<F>(name: impl Into<String>, igates: usize, ogates: usize, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        ModuleClass {
            name: name.into(),
            help: String::new(),
            igates,
            ogates,
            factory: Box::new(factory),
        }
    }

    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    #[must_use]
    pub fn build(&self) -> Box<dyn Module> {
        (self.factory)()
    }
}

/// Process-lifetime registry of module classes, constructed explicitly at
/// startup rather than populated by static-initializer side effects.
#[derive(Default)]
pub struct ModuleClassRegistry {
    classes: HashMap<String, Arc<ModuleClass>>,
}

impl ModuleClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ModuleClass) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ModuleClass>> {
        self.classes.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ModuleClass>, Error> {
        self.get(name).ok_or_else(|| Error::UnknownClass {
            class: name.to_string(),
        })
    }

    /// The registered class names, for the control plane to enumerate.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}
