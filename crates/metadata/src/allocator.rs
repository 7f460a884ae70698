// SPDX-License-Identifier: Apache-2.0

//! The per-pipeline metadata offset allocator.
//!
//! This is a compile-once-per-pipeline pass: given every module's declared
//! attributes and the module graph's connectivity, it computes a byte
//! offset (or a sentinel) per module per attribute such that modules that
//! can observe the same live value of an attribute agree on its offset,
//! and modules that cannot observe each other's values may share bytes.
//!
//! The traversal state (`scope_components`, per-module visit stamps) lives
//! entirely in the [`Allocation`] value built and consumed by [`allocate`]
//! rather than in file-scope statics, so a pipeline can be recomputed
//! repeatedly and concurrently with other pipelines.

use std::collections::HashMap;
use std::hash::Hash;

use crate::attribute::{AccessMode, MetadataAttribute};
use crate::offset::{self, Offset, NO_READ, NO_SPACE, NO_WRITE};

/// Bound required of whatever type a caller uses to identify a module.
pub trait ModuleKey: Copy + Eq + Hash + Ord + std::fmt::Debug {}
impl<T: Copy + Eq + Hash + Ord + std::fmt::Debug> ModuleKey for T {}

/// A read-only view of the module graph that the allocator traverses.
///
/// Implemented by the pipeline graph over its own module/gate
/// representation; the allocator never needs to know about gates, hooks,
/// or anything else beyond direct one-hop connectivity and declared
/// attributes.
pub trait GraphView {
    type Id: ModuleKey;

    /// All modules in the pipeline, in a stable, implementation-defined
    /// order (insertion order is a good choice, since it is also the
    /// tie-break order for degree-equal scope components).
    fn module_ids(&self) -> Vec<Self::Id>;

    /// The attributes declared by this module, in declaration order.
    fn attrs(&self, module: Self::Id) -> &[MetadataAttribute];

    /// Modules directly reachable by following one of `module`'s output
    /// gates to its paired input gate.
    fn downstream(&self, module: Self::Id) -> Vec<Self::Id>;

    /// Modules directly feeding one of `module`'s input gates.
    fn upstream(&self, module: Self::Id) -> Vec<Self::Id>;

    /// True if `module` has no input gates (a source).
    fn is_source(&self, module: Self::Id) -> bool;
}

/// Per-module, per-declaration-index offsets computed by [`allocate`].
#[derive(Debug, Clone)]
pub struct OffsetTable<Id: ModuleKey> {
    offsets: HashMap<(Id, usize), Offset>,
}

impl<Id: ModuleKey> Default for OffsetTable<Id> {
    fn default() -> Self {
        Self { offsets: HashMap::new() }
    }
}

impl<Id: ModuleKey> OffsetTable<Id> {
    /// The offset assigned to the `attr_idx`-th attribute declared by
    /// `module`. Attributes never touched by any scope component (true
    /// orphans with no writer anywhere in the pipeline) default to
    /// [`NO_READ`].
    #[must_use]
    pub fn offset(&self, module: Id, attr_idx: usize) -> Offset {
        self.offsets.get(&(module, attr_idx)).copied().unwrap_or(NO_READ)
    }

    fn set(&mut self, module: Id, attr_idx: usize, offset: Offset) {
        self.offsets.insert((module, attr_idx), offset);
    }
}

/// Debug-only reverse map from byte offset to the owning scope component,
/// per module. Not consulted by the allocator or the runtime; it exists so
/// operators can explain why two attributes do or do not alias.
pub type ScopeMap = Vec<Option<usize>>;

/// The full result of a metadata allocation pass.
#[derive(Debug)]
pub struct Allocation<Id: ModuleKey> {
    pub table: OffsetTable<Id>,
    pub scope_maps: HashMap<Id, ScopeMap>,
    /// (module, attribute name) pairs with no reachable writer. Each is a
    /// warning, not a fatal error; the attribute reads as the zero value.
    pub orphan_readers: Vec<(Id, String)>,
    /// Set if at least one scope component could not be packed into the
    /// metadata region.
    pub out_of_space: Vec<(Id, String, u8)>,
}

struct ScopeComponent<Id> {
    name: String,
    size: u8,
    offset: Offset,
    modules: Vec<Id>,
    invalid: bool,
    assigned: bool,
    degree: usize,
}

impl<Id> ScopeComponent<Id> {
    fn empty() -> Self {
        ScopeComponent {
            name: String::new(),
            size: 0,
            offset: NO_WRITE,
            modules: Vec::new(),
            invalid: false,
            assigned: false,
            degree: 0,
        }
    }
}

/// Traversal bookkeeping threaded through the recursive scope-identification
/// pass. Scoped to one call of [`allocate`]; never a global.
struct Ctx<Id: ModuleKey> {
    components: Vec<ScopeComponent<Id>>,
    /// Per-module cycle-detection stamp: the index of the scope component
    /// currently being traced through this module, or `-1` if free.
    stamp: HashMap<Id, isize>,
    /// Per-(module, attr index) "already claimed by component N" stamp for
    /// write-mode attributes, mirroring the source's per-attribute
    /// `scope_id` field. `-1` means unclaimed.
    attr_scope: HashMap<(Id, usize), isize>,
}

impl<Id: ModuleKey> Ctx<Id> {
    fn add_module(&mut self, comp_idx: usize, module: Id, name: &str, size: u8) {
        let comp = &mut self.components[comp_idx];
        if comp.modules.contains(&module) {
            return;
        }
        if comp.modules.is_empty() {
            comp.name = name.to_string();
            comp.size = size;
        }
        comp.modules.push(module);
    }
}

fn find_attr<G: GraphView>(graph: &G, module: G::Id, name: &str, size: u8) -> Option<(usize, AccessMode)> {
    graph
        .attrs(module)
        .iter()
        .enumerate()
        .find(|(_, a)| a.name == name && a.size == size)
        .map(|(idx, a)| (idx, a.mode))
}

#[allow(clippy::too_many_arguments)]
fn traverse_upstream<G: GraphView>(graph: &G, module: G::Id, name: &str, size: u8, comp_idx: usize, ctx: &mut Ctx<G::Id>) {
    ctx.add_module(comp_idx, module, name, size);

    if let Some((idx, AccessMode::Write)) = find_attr(graph, module, name, size) {
        if ctx.attr_scope.get(&(module, idx)).copied().unwrap_or(-1) == -1 {
            identify_scope_component(graph, module, idx, name, size, comp_idx, ctx);
        }
        return;
    }

    if ctx.stamp.get(&module).copied().unwrap_or(-1) == comp_idx as isize {
        return;
    }
    ctx.stamp.insert(module, comp_idx as isize);

    let upstream = graph.upstream(module);
    for parent in &upstream {
        traverse_upstream(graph, *parent, name, size, comp_idx, ctx);
    }

    if upstream.is_empty() {
        ctx.components[comp_idx].invalid = true;
    }
}

#[allow(clippy::too_many_arguments)]
fn traverse_downstream<G: GraphView>(graph: &G, module: G::Id, name: &str, size: u8, comp_idx: usize, ctx: &mut Ctx<G::Id>) -> bool {
    if ctx.stamp.get(&module).copied().unwrap_or(-1) == comp_idx as isize {
        return false;
    }
    ctx.stamp.insert(module, comp_idx as isize);

    if let Some((idx, mode)) = find_attr(graph, module, name, size) {
        match mode {
            AccessMode::Read | AccessMode::Update => {
                ctx.add_module(comp_idx, module, name, size);
                ctx.attr_scope.insert((module, idx), comp_idx as isize);
                for child in graph.downstream(module) {
                    traverse_downstream(graph, child, name, size, comp_idx, ctx);
                }
                ctx.stamp.insert(module, -1);
                traverse_upstream(graph, module, name, size, comp_idx, ctx);
                return true;
            }
            AccessMode::Write => {
                ctx.stamp.insert(module, -1);
                return false;
            }
        }
    }

    let mut in_scope = false;
    for child in graph.downstream(module) {
        if traverse_downstream(graph, child, name, size, comp_idx, ctx) {
            in_scope = true;
        }
    }

    if in_scope {
        ctx.add_module(comp_idx, module, name, size);
        ctx.stamp.insert(module, -1);
        traverse_upstream(graph, module, name, size, comp_idx, ctx);
    }

    in_scope
}

#[allow(clippy::too_many_arguments)]
fn identify_scope_component<G: GraphView>(graph: &G, module: G::Id, attr_idx: usize, name: &str, size: u8, comp_idx: usize, ctx: &mut Ctx<G::Id>) {
    ctx.add_module(comp_idx, module, name, size);
    ctx.attr_scope.insert((module, attr_idx), comp_idx as isize);
    ctx.stamp.insert(module, comp_idx as isize);

    for child in graph.downstream(module) {
        traverse_downstream(graph, child, name, size, comp_idx, ctx);
    }
}

fn identify_single_scope_component<G: GraphView>(graph: &G, module: G::Id, attr_idx: usize, name: &str, size: u8, ctx: &mut Ctx<G::Id>) {
    let comp_idx = ctx.components.len();
    ctx.components.push(ScopeComponent::empty());
    identify_scope_component(graph, module, attr_idx, name, size, comp_idx, ctx);
}

fn disjoint<Id: ModuleKey>(a: &ScopeComponent<Id>, b: &ScopeComponent<Id>) -> bool {
    !a.modules.iter().any(|m| b.modules.contains(m))
}

fn align_ceil_pow2(size: u8) -> u16 {
    let mut p: u16 = 1;
    while p < size as u16 {
        p <<= 1;
    }
    p
}

fn next_offset(curr: u32, size: u8, total_size: u16) -> Option<u16> {
    let rounded = align_ceil_pow2(size) as u32;
    let mut off = curr;
    if off % rounded != 0 {
        off = (off / rounded + 1) * rounded;
    }
    let overflow = off + size as u32;
    if overflow > total_size as u32 {
        None
    } else {
        Some(off as u16)
    }
}

fn compute_degrees<Id: ModuleKey>(components: &mut [ScopeComponent<Id>]) {
    for i in 0..components.len() {
        for j in (i + 1)..components.len() {
            let (left, right) = components.split_at_mut(j);
            if !disjoint(&left[i], &right[0]) {
                left[i].degree += 1;
                right[0].degree += 1;
            }
        }
    }
}

fn assign_offsets<Id: ModuleKey>(components: &mut [ScopeComponent<Id>], total_size: u16) {
    for i in 0..components.len() {
        if components[i].invalid {
            components[i].offset = NO_READ;
            components[i].assigned = true;
            continue;
        }
        if components[i].assigned || components[i].modules.len() == 1 {
            continue;
        }

        let mut conflicts: Vec<(Offset, u8)> = Vec::new();
        for (j, other) in components.iter().enumerate() {
            if i == j {
                continue;
            }
            if other.assigned && !disjoint(&components[i], other) {
                conflicts.push((other.offset, other.size));
            }
        }
        conflicts.sort_by_key(|&(off, _)| off);

        let size = components[i].size;
        let mut offset: Option<u32> = Some(0);
        for (other_offset, other_size) in conflicts {
            if other_offset == NO_READ || other_offset == NO_WRITE || other_offset == NO_SPACE {
                continue;
            }
            let cur = match offset {
                Some(o) => o,
                None => break,
            };
            let other_offset = other_offset as u32;
            if cur + size as u32 > other_offset {
                offset = next_offset(other_offset + other_size as u32, size, total_size).map(u32::from);
                if offset.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        components[i].offset = match offset {
            Some(o) => o as Offset,
            None => NO_SPACE,
        };
        components[i].assigned = true;
    }
}

fn fill_offset_arrays<G: GraphView>(
    graph: &G,
    components: &[ScopeComponent<G::Id>],
    total_size: u16,
) -> (OffsetTable<G::Id>, HashMap<G::Id, ScopeMap>) {
    let mut table = OffsetTable::default();
    let mut scope_maps: HashMap<G::Id, ScopeMap> = HashMap::new();

    for (comp_idx, comp) in components.iter().enumerate() {
        let offset = if comp.modules.len() == 1 { NO_WRITE } else { comp.offset };

        for &module in &comp.modules {
            if let Some((attr_idx, mode)) = find_attr(graph, module, &comp.name, comp.size) {
                let resolved = if comp.invalid {
                    match mode {
                        AccessMode::Read | AccessMode::Update => NO_READ,
                        AccessMode::Write => NO_WRITE,
                    }
                } else {
                    offset
                };
                table.set(module, attr_idx, resolved);
            }

            if !comp.invalid && offset::is_valid(offset) {
                let map = scope_maps
                    .entry(module)
                    .or_insert_with(|| vec![None; total_size as usize]);
                let start = offset as usize;
                for slot in map.iter_mut().skip(start).take(comp.size as usize) {
                    *slot = Some(comp_idx);
                }
            }
        }
    }

    (table, scope_maps)
}

fn collect_orphans<G: GraphView>(graph: &G, table: &OffsetTable<G::Id>, module_ids: &[G::Id]) -> Vec<(G::Id, String)> {
    let mut out = Vec::new();
    for &module in module_ids {
        for (idx, attr) in graph.attrs(module).iter().enumerate() {
            if matches!(attr.mode, AccessMode::Read | AccessMode::Update) && table.offset(module, idx) == NO_READ {
                out.push((module, attr.name.clone()));
            }
        }
    }
    out
}

fn collect_out_of_space<G: GraphView>(components: &[ScopeComponent<G::Id>]) -> Vec<(G::Id, String, u8)> {
    let mut out = Vec::new();
    for comp in components {
        if comp.offset == NO_SPACE {
            if let Some(&first) = comp.modules.first() {
                out.push((first, comp.name.clone(), comp.size));
            }
        }
    }
    out
}

/// Runs the allocator over `graph`, packing every write-mode attribute's
/// scope component into `total_size` bytes.
///
/// Recomputing on an unchanged graph is deterministic: the same inputs
/// always produce the same offsets, since ordering is controlled by
/// explicit degree-then-insertion tie-breaking rather than iteration over
/// a hash map.
pub fn allocate<G: GraphView>(graph: &G, total_size: u16) -> Allocation<G::Id> {
    let module_ids = graph.module_ids();

    let mut ctx: Ctx<G::Id> = Ctx {
        components: Vec::new(),
        stamp: module_ids.iter().map(|&m| (m, -1isize)).collect(),
        attr_scope: HashMap::new(),
    };
    for &module in &module_ids {
        for idx in 0..graph.attrs(module).len() {
            ctx.attr_scope.insert((module, idx), -1);
        }
    }

    for &module in &module_ids {
        let attrs = graph.attrs(module).to_vec();
        for (idx, attr) in attrs.iter().enumerate() {
            if attr.mode == AccessMode::Write && ctx.attr_scope.get(&(module, idx)).copied().unwrap_or(-1) == -1 {
                identify_single_scope_component(graph, module, idx, &attr.name, attr.size, &mut ctx);
            }
        }
    }

    let mut components = ctx.components;
    compute_degrees(&mut components);
    components.sort_by(|a, b| b.degree.cmp(&a.degree));

    assign_offsets(&mut components, total_size);

    let (table, scope_maps) = fill_offset_arrays(graph, &components, total_size);
    let orphan_readers = collect_orphans(graph, &table, &module_ids);
    let out_of_space = collect_out_of_space::<G>(&components);

    for (module, name) in &orphan_readers {
        tracing::warn!(?module, attr = %name, "metadata attribute has no reachable writer");
    }

    Allocation {
        table,
        scope_maps,
        orphan_readers,
        out_of_space,
    }
}
