// SPDX-License-Identifier: Apache-2.0

//! One worker's traffic-class tree: an arena of [`TrafficClass`] nodes
//! addressed by [`TcId`], built bottom-up from orphan nodes wired together
//! with [`Scheduler::add_child`].

use slotmap::SlotMap;

use crate::error::Error;
use crate::ids::{TaskId, TcId};
use crate::resource::{Resource, Usage};
use crate::task::{Task, TaskTable};
use crate::traffic_class::TrafficClass;

/// The weight a child is inserted with, matching its parent's variant.
/// `RoundRobin` parents ignore it; `Priority` and `WeightedFair` each
/// require their own kind of weight.
#[derive(Debug, Clone, Copy)]
pub enum ChildWeight {
    None,
    Priority(i32),
    Share(u64),
}

/// One worker's scheduler: an arena of traffic classes plus the id of
/// whichever node is currently the tree's root.
pub struct Scheduler {
    worker_id: u8,
    classes: SlotMap<TcId, TrafficClass>,
    root: Option<TcId>,
}

impl Scheduler {
    #[must_use]
    pub fn new(worker_id: u8) -> Self {
        Scheduler {
            worker_id,
            classes: SlotMap::with_key(),
            root: None,
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> u8 {
        self.worker_id
    }

    #[must_use]
    pub fn root(&self) -> Option<TcId> {
        self.root
    }

    /// Designates `class` as this scheduler's tree root. The class must
    /// already exist and have no parent.
    pub fn set_root(&mut self, class: TcId) -> Result<(), Error> {
        let node = self.classes.get(class).ok_or(Error::UnknownClass(class))?;
        if node.parent().is_some() {
            return Err(Error::WrongKind(class));
        }
        self.root = Some(class);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: TcId) -> Option<&TrafficClass> {
        self.classes.get(id)
    }

    pub fn new_priority(&mut self, name: impl Into<String>) -> TcId {
        self.classes.insert(TrafficClass::priority(name, None))
    }

    pub fn new_weighted_fair(&mut self, name: impl Into<String>, resource: Resource) -> TcId {
        self.classes.insert(TrafficClass::weighted_fair(name, None, resource))
    }

    pub fn new_round_robin(&mut self, name: impl Into<String>) -> TcId {
        self.classes.insert(TrafficClass::round_robin(name, None))
    }

    /// Creates a `RateLimit` node wrapping `child`, which must currently be
    /// an orphan (no parent). Reparents `child` under the new node.
    pub fn new_rate_limit(
        &mut self,
        name: impl Into<String>,
        resource: Resource,
        refill_rate: u64,
        max_burst: u64,
        child: TcId,
    ) -> Result<TcId, Error> {
        {
            let c = self.classes.get(child).ok_or(Error::UnknownClass(child))?;
            if c.parent().is_some() {
                return Err(Error::WrongKind(child));
            }
        }
        let id = self.classes.insert(TrafficClass::rate_limit(name, None, resource, refill_rate, max_burst, child));
        self.classes[child].parent = Some(id);
        Ok(id)
    }

    pub fn new_leaf(&mut self, name: impl Into<String>) -> TcId {
        self.classes.insert(TrafficClass::leaf(name, None))
    }

    /// Wires `child` (currently an orphan) under `parent`, which must be a
    /// `Priority`, `WeightedFair`, or `RoundRobin` node taking a matching
    /// [`ChildWeight`].
    pub fn add_child(&mut self, parent: TcId, child: TcId, weight: ChildWeight) -> Result<(), Error> {
        if self.classes.get(child).ok_or(Error::UnknownClass(child))?.parent().is_some() {
            return Err(Error::WrongKind(child));
        }
        let parent_node = self.classes.get_mut(parent).ok_or(Error::UnknownClass(parent))?;
        let added = match weight {
            ChildWeight::None => parent_node.add_round_robin_child(child),
            ChildWeight::Priority(p) => parent_node.add_priority_child(child, p),
            ChildWeight::Share(s) => parent_node.add_weighted_fair_child(child, s),
        };
        if !added {
            return Err(Error::WrongKind(parent));
        }
        self.classes[child].parent = Some(parent);
        Ok(())
    }

    /// Attaches `task` to `leaf`, which must be an empty `Leaf` node. If
    /// `task` is already attached to another leaf, it is detached from
    /// that leaf first. When the task's current leaf lives on a different
    /// worker's scheduler, that scheduler must be passed as `other` so its
    /// bookkeeping can be cleared too; without it the attach is refused
    /// rather than left half-done.
    pub fn attach_task(
        &mut self,
        tasks: &mut TaskTable,
        leaf: TcId,
        task: TaskId,
        other: Option<&mut Scheduler>,
    ) -> Result<(), Error> {
        {
            let node = self.classes.get(leaf).ok_or(Error::UnknownClass(leaf))?;
            if !node.is_leaf() {
                return Err(Error::NotALeaf(leaf));
            }
            if node.leaf_task().is_some() {
                return Err(Error::LeafOccupied(leaf));
            }
        }

        if let Some((worker_id, old_leaf)) = tasks.get(task).and_then(Task::leaf) {
            if worker_id == self.worker_id {
                if let Some(old) = self.classes.get_mut(old_leaf) {
                    old.set_leaf_task(None);
                }
            } else if let Some(sched) = other.filter(|s| s.worker_id == worker_id) {
                if let Some(old) = sched.classes.get_mut(old_leaf) {
                    old.set_leaf_task(None);
                }
            } else {
                return Err(Error::CrossWorkerReattach { task, worker_id });
            }
        }

        let node = self.classes.get_mut(leaf).ok_or(Error::UnknownClass(leaf))?;
        node.set_leaf_task(Some(task));
        tasks.set_leaf(task, Some((self.worker_id, leaf)));
        Ok(())
    }

    /// Detaches whatever task `leaf` owns, if any.
    pub fn detach_task(&mut self, tasks: &mut TaskTable, leaf: TcId) -> Option<TaskId> {
        let node = self.classes.get_mut(leaf)?;
        let task = node.leaf_task()?;
        node.set_leaf_task(None);
        tasks.set_leaf(task, None);
        Some(task)
    }

    /// Blockedness of `node`, recomputed bottom-up and cached on every node
    /// it touches: `RateLimit` nodes get their bucket refilled against
    /// `now_ns` as a side effect, so this should be called at least once
    /// per scheduling round before selection.
    pub fn is_blocked(&mut self, tasks: &TaskTable, node: TcId, now_ns: u64) -> bool {
        let Some(is_leaf) = self.classes.get(node).map(TrafficClass::is_leaf) else {
            return true;
        };
        let blocked = if is_leaf {
            let leaf_task = self.classes.get(node).and_then(TrafficClass::leaf_task);
            leaf_task.map(|t| tasks.is_blocked(t)).unwrap_or(true)
        } else {
            let is_rate_limit = self.classes.get(node).map(|n| n.rate_limit_resource().is_some()).unwrap_or(false);
            let children = self.classes.get(node).map(TrafficClass::children).unwrap_or_default();
            if is_rate_limit {
                let available = self.classes.get_mut(node).map(|n| n.rate_limit_available(now_ns)).unwrap_or(false);
                !available || children.iter().all(|&c| self.is_blocked(tasks, c, now_ns))
            } else {
                children.iter().all(|&c| self.is_blocked(tasks, c, now_ns))
            }
        };
        if let Some(n) = self.classes.get_mut(node) {
            n.blocked = blocked;
        }
        blocked
    }

    /// Walks from `root` to a runnable leaf, recomputing blockedness along
    /// the way. Returns `None` if every reachable leaf is blocked.
    pub fn select_leaf(&mut self, tasks: &TaskTable, now_ns: u64) -> Option<TcId> {
        let root = self.root?;
        self.is_blocked(tasks, root, now_ns);
        self.select_from(tasks, root, now_ns)
    }

    fn select_from(&mut self, tasks: &TaskTable, node: TcId, now_ns: u64) -> Option<TcId> {
        if self.classes.get(node)?.is_leaf() {
            return if self.classes.get(node)?.blocked { None } else { Some(node) };
        }
        let children = self.classes.get(node).map(TrafficClass::children)?;
        let blocked_flags: std::collections::HashMap<TcId, bool> =
            children.iter().map(|&c| (c, self.classes.get(c).map(|n| n.blocked).unwrap_or(true))).collect();
        let chosen = self
            .classes
            .get_mut(node)?
            .select_child(|id| *blocked_flags.get(&id).unwrap_or(&true))?;
        self.select_from(tasks, chosen, now_ns)
    }

    /// Records a task's `RunTask` outcome, propagating resource usage and
    /// blockedness up the parent chain from `leaf`.
    pub fn record_result(&mut self, tasks: &mut TaskTable, leaf: TcId, usage: Usage, block: bool) {
        let Some(task) = self.classes.get(leaf).and_then(TrafficClass::leaf_task) else { return };
        tasks.set_blocked(task, block);

        let mut cur = Some(leaf);
        let mut child = leaf;
        while let Some(id) = cur {
            if id != child {
                if let Some(resource) = self.classes.get(id).and_then(TrafficClass::weighted_fair_resource) {
                    let work = usage.of(resource);
                    self.classes[id].advance_vtime(child, work);
                }
                if let Some(resource) = self.classes.get(id).and_then(TrafficClass::rate_limit_resource) {
                    let work = usage.of(resource);
                    self.classes[id].rate_limit_consume(work);
                }
            }
            child = id;
            cur = self.classes.get(id).and_then(TrafficClass::parent);
        }

        // Lazily re-derive blockedness up the ancestor chain, stopping as
        // soon as a node's cached value doesn't change.
        let mut cur = self.classes.get(leaf).and_then(TrafficClass::parent);
        let mut prev_changed = true;
        while let (Some(id), true) = (cur, prev_changed) {
            let children = self.classes.get(id).map(TrafficClass::children).unwrap_or_default();
            let children_blocked = children.iter().all(|&c| self.classes.get(c).map(|n| n.blocked).unwrap_or(true));
            let has_tokens = self.classes.get(id).map(TrafficClass::rate_limit_has_tokens).unwrap_or(true);
            let new_blocked = !has_tokens || children_blocked;
            let old_blocked = self.classes.get(id).map(|n| n.blocked).unwrap_or(true);
            prev_changed = new_blocked != old_blocked;
            if let Some(n) = self.classes.get_mut(id) {
                n.blocked = new_blocked;
            }
            cur = self.classes.get(id).and_then(TrafficClass::parent);
        }
    }

    /// The nearest time at which a currently-blocked `RateLimit` node
    /// somewhere in the tree will next have tokens, for a worker that found
    /// no runnable leaf and wants to sleep rather than spin.
    #[must_use]
    pub fn next_wake(&self, now_ns: u64) -> Option<u64> {
        self.classes.values().filter_map(|n| n.rate_limit_next_refill(now_ns)).min()
    }
}
