// SPDX-License-Identifier: Apache-2.0

//! The five `TrafficClass` variants, as an explicit tagged sum rather than
//! a base-class hierarchy, carrying exactly the per-variant bookkeeping
//! the scheduler needs to select among children.

use crate::ids::{TaskId, TcId};
use crate::resource::Resource;

struct PriorityChild {
    child: TcId,
    priority: i32,
}

struct WeightedFairChild {
    child: TcId,
    share: u64,
    vtime: u64,
}

pub(crate) enum Kind {
    Priority {
        children: Vec<PriorityChild>,
    },
    WeightedFair {
        resource: Resource,
        children: Vec<WeightedFairChild>,
    },
    RoundRobin {
        children: Vec<TcId>,
        cursor: usize,
    },
    RateLimit {
        child: TcId,
        resource: Resource,
        /// Tokens credited per second.
        refill_rate: u64,
        max_burst: u64,
        tokens: u64,
        last_refill_ns: u64,
    },
    Leaf {
        task: Option<TaskId>,
    },
}

impl Kind {
    pub(crate) fn children(&self) -> Vec<TcId> {
        match self {
            Kind::Priority { children } => children.iter().map(|c| c.child).collect(),
            Kind::WeightedFair { children, .. } => children.iter().map(|c| c.child).collect(),
            Kind::RoundRobin { children, .. } => children.clone(),
            Kind::RateLimit { child, .. } => vec![*child],
            Kind::Leaf { .. } => Vec::new(),
        }
    }
}

/// One node of a worker's scheduler tree.
pub struct TrafficClass {
    pub name: String,
    pub(crate) parent: Option<TcId>,
    pub(crate) kind: Kind,
    /// Cached result of the last blockedness recomputation. Leaves are the
    /// source of truth (mirrored from their task); interior nodes cache
    /// the AND/OR of their children so a hot-path selection doesn't have
    /// to re-walk the whole subtree every round.
    pub(crate) blocked: bool,
}

impl TrafficClass {
    pub(crate) fn leaf(name: impl Into<String>, parent: Option<TcId>) -> Self {
        TrafficClass {
            name: name.into(),
            parent,
            kind: Kind::Leaf { task: None },
            blocked: true,
        }
    }

    pub(crate) fn priority(name: impl Into<String>, parent: Option<TcId>) -> Self {
        TrafficClass {
            name: name.into(),
            parent,
            kind: Kind::Priority { children: Vec::new() },
            blocked: true,
        }
    }

    pub(crate) fn weighted_fair(name: impl Into<String>, parent: Option<TcId>, resource: Resource) -> Self {
        TrafficClass {
            name: name.into(),
            parent,
            kind: Kind::WeightedFair {
                resource,
                children: Vec::new(),
            },
            blocked: true,
        }
    }

    pub(crate) fn round_robin(name: impl Into<String>, parent: Option<TcId>) -> Self {
        TrafficClass {
            name: name.into(),
            parent,
            kind: Kind::RoundRobin {
                children: Vec::new(),
                cursor: 0,
            },
            blocked: true,
        }
    }

    pub(crate) fn rate_limit(name: impl Into<String>, parent: Option<TcId>, resource: Resource, refill_rate: u64, max_burst: u64, child: TcId) -> Self {
        TrafficClass {
            name: name.into(),
            parent,
            kind: Kind::RateLimit {
                child,
                resource,
                refill_rate,
                max_burst,
                tokens: max_burst,
                last_refill_ns: 0,
            },
            blocked: true,
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, Kind::Leaf { .. })
    }

    #[must_use]
    pub fn parent(&self) -> Option<TcId> {
        self.parent
    }

    #[must_use]
    pub fn blocked(&self) -> bool {
        self.blocked
    }

    #[must_use]
    pub(crate) fn children(&self) -> Vec<TcId> {
        self.kind.children()
    }

    /// Returns `false` (without mutating) if this node's variant does not
    /// own a priority-ordered child set.
    pub(crate) fn add_priority_child(&mut self, child: TcId, priority: i32) -> bool {
        match &mut self.kind {
            Kind::Priority { children } => {
                children.push(PriorityChild { child, priority });
                true
            }
            _ => false,
        }
    }

    pub(crate) fn add_weighted_fair_child(&mut self, child: TcId, share: u64) -> bool {
        match &mut self.kind {
            Kind::WeightedFair { children, .. } => {
                children.push(WeightedFairChild { child, share: share.max(1), vtime: 0 });
                true
            }
            _ => false,
        }
    }

    pub(crate) fn add_round_robin_child(&mut self, child: TcId) -> bool {
        match &mut self.kind {
            Kind::RoundRobin { children, .. } => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    /// Selects which child to recurse into among this node's unblocked
    /// children, without mutating the tree. `is_blocked` queries whether a
    /// candidate child is currently blocked.
    pub(crate) fn select_child(&mut self, is_blocked: impl Fn(TcId) -> bool) -> Option<TcId> {
        match &mut self.kind {
            Kind::Priority { children } => children
                .iter()
                .filter(|c| !is_blocked(c.child))
                .max_by_key(|c| c.priority)
                .map(|c| c.child),
            Kind::WeightedFair { children, .. } => children
                .iter()
                .filter(|c| !is_blocked(c.child))
                .min_by_key(|c| c.vtime)
                .map(|c| c.child),
            Kind::RoundRobin { children, cursor } => {
                if children.is_empty() {
                    return None;
                }
                let n = children.len();
                for step in 0..n {
                    let idx = (*cursor + step) % n;
                    if !is_blocked(children[idx]) {
                        *cursor = (idx + 1) % n;
                        return Some(children[idx]);
                    }
                }
                None
            }
            Kind::RateLimit { child, .. } => {
                if is_blocked(*child) {
                    None
                } else {
                    Some(*child)
                }
            }
            Kind::Leaf { .. } => None,
        }
    }

    /// Advances a `WeightedFair` child's virtual time after it ran, by
    /// `work_done / share`.
    pub(crate) fn advance_vtime(&mut self, child: TcId, work_done: u64) {
        if let Kind::WeightedFair { children, .. } = &mut self.kind {
            if let Some(c) = children.iter_mut().find(|c| c.child == child) {
                c.vtime = c.vtime.saturating_add(work_done / c.share.max(1));
            }
        }
    }

    pub(crate) fn weighted_fair_resource(&self) -> Option<Resource> {
        match &self.kind {
            Kind::WeightedFair { resource, .. } => Some(*resource),
            _ => None,
        }
    }

    pub(crate) fn rate_limit_resource(&self) -> Option<Resource> {
        match &self.kind {
            Kind::RateLimit { resource, .. } => Some(*resource),
            _ => None,
        }
    }

    /// Refills a `RateLimit` node's bucket for elapsed time, then reports
    /// whether at least one token's worth of work may proceed.
    pub(crate) fn rate_limit_available(&mut self, now_ns: u64) -> bool {
        if let Kind::RateLimit {
            refill_rate,
            max_burst,
            tokens,
            last_refill_ns,
            ..
        } = &mut self.kind
        {
            let elapsed = now_ns.saturating_sub(*last_refill_ns);
            let credited = (elapsed as u128 * *refill_rate as u128 / 1_000_000_000u128) as u64;
            if credited > 0 {
                *tokens = (*tokens).saturating_add(credited).min(*max_burst);
                *last_refill_ns = now_ns;
            }
            *tokens > 0
        } else {
            true
        }
    }

    /// Whether a `RateLimit` node currently has at least one token, without
    /// refilling first. Non-`RateLimit` nodes report `true` (they impose no
    /// constraint of their own).
    pub(crate) fn rate_limit_has_tokens(&self) -> bool {
        match &self.kind {
            Kind::RateLimit { tokens, .. } => *tokens > 0,
            _ => true,
        }
    }

    /// Consumes `work_done` tokens from a `RateLimit` node, floored at zero.
    pub(crate) fn rate_limit_consume(&mut self, work_done: u64) {
        if let Kind::RateLimit { tokens, .. } = &mut self.kind {
            *tokens = tokens.saturating_sub(work_done);
        }
    }

    /// The wall-clock time at which a blocked `RateLimit` node will next
    /// have at least one token, given its state as of `now_ns`.
    pub(crate) fn rate_limit_next_refill(&self, now_ns: u64) -> Option<u64> {
        if let Kind::RateLimit {
            refill_rate,
            tokens,
            last_refill_ns,
            ..
        } = &self.kind
        {
            if *tokens > 0 || *refill_rate == 0 {
                return None;
            }
            let deficit = 1u128;
            let ns_needed = deficit * 1_000_000_000u128 / *refill_rate as u128;
            Some((*last_refill_ns).max(now_ns).wrapping_add(ns_needed as u64))
        } else {
            None
        }
    }

    pub(crate) fn leaf_task(&self) -> Option<TaskId> {
        match &self.kind {
            Kind::Leaf { task } => *task,
            _ => None,
        }
    }

    pub(crate) fn set_leaf_task(&mut self, task: Option<TaskId>) {
        if let Kind::Leaf { task: slot } = &mut self.kind {
            *slot = task;
        }
    }
}
