//! Operation registry
//!
//! Thread-local bookkeeping of live asynchronous operations as a forest:
//! every node stores its trigger parent and the domain that tracks it.
//!
//! # Tracking rule
//!
//! When an operation is created, its owner is decided once and cached:
//!
//! 1. the domain held by the current-context slot, if that domain is enabled;
//! 2. otherwise the owner of the trigger operation, if that domain is enabled;
//! 3. otherwise nobody.
//!
//! An operation is owned by at most one domain, and leaves the registry
//! exactly once, when the loop destroys it.

pub mod node;

pub use node::OpNode;

use std::cell::RefCell;

use hashbrown::HashMap;
use tracing::trace;

use crate::domain::{Domain, DomainId};
use crate::runtime::hooks;
use crate::runtime::scheduler::{OpId, OpKind};

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::new());
}

/// Run `f` with this thread's registry.
///
/// Nodes returned out of `f` (and the domains they hold) are dropped after
/// the registry borrow is released.
pub fn with<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    REGISTRY.with(|registry| f(&mut registry.borrow_mut()))
}

/// Like [`with`], but returns `None` during thread teardown.
pub(crate) fn try_with<R>(f: impl FnOnce(&mut Registry) -> R) -> Option<R> {
    REGISTRY
        .try_with(|registry| f(&mut registry.borrow_mut()))
        .ok()
}

/// Forget every node once no hook is left to see their `destroy`.
///
/// Skipped while the registry is borrowed further up the stack.
pub(crate) fn prune_unobserved() {
    if hooks::enabled_count() > 0 {
        return;
    }
    let stale = REGISTRY
        .try_with(|registry| {
            registry
                .try_borrow_mut()
                .map(|mut registry| registry.clear())
                .unwrap_or_default()
        })
        .unwrap_or_default();
    if !stale.is_empty() {
        trace!("registry pruned {} unobserved operations", stale.len());
    }
    drop(stale);
}

/// Live operations known to the domains on this thread.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: HashMap<OpId, OpNode>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created operation and decide its owner.
    ///
    /// Idempotent: the first call wins, later calls return the cached owner.
    pub fn observe(
        &mut self,
        op: OpId,
        kind: OpKind,
        trigger: OpId,
        ambient: Option<&Domain>,
    ) -> Option<DomainId> {
        if let Some(node) = self.nodes.get(&op) {
            return node.owner().map(Domain::id);
        }

        let owner = match ambient {
            Some(domain) if domain.is_enabled() => Some(domain.clone()),
            _ => self
                .owner(trigger)
                .filter(|domain| domain.is_enabled())
                .cloned(),
        };
        let owner_id = owner.as_ref().map(Domain::id);

        let mut node = OpNode::new(op, kind, trigger);
        node.set_owner(owner);
        self.nodes.insert(op, node);
        owner_id
    }

    /// Whether `domain` tracks `op`.
    pub fn is_tracked(
        &self,
        domain: DomainId,
        op: OpId,
    ) -> bool {
        self.nodes
            .get(&op)
            .is_some_and(|node| node.is_tracked_by(domain))
    }

    /// Make `domain` the owner of a known `op`, replacing any previous owner.
    ///
    /// Returns the previous owner, or `None` when `op` was never observed.
    pub fn track(
        &mut self,
        domain: &Domain,
        op: OpId,
    ) -> Option<Option<Domain>> {
        self.nodes
            .get_mut(&op)
            .map(|node| node.set_owner(Some(domain.clone())))
    }

    /// Remove `op` from the registry. Returns the node if it was present.
    pub fn untrack(
        &mut self,
        op: OpId,
    ) -> Option<OpNode> {
        self.nodes.remove(&op)
    }

    /// Drop `domain`'s ownership of every operation it tracks.
    pub fn release(
        &mut self,
        domain: DomainId,
    ) -> Vec<Domain> {
        self.nodes
            .values_mut()
            .filter(|node| node.is_tracked_by(domain))
            .filter_map(|node| node.set_owner(None))
            .collect()
    }

    /// Forget every node.
    pub fn clear(&mut self) -> Vec<OpNode> {
        self.nodes.drain().map(|(_, node)| node).collect()
    }

    /// Owner of `op`.
    pub fn owner(
        &self,
        op: OpId,
    ) -> Option<&Domain> {
        self.nodes.get(&op).and_then(OpNode::owner)
    }

    /// Trigger of `op`.
    pub fn trigger(
        &self,
        op: OpId,
    ) -> Option<OpId> {
        self.nodes.get(&op).map(OpNode::trigger)
    }

    /// `op` followed by its live trigger ancestors, nearest first.
    pub fn lineage(
        &self,
        op: OpId,
    ) -> Vec<OpId> {
        let mut lineage = Vec::new();
        let mut cursor = Some(op);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            lineage.push(current);
            // Op ids are allocated increasingly, so triggers are always older.
            cursor = (node.trigger() < current).then_some(node.trigger());
        }
        lineage
    }

    /// Operations tracked by `domain`, in ascending id order.
    pub fn tracked_by(
        &self,
        domain: DomainId,
    ) -> Vec<OpId> {
        let mut ops: Vec<OpId> = self
            .nodes
            .values()
            .filter(|node| node.is_tracked_by(domain))
            .map(OpNode::id)
            .collect();
        ops.sort_unstable();
        ops
    }

    pub(crate) fn save_slot(
        &mut self,
        op: OpId,
        previous: Option<Domain>,
    ) -> Option<Option<Domain>> {
        match self.nodes.get_mut(&op) {
            Some(node) => node.save_slot(previous),
            None => Some(previous),
        }
    }

    pub(crate) fn take_saved_slot(
        &mut self,
        op: OpId,
    ) -> Option<Option<Domain>> {
        self.nodes.get_mut(&op).and_then(OpNode::take_saved_slot)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests;
