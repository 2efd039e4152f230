//! Registry node: one live asynchronous operation.

use crate::domain::{Domain, DomainId};
use crate::runtime::scheduler::{OpId, OpKind};

/// A node in the operation forest.
///
/// Each node points at its trigger (the operation that was executing when it
/// was created) and caches the domain that owns it. Ownership is decided
/// once, at creation.
#[derive(Debug)]
pub struct OpNode {
    /// Unique identifier for this operation
    id: OpId,

    /// Kind of deferred work
    kind: OpKind,

    /// Operation that was executing at creation time
    trigger: OpId,

    /// Domain tracking this operation, if any
    owner: Option<Domain>,

    /// Slot value saved by the owner's `before`, restored by its `after`
    saved_slot: Option<Option<Domain>>,
}

impl OpNode {
    /// Create an untracked node.
    #[inline]
    pub fn new(
        id: OpId,
        kind: OpKind,
        trigger: OpId,
    ) -> Self {
        Self {
            id,
            kind,
            trigger,
            owner: None,
            saved_slot: None,
        }
    }

    /// Get the operation ID.
    #[inline]
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Get the operation kind.
    #[inline]
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Get the trigger operation.
    #[inline]
    pub fn trigger(&self) -> OpId {
        self.trigger
    }

    /// Get the owning domain.
    #[inline]
    pub fn owner(&self) -> Option<&Domain> {
        self.owner.as_ref()
    }

    /// Whether `domain` owns this node.
    #[inline]
    pub fn is_tracked_by(
        &self,
        domain: DomainId,
    ) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.id() == domain)
    }

    pub(crate) fn set_owner(
        &mut self,
        owner: Option<Domain>,
    ) -> Option<Domain> {
        std::mem::replace(&mut self.owner, owner)
    }

    pub(crate) fn save_slot(
        &mut self,
        previous: Option<Domain>,
    ) -> Option<Option<Domain>> {
        self.saved_slot.replace(previous)
    }

    pub(crate) fn take_saved_slot(&mut self) -> Option<Option<Domain>> {
        self.saved_slot.take()
    }
}
