//! The current-context slot.
//!
//! One `Option<Domain>` per thread. Engine code only changes it through
//! [`DomainScope`], which restores the previous value when dropped, including
//! while unwinding.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::{Domain, DomainId};

thread_local! {
    static CURRENT: RefCell<Option<Domain>> = const { RefCell::new(None) };
}

/// The domain currently active on this thread.
pub fn current() -> Option<Domain> {
    CURRENT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Whether `domain` is the active domain.
pub fn is_current(domain: DomainId) -> bool {
    CURRENT
        .try_with(|slot| slot.borrow().as_ref().is_some_and(|d| d.id() == domain))
        .unwrap_or(false)
}

/// Replace the slot and hand back the previous value.
///
/// The previous domain is returned rather than dropped here so no domain is
/// ever destroyed while the slot is borrowed.
pub(crate) fn replace(next: Option<Domain>) -> Option<Domain> {
    CURRENT
        .try_with(|slot| slot.replace(next))
        .ok()
        .flatten()
}

/// Scoped activation of a domain.
///
/// Dropping the scope puts back whatever the slot held when it was created.
#[must_use = "the domain is exited as soon as the scope is dropped"]
pub struct DomainScope {
    previous: Option<Domain>,
    // Slot state is per thread.
    _not_send: PhantomData<*const ()>,
}

impl DomainScope {
    pub(crate) fn enter(domain: &Domain) -> Self {
        Self {
            previous: replace(Some(domain.clone())),
            _not_send: PhantomData,
        }
    }
}

impl Drop for DomainScope {
    fn drop(&mut self) {
        let exited = replace(self.previous.take());
        drop(exited);
    }
}

impl std::fmt::Debug for DomainScope {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DomainScope")
            .field("previous", &self.previous.as_ref().map(Domain::id))
            .finish()
    }
}
