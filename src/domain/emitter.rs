//! Event emitter capability.
//!
//! Listeners are keyed by event name and receive the payload as `&dyn Any`.
//! The `"error"` event is special: emitting it with no listener forwards the
//! fault to the domain the emitter is attached to, and fails with
//! [`Error::UnhandledError`] when there is none.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use super::fault::Fault;
use super::{Domain, DomainInner};
use crate::error::{Error, Result};

/// Name of the error event.
pub const ERROR_EVENT: &str = "error";

static NEXT_EMITTER_ID: AtomicU64 = AtomicU64::new(0);

/// Event listener.
pub type Listener = Rc<dyn Fn(&dyn Any)>;

/// Unique emitter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmitterId(u64);

impl EmitterId {
    fn next() -> Self {
        EmitterId(NEXT_EMITTER_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the inner value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EmitterId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Emitter({})", self.0)
    }
}

/// A cloneable handle to an event emitter.
#[derive(Clone)]
pub struct Emitter {
    inner: Rc<EmitterInner>,
}

struct EmitterInner {
    id: EmitterId,
    listeners: RefCell<IndexMap<String, SmallVec<[Listener; 2]>>>,
    /// Domain this emitter is attached to.
    domain: RefCell<Weak<DomainInner>>,
}

impl Emitter {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                id: EmitterId::next(),
                listeners: RefCell::new(IndexMap::new()),
                domain: RefCell::new(Weak::new()),
            }),
        }
    }

    /// Emitter ID.
    #[inline]
    pub fn id(&self) -> EmitterId {
        self.inner.id
    }

    /// Register a listener for `event`.
    pub fn on<F>(
        &self,
        event: &str,
        listener: F,
    ) -> &Self
    where
        F: Fn(&dyn Any) + 'static,
    {
        self.inner
            .listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(Rc::new(listener));
        self
    }

    /// Register a listener for the error event.
    pub fn on_error<F>(
        &self,
        listener: F,
    ) -> &Self
    where
        F: Fn(&Fault) + 'static,
    {
        self.on(ERROR_EVENT, move |payload| {
            if let Some(fault) = payload.downcast_ref::<Fault>() {
                listener(fault);
            }
        })
    }

    /// Remove every listener for `event`.
    pub fn remove_all_listeners(
        &self,
        event: &str,
    ) -> &Self {
        self.inner.listeners.borrow_mut().shift_remove(event);
        self
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(
        &self,
        event: &str,
    ) -> usize {
        self.inner
            .listeners
            .borrow()
            .get(event)
            .map_or(0, SmallVec::len)
    }

    /// Call every listener for `event`. Returns whether there were any.
    pub fn emit(
        &self,
        event: &str,
        payload: &dyn Any,
    ) -> bool {
        // Listeners may register more listeners while running.
        let listeners: SmallVec<[Listener; 2]> = self
            .inner
            .listeners
            .borrow()
            .get(event)
            .cloned()
            .unwrap_or_default();
        for listener in &listeners {
            listener(payload);
        }
        !listeners.is_empty()
    }

    /// Emit the error event.
    ///
    /// Without an error listener, the fault goes to the attached domain,
    /// annotated with this emitter. Without either it is unhandled.
    pub fn emit_error(
        &self,
        fault: Fault,
    ) -> Result<()> {
        if self.emit(ERROR_EVENT, &fault) {
            return Ok(());
        }

        match self.domain() {
            Some(domain) => {
                let emitter = self.id();
                debug!("{} forwards unhandled error to {}", emitter, domain.id());
                let fault = fault.annotate(|a| {
                    a.domain = Some(domain.id());
                    a.domain_emitter = Some(emitter);
                    a.domain_thrown = Some(false);
                });
                domain.emit_error(fault)
            }
            None => Err(Error::UnhandledError(fault)),
        }
    }

    /// The domain this emitter is attached to.
    pub fn domain(&self) -> Option<Domain> {
        self.inner
            .domain
            .borrow()
            .upgrade()
            .map(Domain::from_inner)
    }

    pub(crate) fn is_attached_to(
        &self,
        domain: &Rc<DomainInner>,
    ) -> bool {
        std::ptr::eq(self.inner.domain.borrow().as_ptr(), Rc::as_ptr(domain))
    }

    pub(crate) fn set_domain(
        &self,
        domain: Weak<DomainInner>,
    ) {
        *self.inner.domain.borrow_mut() = domain;
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Emitter {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Emitter {}

impl std::fmt::Debug for Emitter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.id())
            .field("events", &self.inner.listeners.borrow().keys().collect::<Vec<_>>())
            .field("domain", &self.domain().map(|d| d.id()))
            .finish()
    }
}
