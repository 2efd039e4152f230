//! Execution domains
//!
//! A [`Domain`] groups causally related asynchronous operations under one
//! error destination. While a domain is enabled it observes every operation
//! the loop creates: operations created while the domain is current (or
//! triggered by an operation it already tracks) become its members, and the
//! domain is made current around each of their callbacks. Failures escaping
//! those callbacks are routed to the domain's `"error"` listeners by the
//! [`router`].
//!
//! ```no_run
//! use asyncdomain::domain::{router, Domain};
//! use asyncdomain::runtime::scheduler::EventLoop;
//!
//! router::install();
//! let event_loop = EventLoop::new();
//! let domain = Domain::create();
//! domain.on_error(|fault| eprintln!("caught: {fault}"));
//!
//! domain.run(|| {
//!     event_loop.set_timeout(10, || anyhow::bail!("boom"));
//! });
//! event_loop.run().unwrap();
//! ```

pub mod emitter;
pub mod fault;
pub mod router;
pub mod slot;
pub mod wrap;

pub use emitter::{Emitter, EmitterId, Listener, ERROR_EVENT};
pub use fault::{Annotations, CallbackId, Fault};
pub use slot::{current, is_current, DomainScope};
pub use wrap::{Bound, Intercepted};

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::runtime::hooks::{self, AsyncHook, HookHandle};
use crate::runtime::registry;
use crate::runtime::scheduler::{OpId, OpKind};

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u64);

impl DomainId {
    fn next() -> Self {
        DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the inner value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Domain({})", self.0)
    }
}

/// An execution context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Domain {
    inner: Rc<DomainInner>,
}

pub(crate) struct DomainInner {
    id: DomainId,
    /// Error capability. Its own attachment is this domain's parent.
    emitter: Emitter,
    /// Attached members, by emitter.
    members: RefCell<IndexMap<EmitterId, Emitter>>,
    /// Causality subscription while enabled.
    hook: RefCell<Option<HookHandle>>,
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        drop(self.hook.get_mut().take());
        registry::prune_unobserved();
        trace!("{} dropped", self.id);
    }
}

impl Domain {
    /// Create a domain and subscribe it to the causality hooks.
    pub fn create() -> Self {
        let domain = Self::new();
        domain.enable();
        debug!("{} created", domain.id());
        domain
    }

    /// Create a domain without subscribing it.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DomainInner {
                id: DomainId::next(),
                emitter: Emitter::new(),
                members: RefCell::new(IndexMap::new()),
                hook: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<DomainInner>) -> Self {
        Self { inner }
    }

    /// Domain ID.
    #[inline]
    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    /// The domain's own error emitter.
    #[inline]
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    /// Whether the domain observes new operations.
    pub fn is_enabled(&self) -> bool {
        self.inner
            .hook
            .borrow()
            .as_ref()
            .is_some_and(HookHandle::is_enabled)
    }

    /// Subscribe to the causality hooks. Idempotent.
    pub fn enable(&self) {
        if self.is_enabled() {
            return;
        }
        let hook = hooks::create_hook(Rc::new(DomainHook {
            domain: Rc::downgrade(&self.inner),
        }));
        hook.enable();
        *self.inner.hook.borrow_mut() = Some(hook);
        trace!("{} enabled", self.id());
    }

    /// Unsubscribe from the causality hooks.
    ///
    /// Operations the domain tracked are released: they keep running, but no
    /// longer enter this domain.
    pub fn disable(&self) {
        let hook = self.inner.hook.borrow_mut().take();
        let Some(hook) = hook else {
            return;
        };
        drop(hook);

        // The hook will not see the `after` of a window it is currently in.
        let id = self.id();
        let executing = hooks::execution_async_id();
        let saved = registry::with(|r| {
            if r.is_tracked(id, executing) {
                r.take_saved_slot(executing)
            } else {
                None
            }
        });
        if let Some(previous) = saved {
            if slot::is_current(id) {
                let exited = slot::replace(previous);
                drop(exited);
            }
        }

        let released = registry::with(|r| r.release(id));
        trace!("{} disabled, released {} operations", id, released.len());
        drop(released);

        // Nothing left to keep the forest up to date.
        registry::prune_unobserved();
    }

    /// Make this domain current. Pair with [`exit`](Self::exit).
    ///
    /// Prefer [`scope`](Self::scope) or [`run`](Self::run), which cannot be
    /// left unpaired.
    pub fn enter(&self) {
        let previous = slot::replace(Some(self.clone()));
        drop(previous);
    }

    /// Clear the current domain.
    pub fn exit(&self) {
        let previous = slot::replace(None);
        drop(previous);
    }

    /// Make this domain current until the returned scope is dropped.
    pub fn scope(&self) -> DomainScope {
        DomainScope::enter(self)
    }

    /// Run `callback` synchronously with this domain current.
    ///
    /// Every operation the callback creates is tracked by this domain.
    pub fn run<R>(
        &self,
        callback: impl FnOnce() -> R,
    ) -> R {
        let _scope = self.scope();
        callback()
    }

    /// Wrap `callback` so it always runs with this domain current.
    pub fn bind<F>(
        &self,
        callback: F,
    ) -> Bound<F> {
        Bound::new(self.clone(), callback)
    }

    /// Wrap `callback` for error-first delivery.
    ///
    /// The wrapper takes a `Result`; an `Err` is emitted on this domain
    /// instead of reaching the callback.
    pub fn intercept<F>(
        &self,
        callback: F,
    ) -> Intercepted<F> {
        Intercepted::new(self.clone(), callback)
    }

    /// Attach `member`, so its unhandled errors reach this domain.
    ///
    /// No-op when already attached here. A member attached elsewhere is
    /// detached first. Attaching an emitter of a domain that this domain
    /// already descends from would create a cycle and is ignored.
    pub fn add(
        &self,
        member: &Emitter,
    ) {
        if member.is_attached_to(&self.inner) {
            return;
        }

        if self.would_cycle(member) {
            warn!("{} refuses {}: attachment cycle", self.id(), member.id());
            return;
        }

        if let Some(previous) = member.domain() {
            previous.remove(member);
        }

        member.set_domain(Rc::downgrade(&self.inner));
        self.inner
            .members
            .borrow_mut()
            .insert(member.id(), member.clone());
        debug!("{} added {}", self.id(), member.id());
    }

    /// Detach `member` if it is attached to this domain.
    pub fn remove(
        &self,
        member: &Emitter,
    ) {
        if !member.is_attached_to(&self.inner) {
            return;
        }
        member.set_domain(Weak::new());
        let removed = self.inner.members.borrow_mut().shift_remove(&member.id());
        drop(removed);
        debug!("{} removed {}", self.id(), member.id());
    }

    /// Attach another domain as a member.
    pub fn add_domain(
        &self,
        child: &Domain,
    ) {
        self.add(child.emitter());
    }

    /// Detach a member domain.
    pub fn remove_domain(
        &self,
        child: &Domain,
    ) {
        self.remove(child.emitter());
    }

    /// Whether attaching `member` would make this domain its own ancestor.
    fn would_cycle(
        &self,
        member: &Emitter,
    ) -> bool {
        if member.id() == self.emitter().id() {
            return true;
        }
        let mut ancestor = self.parent();
        while let Some(domain) = ancestor {
            if domain.emitter().id() == member.id() {
                return true;
            }
            ancestor = domain.parent();
        }
        false
    }

    /// The domain this domain is attached to.
    pub fn parent(&self) -> Option<Domain> {
        self.inner.emitter.domain()
    }

    /// Attached members, in attachment order.
    pub fn members(&self) -> Vec<Emitter> {
        self.inner.members.borrow().values().cloned().collect()
    }

    /// Operations currently tracked by this domain.
    pub fn tracked(&self) -> Vec<OpId> {
        registry::with(|r| r.tracked_by(self.id()))
    }

    /// Whether this domain tracks `op`.
    pub fn is_tracking(
        &self,
        op: OpId,
    ) -> bool {
        registry::with(|r| r.is_tracked(self.id(), op))
    }

    /// Register an error listener.
    pub fn on_error<F>(
        &self,
        listener: F,
    ) -> &Self
    where
        F: Fn(&Fault) + 'static,
    {
        self.inner.emitter.on_error(listener);
        self
    }

    /// Number of error listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.emitter.listener_count(ERROR_EVENT)
    }

    /// Deliver `fault` to this domain's error listeners.
    ///
    /// Without listeners the fault goes to the parent domain, and fails with
    /// [`Error::UnhandledError`](crate::Error::UnhandledError) at the top.
    pub fn emit_error(
        &self,
        fault: Fault,
    ) -> Result<()> {
        self.inner.emitter.emit_error(fault)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::create()
    }
}

impl PartialEq for Domain {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Domain {}

impl std::fmt::Debug for Domain {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id())
            .field("enabled", &self.is_enabled())
            .field("members", &self.inner.members.borrow().len())
            .finish()
    }
}

/// Causality subscription of one domain.
struct DomainHook {
    domain: Weak<DomainInner>,
}

impl DomainHook {
    fn domain(&self) -> Option<Domain> {
        self.domain.upgrade().map(Domain::from_inner)
    }
}

impl AsyncHook for DomainHook {
    fn init(
        &self,
        op: OpId,
        kind: OpKind,
        trigger: OpId,
    ) {
        if self.domain.strong_count() == 0 {
            return;
        }
        let ambient = slot::current();
        let owner = registry::with(|r| r.observe(op, kind, trigger, ambient.as_ref()));
        if let Some(owner) = owner {
            trace!("{} {} tracked by {} (trigger {})", kind, op, owner, trigger);
        }
    }

    fn before(
        &self,
        op: OpId,
    ) {
        let Some(domain) = self.domain() else {
            return;
        };
        if !registry::with(|r| r.is_tracked(domain.id(), op)) {
            return;
        }
        let id = domain.id();
        let previous = slot::replace(Some(domain));
        let displaced = registry::with(|r| r.save_slot(op, previous));
        drop(displaced);
        trace!("{} entered for {}", id, op);
    }

    fn after(
        &self,
        op: OpId,
    ) {
        let Some(domain) = self.domain() else {
            return;
        };
        if !registry::with(|r| r.is_tracked(domain.id(), op)) {
            return;
        }
        let previous = registry::with(|r| r.take_saved_slot(op)).flatten();
        if slot::is_current(domain.id()) {
            let exited = slot::replace(previous);
            drop(exited);
            trace!("{} exited after {}", domain.id(), op);
        }
    }

    fn destroy(
        &self,
        op: OpId,
    ) {
        if self.domain.strong_count() == 0 {
            return;
        }
        // Whichever domain hook runs first removes the node.
        let node = registry::try_with(|r| r.untrack(op)).flatten();
        if let Some(node) = node {
            trace!("{} {} left the registry", node.kind(), op);
        }
    }
}
