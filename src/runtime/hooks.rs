//! Causality hooks
//!
//! The event loop reports every operation's lifecycle through four callbacks:
//!
//! - `init`: the operation was allocated (fired once, before it can run)
//! - `before`: its callback is about to run
//! - `after`: its callback returned (normally or with a failure)
//! - `destroy`: it will never run again
//!
//! Subscriptions are thread-local. A [`HookHandle`] keeps its hook
//! subscribed while enabled and unsubscribes it when dropped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::trace;

use crate::runtime::scheduler::{OpId, OpKind};

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Enabled hooks, in subscription order.
    static HOOKS: RefCell<Vec<(HookId, Rc<dyn AsyncHook>)>> = const { RefCell::new(Vec::new()) };

    /// Stack of executing operations as `(op, trigger)` pairs.
    static EXECUTION: RefCell<Vec<(OpId, OpId)>> = const { RefCell::new(Vec::new()) };
}

/// Lifecycle observer for asynchronous operations.
pub trait AsyncHook {
    /// The operation was created while `trigger` was executing.
    fn init(
        &self,
        op: OpId,
        kind: OpKind,
        trigger: OpId,
    ) {
        let _ = (op, kind, trigger);
    }

    /// The operation's callback is about to run.
    fn before(
        &self,
        op: OpId,
    ) {
        let _ = op;
    }

    /// The operation's callback has returned.
    fn after(
        &self,
        op: OpId,
    ) {
        let _ = op;
    }

    /// The operation will never run again.
    fn destroy(
        &self,
        op: OpId,
    ) {
        let _ = op;
    }
}

/// Hook subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl std::fmt::Display for HookId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Hook({})", self.0)
    }
}

/// A hook subscription. Created disabled.
pub struct HookHandle {
    id: HookId,
    hook: Rc<dyn AsyncHook>,
    enabled: Cell<bool>,
}

impl std::fmt::Debug for HookHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HookHandle")
            .field("id", &self.id)
            .field("enabled", &self.enabled.get())
            .finish()
    }
}

impl HookHandle {
    /// Subscription ID.
    #[inline]
    pub fn id(&self) -> HookId {
        self.id
    }

    /// Whether the hook currently receives notifications.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Start receiving notifications. Idempotent.
    pub fn enable(&self) -> &Self {
        if !self.enabled.replace(true) {
            let entry = (self.id, self.hook.clone());
            HOOKS.with(|hooks| hooks.borrow_mut().push(entry));
            trace!("{} enabled", self.id);
        }
        self
    }

    /// Stop receiving notifications. Idempotent.
    pub fn disable(&self) -> &Self {
        if self.enabled.replace(false) {
            let id = self.id;
            // The thread-local may already be gone during thread teardown.
            let removed = HOOKS
                .try_with(|hooks| {
                    let mut hooks = hooks.borrow_mut();
                    hooks
                        .iter()
                        .position(|(hook_id, _)| *hook_id == id)
                        .map(|index| hooks.remove(index))
                })
                .ok()
                .flatten();
            drop(removed);
            trace!("{} disabled", id);
        }
        self
    }
}

impl Drop for HookHandle {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Create a (disabled) subscription for `hook`.
pub fn create_hook(hook: Rc<dyn AsyncHook>) -> HookHandle {
    HookHandle {
        id: HookId(NEXT_HOOK_ID.fetch_add(1, Ordering::SeqCst)),
        hook,
        enabled: Cell::new(false),
    }
}

/// Number of enabled hooks on this thread.
pub fn enabled_count() -> usize {
    HOOKS.try_with(|hooks| hooks.borrow().len()).unwrap_or(0)
}

/// The operation whose callback is executing, or [`OpId::ROOT`].
pub fn execution_async_id() -> OpId {
    EXECUTION
        .try_with(|stack| stack.borrow().last().map(|(op, _)| *op))
        .ok()
        .flatten()
        .unwrap_or(OpId::ROOT)
}

/// The trigger of the executing operation, or [`OpId::ROOT`].
pub fn trigger_async_id() -> OpId {
    EXECUTION
        .try_with(|stack| stack.borrow().last().map(|(_, trigger)| *trigger))
        .ok()
        .flatten()
        .unwrap_or(OpId::ROOT)
}

/// Marks an operation as executing for as long as it lives.
pub(crate) struct ExecutionFrame {
    op: OpId,
}

impl ExecutionFrame {
    pub(crate) fn push(
        op: OpId,
        trigger: OpId,
    ) -> Self {
        EXECUTION.with(|stack| stack.borrow_mut().push((op, trigger)));
        Self { op }
    }
}

impl Drop for ExecutionFrame {
    fn drop(&mut self) {
        let _ = EXECUTION.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.last().map(|(op, _)| *op), Some(self.op));
            stack.pop();
        });
    }
}

/// Snapshot of the enabled hooks, so callbacks may (un)subscribe freely.
fn snapshot() -> SmallVec<[Rc<dyn AsyncHook>; 4]> {
    HOOKS
        .try_with(|hooks| hooks.borrow().iter().map(|(_, hook)| hook.clone()).collect())
        .unwrap_or_default()
}

pub(crate) fn emit_init(
    op: OpId,
    kind: OpKind,
    trigger: OpId,
) {
    for hook in snapshot() {
        hook.init(op, kind, trigger);
    }
}

pub(crate) fn emit_before(op: OpId) {
    for hook in snapshot() {
        hook.before(op);
    }
}

pub(crate) fn emit_after(op: OpId) {
    for hook in snapshot() {
        hook.after(op);
    }
}

pub(crate) fn emit_destroy(op: OpId) {
    for hook in snapshot() {
        hook.destroy(op);
    }
}
