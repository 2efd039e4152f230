//! Operation definitions for the event loop.
//!
//! An operation is one unit of deferred work: an immediate, a timer, a
//! microtask or a spawned future. The loop owns operations; hooks only ever
//! see their identifiers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of process-unique operation identifiers. `0` is reserved for the
/// top-level (root) execution.
static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique asynchronous operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u64);

impl OpId {
    /// The root execution: code running outside of any operation callback.
    pub const ROOT: OpId = OpId(0);

    /// Allocate a fresh identifier.
    #[inline]
    pub fn next() -> Self {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }

    /// Whether this is the root execution.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for OpId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for OpId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Op({})", self.0)
    }
}

/// What kind of deferred work an operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Runs once on the next loop turn.
    Immediate,
    /// Runs once after a delay.
    Timeout,
    /// Runs repeatedly until cleared.
    Interval,
    /// Runs before the loop picks any other work.
    Microtask,
    /// A spawned future, polled once per wake-up.
    Task,
}

impl std::fmt::Display for OpKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let name = match self {
            OpKind::Immediate => "Immediate",
            OpKind::Timeout => "Timeout",
            OpKind::Interval => "Interval",
            OpKind::Microtask => "Microtask",
            OpKind::Task => "Task",
        };
        f.write_str(name)
    }
}

/// Operation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    /// Allocated, never invoked.
    Created,
    /// Invoked at least once and may be invoked again.
    Active,
    /// Will never be invoked again.
    Destroyed,
}

/// Boxed future driven by the loop.
pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

/// The work attached to an operation.
pub(crate) enum Callback {
    Once(Box<dyn FnOnce() -> anyhow::Result<()>>),
    Repeat(Box<dyn FnMut() -> anyhow::Result<()>>),
    Future(LocalFuture),
}

impl std::fmt::Debug for Callback {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Callback::Once(_) => f.write_str("Callback::Once"),
            Callback::Repeat(_) => f.write_str("Callback::Repeat"),
            Callback::Future(_) => f.write_str("Callback::Future"),
        }
    }
}

/// A scheduled operation.
#[derive(Debug)]
pub struct Operation {
    id: OpId,
    kind: OpKind,
    trigger: OpId,
    state: OpState,
    /// Interval period, in virtual milliseconds.
    period: Option<u64>,
    /// `None` while the callback is executing.
    pub(crate) callback: Option<Callback>,
    /// Set by `clear` while the callback is executing.
    pub(crate) cleared: bool,
    /// Already sitting in a run queue.
    pub(crate) queued: bool,
    invocations: u64,
}

impl Operation {
    pub(crate) fn new(
        id: OpId,
        kind: OpKind,
        trigger: OpId,
        callback: Callback,
    ) -> Self {
        Self {
            id,
            kind,
            trigger,
            state: OpState::Created,
            period: None,
            callback: Some(callback),
            cleared: false,
            queued: false,
            invocations: 0,
        }
    }

    pub(crate) fn with_period(
        mut self,
        period: u64,
    ) -> Self {
        self.period = Some(period);
        self
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

    /// The operation that was executing when this one was created.
    #[inline]
    pub fn trigger(&self) -> OpId {
        self.trigger
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> OpState {
        self.state
    }

    #[inline]
    pub(crate) fn set_state(
        &mut self,
        state: OpState,
    ) {
        self.state = state;
    }

    /// Interval period, if any.
    #[inline]
    pub fn period(&self) -> Option<u64> {
        self.period
    }

    /// How many times the callback has been invoked.
    #[inline]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    #[inline]
    pub(crate) fn record_invocation(&mut self) {
        self.invocations += 1;
    }
}
