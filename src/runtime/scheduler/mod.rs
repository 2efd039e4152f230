//! Single-threaded event loop
//!
//! This module provides the [`EventLoop`], a cooperative scheduler on a
//! virtual clock. It runs immediates, timers, intervals, microtasks and
//! spawned futures one callback at a time, and reports every operation's
//! lifecycle to the [causality hooks](crate::runtime::hooks).
//!
//! # Turn order
//!
//! Each pick takes, in order: a queued microtask, a due timer, a woken or
//! queued immediate. When only future timers remain the clock jumps to the
//! earliest deadline.
//!
//! # Failures
//!
//! A callback that returns `Err` (or panics) is offered to
//! [`process::escape`] while its operation is still executing, so handlers
//! see the context the failure happened in. If nobody accepts it, the loop
//! still completes the operation's lifecycle, then stops with
//! [`Error::Uncaught`]. A handler that panics counts as nobody accepting
//! the failure; `after` still fires for the operation.

pub mod queue;
pub mod task;
pub mod waker;

pub use queue::{OpQueue, TimerQueue};
pub use task::{OpId, OpKind, OpState, Operation};
pub use waker::WakeQueue;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::domain::Fault;
use crate::error::{Error, Result};
use crate::process;
use crate::runtime::hooks::{self, ExecutionFrame};
use task::Callback;

/// Event loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Stop after this many callback invocations (guards runaway intervals).
    #[serde(default)]
    pub max_turns: Option<u64>,
    /// Smallest timer delay, in virtual milliseconds.
    #[serde(default = "default_timer_resolution")]
    pub timer_resolution_ms: u64,
}

fn default_timer_resolution() -> u64 {
    1
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: None,
            timer_resolution_ms: 1,
        }
    }
}

/// Loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Operations created.
    pub created: u64,
    /// Callback invocations (including future polls).
    pub invoked: u64,
    /// Operations destroyed.
    pub destroyed: u64,
    /// Failures accepted by an uncaught handler.
    pub faults_handled: u64,
    /// Failures nobody accepted.
    pub faults_fatal: u64,
}

/// A cloneable handle to a single-threaded event loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    config: LoopConfig,
    ops: RefCell<HashMap<OpId, Operation>>,
    microtasks: RefCell<OpQueue>,
    immediates: RefCell<OpQueue>,
    timers: RefCell<TimerQueue>,
    woken: WakeQueue,
    /// Virtual time, in milliseconds.
    now: Cell<u64>,
    running: Cell<bool>,
    stats: Cell<LoopStats>,
}

/// Clears the running flag on every exit path.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// One invocation window of an operation.
///
/// Fires `before` when opened and `after` when dropped, including while
/// unwinding, so a domain entered by `before` is always exited.
struct Window {
    op: OpId,
    frame: Option<ExecutionFrame>,
}

impl Window {
    fn open(
        op: OpId,
        trigger: OpId,
    ) -> Self {
        hooks::emit_before(op);
        Self {
            op,
            frame: Some(ExecutionFrame::push(op, trigger)),
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        drop(self.frame.take());
        hooks::emit_after(self.op);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// What happened to a callback after one invocation.
enum Disposition {
    /// Keep the operation; the callback may run again.
    Park(Callback),
    /// The operation is done.
    Finished,
}

impl EventLoop {
    /// Create an event loop with default config.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Create an event loop with custom configuration.
    pub fn with_config(config: LoopConfig) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                config,
                ops: RefCell::new(HashMap::new()),
                microtasks: RefCell::new(OpQueue::new()),
                immediates: RefCell::new(OpQueue::new()),
                timers: RefCell::new(TimerQueue::new()),
                woken: WakeQueue::new(),
                now: Cell::new(0),
                running: Cell::new(false),
                stats: Cell::new(LoopStats::default()),
            }),
        }
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Current virtual time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.inner.now.get()
    }

    /// Statistics so far.
    #[inline]
    pub fn stats(&self) -> LoopStats {
        self.inner.stats.get()
    }

    /// Number of live operations.
    pub fn pending(&self) -> usize {
        self.inner.ops.borrow().len()
    }

    /// State of a live operation.
    pub fn state(
        &self,
        op: OpId,
    ) -> Option<OpState> {
        self.inner.ops.borrow().get(&op).map(Operation::state)
    }

    /// Whether the loop is inside [`run`](Self::run).
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Run `callback` on the next loop turn.
    pub fn set_immediate<F>(
        &self,
        callback: F,
    ) -> OpId
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let op = self.register(Operation::new(
            OpId::next(),
            OpKind::Immediate,
            hooks::execution_async_id(),
            Callback::Once(Box::new(callback)),
        ));
        self.enqueue_immediate(op);
        op
    }

    /// Run `callback` once, `delay_ms` virtual milliseconds from now.
    pub fn set_timeout<F>(
        &self,
        delay_ms: u64,
        callback: F,
    ) -> OpId
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let op = self.register(Operation::new(
            OpId::next(),
            OpKind::Timeout,
            hooks::execution_async_id(),
            Callback::Once(Box::new(callback)),
        ));
        self.arm_timer(op, delay_ms);
        op
    }

    /// Run `callback` every `period_ms` virtual milliseconds until cleared.
    pub fn set_interval<F>(
        &self,
        period_ms: u64,
        callback: F,
    ) -> OpId
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        let operation = Operation::new(
            OpId::next(),
            OpKind::Interval,
            hooks::execution_async_id(),
            Callback::Repeat(Box::new(callback)),
        )
        .with_period(period_ms);
        let op = self.register(operation);
        self.arm_timer(op, period_ms);
        op
    }

    /// Run `callback` before any other queued work.
    pub fn queue_microtask<F>(
        &self,
        callback: F,
    ) -> OpId
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let op = self.register(Operation::new(
            OpId::next(),
            OpKind::Microtask,
            hooks::execution_async_id(),
            Callback::Once(Box::new(callback)),
        ));
        self.inner.microtasks.borrow_mut().push(op);
        op
    }

    /// Drive `future` to completion on this loop.
    ///
    /// The future is one operation: every poll is one invocation, and an
    /// `Err` output escapes like a failing callback.
    pub fn spawn<F>(
        &self,
        future: F,
    ) -> OpId
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let op = self.register(Operation::new(
            OpId::next(),
            OpKind::Task,
            hooks::execution_async_id(),
            Callback::Future(Box::pin(future)),
        ));
        self.enqueue_immediate(op);
        op
    }

    /// Cancel an operation. Returns whether it was live.
    ///
    /// Clearing an operation from inside its own callback takes effect when
    /// the callback returns.
    pub fn clear(
        &self,
        op: OpId,
    ) -> bool {
        let removed = {
            let mut ops = self.inner.ops.borrow_mut();
            match ops.get_mut(&op) {
                None => return false,
                Some(operation) if operation.callback.is_none() => {
                    operation.cleared = true;
                    None
                }
                Some(_) => ops.remove(&op),
            }
        };
        if let Some(operation) = removed {
            self.finish(operation);
        }
        true
    }

    /// Run until no work is left.
    pub fn run(&self) -> Result<LoopStats> {
        if self.inner.running.replace(true) {
            return Err(Error::LoopReentered);
        }
        let _running = RunningGuard(&self.inner.running);

        let mut turns = 0u64;
        while let Some(op) = self.next_runnable() {
            if let Some(max_turns) = self.inner.config.max_turns {
                if turns >= max_turns {
                    warn!("event loop stopped after {} turns", turns);
                    break;
                }
            }
            turns += 1;
            self.invoke(op)?;
        }

        let stats = self.stats();
        debug!(
            "event loop idle: {} created, {} invoked, {} destroyed",
            stats.created, stats.invoked, stats.destroyed
        );
        Ok(stats)
    }

    fn register(
        &self,
        operation: Operation,
    ) -> OpId {
        let (op, kind, trigger) = (operation.id(), operation.kind(), operation.trigger());
        self.inner.ops.borrow_mut().insert(op, operation);
        self.update_stats(|stats| stats.created += 1);
        trace!("{} {} created by {}", kind, op, trigger);
        hooks::emit_init(op, kind, trigger);
        op
    }

    fn enqueue_immediate(
        &self,
        op: OpId,
    ) {
        if let Some(operation) = self.inner.ops.borrow_mut().get_mut(&op) {
            if operation.queued {
                return;
            }
            operation.queued = true;
        }
        self.inner.immediates.borrow_mut().push(op);
    }

    fn arm_timer(
        &self,
        op: OpId,
        delay_ms: u64,
    ) {
        let delay = delay_ms.max(self.inner.config.timer_resolution_ms);
        let deadline = self.now().saturating_add(delay);
        self.inner.timers.borrow_mut().push(op, deadline);
    }

    /// Pick the next live operation to invoke.
    fn next_runnable(&self) -> Option<OpId> {
        loop {
            if !self.inner.woken.is_empty() {
                for op in self.inner.woken.drain() {
                    self.enqueue_immediate(op);
                }
            }

            let picked = self.inner.microtasks.borrow_mut().pop_front();
            let picked = picked.or_else(|| self.inner.timers.borrow_mut().pop_due(self.now()));
            let picked = picked.or_else(|| self.inner.immediates.borrow_mut().pop_front());

            match picked {
                Some(op) if self.inner.ops.borrow().contains_key(&op) => return Some(op),
                // Cleared while queued.
                Some(_) => continue,
                None => {}
            }

            let next_deadline = self.inner.timers.borrow().next_deadline()?;
            trace!("clock advances to {}ms", next_deadline);
            self.inner.now.set(next_deadline.max(self.now()));
        }
    }

    /// Run one invocation of `op`, bracketed by `before`/`after`.
    fn invoke(
        &self,
        op: OpId,
    ) -> Result<()> {
        let (callback, trigger) = {
            let mut ops = self.inner.ops.borrow_mut();
            let Some(operation) = ops.get_mut(&op) else {
                return Ok(());
            };
            operation.queued = false;
            operation.set_state(OpState::Active);
            operation.record_invocation();
            (operation.callback.take(), operation.trigger())
        };
        let Some(callback) = callback else {
            return Ok(());
        };
        self.update_stats(|stats| stats.invoked += 1);

        let window = Window::open(op, trigger);
        let (outcome, disposition) = self.call(op, callback);
        let fatal = outcome.err().and_then(|error| self.escape(error));
        drop(window);

        self.settle(op, disposition);

        match fatal {
            Some(fault) => {
                error!("{} failed with an uncaught error, stopping", op);
                Err(Error::Uncaught(fault))
            }
            None => Ok(()),
        }
    }

    /// Offer a failure to the uncaught handlers. Returns it back if fatal.
    ///
    /// A handler that panics makes the failure fatal.
    fn escape(
        &self,
        error: anyhow::Error,
    ) -> Option<Fault> {
        let fault = Fault::from_error(error);
        let routed = panic::catch_unwind(AssertUnwindSafe(move || process::escape(fault)));
        let fatal = match routed {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(payload) => Some(Fault::new(anyhow::anyhow!(
                "error handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        match fatal {
            None => {
                self.update_stats(|stats| stats.faults_handled += 1);
                None
            }
            Some(fault) => {
                self.update_stats(|stats| stats.faults_fatal += 1);
                Some(fault)
            }
        }
    }

    /// Call the callback, turning panics into failures.
    fn call(
        &self,
        op: OpId,
        callback: Callback,
    ) -> (anyhow::Result<()>, Disposition) {
        let woken = self.inner.woken.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(move || match callback {
            Callback::Once(callback) => (callback(), Disposition::Finished),
            Callback::Repeat(mut callback) => {
                let outcome = callback();
                (outcome, Disposition::Park(Callback::Repeat(callback)))
            }
            Callback::Future(mut future) => {
                let waker = woken.waker(op);
                let mut cx = Context::from_waker(&waker);
                match future.as_mut().poll(&mut cx) {
                    Poll::Ready(outcome) => (outcome, Disposition::Finished),
                    Poll::Pending => (Ok(()), Disposition::Park(Callback::Future(future))),
                }
            }
        }));

        result.unwrap_or_else(|payload| {
            (
                Err(anyhow::anyhow!(
                    "callback panicked: {}",
                    panic_message(payload.as_ref())
                )),
                Disposition::Finished,
            )
        })
    }

    /// Put the operation back for another run, or destroy it.
    fn settle(
        &self,
        op: OpId,
        disposition: Disposition,
    ) {
        let keep = self
            .inner
            .ops
            .borrow()
            .get(&op)
            .is_some_and(|operation| !operation.cleared);

        match disposition {
            Disposition::Park(callback) if keep => {
                let period = self
                    .inner
                    .ops
                    .borrow_mut()
                    .get_mut(&op)
                    .and_then(|operation| {
                        operation.callback = Some(callback);
                        operation.period()
                    });
                if let Some(period) = period {
                    self.arm_timer(op, period);
                }
            }
            other => {
                drop(other);
                let removed = self.inner.ops.borrow_mut().remove(&op);
                if let Some(operation) = removed {
                    self.finish(operation);
                }
            }
        }
    }

    /// Destroy a removed operation.
    fn finish(
        &self,
        mut operation: Operation,
    ) {
        let op = operation.id();
        operation.set_state(OpState::Destroyed);
        // Captures may own domains or wakers; drop them before notifying.
        drop(operation);
        self.update_stats(|stats| stats.destroyed += 1);
        trace!("{} destroyed", op);
        hooks::emit_destroy(op);
    }

    fn update_stats(
        &self,
        f: impl FnOnce(&mut LoopStats),
    ) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        // Pending operations will never run.
        let ops: Vec<Operation> = self.ops.get_mut().drain().map(|(_, op)| op).collect();
        for operation in ops {
            let op = operation.id();
            drop(operation);
            hooks::emit_destroy(op);
        }
    }
}

#[cfg(test)]
mod tests;
