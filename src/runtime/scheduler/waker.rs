//! Wake-up plumbing for spawned futures.
//!
//! `Waker` must be `Send + Sync`, so wake-ups are recorded in a shared queue
//! that the loop drains on its own thread before picking the next operation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Wake, Waker};

use parking_lot::Mutex;

use super::task::OpId;

/// Operations whose futures asked to be polled again.
#[derive(Debug, Clone, Default)]
pub struct WakeQueue {
    inner: Arc<Mutex<VecDeque<OpId>>>,
}

impl WakeQueue {
    /// Create an empty wake queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a wake-up for `op`.
    pub fn push(
        &self,
        op: OpId,
    ) {
        self.inner.lock().push_back(op);
    }

    /// Take every pending wake-up, oldest first.
    pub fn drain(&self) -> Vec<OpId> {
        self.inner.lock().drain(..).collect()
    }

    /// Whether any wake-up is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Build a waker that schedules `op` on this queue.
    pub fn waker(
        &self,
        op: OpId,
    ) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            op,
            queue: self.clone(),
        }))
    }
}

struct TaskWaker {
    op: OpId,
    queue: WakeQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.op);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.op);
    }
}
