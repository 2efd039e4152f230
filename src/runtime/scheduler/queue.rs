//! Run queues for the event loop
//!
//! FIFO queue for immediates/microtasks and a deadline-ordered timer queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use super::task::OpId;

/// First-in first-out queue of runnable operations.
#[derive(Debug, Default, Clone)]
pub struct OpQueue {
    inner: VecDeque<OpId>,
}

impl OpQueue {
    /// Create a new empty queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an operation to the back of the queue.
    #[inline]
    pub fn push(
        &mut self,
        op: OpId,
    ) {
        self.inner.push_back(op);
    }

    /// Pop an operation from the front of the queue.
    #[inline]
    pub fn pop_front(&mut self) -> Option<OpId> {
        self.inner.pop_front()
    }

    /// Get the number of queued operations.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Timer entry: ordered by deadline, then by arming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: u64,
    seq: u64,
    op: OpId,
}

/// Deadline-ordered timer queue.
///
/// Timers with equal deadlines fire in the order they were armed.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl TimerQueue {
    /// Create a new timer queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `op` at `deadline`.
    pub fn push(
        &mut self,
        op: OpId,
        deadline: u64,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerEntry { deadline, seq, op }));
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Pop the earliest timer if it is due at `now`.
    pub fn pop_due(
        &mut self,
        now: u64,
    ) -> Option<OpId> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.deadline <= now => {
                self.heap.pop().map(|Reverse(entry)| entry.op)
            }
            _ => None,
        }
    }

    /// Get total number of armed timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
