//! FIFO queue of owned buffers.
//!
//! Every mutation runs inside one short critical section. The queue also
//! keeps a small waker registration so a task waiting for "my buffer is at
//! the head" is woken on every change of head instead of polling.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use super::Buffer;

/// Tasks that may wait on one queue's head at the same time.
const HEAD_WAITERS: usize = 4;

struct QueueState {
    items: VecDeque<Buffer>,
    waiters: MultiWakerRegistration<HEAD_WAITERS>,
}

impl QueueState {
    fn changed(&mut self) {
        self.waiters.wake();
    }
}

pub struct BufferQueue {
    inner: Mutex<CriticalSectionRawMutex, RefCell<QueueState>>,
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferQueue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(QueueState {
                items: VecDeque::new(),
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Insert at the tail.
    pub fn append(&self, buffer: Buffer) {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            q.items.push_back(buffer);
            q.changed();
        });
    }

    /// Remove the head. `None` when empty.
    pub fn pop_head(&self) -> Option<Buffer> {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            let head = q.items.pop_front();
            if head.is_some() {
                q.changed();
            }
            head
        })
    }

    /// Splice out the first buffer matching `pred`. At most one buffer is
    /// removed; `None` when empty or nothing matches.
    pub fn remove_by_predicate(&self, mut pred: impl FnMut(&Buffer) -> bool) -> Option<Buffer> {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            let index = q.items.iter().position(&mut pred)?;
            let removed = q.items.remove(index);
            q.changed();
            removed
        })
    }

    /// Remove every buffer matching `pred`, handing each to `sink` in queue
    /// order after the critical section ends. Returns how many were removed.
    pub fn drain_matching(
        &self,
        mut pred: impl FnMut(&Buffer) -> bool,
        mut sink: impl FnMut(Buffer),
    ) -> usize {
        let drained: Vec<Buffer> = self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            let mut kept = VecDeque::with_capacity(q.items.len());
            let mut out = Vec::new();
            while let Some(b) = q.items.pop_front() {
                if pred(&b) {
                    out.push(b);
                } else {
                    kept.push_back(b);
                }
            }
            q.items = kept;
            if !out.is_empty() {
                q.changed();
            }
            out
        });
        let n = drained.len();
        drained.into_iter().for_each(&mut sink);
        n
    }

    /// Pop the head only if it satisfies `pred`. `on_pop` runs inside the
    /// same critical section as the pop and is told whether the queue is
    /// now empty, so callers can clear a data-available signal race-free.
    pub fn pop_head_if(
        &self,
        pred: impl FnOnce(&Buffer) -> bool,
        on_pop: impl FnOnce(bool),
    ) -> Option<Buffer> {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            Self::take_matching_head(&mut q, pred, on_pop)
        })
    }

    /// Like [`pop_head_if`](Self::pop_head_if), but registers `cx`'s waker
    /// when the head does not match, under the same lock that inspected it.
    pub fn poll_pop_head_if(
        &self,
        cx: &mut Context<'_>,
        pred: impl FnOnce(&Buffer) -> bool,
        on_pop: impl FnOnce(bool),
    ) -> Poll<Buffer> {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            match Self::take_matching_head(&mut q, pred, on_pop) {
                Some(b) => Poll::Ready(b),
                None => {
                    q.waiters.register(cx.waker());
                    Poll::Pending
                }
            }
        })
    }

    fn take_matching_head(
        q: &mut QueueState,
        pred: impl FnOnce(&Buffer) -> bool,
        on_pop: impl FnOnce(bool),
    ) -> Option<Buffer> {
        if !q.items.front().is_some_and(pred) {
            return None;
        }
        let head = q.items.pop_front();
        on_pop(q.items.is_empty());
        q.changed();
        head
    }

    /// Correlation id of the head, without removing it.
    pub fn head_tag(&self) -> Option<u16> {
        self.inner.lock(|q| q.borrow().items.front().map(Buffer::tag))
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|q| q.borrow().items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if any queued buffer satisfies `pred`.
    pub fn contains(&self, mut pred: impl FnMut(&Buffer) -> bool) -> bool {
        self.inner.lock(|q| q.borrow().items.iter().any(&mut pred))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKind, BufferPool};

    fn tagged(pool: &BufferPool, tag: u16) -> Buffer {
        let mut b = pool.try_allocate(BufferKind::Response, 8).unwrap();
        b.set_tag(tag);
        b
    }

    fn tags(q: &BufferQueue) -> Vec<u16> {
        let mut out = Vec::new();
        while let Some(b) = q.pop_head() {
            out.push(b.tag());
        }
        out
    }

    #[test]
    fn fifo_order() {
        let pool = BufferPool::new(8);
        let q = BufferQueue::new();
        for t in [3, 1, 2] {
            q.append(tagged(&pool, t));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.head_tag(), Some(3));
        assert_eq!(tags(&q), vec![3, 1, 2]);
        assert!(q.pop_head().is_none());
    }

    #[test]
    fn remove_by_predicate_head_middle_tail() {
        let pool = BufferPool::new(8);
        let q = BufferQueue::new();
        for t in 1..=5 {
            q.append(tagged(&pool, t));
        }
        assert_eq!(q.remove_by_predicate(|b| b.tag() == 1).unwrap().tag(), 1);
        assert_eq!(q.remove_by_predicate(|b| b.tag() == 3).unwrap().tag(), 3);
        assert_eq!(q.remove_by_predicate(|b| b.tag() == 5).unwrap().tag(), 5);
        assert!(!q.contains(|b| b.tag() == 3));
        assert_eq!(tags(&q), vec![2, 4]);
    }

    #[test]
    fn remove_by_predicate_takes_only_first_match() {
        let pool = BufferPool::new(8);
        let q = BufferQueue::new();
        for t in [7, 9, 7] {
            q.append(tagged(&pool, t));
        }
        assert!(q.remove_by_predicate(|b| b.tag() == 7).is_some());
        assert_eq!(tags(&q), vec![9, 7]);
    }

    #[test]
    fn remove_by_predicate_not_found() {
        let pool = BufferPool::new(2);
        let q = BufferQueue::new();
        assert!(q.remove_by_predicate(|_| true).is_none());
        q.append(tagged(&pool, 1));
        assert!(q.remove_by_predicate(|b| b.tag() == 2).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn removed_buffers_return_to_pool() {
        let pool = BufferPool::new(2);
        let q = BufferQueue::new();
        q.append(tagged(&pool, 1));
        q.append(tagged(&pool, 2));
        assert_eq!(pool.available(), 0);
        drop(q.remove_by_predicate(|b| b.tag() == 2));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn drain_matching_removes_all_matches_in_order() {
        let pool = BufferPool::new(8);
        let q = BufferQueue::new();
        for t in [1, 2, 3, 4, 5, 6] {
            q.append(tagged(&pool, t));
        }
        let mut seen = Vec::new();
        let n = q.drain_matching(|b| b.tag() % 2 == 0, |b| seen.push(b.tag()));
        assert_eq!(n, 3);
        assert_eq!(seen, vec![2, 4, 6]);
        assert_eq!(tags(&q), vec![1, 3, 5]);
    }

    #[test]
    fn pop_head_if_reports_emptiness_inside_pop() {
        let pool = BufferPool::new(4);
        let q = BufferQueue::new();
        q.append(tagged(&pool, 10));
        q.append(tagged(&pool, 11));

        let mut calls = Vec::new();
        assert!(q.pop_head_if(|b| b.tag() == 11, |e| calls.push(e)).is_none());
        assert!(calls.is_empty());
        assert!(q.pop_head_if(|b| b.tag() == 10, |e| calls.push(e)).is_some());
        assert!(q.pop_head_if(|b| b.tag() == 11, |e| calls.push(e)).is_some());
        assert_eq!(calls, vec![false, true]);
    }
}
