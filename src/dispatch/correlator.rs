//! Response correlator.
//!
//! A waiter first blocks on the channel's signal bit, then on its own
//! correlation id reaching the head of the RX queue. The queue wakes every
//! registered waiter on each mutation, so a waiter whose buffer is not at
//! the head simply sleeps until the head changes. Only the waiter whose id
//! is at the head takes it.

use core::future::poll_fn;

use embassy_time::{Duration, Instant, with_timeout};

use crate::buffer::{Buffer, BufferQueue};
use crate::error::{Error, Result};
use crate::sync::EventFlags;

/// Wait until the buffer tagged `expected_id` is at the head of `rx`, then
/// pop it.
///
/// `on_take` runs inside the critical section of the pop. When the pop
/// empties the queue, `mask` is cleared on `signal` in that same section.
pub async fn wait_for_response(
    rx: &BufferQueue,
    signal: &EventFlags,
    mask: u32,
    expected_id: u16,
    wait: Duration,
    on_take: impl Fn(),
) -> Result<Buffer> {
    wait_for_head(rx, signal, mask, wait, |b| b.tag() == expected_id, on_take).await
}

/// Generic form of [`wait_for_response`]: take the head once it satisfies
/// `pred`.
pub async fn wait_for_head(
    queue: &BufferQueue,
    signal: &EventFlags,
    mask: u32,
    wait: Duration,
    pred: impl Fn(&Buffer) -> bool,
    on_take: impl Fn(),
) -> Result<Buffer> {
    let deadline = Instant::now() + wait;
    signal.wait_any_for(mask, wait).await?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let take = poll_fn(|cx| {
        queue.poll_pop_head_if(cx, &pred, |now_empty| {
            if now_empty {
                signal.clear(mask);
            }
            on_take();
        })
    });
    with_timeout(remaining, take).await.map_err(|_| Error::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKind, BufferPool};
    use core::cell::Cell;
    use futures_lite::future::{block_on, zip};

    const BIT: u32 = 1 << 3;

    fn tagged(pool: &BufferPool, tag: u16) -> Buffer {
        let mut b = pool.try_allocate(BufferKind::Response, 4).unwrap();
        b.set_tag(tag);
        b
    }

    #[test]
    fn times_out_without_signal() {
        let q = BufferQueue::new();
        let f = EventFlags::new();
        let r = block_on(wait_for_response(&q, &f, BIT, 1, Duration::from_millis(10), || {}));
        assert_eq!(r.unwrap_err(), Error::Timeout);
    }

    #[test]
    fn times_out_when_head_never_matches() {
        let pool = BufferPool::new(2);
        let q = BufferQueue::new();
        let f = EventFlags::new();
        q.append(tagged(&pool, 9));
        f.set(BIT);
        let r = block_on(wait_for_response(&q, &f, BIT, 1, Duration::from_millis(10), || {}));
        assert_eq!(r.unwrap_err(), Error::Timeout);
        assert_eq!(q.len(), 1);
        assert_ne!(f.get() & BIT, 0);
    }

    #[test]
    fn takes_matching_head_and_clears_signal_when_empty() {
        let pool = BufferPool::new(2);
        let q = BufferQueue::new();
        let f = EventFlags::new();
        f.set(0x100);
        q.append(tagged(&pool, 5));
        f.set(BIT);
        let taken = Cell::new(0);
        let b = block_on(wait_for_response(&q, &f, BIT, 5, Duration::from_millis(50), || {
            taken.set(taken.get() + 1);
        }))
        .unwrap();
        assert_eq!(b.tag(), 5);
        assert!(q.is_empty());
        assert_eq!(f.get(), 0x100);
        assert_eq!(taken.get(), 1);
    }

    #[test]
    fn two_waiters_each_get_their_own_buffer() {
        let pool = BufferPool::new(4);
        let q = BufferQueue::new();
        let f = EventFlags::new();
        let a = wait_for_response(&q, &f, BIT, 2, Duration::from_secs(1), || {});
        let b = wait_for_response(&q, &f, BIT, 1, Duration::from_secs(1), || {});
        let producer = async {
            embassy_time::Timer::after(Duration::from_millis(2)).await;
            q.append(tagged(&pool, 1));
            q.append(tagged(&pool, 2));
            f.set(BIT);
        };
        let ((a, b), ()) = block_on(zip(zip(a, b), producer));
        assert_eq!(a.unwrap().tag(), 2);
        assert_eq!(b.unwrap().tag(), 1);
        assert!(q.is_empty());
        assert_eq!(f.get() & BIT, 0);
    }
}
