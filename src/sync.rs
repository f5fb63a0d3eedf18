//! Event-flag signal shared by the dispatcher, correlator and bus pump.
//!
//! A 32-bit flag word. Setters OR bits in and wake every waiter; waiters
//! resolve as soon as any bit of their mask is set. Waiting never clears
//! bits: the consumer that drains the matching queue clears them, inside
//! the same critical section as the pop that emptied it.

use core::cell::RefCell;
use core::future::{Future, poll_fn};
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time::{Duration, with_timeout};

use crate::error::{Error, Result};

/// Concurrent waiters before the oldest are woken to re-register.
const FLAG_WAITERS: usize = 16;

struct FlagState {
    bits: u32,
    waiters: MultiWakerRegistration<FLAG_WAITERS>,
}

pub struct EventFlags {
    state: Mutex<CriticalSectionRawMutex, RefCell<FlagState>>,
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFlags {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(FlagState {
                bits: 0,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    pub fn set(&self, mask: u32) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.bits |= mask;
            s.waiters.wake();
        });
    }

    pub fn clear(&self, mask: u32) {
        self.state.lock(|s| s.borrow_mut().bits &= !mask);
    }

    /// Current flag word.
    pub fn get(&self) -> u32 {
        self.state.lock(|s| s.borrow().bits)
    }

    /// Resolve with the set subset of `mask` once any of it is set.
    pub fn wait_any(&self, mask: u32) -> impl Future<Output = u32> + use<'_> {
        poll_fn(move |cx| {
            self.state.lock(|s| {
                let mut s = s.borrow_mut();
                let hit = s.bits & mask;
                if hit != 0 {
                    Poll::Ready(hit)
                } else {
                    s.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
    }

    /// [`wait_any`](Self::wait_any) bounded by `timeout`.
    pub async fn wait_any_for(&self, mask: u32, timeout: Duration) -> Result<u32> {
        with_timeout(timeout, self.wait_any(mask))
            .await
            .map_err(|_| Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn set_and_clear() {
        let f = EventFlags::new();
        f.set(0b101);
        assert_eq!(f.get(), 0b101);
        f.clear(0b001);
        assert_eq!(f.get(), 0b100);
    }

    #[test]
    fn wait_resolves_with_masked_bits_without_clearing() {
        let f = EventFlags::new();
        f.set(0b110);
        assert_eq!(block_on(f.wait_any(0b011)), 0b010);
        assert_eq!(f.get(), 0b110);
    }

    #[test]
    fn wait_times_out_on_unrelated_bits() {
        let f = EventFlags::new();
        f.set(0b1000);
        let r = block_on(f.wait_any_for(0b0001, Duration::from_millis(10)));
        assert_eq!(r, Err(Error::Timeout));
    }

    #[test]
    fn setter_on_other_thread_wakes_waiter() {
        let f = std::sync::Arc::new(EventFlags::new());
        let setter = {
            let f = f.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                f.set(0x10);
            })
        };
        let hit = block_on(f.wait_any_for(0x10, Duration::from_secs(2))).unwrap();
        assert_eq!(hit, 0x10);
        setter.join().unwrap();
    }
}
