//! Transport buffer pool.
//!
//! Every frame that crosses the bus lives in a [`Buffer`] drawn from a
//! bounded [`BufferPool`]. A buffer is an owned handle: it sits on at most
//! one [`BufferQueue`] or in exactly one caller's hands, and moving it is
//! the only way to hand it on. Dropping it (or passing it to
//! [`BufferPool::free`]) returns its slot to the pool, so a double free
//! cannot be expressed.
//!
//! ```text
//!   allocate ──▶ Buffer ──append──▶ BufferQueue ──pop──▶ Buffer ──drop──▶ pool
//!                  ▲                                                     │
//!                  └──────────── waiters woken on every free ◀───────────┘
//! ```

pub mod queue;

pub use queue::BufferQueue;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time::{Duration, with_timeout};
use log::warn;

use crate::bus::frame::{DESCRIPTOR_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};

/// Upper bound on pool size (and therefore on any queue's depth).
pub const MAX_BUFFERS: usize = 32;

/// Largest byte block a buffer may hold: descriptor plus maximum payload.
pub const MAX_BUFFER_SIZE: usize = DESCRIPTOR_SIZE + MAX_PAYLOAD_SIZE;

/// Tasks that may wait on pool exhaustion at once before older ones are
/// woken to re-register.
const POOL_WAITERS: usize = 8;

/// What a buffer is used for. Tracked per kind for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferKind {
    /// Outgoing command frame.
    Command = 0,
    /// Response to an outstanding command.
    Response = 1,
    /// Unsolicited or asynchronous frame from the NWP.
    Event = 2,
}

const KIND_COUNT: usize = 3;

// ── Pool ─────────────────────────────────────────────────────

struct PoolState {
    free: usize,
    in_use: [usize; KIND_COUNT],
    waiters: MultiWakerRegistration<POOL_WAITERS>,
}

struct PoolShared {
    capacity: usize,
    state: Mutex<CriticalSectionRawMutex, RefCell<PoolState>>,
}

impl PoolShared {
    fn reclassify(&self, from: BufferKind, to: BufferKind) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let old = &mut s.in_use[from as usize];
            *old = old.saturating_sub(1);
            s.in_use[to as usize] += 1;
        });
    }

    fn release(&self, kind: BufferKind) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.free += 1;
            let used = &mut s.in_use[kind as usize];
            *used = used.saturating_sub(1);
            s.waiters.wake();
        });
    }
}

/// Bounded buffer pool. Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with `capacity` slots (clamped to [`MAX_BUFFERS`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_BUFFERS);
        Self {
            shared: Arc::new(PoolShared {
                capacity,
                state: Mutex::new(RefCell::new(PoolState {
                    free: capacity,
                    in_use: [0; KIND_COUNT],
                    waiters: MultiWakerRegistration::new(),
                })),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.shared.state.lock(|s| s.borrow().free)
    }

    /// Buffers of `kind` currently checked out.
    pub fn in_use(&self, kind: BufferKind) -> usize {
        self.shared.state.lock(|s| s.borrow().in_use[kind as usize])
    }

    /// Allocate without waiting. Used from the receive path, which must
    /// never block.
    pub fn try_allocate(&self, kind: BufferKind, size: usize) -> Result<Buffer> {
        check_size(size)?;
        let taken = self.shared.state.lock(|s| {
            let mut s = s.borrow_mut();
            take_slot(&mut s, kind)
        });
        if taken {
            Ok(self.make(kind, size))
        } else {
            Err(Error::AllocationFailed)
        }
    }

    /// Allocate, waiting up to `timeout` for a slot to be freed.
    pub async fn allocate(&self, kind: BufferKind, size: usize, timeout: Duration) -> Result<Buffer> {
        check_size(size)?;
        let acquire = poll_fn(|cx| self.poll_slot(cx, kind));
        match with_timeout(timeout, acquire).await {
            Ok(()) => Ok(self.make(kind, size)),
            Err(_) => {
                warn!("POOL: no free {:?} buffer after {} ms", kind, timeout.as_millis());
                Err(Error::AllocationFailed)
            }
        }
    }

    /// Return a buffer to the pool. Equivalent to dropping it.
    pub fn free(&self, buffer: Buffer) {
        drop(buffer);
    }

    fn poll_slot(&self, cx: &mut Context<'_>, kind: BufferKind) -> Poll<()> {
        self.shared.state.lock(|s| {
            let mut s = s.borrow_mut();
            if take_slot(&mut s, kind) {
                Poll::Ready(())
            } else {
                s.waiters.register(cx.waker());
                Poll::Pending
            }
        })
    }

    fn make(&self, kind: BufferKind, size: usize) -> Buffer {
        Buffer {
            kind,
            tag: 0,
            limit: size,
            data: Vec::with_capacity(size),
            pool: Arc::clone(&self.shared),
        }
    }
}

fn check_size(size: usize) -> Result<()> {
    if size > MAX_BUFFER_SIZE {
        Err(Error::InvalidParameter)
    } else {
        Ok(())
    }
}

fn take_slot(s: &mut PoolState, kind: BufferKind) -> bool {
    if s.free == 0 {
        return false;
    }
    s.free -= 1;
    s.in_use[kind as usize] += 1;
    true
}

// ── Buffer ───────────────────────────────────────────────────

/// An owned, bounded byte block tagged with a correlation id.
pub struct Buffer {
    kind: BufferKind,
    tag: u16,
    limit: usize,
    data: Vec<u8>,
    pool: Arc<PoolShared>,
}

impl Buffer {
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Correlation id this buffer answers (or carries, for commands).
    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u16) {
        self.tag = tag;
    }

    /// Repurpose the buffer (e.g. a flushed command turned into a
    /// synthetic response) keeping pool accounting straight.
    pub fn set_kind(&mut self, kind: BufferKind) {
        if kind != self.kind {
            self.pool.reclassify(self.kind, kind);
            self.kind = kind;
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Append bytes, failing if the allocation size would be exceeded.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        if self.data.len() + bytes.len() > self.limit {
            return Err(Error::InvalidRange);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size requested at allocation.
    pub fn capacity(&self) -> usize {
        self.limit
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.pool.release(self.kind);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}
