//! One command channel: TX, RX and event queues plus in-flight bookkeeping.
//!
//! All bookkeeping lives behind one critical-section mutex. Queue
//! operations that must agree with it (handing a frame to the bus, taking
//! a response, abandoning a request) run nested inside that same critical
//! section, so the in-flight record and the queues are never observed out
//! of step.

use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use heapless::Deque;

use super::{CommandClass, Serialization};
use crate::buffer::{Buffer, BufferKind, BufferQueue};
use crate::bus::frame::{DESCRIPTOR_SIZE, FrameFlags, FrameHeader};
use crate::error::{Error, FW_STATUS_REJOIN_FAILURE, Result};

/// Abandoned requests remembered so their late answers can be dropped.
const LATE_SLOTS: usize = 4;
/// Outstanding asynchronous requests with a caller context.
const ASYNC_SLOTS: usize = 8;
/// Caller waits remembered for queued requests still on TX.
const WAIT_SLOTS: usize = 16;

/// Flag byte of a queued frame.
pub(crate) fn frame_flags(buffer: &Buffer) -> FrameFlags {
    buffer
        .as_slice()
        .get(6)
        .map_or(FrameFlags::empty(), |&b| FrameFlags::from_bits_retain(b))
}

fn frame_command(buffer: &Buffer) -> u16 {
    match buffer.as_slice() {
        [_, _, lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        _ => 0,
    }
}

/// The frame waits synchronously for an answer on the RX queue.
fn expects_reply(flags: FrameFlags) -> bool {
    flags.contains(FrameFlags::STATUS_EXPECTED) && !flags.contains(FrameFlags::ASYNC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    packet_id: u16,
    command: u16,
    issued_at: Instant,
    deadline: Instant,
    transmitted: bool,
}

struct ChannelState {
    in_flight: Option<InFlight>,
    next_packet_id: u16,
    /// (packet id, command) of requests abandoned after transmission.
    late: Deque<(u16, u16), LATE_SLOTS>,
    /// (packet id, command, context) of asynchronous requests.
    async_contexts: Deque<(u16, u16, u32), ASYNC_SLOTS>,
    /// (packet id, wait) of queued requests not yet on the bus. The
    /// deadline is stamped from it at transmit.
    waits: Deque<(u16, Duration), WAIT_SLOTS>,
    /// Packet ids the bus refused.
    failed: Deque<u16, LATE_SLOTS>,
}

pub struct CommandChannel {
    class: CommandClass,
    timeout: Duration,
    pub(crate) tx: BufferQueue,
    pub(crate) rx: BufferQueue,
    pub(crate) events: BufferQueue,
    state: Mutex<CriticalSectionRawMutex, RefCell<ChannelState>>,
}

impl CommandChannel {
    pub fn new(class: CommandClass, timeout: Duration) -> Self {
        Self {
            class,
            timeout,
            tx: BufferQueue::new(),
            rx: BufferQueue::new(),
            events: BufferQueue::new(),
            state: Mutex::new(RefCell::new(ChannelState {
                in_flight: None,
                next_packet_id: 0,
                late: Deque::new(),
                async_contexts: Deque::new(),
                waits: Deque::new(),
                failed: Deque::new(),
            })),
        }
    }

    pub fn class(&self) -> CommandClass {
        self.class
    }

    /// Default wait for this class.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `true` when an exclusive channel has a request outstanding.
    pub fn is_busy(&self) -> bool {
        self.class.serialization() == Serialization::Exclusive
            && self.state.lock(|s| s.borrow().in_flight.is_some())
    }

    /// Packet id and issue time of the outstanding request.
    pub fn in_flight(&self) -> Option<(u16, Instant)> {
        self.state
            .lock(|s| s.borrow().in_flight.map(|f| (f.packet_id, f.issued_at)))
    }

    /// Frames waiting for the bus.
    pub fn pending_tx(&self) -> usize {
        self.tx.len()
    }

    /// Assign the next packet id, stamp it into the descriptor and queue
    /// the frame for transmission.
    pub(crate) fn enqueue(
        &self,
        mut buffer: Buffer,
        command: u16,
        flags: FrameFlags,
        wait: Option<Duration>,
        context: Option<u32>,
    ) -> Result<u16> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let exclusive = self.class.serialization() == Serialization::Exclusive;
            if exclusive && s.in_flight.is_some() {
                return Err(Error::Busy);
            }
            let packet_id = s.next_packet_id;
            s.next_packet_id = packet_id.wrapping_add(1);

            let id_field = buffer.as_mut_slice().get_mut(4..6).ok_or(Error::InvalidParameter)?;
            id_field.copy_from_slice(&packet_id.to_le_bytes());
            buffer.set_tag(packet_id);

            if exclusive && expects_reply(flags) {
                let now = Instant::now();
                s.in_flight = Some(InFlight {
                    packet_id,
                    command,
                    issued_at: now,
                    deadline: now + wait.unwrap_or(self.timeout),
                    transmitted: false,
                });
            } else if let Some(wait) = wait.filter(|_| expects_reply(flags)) {
                push_evicting(&mut s.waits, (packet_id, wait));
            }
            if let Some(ctx) = context {
                push_evicting(&mut s.async_contexts, (packet_id, command, ctx));
            }
            self.tx.append(buffer);
            Ok(packet_id)
        })
    }

    /// Pop the TX head if the serialization policy lets it onto the bus
    /// now, recording it as transmitted.
    pub(crate) fn take_transmittable(&self) -> Option<Buffer> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let in_flight = s.in_flight;
            let buffer = self.tx.pop_head_if(
                |b| {
                    if !expects_reply(frame_flags(b)) {
                        return true;
                    }
                    match in_flight {
                        None => true,
                        Some(f) => f.packet_id == b.tag() && !f.transmitted,
                    }
                },
                |_| {},
            )?;
            if expects_reply(frame_flags(&buffer)) {
                match s.in_flight.as_mut() {
                    Some(f) => f.transmitted = true,
                    None => {
                        let packet_id = buffer.tag();
                        let wait = s
                            .waits
                            .iter()
                            .find(|&&(id, _)| id == packet_id)
                            .map_or(self.timeout, |&(_, wait)| wait);
                        retain(&mut s.waits, |&(id, _)| id != packet_id);
                        let now = Instant::now();
                        s.in_flight = Some(InFlight {
                            packet_id,
                            command: frame_command(&buffer),
                            issued_at: now,
                            deadline: now + wait,
                            transmitted: true,
                        });
                    }
                }
            }
            Some(buffer)
        })
    }

    /// Queue `buffer` on RX if it answers the transmitted in-flight
    /// request; otherwise hand it back.
    pub(crate) fn accept_response(
        &self,
        header: &FrameHeader,
        buffer: Buffer,
    ) -> core::result::Result<(), Buffer> {
        self.state.lock(|s| {
            let s = s.borrow();
            match s.in_flight {
                Some(f)
                    if f.transmitted
                        && f.packet_id == header.packet_id
                        && f.command == header.command =>
                {
                    self.rx.append(buffer);
                    Ok(())
                }
                _ => Err(buffer),
            }
        })
    }

    /// Clear the in-flight record if it belongs to `packet_id`.
    pub(crate) fn complete(&self, packet_id: u16) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.in_flight.is_some_and(|f| f.packet_id == packet_id) {
                s.in_flight = None;
            }
        });
    }

    /// Give up on `packet_id`: unqueue it if it never reached the bus,
    /// otherwise remember it so its answer is dropped when it arrives.
    /// Returns `true` if the request was in flight.
    pub(crate) fn abandon(&self, packet_id: u16) -> bool {
        let (was_in_flight, stale) = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let unsent = self.tx.remove_by_predicate(|b| b.tag() == packet_id);
            let answered = self.rx.remove_by_predicate(|b| b.tag() == packet_id);
            retain(&mut s.waits, |&(id, _)| id != packet_id);
            retain(&mut s.failed, |&id| id != packet_id);
            let mut was_in_flight = false;
            if let Some(f) = s.in_flight.filter(|f| f.packet_id == packet_id) {
                if f.transmitted && answered.is_none() {
                    push_evicting(&mut s.late, (f.packet_id, f.command));
                }
                s.in_flight = None;
                was_in_flight = true;
            }
            (was_in_flight, (unsent, answered))
        });
        drop(stale);
        was_in_flight
    }

    /// Expire the in-flight request once its deadline has passed.
    pub(crate) fn expire_overdue(&self, now: Instant) -> Option<u16> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let f = s.in_flight.filter(|f| f.transmitted && f.deadline <= now)?;
            if self.rx.contains(|b| b.tag() == f.packet_id) {
                return None;
            }
            push_evicting(&mut s.late, (f.packet_id, f.command));
            s.in_flight = None;
            Some(f.packet_id)
        })
    }

    /// The bus refused `buffer`. If it is the transmitted in-flight
    /// request, its waiter gets the bare descriptor back on RX and the id
    /// is recorded as failed; otherwise the buffer is handed back.
    pub(crate) fn fail_transmit(&self, mut buffer: Buffer) -> core::result::Result<(), Buffer> {
        let Ok(header) = FrameHeader::decode(buffer.as_slice()) else {
            return Err(buffer);
        };
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let packet_id = buffer.tag();
            let ours = s.in_flight.is_some_and(|f| {
                f.transmitted && f.packet_id == packet_id && f.command == header.command
            });
            if !ours {
                return Err(buffer);
            }
            let bare = FrameHeader {
                payload_len: 0,
                ..header
            };
            buffer.truncate(DESCRIPTOR_SIZE);
            buffer.as_mut_slice().copy_from_slice(&bare.encode());
            buffer.set_kind(BufferKind::Response);
            push_evicting(&mut s.failed, packet_id);
            self.rx.append(buffer);
            Ok(())
        })
    }

    /// `true` (once) if the bus refused `packet_id`.
    pub(crate) fn take_failed(&self, packet_id: u16) -> bool {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let before = s.failed.len();
            retain(&mut s.failed, |&id| id != packet_id);
            s.failed.len() != before
        })
    }

    /// `true` (once) if this is the late answer of an abandoned request.
    pub(crate) fn take_late(&self, packet_id: u16, command: u16) -> bool {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let before = s.late.len();
            retain(&mut s.late, |&(id, cmd)| id != packet_id || cmd != command);
            s.late.len() != before
        })
    }

    pub(crate) fn has_async_context(&self, packet_id: u16, command: u16) -> bool {
        self.state.lock(|s| {
            s.borrow()
                .async_contexts
                .iter()
                .any(|&(id, cmd, _)| id == packet_id && cmd == command)
        })
    }

    pub(crate) fn take_async_context(&self, packet_id: u16, command: u16) -> Option<u32> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let ctx = s
                .async_contexts
                .iter()
                .find(|&&(id, cmd, _)| id == packet_id && cmd == command)
                .map(|&(_, _, ctx)| ctx)?;
            retain(&mut s.async_contexts, |&(id, cmd, _)| id != packet_id || cmd != command);
            Some(ctx)
        })
    }

    /// Drain TX. Frames that expect a reply come back on RX as synthetic
    /// rejoin-failure responses; everything else is freed. Returns how many
    /// synthetic responses were queued.
    pub(crate) fn flush(&self) -> usize {
        let mut drained = Vec::new();
        self.state.lock(|s| {
            s.borrow_mut().waits.clear();
            self.tx.drain_matching(|_| true, |b| drained.push(b));
        });
        let mut woken = 0;
        for mut buffer in drained {
            if !expects_reply(frame_flags(&buffer)) {
                continue;
            }
            let Ok(header) = FrameHeader::decode(buffer.as_slice()) else {
                continue;
            };
            let synthetic = FrameHeader {
                payload_len: 0,
                status: FW_STATUS_REJOIN_FAILURE,
                ..header
            };
            buffer.truncate(DESCRIPTOR_SIZE);
            buffer.as_mut_slice().copy_from_slice(&synthetic.encode());
            buffer.set_kind(BufferKind::Response);
            self.rx.append(buffer);
            woken += 1;
        }
        woken
    }
}

/// Push to the back, dropping the oldest entry when full.
fn push_evicting<T, const N: usize>(deque: &mut Deque<T, N>, item: T) {
    if deque.is_full() {
        deque.pop_front();
    }
    let _ = deque.push_back(item);
}

fn retain<T: Copy, const N: usize>(deque: &mut Deque<T, N>, mut keep: impl FnMut(&T) -> bool) {
    let len = deque.len();
    for _ in 0..len {
        if let Some(item) = deque.pop_front() {
            if keep(&item) {
                let _ = deque.push_back(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;

    fn frame(pool: &BufferPool, command: u16, flags: FrameFlags) -> Buffer {
        let mut b = pool.try_allocate(BufferKind::Command, DESCRIPTOR_SIZE).unwrap();
        let h = FrameHeader {
            payload_len: 0,
            queue_id: 4,
            command,
            packet_id: 0,
            flags,
            status: 0,
        };
        b.extend_from_slice(&h.encode()).unwrap();
        b
    }

    fn response(pool: &BufferPool, command: u16, packet_id: u16) -> (FrameHeader, Buffer) {
        let h = FrameHeader {
            payload_len: 0,
            queue_id: 4,
            command,
            packet_id,
            flags: FrameFlags::STATUS_EXPECTED,
            status: 0,
        };
        let mut b = pool.try_allocate(BufferKind::Response, DESCRIPTOR_SIZE).unwrap();
        b.extend_from_slice(&h.encode()).unwrap();
        b.set_tag(packet_id);
        (h, b)
    }

    const WAIT: FrameFlags = FrameFlags::STATUS_EXPECTED;

    #[test]
    fn packet_ids_are_stamped_and_increment() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Bt, Duration::from_secs(1));
        let a = ch.enqueue(frame(&pool, 1, WAIT), 1, WAIT, None, None).unwrap();
        let b = ch.enqueue(frame(&pool, 2, WAIT), 2, WAIT, None, None).unwrap();
        assert_eq!((a, b), (0, 1));
        let head = ch.tx.pop_head().unwrap();
        assert_eq!(FrameHeader::decode(head.as_slice()).unwrap().packet_id, 0);
    }

    #[test]
    fn exclusive_channel_is_busy_until_complete() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch.enqueue(frame(&pool, 0x14, WAIT), 0x14, WAIT, None, None).unwrap();
        assert!(ch.is_busy());
        assert_eq!(
            ch.enqueue(frame(&pool, 0x13, WAIT), 0x13, WAIT, None, None),
            Err(Error::Busy)
        );
        ch.complete(id);
        assert!(!ch.is_busy());
    }

    #[test]
    fn queued_channel_holds_second_request_until_first_answered() {
        let pool = BufferPool::new(6);
        let ch = CommandChannel::new(CommandClass::Socket, Duration::from_secs(1));
        let first = ch.enqueue(frame(&pool, 0x42, WAIT), 0x42, WAIT, None, None).unwrap();
        ch.enqueue(frame(&pool, 0x43, WAIT), 0x43, WAIT, None, None).unwrap();
        assert!(!ch.is_busy());

        assert_eq!(ch.take_transmittable().unwrap().tag(), first);
        assert!(ch.take_transmittable().is_none());

        let (h, b) = response(&pool, 0x42, first);
        assert!(ch.accept_response(&h, b).is_ok());
        ch.complete(first);
        assert_eq!(ch.take_transmittable().unwrap().tag(), first + 1);
    }

    #[test]
    fn fire_and_forget_frames_bypass_the_hold() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Bt, Duration::from_secs(1));
        ch.enqueue(frame(&pool, 1, WAIT), 1, WAIT, None, None).unwrap();
        ch.enqueue(frame(&pool, 2, FrameFlags::empty()), 2, FrameFlags::empty(), None, None)
            .unwrap();
        assert!(ch.take_transmittable().is_some());
        assert!(ch.take_transmittable().is_some());
    }

    #[test]
    fn response_for_other_id_is_refused() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch.enqueue(frame(&pool, 0x14, WAIT), 0x14, WAIT, None, None).unwrap();
        // Not yet transmitted.
        let (h, b) = response(&pool, 0x14, id);
        let b = ch.accept_response(&h, b).unwrap_err();
        drop(b);
        ch.take_transmittable().unwrap();
        let (h, b) = response(&pool, 0x14, id.wrapping_add(1));
        assert!(ch.accept_response(&h, b).is_err());
        let (h, b) = response(&pool, 0x14, id);
        assert!(ch.accept_response(&h, b).is_ok());
    }

    #[test]
    fn abandon_after_transmit_marks_late_once() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch.enqueue(frame(&pool, 0x13, WAIT), 0x13, WAIT, None, None).unwrap();
        drop(ch.take_transmittable());
        assert!(ch.abandon(id));
        assert!(!ch.is_busy());
        assert!(ch.take_late(id, 0x13));
        assert!(!ch.take_late(id, 0x13));
    }

    #[test]
    fn abandon_before_transmit_unqueues() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch.enqueue(frame(&pool, 0x13, WAIT), 0x13, WAIT, None, None).unwrap();
        assert!(ch.abandon(id));
        assert!(ch.tx.is_empty());
        assert!(!ch.take_late(id, 0x13));
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn overdue_request_expires() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch
            .enqueue(frame(&pool, 0x13, WAIT), 0x13, WAIT, Some(Duration::from_millis(5)), None)
            .unwrap();
        drop(ch.take_transmittable());
        let issued = ch.in_flight().unwrap().1;
        assert_eq!(ch.expire_overdue(issued), None);
        assert_eq!(ch.expire_overdue(issued + Duration::from_millis(10)), Some(id));
        assert!(!ch.is_busy());
    }

    #[test]
    fn queued_request_keeps_the_callers_wait() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Bt, Duration::from_millis(50));
        let id = ch
            .enqueue(frame(&pool, 0xA0, WAIT), 0xA0, WAIT, Some(Duration::from_millis(500)), None)
            .unwrap();
        drop(ch.take_transmittable());
        let issued = ch.in_flight().unwrap().1;
        assert_eq!(ch.expire_overdue(issued + Duration::from_millis(100)), None);
        assert_eq!(ch.expire_overdue(issued + Duration::from_millis(500)), Some(id));

        // Without a wait of its own the class default applies.
        let id = ch.enqueue(frame(&pool, 0xA1, WAIT), 0xA1, WAIT, None, None).unwrap();
        drop(ch.take_transmittable());
        let issued = ch.in_flight().unwrap().1;
        assert_eq!(ch.expire_overdue(issued + Duration::from_millis(50)), Some(id));
    }

    #[test]
    fn refused_transmit_answers_the_waiter_once() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Wlan, Duration::from_secs(1));
        let id = ch.enqueue(frame(&pool, 0x13, WAIT), 0x13, WAIT, None, None).unwrap();
        let sent = ch.take_transmittable().unwrap();
        assert!(ch.fail_transmit(sent).is_ok());

        let r = ch.rx.pop_head().unwrap();
        assert_eq!((r.tag(), r.len()), (id, DESCRIPTOR_SIZE));
        assert!(ch.take_failed(id));
        assert!(!ch.take_failed(id));

        // Not in flight: handed back untouched.
        let stray = frame(&pool, 0x14, WAIT);
        assert!(ch.fail_transmit(stray).is_err());
    }

    #[test]
    fn flush_turns_waiting_frames_into_rejoin_failures() {
        let pool = BufferPool::new(4);
        let ch = CommandChannel::new(CommandClass::Bt, Duration::from_secs(1));
        ch.enqueue(frame(&pool, 1, WAIT), 1, WAIT, None, None).unwrap();
        ch.enqueue(frame(&pool, 2, FrameFlags::empty()), 2, FrameFlags::empty(), None, None)
            .unwrap();
        assert_eq!(ch.flush(), 1);
        assert!(ch.tx.is_empty());
        let r = ch.rx.pop_head().unwrap();
        assert_eq!(r.kind(), BufferKind::Response);
        assert_eq!(r.len(), DESCRIPTOR_SIZE);
        let h = FrameHeader::decode(r.as_slice()).unwrap();
        assert_eq!((h.command, h.status), (1, FW_STATUS_REJOIN_FAILURE));
        assert_eq!(pool.in_use(BufferKind::Command), 0);
    }

    #[test]
    fn async_context_is_taken_once() {
        let pool = BufferPool::new(2);
        let ch = CommandChannel::new(CommandClass::Socket, Duration::from_secs(1));
        let flags = FrameFlags::STATUS_EXPECTED | FrameFlags::ASYNC;
        let id = ch.enqueue(frame(&pool, 0x42, flags), 0x42, flags, None, Some(7)).unwrap();
        assert!(ch.has_async_context(id, 0x42));
        assert_eq!(ch.take_async_context(id, 0x42), Some(7));
        assert_eq!(ch.take_async_context(id, 0x42), None);
    }
}
