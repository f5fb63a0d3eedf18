//! Per-class command dispatch and response correlation.
//!
//! ```text
//!  caller task                      Dispatcher                         bus pump
//!  ───────────                      ──────────                         ────────
//!  send_command ──encode──▶ channel[class].tx ──next_transmit──▶ Transport::write
//!       │                                                              │
//!       │  wait_for_response                                           ▼
//!       └────────◀── channel[class].rx ◀──deliver (in-flight match)── decoder
//!                    channel[class].events ◀──deliver (anything else)──┘
//! ```
//!
//! Each class owns one [`CommandChannel`]. Exclusive classes (common,
//! WLAN, network) refuse a second request while one is outstanding;
//! queued classes (BT, socket) accept many but the pump only lets one
//! status-expecting frame onto the bus at a time. Either way the head of a
//! channel's RX queue is always the answer to its single in-flight
//! request.

pub mod channel;
pub mod command;
pub mod correlator;

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

pub use channel::CommandChannel;

use crate::buffer::{Buffer, BufferKind, BufferPool};
use crate::bus::frame::{
    DESCRIPTOR_SIZE, FrameFlags, FrameHeader, MAX_PAYLOAD_SIZE, QUEUE_BT, QUEUE_WLAN_MGMT,
    split_frame,
};
use crate::config::DriverConfig;
use crate::error::{Error, Result, check_firmware_status};
use crate::sync::EventFlags;

/// Signal bit raised whenever a TX queue gains a frame or a channel frees up.
pub const BUS_TX_BIT: u32 = 1 << 16;

/// Number of command classes.
pub const CLASS_COUNT: usize = 5;

// ── Command classes ──────────────────────────────────────────

/// Command class, in bus priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Common,
    Wlan,
    Network,
    Bt,
    Socket,
}

/// How a channel serializes its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    /// A second request while one is outstanding fails with `Busy`.
    Exclusive,
    /// Requests queue up; the bus releases them one at a time.
    Queued,
}

impl CommandClass {
    pub const ALL: [Self; CLASS_COUNT] =
        [Self::Common, Self::Wlan, Self::Network, Self::Bt, Self::Socket];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Wlan => "wlan",
            Self::Network => "network",
            Self::Bt => "bt",
            Self::Socket => "socket",
        }
    }

    /// Firmware queue id placed in the frame descriptor.
    pub const fn firmware_queue(self) -> u8 {
        match self {
            Self::Bt => QUEUE_BT,
            _ => QUEUE_WLAN_MGMT,
        }
    }

    pub const fn serialization(self) -> Serialization {
        match self {
            Self::Common | Self::Wlan | Self::Network => Serialization::Exclusive,
            Self::Bt | Self::Socket => Serialization::Queued,
        }
    }

    /// Signal bit set when this class's RX queue gains a response.
    pub const fn response_bit(self) -> u32 {
        1 << self.index()
    }

    /// Signal bit set when this class's event queue gains a frame.
    pub const fn event_bit(self) -> u32 {
        1 << (8 + self.index())
    }
}

// ── Wait policy and replies ──────────────────────────────────

/// What the caller of [`Dispatcher::send_command`] waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fire and forget: no response is expected.
    ReturnImmediately,
    /// The response arrives later on the class's event queue.
    Async,
    /// Wait for the status of the response, discarding its payload.
    Status(Duration),
    /// Wait for the full response.
    Response(Duration),
}

impl WaitPolicy {
    fn frame_flags(self) -> FrameFlags {
        match self {
            Self::ReturnImmediately => FrameFlags::empty(),
            Self::Async => FrameFlags::STATUS_EXPECTED | FrameFlags::ASYNC,
            Self::Status(_) => FrameFlags::STATUS_EXPECTED,
            Self::Response(_) => FrameFlags::STATUS_EXPECTED | FrameFlags::PAYLOAD_EXPECTED,
        }
    }

    fn wait(self) -> Option<Duration> {
        match self {
            Self::Status(d) | Self::Response(d) => Some(d),
            Self::ReturnImmediately | Self::Async => None,
        }
    }
}

/// A received frame with its decoded descriptor.
#[derive(Debug)]
pub struct Response {
    header: FrameHeader,
    buffer: Buffer,
    context: Option<u32>,
}

impl Response {
    fn from_buffer(buffer: Buffer, context: Option<u32>) -> Result<Self> {
        let (header, _) = split_frame(buffer.as_slice())?;
        Ok(Self {
            header,
            buffer,
            context,
        })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn command(&self) -> u16 {
        self.header.command
    }

    pub fn packet_id(&self) -> u16 {
        self.header.packet_id
    }

    /// Raw firmware status (0 on success).
    pub fn status(&self) -> u16 {
        self.header.status
    }

    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice().get(DESCRIPTOR_SIZE..).unwrap_or(&[])
    }

    /// Context registered with an asynchronous request, if any.
    pub fn context(&self) -> Option<u32> {
        self.context
    }

    /// Give the buffer back to the caller (dropping it frees the slot).
    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

/// Outcome of a successful [`Dispatcher::send_command`].
#[derive(Debug)]
pub enum Reply {
    /// Accepted; the answer will arrive on the event queue.
    InProgress,
    /// Sent (fire-and-forget) or answered with success status.
    Completed,
    /// Answered with success status and a payload.
    Payload(Response),
}

impl Reply {
    /// Response for a [`WaitPolicy::Response`] request.
    pub fn into_response(self) -> Result<Response> {
        match self {
            Self::Payload(r) => Ok(r),
            Self::InProgress | Self::Completed => Err(Error::NotAvailable),
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────

/// Owns every command channel plus the pool and signal they share.
pub struct Dispatcher {
    pool: BufferPool,
    flags: EventFlags,
    channels: [CommandChannel; CLASS_COUNT],
    buffer_wait: Duration,
    global_block: Mutex<CriticalSectionRawMutex, Cell<Option<(CommandClass, u16)>>>,
}

/// Abandons the request on drop unless the response was taken, so a
/// timed-out or cancelled caller never leaves its channel busy.
struct InFlightGuard<'a> {
    dispatcher: &'a Dispatcher,
    class: CommandClass,
    packet_id: u16,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dispatcher.abandon(self.class, self.packet_id);
        }
    }
}

impl Dispatcher {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            pool: BufferPool::new(config.buffer_count as usize),
            flags: EventFlags::new(),
            channels: CommandClass::ALL
                .map(|class| CommandChannel::new(class, config.class_timeout(class))),
            buffer_wait: config.buffer_wait(),
            global_block: Mutex::new(Cell::new(None)),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn flags(&self) -> &EventFlags {
        &self.flags
    }

    pub fn channel(&self, class: CommandClass) -> &CommandChannel {
        &self.channels[class.index()]
    }

    /// Default wait for `class` when the caller has none of its own.
    pub fn default_timeout(&self, class: CommandClass) -> Duration {
        self.channel(class).timeout()
    }

    /// Class and packet id of the command currently holding the bus.
    pub fn global_block(&self) -> Option<(CommandClass, u16)> {
        self.global_block.lock(Cell::get)
    }

    /// Encode and queue a command, then wait according to `policy`.
    ///
    /// `context` is handed back with the answer of an [`WaitPolicy::Async`]
    /// request when it is read from the event queue.
    pub async fn send_command(
        &self,
        class: CommandClass,
        command: u16,
        payload: &[u8],
        policy: WaitPolicy,
        context: Option<u32>,
    ) -> Result<Reply> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidParameter);
        }
        let channel = self.channel(class);
        if channel.is_busy() {
            debug!("DISPATCH[{}]: 0x{:02X} refused, channel busy", class.name(), command);
            return Err(Error::Busy);
        }

        let mut flags = policy.frame_flags();
        if command::blocks_global_queue(command) {
            flags |= FrameFlags::GLOBAL_QUEUE_BLOCK;
        }
        let header = FrameHeader {
            payload_len: payload.len() as u16,
            queue_id: class.firmware_queue(),
            command,
            packet_id: 0,
            flags,
            status: 0,
        };
        let mut buffer = self
            .pool
            .allocate(BufferKind::Command, DESCRIPTOR_SIZE + payload.len(), self.buffer_wait)
            .await?;
        buffer.extend_from_slice(&header.encode())?;
        buffer.extend_from_slice(payload)?;

        let context = if policy == WaitPolicy::Async { context } else { None };
        let packet_id = channel.enqueue(buffer, command, flags, policy.wait(), context)?;
        self.flags.set(BUS_TX_BIT);
        debug!(
            "DISPATCH[{}]: queued 0x{:02X} id={} len={}",
            class.name(),
            command,
            packet_id,
            payload.len()
        );

        let wait = match policy {
            WaitPolicy::ReturnImmediately => return Ok(Reply::Completed),
            WaitPolicy::Async => return Ok(Reply::InProgress),
            WaitPolicy::Status(d) | WaitPolicy::Response(d) => d,
        };

        let mut guard = InFlightGuard {
            dispatcher: self,
            class,
            packet_id,
            armed: true,
        };
        let started = Instant::now();
        let buffer = match correlator::wait_for_response(
            &channel.rx,
            &self.flags,
            class.response_bit(),
            packet_id,
            wait,
            || channel.complete(packet_id),
        )
        .await
        {
            Ok(b) => b,
            Err(e) => {
                warn!(
                    "DISPATCH[{}]: 0x{:02X} id={} no response after {} ms",
                    class.name(),
                    command,
                    packet_id,
                    wait.as_millis()
                );
                return Err(e);
            }
        };
        guard.disarm();
        self.flags.set(BUS_TX_BIT);
        if channel.take_failed(packet_id) {
            warn!(
                "DISPATCH[{}]: 0x{:02X} id={} never reached the NWP",
                class.name(),
                command,
                packet_id
            );
            return Err(Error::TransmitFailed);
        }

        let response = Response::from_buffer(buffer, None)?;
        debug!(
            "DISPATCH[{}]: 0x{:02X} id={} answered in {} ms status=0x{:X}",
            class.name(),
            command,
            packet_id,
            started.elapsed().as_millis(),
            response.status()
        );
        check_firmware_status(response.status())?;
        match policy {
            WaitPolicy::Response(_) => Ok(Reply::Payload(response)),
            _ => Ok(Reply::Completed),
        }
    }

    fn abandon(&self, class: CommandClass, packet_id: u16) {
        if self.channel(class).abandon(packet_id) {
            debug!("DISPATCH[{}]: id={} abandoned", class.name(), packet_id);
        }
        self.release_global_block(class, packet_id);
        self.flags.set(BUS_TX_BIT);
    }

    fn release_global_block(&self, class: CommandClass, packet_id: u16) {
        self.global_block.lock(|b| {
            if b.get() == Some((class, packet_id)) {
                b.set(None);
            }
        });
    }

    /// Next frame the bus may carry, in class priority order. `None` when
    /// every queue is empty, held back by its serialization policy, or a
    /// global-queue-block command is awaiting its answer.
    pub fn next_transmit(&self) -> Option<Buffer> {
        if self.global_block().is_some() {
            return None;
        }
        for channel in &self.channels {
            if let Some(buffer) = channel.take_transmittable() {
                let flags = channel::frame_flags(&buffer);
                if flags.contains(FrameFlags::GLOBAL_QUEUE_BLOCK | FrameFlags::STATUS_EXPECTED) {
                    let owner = (channel.class(), buffer.tag());
                    self.global_block.lock(|b| b.set(Some(owner)));
                }
                return Some(buffer);
            }
        }
        None
    }

    /// Report a frame the transport refused. Its waiter, if any, fails with
    /// [`Error::TransmitFailed`] and the bus is released for other classes.
    pub fn transmit_failed(&self, mut buffer: Buffer) {
        let packet_id = buffer.tag();
        for channel in &self.channels {
            match channel.fail_transmit(buffer) {
                Ok(()) => {
                    self.release_global_block(channel.class(), packet_id);
                    self.flags.set(channel.class().response_bit() | BUS_TX_BIT);
                    return;
                }
                Err(b) => buffer = b,
            }
        }
        debug!("DISPATCH: refused frame id={} had no waiter", packet_id);
    }

    /// Route one whole frame received from the NWP.
    ///
    /// The answer to a transmitted in-flight request goes to that
    /// channel's RX queue. The late answer of an abandoned request is
    /// dropped. Everything else is an event for the class it belongs to.
    pub fn deliver(&self, frame: &[u8]) -> Result<()> {
        let (header, _) = split_frame(frame)?;
        let is_async = header.flags.contains(FrameFlags::ASYNC);

        if !is_async {
            let mut buffer = self.copy_in(BufferKind::Response, frame, header.packet_id)?;
            for channel in &self.channels {
                match channel.accept_response(&header, buffer) {
                    Ok(()) => {
                        self.release_global_block(channel.class(), header.packet_id);
                        self.flags.set(channel.class().response_bit());
                        return Ok(());
                    }
                    Err(b) => buffer = b,
                }
            }
            for channel in &self.channels {
                if channel.take_late(header.packet_id, header.command) {
                    debug!(
                        "DISPATCH[{}]: dropping late 0x{:02X} id={}",
                        channel.class().name(),
                        header.command,
                        header.packet_id
                    );
                    return Ok(());
                }
            }
            buffer.set_kind(BufferKind::Event);
            self.push_event(self.event_class(&header), buffer);
            return Ok(());
        }

        let buffer = self.copy_in(BufferKind::Event, frame, header.packet_id)?;
        self.push_event(self.event_class(&header), buffer);
        Ok(())
    }

    fn event_class(&self, header: &FrameHeader) -> CommandClass {
        self.channels
            .iter()
            .find(|c| c.has_async_context(header.packet_id, header.command))
            .map_or_else(
                || command::class_of(header.command, header.queue_id),
                CommandChannel::class,
            )
    }

    fn push_event(&self, class: CommandClass, buffer: Buffer) {
        debug!("DISPATCH[{}]: event id={}", class.name(), buffer.tag());
        self.channel(class).events.append(buffer);
        self.flags.set(class.event_bit());
    }

    fn copy_in(&self, kind: BufferKind, frame: &[u8], tag: u16) -> Result<Buffer> {
        let mut buffer = self.pool.try_allocate(kind, frame.len()).inspect_err(|_| {
            warn!("DISPATCH: pool exhausted, dropping inbound frame id={}", tag);
        })?;
        buffer.extend_from_slice(frame)?;
        buffer.set_tag(tag);
        Ok(buffer)
    }

    /// Wait for the next unsolicited (or asynchronous) frame of `class`.
    pub async fn next_event(&self, class: CommandClass, timeout: Duration) -> Result<Response> {
        let channel = self.channel(class);
        let buffer = correlator::wait_for_head(
            &channel.events,
            &self.flags,
            class.event_bit(),
            timeout,
            |_| true,
            || {},
        )
        .await?;
        let (header, _) = split_frame(buffer.as_slice())?;
        let context = channel.take_async_context(header.packet_id, header.command);
        Response::from_buffer(buffer, context)
    }

    /// Empty `class`'s TX queue. Waiters on status-expecting frames are
    /// woken with a synthetic rejoin-failure response; asynchronous frames
    /// are freed. Returns how many waiters were woken.
    pub fn flush(&self, class: CommandClass) -> usize {
        let woken = self.channel(class).flush();
        if woken > 0 {
            info!("DISPATCH[{}]: flushed, {} waiter(s) released", class.name(), woken);
            self.flags.set(class.response_bit());
        }
        woken
    }

    /// Flush every channel.
    pub fn flush_all(&self) -> usize {
        CommandClass::ALL.iter().map(|&c| self.flush(c)).sum()
    }

    /// Abandon transmitted requests whose deadline has passed.
    pub fn expire_overdue(&self, now: Instant) {
        for channel in &self.channels {
            if let Some(packet_id) = channel.expire_overdue(now) {
                warn!("DISPATCH[{}]: id={} overdue, expired", channel.class().name(), packet_id);
                self.release_global_block(channel.class(), packet_id);
                self.flags.set(BUS_TX_BIT);
            }
        }
    }
}
