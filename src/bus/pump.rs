//! Bus pump: the only code that touches the [`Transport`].
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │  BusPump::run                                                │
//!  │                                                              │
//!  │   expire overdue ──▶ TX drain ──▶ RX poll ──▶ wait           │
//!  │        │               │            │          │             │
//!  │        │   next_transmit (priority, │   BUS_TX_BIT or        │
//!  │        │   serialization, global    │   poll interval        │
//!  │        │   block) ─▶ write_frame    │                        │
//!  │        │                            ▼                        │
//!  │        │                  FrameDecoder ─▶ Dispatcher::deliver│
//!  │        └── abandoned ids ─▶ late answers dropped             │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transmission is wake-driven: every enqueue and every completed request
//! raises [`BUS_TX_BIT`]. Reception is polled at the configured interval,
//! the same way a host without a usable interrupt line would service the
//! NWP.

use embassy_time::{Duration, Instant, Timer};
use futures_lite::future;
use log::{debug, warn};

use super::frame::FrameDecoder;
use super::transport::Transport;
use crate::dispatch::{BUS_TX_BIT, Dispatcher};

const READ_CHUNK: usize = 512;

/// What one [`BusPump::service`] pass moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Activity {
    pub frames_sent: usize,
    pub frames_received: usize,
}

impl Activity {
    pub fn is_idle(&self) -> bool {
        self.frames_sent == 0 && self.frames_received == 0
    }
}

pub struct BusPump<'a, T: Transport> {
    dispatcher: &'a Dispatcher,
    transport: T,
    decoder: FrameDecoder,
    poll_interval: Duration,
}

impl<'a, T: Transport> BusPump<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher, transport: T, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            transport,
            decoder: FrameDecoder::new(),
            poll_interval,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One non-blocking pass: expire, transmit everything allowed, read
    /// everything pending.
    pub fn service(&mut self) -> Activity {
        let mut activity = Activity::default();
        self.dispatcher.expire_overdue(Instant::now());

        // Cleared before draining so a frame queued mid-pass re-arms it.
        self.dispatcher.flags().clear(BUS_TX_BIT);
        while let Some(frame) = self.dispatcher.next_transmit() {
            if let Err(e) = self.transport.write_frame(frame.as_slice()) {
                warn!("PUMP: write of id={} failed: {:?}", frame.tag(), e);
                self.dispatcher.transmit_failed(frame);
                continue;
            }
            activity.frames_sent += 1;
        }

        let mut chunk = [0u8; READ_CHUNK];
        while self.transport.available() {
            let n = match self.transport.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("PUMP: read failed: {:?}, resetting decoder", e);
                    self.decoder.reset();
                    break;
                }
            };
            activity.frames_received += self.feed(&chunk[..n]);
        }

        if !activity.is_idle() {
            debug!(
                "PUMP: sent {} received {}",
                activity.frames_sent, activity.frames_received
            );
        }
        activity
    }

    fn feed(&mut self, mut data: &[u8]) -> usize {
        let mut frames = 0;
        while !data.is_empty() {
            let (used, frame) = self.decoder.feed(data);
            if let Some(frame) = frame {
                frames += 1;
                if let Err(e) = self.dispatcher.deliver(frame) {
                    warn!("PUMP: inbound frame dropped: {}", e);
                }
            }
            if used == 0 {
                break;
            }
            data = &data[used..];
        }
        frames
    }

    /// Service the bus until the future is dropped.
    pub async fn run(&mut self) {
        let poll = self.poll_interval;
        loop {
            self.service();
            let flags = self.dispatcher.flags();
            future::or(
                async {
                    flags.wait_any(BUS_TX_BIT).await;
                },
                Timer::after(poll),
            )
            .await;
        }
    }
}
