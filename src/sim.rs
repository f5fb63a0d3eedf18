//! Simulated NWP: a [`Transport`] that answers from a script.
//!
//! Frames written by the bus pump are decoded and logged. Every
//! status-expecting frame is answered with, in order of preference:
//!
//! 1. the oldest one-shot reply scripted for its command,
//! 2. the standing default scripted for its command,
//! 3. built-in behaviour: JOIN answers `'G'` right after an AP
//!    configuration and `'C'` otherwise, SCAN reports the requested SSID
//!    (or nothing), RSSI reports -40 dBm, anything else succeeds with an
//!    empty payload.
//!
//! [`SimulatedNwp::set_write_fault`] makes every write fail, standing in
//! for a dead bus.
//!
//! Handles are cheap clones of one shared state, so a test keeps one
//! handle for scripting and inspection while the pump owns another.

use std::collections::VecDeque;
use std::sync::Arc;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::debug;

use crate::bus::frame::{DESCRIPTOR_SIZE, FrameDecoder, FrameFlags, FrameHeader};
use crate::bus::transport::Transport;
use crate::dispatch::command;

/// Canned answer to one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptedReply {
    pub status: u16,
    pub payload: Vec<u8>,
    /// Never answer; the caller times out.
    pub dropped: bool,
}

impl ScriptedReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn payload(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: bytes.into(),
            ..Self::default()
        }
    }

    /// Firmware error `code`.
    pub fn status(code: u16) -> Self {
        Self {
            status: code,
            ..Self::default()
        }
    }

    pub fn dropped() -> Self {
        Self {
            dropped: true,
            ..Self::default()
        }
    }
}

/// A frame the host sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

struct SimState {
    decoder: FrameDecoder,
    outbound: VecDeque<u8>,
    one_shot: VecDeque<(u16, ScriptedReply)>,
    defaults: Vec<(u16, ScriptedReply)>,
    sent: Vec<SentFrame>,
    ap_configured: bool,
    write_fault: bool,
}

/// Write refused by a faulted simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl SimState {
    fn handle(&mut self, frame: &[u8]) {
        let Ok(header) = FrameHeader::decode(frame) else {
            return;
        };
        let payload = frame.get(DESCRIPTOR_SIZE..).unwrap_or(&[]).to_vec();
        debug!(
            "SIM: rx 0x{:02X} id={} len={}",
            header.command,
            header.packet_id,
            payload.len()
        );

        let reply = self.reply_for(&header, &payload);
        self.sent.push(SentFrame { header, payload });

        if !header.flags.contains(FrameFlags::STATUS_EXPECTED) || reply.dropped {
            return;
        }
        let answer = FrameHeader {
            payload_len: reply.payload.len() as u16,
            flags: header.flags & FrameFlags::ASYNC,
            status: reply.status,
            ..header
        };
        self.push(&answer, &reply.payload);
    }

    fn reply_for(&mut self, header: &FrameHeader, payload: &[u8]) -> ScriptedReply {
        let scripted = self
            .one_shot
            .iter()
            .position(|(cmd, _)| *cmd == header.command)
            .and_then(|i| self.one_shot.remove(i))
            .map(|(_, r)| r)
            .or_else(|| {
                self.defaults
                    .iter()
                    .find(|(cmd, _)| *cmd == header.command)
                    .map(|(_, r)| r.clone())
            });

        let reply =
            scripted.unwrap_or_else(|| builtin_reply(header.command, payload, self.ap_configured));
        match header.command {
            command::AP_CONFIGURATION => self.ap_configured = reply.status == 0,
            command::JOIN => self.ap_configured = false,
            _ => {}
        }
        reply
    }

    fn push(&mut self, header: &FrameHeader, payload: &[u8]) {
        self.outbound.extend(header.encode());
        self.outbound.extend(payload.iter().copied());
    }
}

fn builtin_reply(cmd: u16, payload: &[u8], ap_configured: bool) -> ScriptedReply {
    match cmd {
        command::JOIN => ScriptedReply::payload(vec![if ap_configured { b'G' } else { b'C' }]),
        command::SCAN => match requested_ssid(payload) {
            [] => ScriptedReply::payload(scan_response(&[])),
            ssid => ScriptedReply::payload(scan_response(&[(6, 40, ssid)])),
        },
        command::RSSI => ScriptedReply::payload(vec![40, 0]),
        _ => ScriptedReply::ok(),
    }
}

/// SSID field of a scan request, without padding.
fn requested_ssid(payload: &[u8]) -> &[u8] {
    let field = payload.get(4..38).unwrap_or(&[]);
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len()).min(32);
    &field[..len]
}

/// Encode a scan response: `(channel, rssi magnitude, ssid)` per entry.
pub fn scan_response(entries: &[(u8, u8, &[u8])]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 46);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    for (i, (channel, rssi, ssid)) in entries.iter().enumerate() {
        out.extend_from_slice(&[*channel, 2, *rssi, 1]);
        let mut field = [0u8; 34];
        let n = ssid.len().min(32);
        field[..n].copy_from_slice(&ssid[..n]);
        out.extend_from_slice(&field);
        out.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, i as u8]);
        out.extend_from_slice(&[0, 0]);
    }
    out
}

#[derive(Clone)]
pub struct SimulatedNwp {
    state: Arc<Mutex<CriticalSectionRawMutex, RefCell<SimState>>>,
}

impl Default for SimulatedNwp {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNwp {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(SimState {
                decoder: FrameDecoder::new(),
                outbound: VecDeque::new(),
                one_shot: VecDeque::new(),
                defaults: Vec::new(),
                sent: Vec::new(),
                ap_configured: false,
                write_fault: false,
            }))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    /// Answer the next `command` with `reply`, once.
    pub fn script(&self, command: u16, reply: ScriptedReply) {
        self.with(|s| s.one_shot.push_back((command, reply)));
    }

    /// Answer every `command` with `reply` unless a one-shot is queued.
    pub fn set_default(&self, command: u16, reply: ScriptedReply) {
        self.with(|s| {
            s.defaults.retain(|(c, _)| *c != command);
            s.defaults.push((command, reply));
        });
    }

    /// Queue an unsolicited asynchronous frame for the host.
    pub fn inject_event(&self, queue_id: u8, command: u16, payload: &[u8]) {
        let header = FrameHeader {
            payload_len: payload.len() as u16,
            queue_id,
            command,
            packet_id: 0,
            flags: FrameFlags::ASYNC,
            status: 0,
        };
        self.with(|s| s.push(&header, payload));
    }

    /// Queue raw bytes for the host, as they would appear on the bus.
    pub fn inject_bytes(&self, bytes: &[u8]) {
        self.with(|s| s.outbound.extend(bytes.iter().copied()));
    }

    /// Every frame the host has sent so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.with(|s| s.sent.clone())
    }

    pub fn sent_commands(&self) -> Vec<u16> {
        self.with(|s| s.sent.iter().map(|f| f.header.command).collect())
    }

    /// Payload of the most recent frame carrying `command`.
    pub fn last_payload(&self, command: u16) -> Option<Vec<u8>> {
        self.with(|s| {
            s.sent
                .iter()
                .rev()
                .find(|f| f.header.command == command)
                .map(|f| f.payload.clone())
        })
    }

    pub fn clear_sent(&self) {
        self.with(|s| s.sent.clear());
    }

    /// Refuse (`true`) or accept every subsequent host write.
    pub fn set_write_fault(&self, fault: bool) {
        self.with(|s| s.write_fault = fault);
    }
}

impl Transport for SimulatedNwp {
    type Error = BusFault;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.with(|s| {
            let n = buf.len().min(s.outbound.len());
            for (dst, src) in buf.iter_mut().zip(s.outbound.drain(..n)) {
                *dst = src;
            }
            n
        }))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.with(|s| {
            if s.write_fault {
                return Err(BusFault);
            }
            let mut rest = data;
            while !rest.is_empty() {
                let (used, frame) = s.decoder.feed(rest);
                let frame = frame.map(<[u8]>::to_vec);
                if let Some(frame) = frame {
                    s.handle(&frame);
                }
                if used == 0 {
                    break;
                }
                rest = &rest[used..];
            }
            Ok(data.len())
        })
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn available(&self) -> bool {
        self.with(|s| !s.outbound.is_empty())
    }
}
