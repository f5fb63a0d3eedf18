//! NWP frame descriptor codec.
//!
//! Wire format (all multi-byte fields little-endian):
//! ```text
//! ┌──────────────┬─────────┬───────────┬───────┬──────────┬────────┬──────────┬─────────────┐
//! │ len|queue    │ command │ packet id │ flags │ reserved │ status │ reserved │ payload     │
//! │ u16 (12|4)   │ u16     │ u16       │ u8    │ 5 B      │ u16    │ 2 B      │ len B       │
//! └──────────────┴─────────┴───────────┴───────┴──────────┴────────┴──────────┴─────────────┘
//!   0              2         4           6       7          12       14         16
//! ```
//!
//! The descriptor is fixed and self-delimiting, so a byte-oriented
//! transport can be fed through [`FrameDecoder`] and yields whole frames
//! regardless of how reads split them.

use bitflags::bitflags;

use crate::error::FrameError;

/// Descriptor size in bytes.
pub const DESCRIPTOR_SIZE: usize = 16;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD_SIZE: usize = 1600;

/// Largest value the 12-bit length field can hold.
const LENGTH_FIELD_MAX: usize = 0x0FFF;

/// Firmware queue for management traffic (common, WLAN, network, socket).
pub const QUEUE_WLAN_MGMT: u8 = 4;
/// Firmware queue for Bluetooth traffic.
pub const QUEUE_BT: u8 = 2;

bitflags! {
    /// Per-frame handling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Sender waits for a status-bearing response.
        const STATUS_EXPECTED = 1 << 0;
        /// Sender wants the response payload, not just the status.
        const PAYLOAD_EXPECTED = 1 << 1;
        /// Nothing else may be transmitted until this command is answered.
        const GLOBAL_QUEUE_BLOCK = 1 << 2;
        /// Response is delivered asynchronously on the event queue.
        const ASYNC = 1 << 3;
    }
}

/// Decoded frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u16,
    pub queue_id: u8,
    pub command: u16,
    pub packet_id: u16,
    pub flags: FrameFlags,
    pub status: u16,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        let len_queue =
            (self.payload_len & LENGTH_FIELD_MAX as u16) | (u16::from(self.queue_id & 0x0F) << 12);
        out[0..2].copy_from_slice(&len_queue.to_le_bytes());
        out[2..4].copy_from_slice(&self.command.to_le_bytes());
        out[4..6].copy_from_slice(&self.packet_id.to_le_bytes());
        out[6] = self.flags.bits();
        out[12..14].copy_from_slice(&self.status.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let d = bytes.get(..DESCRIPTOR_SIZE).ok_or(FrameError::Truncated)?;
        let len_queue = u16::from_le_bytes([d[0], d[1]]);
        Ok(Self {
            payload_len: len_queue & LENGTH_FIELD_MAX as u16,
            queue_id: (len_queue >> 12) as u8,
            command: u16::from_le_bytes([d[2], d[3]]),
            packet_id: u16::from_le_bytes([d[4], d[5]]),
            flags: FrameFlags::from_bits_retain(d[6]),
            status: u16::from_le_bytes([d[12], d[13]]),
        })
    }
}

/// Split a complete frame into descriptor and payload, checking that the
/// length field matches the bytes supplied.
pub fn split_frame(frame: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
    let header = FrameHeader::decode(frame)?;
    let len = header.payload_len as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Oversized);
    }
    if frame.len() != DESCRIPTOR_SIZE + len {
        return Err(FrameError::LengthMismatch);
    }
    Ok((header, &frame[DESCRIPTOR_SIZE..]))
}

// ── Streaming decoder ────────────────────────────────────────

/// Decoder state machine.
enum DecoderState {
    /// Waiting for descriptor bytes.
    ReadingDescriptor { collected: usize },
    /// Descriptor received, reading payload.
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming frame decoder for byte-oriented transports.
pub struct FrameDecoder {
    state: DecoderState,
    frame_buf: [u8; DESCRIPTOR_SIZE + MAX_PAYLOAD_SIZE],
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingDescriptor { collected: 0 },
            frame_buf: [0; DESCRIPTOR_SIZE + MAX_PAYLOAD_SIZE],
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns the number of bytes consumed and, when a frame completed,
    /// the whole frame (descriptor + payload). Bytes after a completed
    /// frame are left unconsumed; call again with the remainder.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<&[u8]>) {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingDescriptor { collected } => {
                    let needed = DESCRIPTOR_SIZE - *collected;
                    let to_copy = needed.min(data.len() - offset);

                    self.frame_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);

                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == DESCRIPTOR_SIZE {
                        let expected =
                            (u16::from_le_bytes([self.frame_buf[0], self.frame_buf[1]]) as usize)
                                & LENGTH_FIELD_MAX;

                        if expected > MAX_PAYLOAD_SIZE {
                            // Corrupt descriptor: drop it and resync.
                            self.state = DecoderState::ReadingDescriptor { collected: 0 };
                            continue;
                        }
                        if expected == 0 {
                            self.state = DecoderState::ReadingDescriptor { collected: 0 };
                            return (offset, Some(&self.frame_buf[..DESCRIPTOR_SIZE]));
                        }

                        self.state = DecoderState::ReadingPayload {
                            expected,
                            collected: 0,
                        };
                    }
                }

                DecoderState::ReadingPayload { expected, collected } => {
                    let needed = *expected - *collected;
                    let to_copy = needed.min(data.len() - offset);
                    let start = DESCRIPTOR_SIZE + *collected;

                    self.frame_buf[start..start + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);

                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let len = DESCRIPTOR_SIZE + *expected;
                        self.state = DecoderState::ReadingDescriptor { collected: 0 };
                        return (offset, Some(&self.frame_buf[..len]));
                    }
                }
            }
        }

        (offset, None)
    }

    /// Reset decoder state (e.g. after a bus reset).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingDescriptor { collected: 0 };
    }
}
