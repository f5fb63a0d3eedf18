//! Unified error types for the NWP host driver.
//!
//! A single `Error` enum that every subsystem converts into. All variants
//! are `Copy` so they can be stored in channel bookkeeping and handed back
//! from the correlator without allocation.
//!
//! Host-local failures and failures reported by the NWP firmware share one
//! numeric status space (see [`Error::status`]): firmware codes carry the
//! [`FIRMWARE_STATUS_MARKER`] bit so the two never collide.

use core::fmt;

/// Bit set on every status value that originated in the NWP firmware.
pub const FIRMWARE_STATUS_MARKER: u32 = 0x1_0000;

/// Firmware status reported by the NWP for a rejoin / flushed request.
pub const FW_STATUS_REJOIN_FAILURE: u16 = 0x0019;

// ---------------------------------------------------------------------------
// Top-level driver error
// ---------------------------------------------------------------------------

/// Every fallible operation in the driver funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No active device session.
    NotInitialized,
    /// The requested interface has not been brought up.
    InterfaceNotUp,
    /// An argument failed local validation.
    InvalidParameter,
    /// The operation is not valid in the current operating/coex mode.
    InvalidMode,
    /// A numeric argument is outside its wire-format range.
    InvalidRange,
    /// The command channel already has a request in flight.
    Busy,
    /// No matching response arrived within the wait window.
    Timeout,
    /// The buffer pool is exhausted.
    AllocationFailed,
    /// The combination is understood but not supported by the NWP.
    NotSupported,
    /// The NWP answered, but not with the expected acceptance sentinel.
    NotAvailable,
    /// The transport refused to put the request on the bus.
    TransmitFailed,
    /// A received frame could not be decoded.
    Frame(FrameError),
    /// Error code reported by the NWP firmware.
    Firmware(FirmwareStatus),
}

impl Error {
    /// Map into the shared numeric status space.
    pub const fn status(self) -> u32 {
        match self {
            Self::NotInitialized => 0x0011,
            Self::InterfaceNotUp => 0x0B44,
            Self::InvalidParameter => 0x0021,
            Self::InvalidMode => 0x0024,
            Self::InvalidRange => 0x0028,
            Self::Busy => 0x0004,
            Self::Timeout => 0x0007,
            Self::AllocationFailed => 0x0019,
            Self::NotSupported => 0x000F,
            Self::NotAvailable => 0x000E,
            Self::TransmitFailed => 0x0010,
            Self::Frame(_) => 0x0001,
            Self::Firmware(fw) => fw.status(),
        }
    }

    /// Inverse of [`Error::status`]. `None` for success (0) and for host
    /// codes this driver never produces.
    pub const fn from_status(status: u32) -> Option<Self> {
        if status & FIRMWARE_STATUS_MARKER != 0 {
            return match FirmwareStatus::new((status & 0xFFFF) as u16) {
                Some(fw) => Some(Self::Firmware(fw)),
                None => None,
            };
        }
        match status {
            0x0011 => Some(Self::NotInitialized),
            0x0B44 => Some(Self::InterfaceNotUp),
            0x0021 => Some(Self::InvalidParameter),
            0x0024 => Some(Self::InvalidMode),
            0x0028 => Some(Self::InvalidRange),
            0x0004 => Some(Self::Busy),
            0x0007 => Some(Self::Timeout),
            0x0019 => Some(Self::AllocationFailed),
            0x000F => Some(Self::NotSupported),
            0x000E => Some(Self::NotAvailable),
            0x0010 => Some(Self::TransmitFailed),
            _ => None,
        }
    }

    /// `true` when the NWP itself rejected the request.
    pub const fn is_firmware(self) -> bool {
        matches!(self, Self::Firmware(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "device not initialized"),
            Self::InterfaceNotUp => write!(f, "interface not up"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidMode => write!(f, "invalid mode"),
            Self::InvalidRange => write!(f, "value out of range"),
            Self::Busy => write!(f, "command channel busy"),
            Self::Timeout => write!(f, "timed out waiting for response"),
            Self::AllocationFailed => write!(f, "buffer allocation failed"),
            Self::NotSupported => write!(f, "not supported"),
            Self::NotAvailable => write!(f, "not available"),
            Self::TransmitFailed => write!(f, "bus transmit failed"),
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Firmware(e) => write!(f, "firmware: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Firmware status
// ---------------------------------------------------------------------------

/// Non-zero status code carried in a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirmwareStatus(u16);

impl FirmwareStatus {
    /// Wrap a raw firmware code; `None` for success.
    pub const fn new(code: u16) -> Option<Self> {
        if code == 0 { None } else { Some(Self(code)) }
    }

    /// Raw 16-bit code as sent by the NWP.
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Code remapped into the host status space.
    pub const fn status(self) -> u32 {
        FIRMWARE_STATUS_MARKER | self.0 as u32
    }
}

impl fmt::Display for FirmwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status 0x{:05X}", self.status())
    }
}

impl From<FirmwareStatus> for Error {
    fn from(e: FirmwareStatus) -> Self {
        Self::Firmware(e)
    }
}

/// Convert the frame-status field of a response into a `Result`.
pub fn check_firmware_status(code: u16) -> Result<()> {
    match FirmwareStatus::new(code) {
        None => Ok(()),
        Some(fw) => Err(fw.into()),
    }
}

// ---------------------------------------------------------------------------
// Frame decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed descriptor.
    Truncated,
    /// Descriptor length field disagrees with the bytes supplied.
    LengthMismatch,
    /// Payload exceeds the maximum frame size.
    Oversized,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated descriptor"),
            Self::LengthMismatch => write!(f, "length mismatch"),
            Self::Oversized => write!(f, "payload too large"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
