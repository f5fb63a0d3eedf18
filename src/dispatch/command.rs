//! NWP command identifiers and their class routing.

use super::CommandClass;
use crate::bus::frame::QUEUE_BT;

// ── Common ───────────────────────────────────────────────────

pub const OPERMODE: u16 = 0x10;
pub const PWRMODE: u16 = 0x15;
pub const SOFT_RESET: u16 = 0x1C;

// ── WLAN ─────────────────────────────────────────────────────

pub const BAND: u16 = 0x11;
pub const INIT: u16 = 0x12;
pub const SCAN: u16 = 0x13;
pub const JOIN: u16 = 0x14;
pub const DISCONNECT: u16 = 0x19;
pub const RSSI: u16 = 0x3A;
pub const AP_CONFIGURATION: u16 = 0x24;
pub const EAP_CONFIG: u16 = 0x4C;
pub const HOST_PSK: u16 = 0xA5;
pub const AP_STOP: u16 = 0xAE;

// ── Network / socket ─────────────────────────────────────────

pub const IPCONFV4: u16 = 0x41;
pub const SOCKET_CREATE: u16 = 0x42;
pub const SOCKET_CLOSE: u16 = 0x43;
pub const DNS_QUERY: u16 = 0x44;
pub const HTTP_CLIENT_GET: u16 = 0x51;
pub const SOCKET_READ_DATA: u16 = 0x6B;
pub const SOCKET_ACCEPT: u16 = 0x6C;
pub const IPCONFV6: u16 = 0x90;

/// Commands the NWP must answer before anything else is transmitted.
pub const fn blocks_global_queue(command: u16) -> bool {
    matches!(command, OPERMODE | PWRMODE | SOFT_RESET)
}

/// Class an inbound frame belongs to when it is not the answer to an
/// in-flight request.
pub const fn class_of(command: u16, queue_id: u8) -> CommandClass {
    if queue_id == QUEUE_BT {
        return CommandClass::Bt;
    }
    match command {
        OPERMODE | PWRMODE | SOFT_RESET => CommandClass::Common,
        IPCONFV4 | IPCONFV6 | DNS_QUERY | HTTP_CLIENT_GET => CommandClass::Network,
        SOCKET_CREATE | SOCKET_CLOSE | SOCKET_READ_DATA | SOCKET_ACCEPT => CommandClass::Socket,
        _ => CommandClass::Wlan,
    }
}
