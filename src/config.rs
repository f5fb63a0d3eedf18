//! Driver configuration parameters
//!
//! All tunable parameters for the NWP host driver. Values can be loaded
//! from JSON (host tooling) or from a compact postcard blob persisted by
//! the application.

use alloc::vec::Vec;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::buffer::MAX_BUFFERS;
use crate::dispatch::CommandClass;
use crate::error::{Error, Result};

/// How the host is attached to the NWP. Selects the power-save handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostInterface {
    /// Host core shares the NWP die; sleep is negotiated by message.
    Mcu,
    /// External host; sleep is negotiated over a GPIO handshake.
    Gpio,
}

impl Default for HostInterface {
    fn default() -> Self {
        if cfg!(feature = "mcu-interface") {
            Self::Mcu
        } else {
            Self::Gpio
        }
    }
}

/// Default wait, per command class, when a caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTimeouts {
    pub common_ms: u32,
    pub wlan_ms: u32,
    pub network_ms: u32,
    pub bt_ms: u32,
    pub socket_ms: u32,
}

impl Default for ClassTimeouts {
    fn default() -> Self {
        Self {
            common_ms: 3_000,
            wlan_ms: 5_000,
            network_ms: 5_000,
            bt_ms: 3_000,
            socket_ms: 10_000,
        }
    }
}

/// Core driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    // --- Buffers ---
    /// Number of transport buffers in the pool
    pub buffer_count: u8,
    /// Longest a caller waits for a free buffer (milliseconds)
    pub buffer_wait_ms: u32,

    // --- Timeouts ---
    /// Default per-class command timeouts
    pub timeouts: ClassTimeouts,
    /// Scan response wait (milliseconds)
    pub scan_timeout_ms: u32,
    /// Join / AP start response wait (milliseconds)
    pub join_timeout_ms: u32,
    /// Power-save command wait (milliseconds)
    pub power_save_timeout_ms: u32,

    // --- Host interface ---
    pub host_interface: HostInterface,

    // --- Join defaults ---
    /// Station listen interval in TUs
    pub listen_interval: u32,
    /// Listen interval multiplier
    pub listen_interval_multiplier: u8,
    /// Absolute join tx power (dBm, 0-31)
    pub join_tx_power_dbm: u8,
    /// Absolute scan tx power (dBm, 0-31)
    pub scan_tx_power_dbm: u8,

    // --- Power save ---
    /// Fast-PSP monitor interval (milliseconds)
    pub monitor_interval_ms: u16,
    /// Beacons the NWP may miss before waking the host
    pub beacon_miss_ignore_limit: u8,

    // --- Bus ---
    /// Receive poll interval of the bus pump (milliseconds)
    pub bus_poll_interval_ms: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            // Buffers
            buffer_count: 16,
            buffer_wait_ms: 1_000,

            // Timeouts
            timeouts: ClassTimeouts::default(),
            scan_timeout_ms: 10_000,
            join_timeout_ms: 8_000,
            power_save_timeout_ms: 3_000,

            host_interface: HostInterface::default(),

            // Join
            listen_interval: 1_000,
            listen_interval_multiplier: 1,
            join_tx_power_dbm: 31,
            scan_tx_power_dbm: 31,

            // Power save
            monitor_interval_ms: 50,
            beacon_miss_ignore_limit: 1,

            // Bus
            bus_poll_interval_ms: 1,
        }
    }
}

impl DriverConfig {
    /// Reject values the driver or the wire format cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 || self.buffer_count as usize > MAX_BUFFERS {
            return Err(Error::InvalidRange);
        }
        let t = &self.timeouts;
        let waits = [
            self.buffer_wait_ms,
            self.scan_timeout_ms,
            self.join_timeout_ms,
            self.power_save_timeout_ms,
            t.common_ms,
            t.wlan_ms,
            t.network_ms,
            t.bt_ms,
            t.socket_ms,
            self.bus_poll_interval_ms,
        ];
        if waits.contains(&0) {
            return Err(Error::InvalidParameter);
        }
        if self.join_tx_power_dbm > 31 || self.scan_tx_power_dbm > 31 {
            return Err(Error::InvalidRange);
        }
        if self.listen_interval_multiplier == 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    /// Default wait for a class when the caller did not pick one.
    pub fn class_timeout(&self, class: CommandClass) -> Duration {
        let ms = match class {
            CommandClass::Common => self.timeouts.common_ms,
            CommandClass::Wlan => self.timeouts.wlan_ms,
            CommandClass::Network => self.timeouts.network_ms,
            CommandClass::Bt => self.timeouts.bt_ms,
            CommandClass::Socket => self.timeouts.socket_ms,
        };
        Duration::from_millis(u64::from(ms))
    }

    pub fn buffer_wait(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer_wait_ms))
    }

    pub fn bus_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.bus_poll_interval_ms))
    }

    /// Encode for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::InvalidParameter)
    }

    /// Decode a persisted blob and validate it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| Error::InvalidParameter)?;
        config.validate()?;
        Ok(config)
    }
}
