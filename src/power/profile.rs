//! Power profiles, coexistence modes and the per-radio profile records.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// NWP power profile. The discriminant is the level used in the decision
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PerformanceProfile {
    #[default]
    HighPerformance = 0,
    AssociatedPowerSave = 1,
    AssociatedPowerSaveLowLatency = 2,
    DeepSleepWithoutRamRetention = 3,
    DeepSleepWithRamRetention = 4,
}

impl PerformanceProfile {
    pub const ALL: [Self; 5] = [
        Self::HighPerformance,
        Self::AssociatedPowerSave,
        Self::AssociatedPowerSaveLowLatency,
        Self::DeepSleepWithoutRamRetention,
        Self::DeepSleepWithRamRetention,
    ];

    pub const fn level(self) -> u8 {
        self as u8
    }

    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::HighPerformance),
            1 => Some(Self::AssociatedPowerSave),
            2 => Some(Self::AssociatedPowerSaveLowLatency),
            3 => Some(Self::DeepSleepWithoutRamRetention),
            4 => Some(Self::DeepSleepWithRamRetention),
            _ => None,
        }
    }

    /// The NWP loses RAM (and every negotiated setting) in this profile.
    pub const fn loses_session(self) -> bool {
        matches!(self, Self::DeepSleepWithoutRamRetention)
    }
}

/// Radio coexistence mode selected at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CoexMode {
    /// Legacy Wi-Fi-only value; behaves exactly like [`CoexMode::Wlan`].
    #[default]
    WlanOnly = 0,
    Wlan = 1,
    WlanBt = 5,
    WlanBle = 9,
    WlanDual = 13,
    Bt = 4,
    Ble = 8,
    Dual = 12,
}

impl CoexMode {
    pub const ALL: [Self; 8] = [
        Self::WlanOnly,
        Self::Wlan,
        Self::WlanBt,
        Self::WlanBle,
        Self::WlanDual,
        Self::Bt,
        Self::Ble,
        Self::Dual,
    ];

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.bits() == bits)
            .ok_or(Error::InvalidParameter)
    }

    /// The Wi-Fi radio is active in this mode.
    pub const fn has_wlan(self) -> bool {
        matches!(self, Self::WlanOnly | Self::Wlan | Self::WlanBt | Self::WlanBle | Self::WlanDual)
    }

    /// A Bluetooth radio (classic or LE) is active in this mode.
    pub const fn has_bt(self) -> bool {
        !matches!(self, Self::WlanOnly | Self::Wlan)
    }
}

/// Power-save polling type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PspType {
    /// Legacy PS-Poll.
    #[default]
    Max = 0,
    /// Fast PSP: stay awake for the monitor interval after traffic.
    Fast = 1,
}

/// DTIM alignment of wake-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DtimAlignment {
    /// Wake on the listen interval.
    #[default]
    Beacon = 0,
    /// Wake on the DTIM beacon.
    Dtim = 1,
}

/// Wi-Fi side of the power profile state, with its tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WifiPerformanceProfile {
    pub profile: PerformanceProfile,
    pub dtim_aligned_type: DtimAlignment,
    pub num_of_dtim_skip: u8,
    /// Listen interval in TUs (0: use the interval negotiated at join).
    pub listen_interval: u16,
    /// Fast-PSP monitor interval in ms (0: driver default).
    pub monitor_interval: u16,
    /// Beacons the NWP may miss before waking (0: driver default).
    pub beacon_miss_ignore_limit: u8,
}

impl WifiPerformanceProfile {
    pub const fn new(profile: PerformanceProfile) -> Self {
        Self {
            profile,
            dtim_aligned_type: DtimAlignment::Beacon,
            num_of_dtim_skip: 0,
            listen_interval: 0,
            monitor_interval: 0,
            beacon_miss_ignore_limit: 0,
        }
    }
}

/// Bluetooth side of the power profile state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BtPerformanceProfile {
    pub profile: PerformanceProfile,
}

impl BtPerformanceProfile {
    pub const fn new(profile: PerformanceProfile) -> Self {
        Self { profile }
    }

    /// Map a BT stack power-save request (`psp_mode`, `psp_type`) onto a
    /// profile.
    pub fn from_power_save_mode(psp_mode: u8, psp_type: PspType) -> Result<Self> {
        let profile = match (psp_mode, psp_type) {
            (0, PspType::Max) => PerformanceProfile::HighPerformance,
            (2, PspType::Max) => PerformanceProfile::AssociatedPowerSave,
            (2, PspType::Fast) => PerformanceProfile::AssociatedPowerSaveLowLatency,
            (8, PspType::Max) => PerformanceProfile::DeepSleepWithoutRamRetention,
            (10, PspType::Max) => PerformanceProfile::DeepSleepWithRamRetention,
            _ => return Err(Error::InvalidParameter),
        };
        Ok(Self { profile })
    }
}
