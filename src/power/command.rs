//! Power-save request encoding.

use super::profile::{PerformanceProfile, PspType, WifiPerformanceProfile};
use crate::config::HostInterface;

/// Encoded size of [`PowerSaveRequest`].
pub const POWER_SAVE_REQUEST_SIZE: usize = 10;

// Power modes
pub const PS_DISABLE: u8 = 0;
pub const CONNECTED_GPIO_BASED_PS: u8 = 2;
pub const CONNECTED_MCU_BASED_PS: u8 = 4;
pub const GPIO_BASED_DEEP_SLEEP: u8 = 8;
pub const MCU_BASED_DEEP_SLEEP: u8 = 10;

// ULP modes
pub const ULP_WITH_RAM_RETENTION: u8 = 1;
pub const ULP_WITHOUT_RAM_RETENTION: u8 = 2;

pub const DEFAULT_MONITOR_INTERVAL: u16 = 50;
pub const DEFAULT_BEACON_MISS_IGNORE_LIMIT: u8 = 1;

/// Driver-level fallbacks for the Wi-Fi profile's zero ("default") fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerSaveDefaults {
    pub host_interface: HostInterface,
    pub monitor_interval: u16,
    pub beacon_miss_ignore_limit: u8,
}

impl Default for PowerSaveDefaults {
    fn default() -> Self {
        Self {
            host_interface: HostInterface::default(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            beacon_miss_ignore_limit: DEFAULT_BEACON_MISS_IGNORE_LIMIT,
        }
    }
}

/// PWRMODE request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerSaveRequest {
    pub power_mode: u8,
    pub ulp_mode_enable: u8,
    pub dtim_aligned_type: u8,
    pub psp_type: u8,
    pub monitor_interval: u16,
    pub num_of_dtim_skip: u8,
    pub listen_interval: u16,
    pub beacon_miss_ignore_limit: u8,
}

impl PowerSaveRequest {
    /// The request that turns power save off. Always sent first.
    pub const DISABLE: Self = Self {
        power_mode: PS_DISABLE,
        ulp_mode_enable: 0,
        dtim_aligned_type: 0,
        psp_type: 0,
        monitor_interval: 0,
        num_of_dtim_skip: 0,
        listen_interval: 0,
        beacon_miss_ignore_limit: 0,
    };

    pub fn encode(&self) -> [u8; POWER_SAVE_REQUEST_SIZE] {
        let mut out = [0u8; POWER_SAVE_REQUEST_SIZE];
        out[0] = self.power_mode;
        out[1] = self.ulp_mode_enable;
        out[2] = self.dtim_aligned_type;
        out[3] = self.psp_type;
        out[4..6].copy_from_slice(&self.monitor_interval.to_le_bytes());
        out[6] = self.num_of_dtim_skip;
        out[7..9].copy_from_slice(&self.listen_interval.to_le_bytes());
        out[9] = self.beacon_miss_ignore_limit;
        out
    }
}

/// Build the PWRMODE request for `profile`.
pub fn build_power_save_command(
    profile: PerformanceProfile,
    wifi: &WifiPerformanceProfile,
    defaults: &PowerSaveDefaults,
) -> PowerSaveRequest {
    if profile == PerformanceProfile::HighPerformance {
        return PowerSaveRequest::DISABLE;
    }

    let mcu = defaults.host_interface == HostInterface::Mcu;
    let connected = if mcu { CONNECTED_MCU_BASED_PS } else { CONNECTED_GPIO_BASED_PS };
    let deep_sleep = if mcu { MCU_BASED_DEEP_SLEEP } else { GPIO_BASED_DEEP_SLEEP };

    let mut request = PowerSaveRequest {
        power_mode: connected,
        ulp_mode_enable: ULP_WITH_RAM_RETENTION,
        dtim_aligned_type: wifi.dtim_aligned_type as u8,
        psp_type: PspType::Max as u8,
        monitor_interval: match wifi.monitor_interval {
            0 => defaults.monitor_interval,
            v => v,
        },
        num_of_dtim_skip: wifi.num_of_dtim_skip,
        listen_interval: wifi.listen_interval,
        beacon_miss_ignore_limit: match wifi.beacon_miss_ignore_limit {
            0 => defaults.beacon_miss_ignore_limit,
            v => v,
        },
    };

    match profile {
        PerformanceProfile::HighPerformance | PerformanceProfile::AssociatedPowerSave => {}
        PerformanceProfile::AssociatedPowerSaveLowLatency => {
            request.psp_type = PspType::Fast as u8;
        }
        PerformanceProfile::DeepSleepWithoutRamRetention => {
            request.power_mode = deep_sleep;
            request.ulp_mode_enable = ULP_WITHOUT_RAM_RETENTION;
        }
        PerformanceProfile::DeepSleepWithRamRetention => {
            request.power_mode = deep_sleep;
        }
    }
    request
}
