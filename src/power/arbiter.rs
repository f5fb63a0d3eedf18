//! Power profile arbitration.
//!
//! The Wi-Fi and BT stacks each pick a profile on their own; the NWP can
//! only be in one. [`effective_profile`] folds the two (plus the coex mode)
//! into a single decision byte and looks it up:
//!
//! ```text
//!   coex mode            high nibble   low nibble
//!   Wi-Fi only           wifi          wifi
//!   BT / BLE / dual      bt            bt
//!   Wi-Fi + BT/BLE/dual  wifi          bt
//! ```
//!
//! [`commit`] applies a new profile provisionally, tells the NWP, and rolls
//! back if the NWP could not be told.

use log::{info, warn};

use super::profile::{BtPerformanceProfile, CoexMode, PerformanceProfile, WifiPerformanceProfile};
use crate::error::Result;

/// Decision byte for the current radio combination.
pub const fn decision_byte(
    coex: CoexMode,
    wifi: PerformanceProfile,
    bt: PerformanceProfile,
) -> u8 {
    let (high, low) = match coex {
        CoexMode::WlanOnly | CoexMode::Wlan => (wifi, wifi),
        CoexMode::Bt | CoexMode::Ble | CoexMode::Dual => (bt, bt),
        CoexMode::WlanBt | CoexMode::WlanBle | CoexMode::WlanDual => (wifi, bt),
    };
    (high.level() << 4) | low.level()
}

/// Profile for a decision byte; `None` for combinations with no entry.
pub const fn lookup(decision: u8) -> Option<PerformanceProfile> {
    match decision {
        0x00..=0x04 | 0x10 | 0x20 | 0x30 | 0x40 => Some(PerformanceProfile::HighPerformance),
        0x11 | 0x12 | 0x13 | 0x14 | 0x31 | 0x41 => Some(PerformanceProfile::AssociatedPowerSave),
        0x21 | 0x22 | 0x23 | 0x24 | 0x32 | 0x42 => {
            Some(PerformanceProfile::AssociatedPowerSaveLowLatency)
        }
        0x33 => Some(PerformanceProfile::DeepSleepWithoutRamRetention),
        0x44 => Some(PerformanceProfile::DeepSleepWithRamRetention),
        _ => None,
    }
}

/// Effective NWP profile. Unmapped combinations keep `previous`.
pub const fn effective_profile(
    coex: CoexMode,
    wifi: PerformanceProfile,
    bt: PerformanceProfile,
    previous: PerformanceProfile,
) -> PerformanceProfile {
    match lookup(decision_byte(coex, wifi, bt)) {
        Some(p) => p,
        None => previous,
    }
}

/// Stored power profile state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileState {
    pub wifi: WifiPerformanceProfile,
    pub bt: BtPerformanceProfile,
    pub coex: CoexMode,
    /// Last profile the NWP confirmed. Only consulted for unmapped
    /// combinations.
    applied: PerformanceProfile,
}

impl ProfileState {
    pub fn effective(&self) -> PerformanceProfile {
        effective_profile(self.coex, self.wifi.profile, self.bt.profile, self.applied)
    }

    pub fn applied(&self) -> PerformanceProfile {
        self.applied
    }

    /// Zero every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Candidate value for one side of the profile state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUpdate {
    Wifi(WifiPerformanceProfile),
    Bt(BtPerformanceProfile),
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The NWP is now in this profile.
    Applied(PerformanceProfile),
    /// The NWP entered deep sleep without RAM retention. Profile state was
    /// zeroed; the session must be re-initialized.
    SessionLost,
}

/// Delivers the effective profile to the NWP.
#[allow(async_fn_in_trait)]
pub trait PowerSaveLink {
    async fn send_power_save(
        &self,
        profile: PerformanceProfile,
        wifi: &WifiPerformanceProfile,
    ) -> Result<()>;
}

/// Apply `update` to `state` and push the resulting effective profile to the
/// NWP. On failure `state` is exactly what it was before the call.
pub async fn commit<L: PowerSaveLink>(
    state: &mut ProfileState,
    update: ProfileUpdate,
    link: &L,
) -> Result<Commit> {
    let snapshot = *state;
    match update {
        ProfileUpdate::Wifi(p) => state.wifi = p,
        ProfileUpdate::Bt(p) => state.bt = p,
    }
    let effective = state.effective();

    if let Err(e) = link.send_power_save(effective, &state.wifi).await {
        warn!("POWER: {:?} rejected ({}), rolling back", effective, e);
        *state = snapshot;
        return Err(e);
    }

    if effective.loses_session() {
        info!("POWER: deep sleep without retention, profile state cleared");
        state.reset();
        return Ok(Commit::SessionLost);
    }
    state.applied = effective;
    info!("POWER: effective profile {:?}", effective);
    Ok(Commit::Applied(effective))
}
