//! WLAN request encoders and the configuration objects they consume.
//!
//! Every encoder is a pure function from configuration (plus, where the
//! request carries a secret, a credential lookup) to a fixed-layout wire
//! struct with an explicit `encode()`. Nothing here touches the bus.

pub mod ap;
pub mod auth;
pub mod credentials;
pub mod join;
pub mod scan;
pub mod security;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use ap::{ApConfigRequest, ApConfiguration, build_ap_config_request};
pub use auth::{EapRequest, PskRequest, build_eap_request, build_psk_request};
pub use credentials::{
    Credential, CredentialId, CredentialKind, CredentialStore, EapCredential,
    MemoryCredentialStore,
};
pub use join::{
    ClientConfiguration, JoinRequest, JoinSettings, JoinTarget, TxPower, build_join_request,
};
pub use scan::{
    ChannelBitmap, ScanConfiguration, ScanRequest, ScanResult, ScanResults, ScanType,
    build_scan_request,
};
pub use security::{Encryption, JoinFeatures, MfpMode, SecurityType};

/// Longest SSID the NWP accepts.
pub const MAX_SSID_LEN: usize = 32;

/// Wire width of every SSID field.
pub const SSID_FIELD_LEN: usize = 34;

/// Wi-Fi interface a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interface {
    Client,
    AccessPoint,
}

impl Interface {
    pub const fn index(self) -> usize {
        match self {
            Self::Client => 0,
            Self::AccessPoint => 1,
        }
    }
}

/// NWP operating mode chosen at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatingMode {
    #[default]
    Client = 0,
    EnterpriseClient = 2,
    AccessPoint = 6,
    Concurrent = 9,
}

impl OperatingMode {
    pub const fn has_client(self) -> bool {
        matches!(self, Self::Client | Self::EnterpriseClient | Self::Concurrent)
    }

    pub const fn has_ap(self) -> bool {
        matches!(self, Self::AccessPoint | Self::Concurrent)
    }
}

/// Network name, up to 32 bytes (not necessarily UTF-8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ssid(heapless::Vec<u8, MAX_SSID_LEN>);

impl Ssid {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|()| Error::InvalidParameter)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NUL-padded wire field.
    pub fn to_field(&self) -> [u8; SSID_FIELD_LEN] {
        padded(&self.0)
    }
}

impl TryFrom<&str> for Ssid {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s.as_bytes())
    }
}

/// `src` in a zeroed `N`-byte field, truncated to the field width.
pub(crate) fn padded<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = src.len().min(N);
    out[..n].copy_from_slice(&src[..n]);
    out
}
