//! Security types, encryption modes and join feature bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Security of the network being joined or served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityType {
    #[default]
    Open = 0,
    Wpa = 1,
    Wpa2 = 2,
    Wep = 3,
    WpaEnterprise = 4,
    Wpa2Enterprise = 5,
    WpaWpa2Mixed = 6,
    Wpa3 = 7,
    Wpa3Transition = 8,
    Wpa3Enterprise = 9,
    Wpa3TransitionEnterprise = 10,
}

impl SecurityType {
    pub const fn wire(self) -> u8 {
        self as u8
    }

    pub const fn is_enterprise(self) -> bool {
        matches!(
            self,
            Self::WpaEnterprise
                | Self::Wpa2Enterprise
                | Self::Wpa3Enterprise
                | Self::Wpa3TransitionEnterprise
        )
    }

    /// Pre-shared-key (personal) security.
    pub const fn is_personal(self) -> bool {
        matches!(
            self,
            Self::Wpa | Self::Wpa2 | Self::WpaWpa2Mixed | Self::Wpa3 | Self::Wpa3Transition
        )
    }

    /// MFP bits implied by the security type when the user set none.
    pub const fn inferred_mfp(self) -> MfpMode {
        match self {
            Self::Wpa3 | Self::Wpa3Enterprise => MfpMode::Required,
            Self::Wpa3Transition
            | Self::Wpa3TransitionEnterprise
            | Self::Wpa2
            | Self::WpaWpa2Mixed => MfpMode::Capable,
            _ => MfpMode::Disabled,
        }
    }
}

/// Encryption requested alongside the security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encryption {
    #[default]
    Default,
    None,
    Wep,
    Tkip,
    Ccmp,
    EapTls,
    EapTtls,
    EapFast,
    PeapMschapV2,
    PeapSafe1,
    PeapSafe2,
    EapLeap,
}

/// AP encryption codes the NWP understands.
pub const AP_ENCRYPTION_NONE: u8 = 0;
pub const AP_ENCRYPTION_TKIP: u8 = 1;
pub const AP_ENCRYPTION_CCMP: u8 = 2;

impl Encryption {
    /// Map onto the AP encryption byte. Only none, TKIP and CCMP exist in
    /// the AP role.
    pub const fn ap_wire(self) -> Result<u8> {
        match self {
            Self::Default | Self::None => Ok(AP_ENCRYPTION_NONE),
            Self::Tkip => Ok(AP_ENCRYPTION_TKIP),
            Self::Ccmp => Ok(AP_ENCRYPTION_CCMP),
            _ => Err(Error::InvalidParameter),
        }
    }

    /// EAP method string for an enterprise join.
    pub const fn eap_method(self) -> Option<&'static str> {
        match self {
            Self::EapTls => Some("TLS"),
            Self::EapTtls => Some("TTLS"),
            Self::EapFast => Some("FAST"),
            Self::PeapMschapV2 => Some("PEAP"),
            Self::PeapSafe1 => Some("PEAPSAFE1"),
            Self::PeapSafe2 => Some("PEAPSAFE2"),
            Self::EapLeap => Some("LEAP"),
            _ => None,
        }
    }
}

/// Management Frame Protection setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MfpMode {
    #[default]
    Disabled,
    Capable,
    Required,
}

impl MfpMode {
    pub const fn features(self) -> JoinFeatures {
        match self {
            Self::Disabled => JoinFeatures::empty(),
            Self::Capable => JoinFeatures::MFP_CAPABLE,
            Self::Required => JoinFeatures::MFP_REQUIRED,
        }
    }
}

bitflags! {
    /// Join feature bitmap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct JoinFeatures: u8 {
        const B_ONLY = 0x01;
        const LISTEN_INTERVAL_VALID = 0x02;
        const QUICK_JOIN = 0x04;
        const CCXV2 = 0x08;
        const BSSID_BASED = 0x10;
        const MFP_CAPABLE = 0x20;
        /// Includes the capable bit.
        const MFP_REQUIRED = 0x60;
        const PS_LISTEN_INTERVAL_VALID = 0x80;
    }
}

impl Default for JoinFeatures {
    fn default() -> Self {
        Self::LISTEN_INTERVAL_VALID
    }
}
