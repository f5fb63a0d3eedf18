//! Join request encoding.
//!
//! A join is issued for the station interface (after the scan and the
//! credential request) and for the AP interface (after AP configuration).
//! Layout, 117 bytes:
//!
//! ```text
//!   0  reserved           4  psk[64]        102 feature bitmap   106 listen_interval u32
//!   1  security_type     68  ssid[34]       103 li multiplier    110 vap_id
//!   2  data_rate                            104 reserved         111 bssid[6]
//!   3  power_level                          105 ssid_len
//! ```

use serde::{Deserialize, Serialize};

use super::ap::ApConfiguration;
use super::credentials::CredentialId;
use super::scan::ChannelBitmap;
use super::security::{Encryption, JoinFeatures, MfpMode, SecurityType};
use super::{Interface, OperatingMode, Ssid};
use crate::config::DriverConfig;
use crate::error::{Error, Result};

pub const JOIN_REQUEST_SIZE: usize = 117;

/// Station join accepted.
pub const JOIN_SENTINEL_STATION: u8 = b'C';
/// AP started.
pub const JOIN_SENTINEL_AP: u8 = b'G';

/// Set on `security_type` for CCMP encryption.
const SECURITY_CCMP_BIT: u8 = 0x80;
/// Set on `power_level` when it carries an absolute dBm value.
const POWER_ABSOLUTE_BIT: u8 = 0x80;
const MAX_TX_POWER_DBM: u8 = 31;

/// Join / scan transmit power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPower {
    Low,
    Medium,
    High,
    /// Absolute value in dBm, 0..=31.
    Dbm(u8),
}

impl Default for TxPower {
    fn default() -> Self {
        Self::Dbm(MAX_TX_POWER_DBM)
    }
}

impl TxPower {
    pub const fn encode(self) -> Result<u8> {
        match self {
            Self::Low => Ok(0),
            Self::Medium => Ok(1),
            Self::High => Ok(2),
            Self::Dbm(dbm) if dbm <= MAX_TX_POWER_DBM => Ok((dbm << 2) | POWER_ABSOLUTE_BIT),
            Self::Dbm(_) => Err(Error::InvalidRange),
        }
    }
}

/// Station-side target of a connect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientConfiguration {
    pub ssid: Ssid,
    pub security: SecurityType,
    pub encryption: Encryption,
    pub credential: CredentialId,
    /// Zero: any BSSID.
    pub bssid: [u8; 6],
    /// Channels to scan before joining.
    pub channels: ChannelBitmap,
}

/// The parts of a configuration the join request consumes.
#[derive(Debug, Clone, Copy)]
pub struct JoinTarget<'a> {
    pub interface: Interface,
    pub ssid: &'a Ssid,
    pub security: SecurityType,
    pub encryption: Encryption,
    pub bssid: [u8; 6],
}

impl<'a> From<&'a ClientConfiguration> for JoinTarget<'a> {
    fn from(c: &'a ClientConfiguration) -> Self {
        Self {
            interface: Interface::Client,
            ssid: &c.ssid,
            security: c.security,
            encryption: c.encryption,
            bssid: c.bssid,
        }
    }
}

impl<'a> From<&'a ApConfiguration> for JoinTarget<'a> {
    fn from(c: &'a ApConfiguration) -> Self {
        Self {
            interface: Interface::AccessPoint,
            ssid: &c.ssid,
            security: c.security,
            encryption: c.encryption,
            bssid: [0; 6],
        }
    }
}

/// Session-wide join knobs, changed through the session setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSettings {
    /// Indexed by [`Interface::index`].
    pub features: [JoinFeatures; 2],
    pub listen_interval: u32,
    pub listen_interval_multiplier: u8,
    /// `None`: inferred from the security type on every join.
    pub mfp: Option<MfpMode>,
    pub data_rate: u8,
    pub join_tx_power: TxPower,
    /// Absolute dBm, 0..=31.
    pub scan_tx_power: u8,
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self::from_config(&DriverConfig::default())
    }
}

impl JoinSettings {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            features: [JoinFeatures::default(); 2],
            listen_interval: config.listen_interval,
            listen_interval_multiplier: config.listen_interval_multiplier,
            mfp: None,
            data_rate: 0,
            join_tx_power: TxPower::Dbm(config.join_tx_power_dbm),
            scan_tx_power: config.scan_tx_power_dbm,
        }
    }

    /// Feature bitmap for `interface` with the MFP bits resolved.
    pub fn resolved_features(&self, interface: Interface, security: SecurityType) -> JoinFeatures {
        let mut bits = self.features[interface.index()];
        let mfp = self.mfp.unwrap_or_else(|| security.inferred_mfp());
        let transition = matches!(
            security,
            SecurityType::Wpa3Transition | SecurityType::Wpa3TransitionEnterprise
        );
        if self.mfp.is_none() && transition {
            // Transition tiers must not advertise "required" left over from
            // a stored bitmap.
            bits.remove(JoinFeatures::MFP_REQUIRED);
        }
        bits | mfp.features()
    }
}

/// Fixed-layout join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub security_type: u8,
    pub data_rate: u8,
    pub power_level: u8,
    pub psk: [u8; 64],
    pub ssid: [u8; 34],
    pub join_feature_bitmap: u8,
    pub listen_interval_multiplier: u8,
    pub ssid_len: u8,
    pub listen_interval: u32,
    pub vap_id: u8,
    pub bssid: [u8; 6],
}

impl JoinRequest {
    pub fn encode(&self) -> [u8; JOIN_REQUEST_SIZE] {
        let mut out = [0u8; JOIN_REQUEST_SIZE];
        out[1] = self.security_type;
        out[2] = self.data_rate;
        out[3] = self.power_level;
        out[4..68].copy_from_slice(&self.psk);
        out[68..102].copy_from_slice(&self.ssid);
        out[102] = self.join_feature_bitmap;
        out[103] = self.listen_interval_multiplier;
        out[105] = self.ssid_len;
        out[106..110].copy_from_slice(&self.listen_interval.to_le_bytes());
        out[110] = self.vap_id;
        out[111..117].copy_from_slice(&self.bssid);
        out
    }
}

/// Build the join request for `target`.
pub fn build_join_request(
    target: &JoinTarget<'_>,
    settings: &JoinSettings,
    opermode: OperatingMode,
) -> Result<JoinRequest> {
    let mut security_type = target.security.wire();
    let mut request = JoinRequest {
        security_type: 0,
        data_rate: settings.data_rate,
        power_level: settings.join_tx_power.encode()?,
        psk: [0; 64],
        ssid: target.ssid.to_field(),
        join_feature_bitmap: settings
            .resolved_features(target.interface, target.security)
            .bits(),
        listen_interval_multiplier: 0,
        ssid_len: target.ssid.len() as u8,
        listen_interval: 0,
        vap_id: 0,
        bssid: [0; 6],
    };

    match target.interface {
        Interface::Client => {
            if target.encryption == Encryption::Ccmp {
                security_type |= SECURITY_CCMP_BIT;
            }
            request.listen_interval = settings.listen_interval;
            request.listen_interval_multiplier = settings.listen_interval_multiplier;
            request.bssid = target.bssid;
        }
        Interface::AccessPoint => {
            request.vap_id = u8::from(opermode == OperatingMode::Concurrent);
        }
    }
    request.security_type = security_type;
    Ok(request)
}
