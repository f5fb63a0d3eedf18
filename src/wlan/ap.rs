//! Access point configuration request.

use serde::{Deserialize, Serialize};

use super::credentials::{Credential, CredentialId, CredentialKind, CredentialStore};
use super::security::{Encryption, SecurityType};
use super::{SSID_FIELD_LEN, Ssid, padded};
use crate::error::{Error, Result};

pub const AP_CONFIG_REQUEST_SIZE: usize = 110;

/// ORed into `keepalive_type` to stop beaconing when no client is left.
const KEEPALIVE_BEACON_STOP: u8 = 0x04;
/// High nibble of the TDI flags carried into the encryption byte.
const TDI_MASK: u8 = 0xF0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApConfiguration {
    pub ssid: Ssid,
    pub security: SecurityType,
    pub encryption: Encryption,
    pub credential: CredentialId,
    /// Zero: NWP picks the channel.
    pub channel: u16,
    pub beacon_interval: u16,
    pub dtim_period: u16,
    pub max_clients: u16,
    /// Seconds; at most 255.
    pub client_idle_timeout: u32,
    /// Zero disables the keepalive.
    pub keepalive_type: u8,
    pub beacon_stop: bool,
    /// Transition-disable indication for WPA3 tiers.
    pub tdi_flags: u8,
}

impl Default for ApConfiguration {
    fn default() -> Self {
        Self {
            ssid: Ssid::default(),
            security: SecurityType::Open,
            encryption: Encryption::None,
            credential: CredentialId::default(),
            channel: 0,
            beacon_interval: 100,
            dtim_period: 4,
            max_clients: 4,
            client_idle_timeout: 0,
            keepalive_type: 0,
            beacon_stop: false,
            tdi_flags: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfigRequest {
    pub channel: u16,
    pub ssid: [u8; SSID_FIELD_LEN],
    pub security_type: u8,
    pub encryption_mode: u8,
    pub psk: [u8; 64],
    pub beacon_interval: u16,
    pub dtim_period: u16,
    pub keepalive_type: u8,
    pub keepalive_period: u8,
    pub max_sta: u16,
}

impl ApConfigRequest {
    pub fn encode(&self) -> [u8; AP_CONFIG_REQUEST_SIZE] {
        let mut out = [0u8; AP_CONFIG_REQUEST_SIZE];
        out[0..2].copy_from_slice(&self.channel.to_le_bytes());
        out[2..36].copy_from_slice(&self.ssid);
        out[36] = self.security_type;
        out[37] = self.encryption_mode;
        out[38..102].copy_from_slice(&self.psk);
        out[102..104].copy_from_slice(&self.beacon_interval.to_le_bytes());
        out[104..106].copy_from_slice(&self.dtim_period.to_le_bytes());
        out[106] = self.keepalive_type;
        out[107] = self.keepalive_period;
        out[108..110].copy_from_slice(&self.max_sta.to_le_bytes());
        out
    }
}

pub fn build_ap_config_request<C: CredentialStore + ?Sized>(
    config: &ApConfiguration,
    store: &C,
) -> Result<ApConfigRequest> {
    let keepalive_period = u8::try_from(config.client_idle_timeout)
        .map_err(|_| Error::InvalidParameter)?;

    let psk = if config.security == SecurityType::Open {
        [0; 64]
    } else {
        match store.credential(config.credential, CredentialKind::Personal)? {
            Credential::Psk(passphrase) => padded(passphrase.as_bytes()),
            _ => return Err(Error::InvalidParameter),
        }
    };

    let mut encryption_mode = config.encryption.ap_wire()?;
    if matches!(config.security, SecurityType::Wpa3 | SecurityType::Wpa3Transition) {
        encryption_mode |= config.tdi_flags & TDI_MASK;
    }

    let mut keepalive_type = config.keepalive_type;
    if config.beacon_stop {
        keepalive_type |= KEEPALIVE_BEACON_STOP;
    }

    Ok(ApConfigRequest {
        channel: config.channel,
        ssid: config.ssid.to_field(),
        security_type: config.security.wire(),
        encryption_mode,
        psk,
        beacon_interval: config.beacon_interval,
        dtim_period: config.dtim_period,
        keepalive_type,
        keepalive_period: if config.keepalive_type == 0 { 0 } else { keepalive_period },
        max_sta: config.max_clients,
    })
}
