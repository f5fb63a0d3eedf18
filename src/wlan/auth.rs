//! Credential requests sent ahead of a station join.
//!
//! Personal networks get a host PSK request carrying either the passphrase
//! or a precomputed PMK. Enterprise networks get an EAP configuration with
//! quoted identity and password strings.

use super::credentials::{Credential, EapCredential, PMK_LEN};
use super::security::Encryption;
use super::{SSID_FIELD_LEN, Ssid, padded};
use crate::error::{Error, Result};

pub const PSK_REQUEST_SIZE: usize = 99;
pub const EAP_REQUEST_SIZE: usize = 342;

pub const PSK_TYPE_PSK: u8 = 1;
pub const PSK_TYPE_PMK: u8 = 2;

const INNER_METHOD: &str = "\"auth=MSCHAPV2\"";
const NO_KEY_PASSWORD: &str = "\"\"";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskRequest {
    pub kind: u8,
    pub psk_or_pmk: [u8; 64],
    pub ap_ssid: [u8; SSID_FIELD_LEN],
}

impl PskRequest {
    pub fn encode(&self) -> [u8; PSK_REQUEST_SIZE] {
        let mut out = [0u8; PSK_REQUEST_SIZE];
        out[0] = self.kind;
        out[1..65].copy_from_slice(&self.psk_or_pmk);
        out[65..99].copy_from_slice(&self.ap_ssid);
        out
    }
}

pub fn build_psk_request(ssid: &Ssid, credential: &Credential) -> Result<PskRequest> {
    let (kind, psk_or_pmk) = match credential {
        Credential::Psk(passphrase) => (PSK_TYPE_PSK, padded(passphrase.as_bytes())),
        Credential::Pmk(pmk) => (PSK_TYPE_PMK, padded::<64>(&pmk[..PMK_LEN])),
        Credential::Eap(_) => return Err(Error::InvalidParameter),
    };
    Ok(PskRequest {
        kind,
        psk_or_pmk,
        ap_ssid: ssid.to_field(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapRequest {
    pub eap_method: [u8; 32],
    pub inner_method: [u8; 32],
    pub user_identity: [u8; 64],
    pub password: [u8; 128],
    pub okc_enable: u32,
    pub private_key_password: [u8; 82],
}

impl EapRequest {
    pub fn encode(&self) -> [u8; EAP_REQUEST_SIZE] {
        let mut out = [0u8; EAP_REQUEST_SIZE];
        out[0..32].copy_from_slice(&self.eap_method);
        out[32..64].copy_from_slice(&self.inner_method);
        out[64..128].copy_from_slice(&self.user_identity);
        out[128..256].copy_from_slice(&self.password);
        out[256..260].copy_from_slice(&self.okc_enable.to_le_bytes());
        out[260..342].copy_from_slice(&self.private_key_password);
        out
    }
}

/// `"value"` in an `N`-byte NUL-terminated field.
fn quoted<const N: usize>(value: &str) -> Result<[u8; N]> {
    // two quotes plus the terminator
    if value.len() + 3 > N {
        return Err(Error::InvalidParameter);
    }
    let mut out = [0u8; N];
    out[0] = b'"';
    out[1..=value.len()].copy_from_slice(value.as_bytes());
    out[value.len() + 1] = b'"';
    Ok(out)
}

pub fn build_eap_request(encryption: Encryption, credential: &Credential) -> Result<EapRequest> {
    let Credential::Eap(EapCredential {
        username,
        password,
        certificate_key,
        flags,
    }) = credential
    else {
        return Err(Error::InvalidParameter);
    };
    let method = encryption.eap_method().ok_or(Error::InvalidParameter)?;

    let private_key_password = if certificate_key.is_empty() {
        padded(NO_KEY_PASSWORD.as_bytes())
    } else {
        quoted(certificate_key)?
    };

    Ok(EapRequest {
        eap_method: padded(method.as_bytes()),
        inner_method: padded(INNER_METHOD.as_bytes()),
        user_identity: quoted(username)?,
        password: quoted(password)?,
        okc_enable: *flags,
        private_key_password,
    })
}
