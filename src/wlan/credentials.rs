//! Credential lookup.
//!
//! Requests never carry secrets in their configuration objects; they carry
//! a [`CredentialId`] that is resolved through a [`CredentialStore`] at
//! encode time.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest PSK passphrase (plus room for the terminator in the wire field).
pub const MAX_PSK_LEN: usize = 63;
/// PMK length in bytes.
pub const PMK_LEN: usize = 32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct CredentialId(pub u32);

/// Kind of credential an operation asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Passphrase or PMK for personal security.
    Personal,
    /// Enterprise (EAP) credentials.
    Eap,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EapCredential {
    pub username: heapless::String<63>,
    pub password: heapless::String<127>,
    /// Private key password for EAP-TLS (empty: none).
    pub certificate_key: heapless::String<80>,
    /// OKC / EAP option flags.
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Psk(heapless::String<MAX_PSK_LEN>),
    Pmk([u8; PMK_LEN]),
    Eap(EapCredential),
}

impl Credential {
    pub fn psk(passphrase: &str) -> Result<Self> {
        heapless::String::try_from(passphrase)
            .map(Self::Psk)
            .map_err(|()| Error::InvalidParameter)
    }

    pub const fn kind(&self) -> CredentialKind {
        match self {
            Self::Psk(_) | Self::Pmk(_) => CredentialKind::Personal,
            Self::Eap(_) => CredentialKind::Eap,
        }
    }
}

/// Source of credentials for join and AP requests.
pub trait CredentialStore {
    /// Look up `id`, failing with `InvalidParameter` when it is missing or
    /// of the wrong kind.
    fn credential(&self, id: CredentialId, kind: CredentialKind) -> Result<Credential>;
}

/// Credentials held in RAM.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    entries: Vec<(CredentialId, Credential)>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace.
    pub fn set(&mut self, id: CredentialId, credential: Credential) {
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = credential,
            None => self.entries.push((id, credential)),
        }
    }

    pub fn remove(&mut self, id: CredentialId) -> Option<Credential> {
        let index = self.entries.iter().position(|(k, _)| *k == id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credential(&self, id: CredentialId, kind: CredentialKind) -> Result<Credential> {
        self.entries
            .iter()
            .find(|(k, c)| *k == id && c.kind() == kind)
            .map(|(_, c)| c.clone())
            .ok_or(Error::InvalidParameter)
    }
}
