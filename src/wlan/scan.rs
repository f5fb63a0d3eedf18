//! Scan request encoding and scan result decoding.

use serde::{Deserialize, Serialize};

use super::{SSID_FIELD_LEN, Ssid};
use crate::error::{Error, Result};

pub const SCAN_REQUEST_SIZE: usize = 50;

/// Most entries a single scan response carries.
pub const MAX_SCAN_RESULTS: usize = 11;
const SCAN_RESULT_HEADER: usize = 8;
const SCAN_ENTRY_SIZE: usize = 46;

const PSCAN_PASSIVE: u8 = 0x80;
const PSCAN_LOW_POWER: u8 = 0x40;
const FEATURE_QUICK_SCAN: u8 = 0x01;
const FEATURE_EXTENDED_RESULTS: u8 = 0x02;

/// Highest 2.4 GHz channel number.
pub const MAX_2G4_CHANNEL: u8 = 14;

/// Per-band channel selection. Bit `n` selects channel `n + 1` on 2.4 GHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelBitmap {
    pub band_2g4: u16,
    pub band_5g: u32,
}

impl ChannelBitmap {
    /// 2.4 GHz "all channels".
    pub const ALL_2G4: u16 = 0xFFFF;

    pub const ALL: Self = Self {
        band_2g4: Self::ALL_2G4,
        band_5g: 0,
    };

    /// Just `channel` on 2.4 GHz; `None` outside 1..=14.
    pub const fn single_2g4(channel: u8) -> Option<Self> {
        if channel == 0 || channel > MAX_2G4_CHANNEL {
            return None;
        }
        Some(Self {
            band_2g4: 1 << (channel - 1),
            band_5g: 0,
        })
    }

    /// The channel number when exactly one real 2.4 GHz channel is
    /// selected.
    pub const fn single_channel(&self) -> Option<u8> {
        let bit = self.band_2g4.trailing_zeros();
        if self.band_2g4.count_ones() == 1 && bit < MAX_2G4_CHANNEL as u32 {
            Some(bit as u8 + 1)
        } else {
            None
        }
    }
}

impl Default for ChannelBitmap {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanType {
    #[default]
    Active,
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanConfiguration {
    /// Restrict to one network; enables quick scan with a single channel.
    pub ssid: Option<Ssid>,
    pub channels: ChannelBitmap,
    pub scan_type: ScanType,
    /// Scan on the low-power RF chain.
    pub low_power: bool,
    /// Forward extended results to the host.
    pub extended_results: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub channel: [u8; 4],
    pub ssid: [u8; SSID_FIELD_LEN],
    pub pscan_bitmap: [u8; 4],
    pub scan_feature_bitmap: u8,
    pub channel_bitmap_2g4: u16,
    pub channel_bitmap_5g: u32,
}

impl ScanRequest {
    pub fn encode(&self) -> [u8; SCAN_REQUEST_SIZE] {
        let mut out = [0u8; SCAN_REQUEST_SIZE];
        out[0..4].copy_from_slice(&self.channel);
        out[4..38].copy_from_slice(&self.ssid);
        out[38..42].copy_from_slice(&self.pscan_bitmap);
        out[43] = self.scan_feature_bitmap;
        out[44..46].copy_from_slice(&self.channel_bitmap_2g4.to_le_bytes());
        out[46..50].copy_from_slice(&self.channel_bitmap_5g.to_le_bytes());
        out
    }
}

pub fn build_scan_request(config: &ScanConfiguration, scan_tx_power: u8) -> Result<ScanRequest> {
    if scan_tx_power > 31 {
        return Err(Error::InvalidRange);
    }
    let mut request = ScanRequest {
        channel: [0; 4],
        ssid: config
            .ssid
            .as_ref()
            .map_or([0; SSID_FIELD_LEN], Ssid::to_field),
        pscan_bitmap: [0; 4],
        scan_feature_bitmap: scan_tx_power << 3,
        channel_bitmap_2g4: 0,
        channel_bitmap_5g: config.channels.band_5g,
    };

    if config.channels.band_2g4 != ChannelBitmap::ALL_2G4 {
        request.channel_bitmap_2g4 = config.channels.band_2g4;
        if let Some(ch) = config.channels.single_channel() {
            request.channel[0] = ch;
        }
    }
    if config.scan_type == ScanType::Passive {
        request.pscan_bitmap[3] |= PSCAN_PASSIVE;
    }
    if config.low_power {
        request.pscan_bitmap[3] |= PSCAN_LOW_POWER;
    }
    if config.ssid.as_ref().is_some_and(|s| !s.is_empty()) && request.channel[0] != 0 {
        request.scan_feature_bitmap |= FEATURE_QUICK_SCAN;
    }
    if config.extended_results {
        request.scan_feature_bitmap |= FEATURE_EXTENDED_RESULTS;
    }
    Ok(request)
}

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub channel: u8,
    /// Raw security byte as reported by the NWP.
    pub security: u8,
    /// Signal strength in dBm.
    pub rssi: i16,
    pub network_type: u8,
    pub ssid: Ssid,
    pub bssid: [u8; 6],
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanResults {
    results: heapless::Vec<ScanResult, MAX_SCAN_RESULTS>,
}

impl ScanResults {
    /// Decode a scan response payload. Counts above the per-response cap
    /// are clamped; a payload shorter than its count claims is rejected.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < SCAN_RESULT_HEADER {
            return Err(Error::InvalidParameter);
        }
        let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let count = count.min(MAX_SCAN_RESULTS);
        let body = &payload[SCAN_RESULT_HEADER..];
        if body.len() < count * SCAN_ENTRY_SIZE {
            return Err(Error::InvalidParameter);
        }

        let mut results = heapless::Vec::new();
        for entry in body.chunks_exact(SCAN_ENTRY_SIZE).take(count) {
            let ssid_field = &entry[4..4 + SSID_FIELD_LEN];
            let len = ssid_field
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(ssid_field.len())
                .min(super::MAX_SSID_LEN);
            let mut bssid = [0u8; 6];
            bssid.copy_from_slice(&entry[38..44]);
            let result = ScanResult {
                channel: entry[0],
                security: entry[1],
                rssi: -i16::from(entry[2]),
                network_type: entry[3],
                ssid: Ssid::new(&ssid_field[..len])?,
                bssid,
            };
            results.push(result).map_err(|_| Error::InvalidParameter)?;
        }
        Ok(Self { results })
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanResult> {
        self.results.iter()
    }

    /// Strongest entry advertising `ssid`.
    pub fn find(&self, ssid: &Ssid) -> Option<&ScanResult> {
        self.results
            .iter()
            .filter(|r| r.ssid == *ssid)
            .max_by_key(|r| r.rssi)
    }
}
