//! Driver session: the public face of the engine.
//!
//! [`DriverSession`] owns the dispatcher, the credential store and every
//! piece of state that outlives a single request: power profiles, the AP
//! snapshot, interface flags, the operating mode and the join settings.
//!
//! ```text
//!  host tasks ──▶ ┌───────────────────────────────┐ ──send_command──▶ Dispatcher
//!                 │         DriverSession          │
//!  credentials ──▶│  profiles · AP · join settings │ ◀──next_event──── (events)
//!                 └───────────────────────────────┘
//! ```
//!
//! The session never touches the bus. A [`BusPump`](crate::bus::BusPump)
//! built on [`DriverSession::dispatcher`] must be running for any request
//! to complete.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use log::{info, warn};

use crate::config::DriverConfig;
use crate::dispatch::{CommandClass, Dispatcher, Reply, Response, WaitPolicy, command};
use crate::error::{Error, Result};
use crate::power::arbiter::{self, Commit, PowerSaveLink, ProfileState, ProfileUpdate};
use crate::power::command::{PowerSaveDefaults, PowerSaveRequest, build_power_save_command};
use crate::power::profile::{
    BtPerformanceProfile, CoexMode, PerformanceProfile, WifiPerformanceProfile,
};
use crate::wlan::join::{JOIN_SENTINEL_AP, JOIN_SENTINEL_STATION};
use crate::wlan::{
    ApConfiguration, ClientConfiguration, CredentialKind, CredentialStore, Interface,
    JoinFeatures, JoinSettings, MfpMode, OperatingMode, ScanConfiguration, ScanResults,
    SecurityType, TxPower, build_ap_config_request, build_eap_request, build_join_request,
    build_psk_request, build_scan_request,
};

pub const OPERMODE_REQUEST_SIZE: usize = 16;
const DISCONNECT_REQUEST_SIZE: usize = 8;
/// BAND argument: 2.4 GHz only.
const BAND_2G4: u8 = 0;

/// OPERMODE body: coex mode in the upper half of the first word, feature
/// bitmaps left at their firmware defaults.
pub fn opermode_request(opermode: OperatingMode, coex: CoexMode) -> [u8; OPERMODE_REQUEST_SIZE] {
    let word = (u32::from(coex.bits()) << 16) | opermode as u32;
    let mut out = [0u8; OPERMODE_REQUEST_SIZE];
    out[0..4].copy_from_slice(&word.to_le_bytes());
    out
}

#[derive(Debug, Clone)]
struct SessionState {
    profiles: ProfileState,
    ap: Option<ApConfiguration>,
    interfaces_up: [bool; 2],
    opermode: OperatingMode,
    join: JoinSettings,
}

impl SessionState {
    fn new(config: &DriverConfig) -> Self {
        Self {
            profiles: ProfileState::default(),
            ap: None,
            interfaces_up: [false; 2],
            opermode: OperatingMode::default(),
            join: JoinSettings::from_config(config),
        }
    }

    /// Forget everything tied to the NWP's runtime state. Join settings
    /// are host configuration and survive.
    fn clear_runtime(&mut self) {
        self.profiles.reset();
        self.ap = None;
        self.interfaces_up = [false; 2];
        self.opermode = OperatingMode::default();
    }
}

/// Sends PWRMODE on the common channel.
struct PowerLink<'a> {
    dispatcher: &'a Dispatcher,
    defaults: PowerSaveDefaults,
    timeout: Duration,
}

impl PowerSaveLink for PowerLink<'_> {
    async fn send_power_save(
        &self,
        profile: PerformanceProfile,
        wifi: &WifiPerformanceProfile,
    ) -> Result<()> {
        let policy = WaitPolicy::Status(self.timeout);
        // The NWP only accepts a new mode from the disabled state.
        self.dispatcher
            .send_command(
                CommandClass::Common,
                command::PWRMODE,
                &PowerSaveRequest::DISABLE.encode(),
                policy,
                None,
            )
            .await?;
        if profile == PerformanceProfile::HighPerformance {
            return Ok(());
        }
        let request = build_power_save_command(profile, wifi, &self.defaults);
        self.dispatcher
            .send_command(CommandClass::Common, command::PWRMODE, &request.encode(), policy, None)
            .await?;
        Ok(())
    }
}

pub struct DriverSession<C: CredentialStore> {
    config: DriverConfig,
    dispatcher: Dispatcher,
    credentials: C,
    state: Mutex<CriticalSectionRawMutex, SessionState>,
    initialized: AtomicBool,
}

impl<C: CredentialStore> DriverSession<C> {
    pub fn new(config: DriverConfig, credentials: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(&config),
            state: Mutex::new(SessionState::new(&config)),
            config,
            credentials,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    pub fn credentials_mut(&mut self) -> &mut C {
        &mut self.credentials
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() { Ok(()) } else { Err(Error::NotInitialized) }
    }

    fn class_wait(&self, class: CommandClass) -> WaitPolicy {
        WaitPolicy::Status(self.dispatcher.default_timeout(class))
    }

    fn ms(ms: u32) -> Duration {
        Duration::from_millis(u64::from(ms))
    }

    async fn wlan(&self, cmd: u16, payload: &[u8], policy: WaitPolicy) -> Result<Reply> {
        self.dispatcher
            .send_command(CommandClass::Wlan, cmd, payload, policy, None)
            .await
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Boot the NWP into `opermode` with radio coexistence `coex`.
    pub async fn init(&self, opermode: OperatingMode, coex: CoexMode) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::InvalidMode);
        }
        if opermode.has_ap() && !coex.has_wlan() {
            return Err(Error::InvalidMode);
        }

        let mut state = self.state.lock().await;
        self.dispatcher
            .send_command(
                CommandClass::Common,
                command::OPERMODE,
                &opermode_request(opermode, coex),
                self.class_wait(CommandClass::Common),
                None,
            )
            .await?;

        if opermode.has_client() && coex.has_wlan() {
            let wait = self.class_wait(CommandClass::Wlan);
            self.wlan(command::BAND, &[BAND_2G4], wait).await?;
            self.wlan(command::INIT, &[], wait).await?;
        }

        state.opermode = opermode;
        state.profiles.coex = coex;
        state.interfaces_up = [opermode.has_client() && coex.has_wlan(), false];
        self.initialized.store(true, Ordering::Release);
        info!("SESSION: initialized, opermode {:?} coex {:?}", opermode, coex);
        Ok(())
    }

    /// Tear the session down. Requests still queued for the bus are
    /// failed with a rejoin-failure status.
    pub async fn deinit(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Err(Error::NotInitialized);
        }
        let woken = self.dispatcher.flush_all();
        self.state.lock().await.clear_runtime();
        info!("SESSION: deinitialized ({} pending request(s) failed)", woken);
        Ok(())
    }

    // ── Power profiles ────────────────────────────────────────

    pub async fn set_wifi_performance_profile(
        &self,
        profile: WifiPerformanceProfile,
    ) -> Result<Commit> {
        self.apply_profile(ProfileUpdate::Wifi(profile)).await
    }

    pub async fn set_bt_performance_profile(&self, profile: BtPerformanceProfile) -> Result<Commit> {
        self.apply_profile(ProfileUpdate::Bt(profile)).await
    }

    async fn apply_profile(&self, update: ProfileUpdate) -> Result<Commit> {
        self.ensure_initialized()?;
        let mut state = self.state.lock().await;
        let link = PowerLink {
            dispatcher: &self.dispatcher,
            defaults: PowerSaveDefaults {
                host_interface: self.config.host_interface,
                monitor_interval: self.config.monitor_interval_ms,
                beacon_miss_ignore_limit: self.config.beacon_miss_ignore_limit,
            },
            timeout: Self::ms(self.config.power_save_timeout_ms),
        };
        let outcome = arbiter::commit(&mut state.profiles, update, &link).await?;
        if outcome == Commit::SessionLost {
            state.clear_runtime();
            self.initialized.store(false, Ordering::Release);
            warn!("SESSION: NWP lost its state, re-initialize before further use");
        }
        Ok(outcome)
    }

    pub async fn wifi_performance_profile(&self) -> WifiPerformanceProfile {
        self.state.lock().await.profiles.wifi
    }

    pub async fn bt_performance_profile(&self) -> BtPerformanceProfile {
        self.state.lock().await.profiles.bt
    }

    /// Profile the NWP runs for the current Wi-Fi/BT combination.
    pub async fn effective_profile(&self) -> PerformanceProfile {
        self.state.lock().await.profiles.effective()
    }

    pub async fn coex_mode(&self) -> CoexMode {
        self.state.lock().await.profiles.coex
    }

    /// Zero the stored profiles. Nothing is sent to the NWP.
    pub async fn reset_profiles(&self) {
        self.state.lock().await.profiles.reset();
    }

    // ── Join settings ─────────────────────────────────────────

    pub async fn set_listen_interval(&self, interval: u32, multiplier: u8) -> Result<()> {
        if multiplier == 0 {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.lock().await;
        state.join.listen_interval = interval;
        state.join.listen_interval_multiplier = multiplier;
        Ok(())
    }

    pub async fn set_join_feature_bitmap(&self, interface: Interface, features: JoinFeatures) {
        self.state.lock().await.join.features[interface.index()] = features;
    }

    pub async fn join_feature_bitmap(&self, interface: Interface) -> JoinFeatures {
        self.state.lock().await.join.features[interface.index()]
    }

    /// `None` restores inference from the security type.
    pub async fn set_mfp_mode(&self, mode: Option<MfpMode>) {
        self.state.lock().await.join.mfp = mode;
    }

    pub async fn set_max_tx_power(&self, join: TxPower, scan_dbm: u8) -> Result<()> {
        join.encode()?;
        if scan_dbm > 31 {
            return Err(Error::InvalidRange);
        }
        let mut state = self.state.lock().await;
        state.join.join_tx_power = join;
        state.join.scan_tx_power = scan_dbm;
        Ok(())
    }

    pub async fn set_transmit_rate(&self, rate: u8) {
        self.state.lock().await.join.data_rate = rate;
    }

    pub async fn join_settings(&self) -> JoinSettings {
        self.state.lock().await.join
    }

    pub async fn interface_up(&self, interface: Interface) -> bool {
        self.state.lock().await.interfaces_up[interface.index()]
    }

    pub async fn operating_mode(&self) -> OperatingMode {
        self.state.lock().await.opermode
    }

    /// Settings and opermode, after checking `interface` is up.
    async fn snapshot_for(&self, interface: Interface) -> Result<(JoinSettings, OperatingMode)> {
        self.ensure_initialized()?;
        let state = self.state.lock().await;
        if !state.interfaces_up[interface.index()] {
            return Err(Error::InterfaceNotUp);
        }
        Ok((state.join, state.opermode))
    }

    // ── Station ───────────────────────────────────────────────

    pub async fn scan(
        &self,
        interface: Interface,
        config: &ScanConfiguration,
    ) -> Result<ScanResults> {
        let (settings, _) = self.snapshot_for(interface).await?;
        let request = build_scan_request(config, settings.scan_tx_power)?;
        let wait = WaitPolicy::Response(Self::ms(self.config.scan_timeout_ms));
        let response = self.wlan(command::SCAN, &request.encode(), wait).await?.into_response()?;
        let results = ScanResults::decode(response.payload())?;
        info!("SESSION: scan found {} network(s)", results.len());
        Ok(results)
    }

    /// Scan for, authenticate with and join `ap`.
    pub async fn connect(
        &self,
        interface: Interface,
        ap: &ClientConfiguration,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if interface == Interface::AccessPoint {
            return Err(Error::NotSupported);
        }
        let (settings, opermode) = self.snapshot_for(interface).await?;
        if ap.ssid.is_empty() {
            return Err(Error::InvalidParameter);
        }

        // Everything that can fail locally is built before the first send.
        let scan = build_scan_request(
            &ScanConfiguration {
                ssid: Some(ap.ssid.clone()),
                channels: ap.channels,
                ..ScanConfiguration::default()
            },
            settings.scan_tx_power,
        )?;
        let auth = if ap.security.is_enterprise() {
            let credential = self.credentials.credential(ap.credential, CredentialKind::Eap)?;
            let request = build_eap_request(ap.encryption, &credential)?;
            Some((command::EAP_CONFIG, request.encode().to_vec()))
        } else if ap.security.is_personal() {
            let credential = self
                .credentials
                .credential(ap.credential, CredentialKind::Personal)?;
            let request = build_psk_request(&ap.ssid, &credential)?;
            Some((command::HOST_PSK, request.encode().to_vec()))
        } else if ap.security == SecurityType::Wep {
            return Err(Error::NotSupported);
        } else {
            None
        };
        let join = build_join_request(&ap.into(), &settings, opermode)?;

        let status_wait = self.class_wait(CommandClass::Wlan);
        self.wlan(
            command::SCAN,
            &scan.encode(),
            WaitPolicy::Status(Self::ms(self.config.scan_timeout_ms)),
        )
        .await?;
        if let Some((cmd, body)) = auth {
            self.wlan(cmd, &body, status_wait).await?;
        }

        let reply = match self.wlan(command::JOIN, &join.encode(), WaitPolicy::Response(timeout)).await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("SESSION: join failed ({}), resetting WLAN state", e);
                if let Err(reset) = self.wlan(command::INIT, &[], status_wait).await {
                    warn!("SESSION: WLAN reset after failed join also failed: {}", reset);
                }
                return Err(e);
            }
        };
        expect_sentinel(&reply.into_response()?, JOIN_SENTINEL_STATION)?;
        info!("SESSION: connected to {:?}", core::str::from_utf8(ap.ssid.as_bytes()));
        Ok(())
    }

    pub async fn disconnect(&self, interface: Interface) -> Result<()> {
        self.ensure_initialized()?;
        if interface == Interface::AccessPoint {
            return Err(Error::NotSupported);
        }
        self.snapshot_for(interface).await?;
        let request = [0u8; DISCONNECT_REQUEST_SIZE];
        self.wlan(command::DISCONNECT, &request, self.class_wait(CommandClass::Wlan))
            .await?;
        info!("SESSION: disconnected");
        Ok(())
    }

    /// Signal strength of the current association, in dBm.
    pub async fn rssi(&self, interface: Interface) -> Result<i16> {
        self.ensure_initialized()?;
        if interface == Interface::AccessPoint {
            return Err(Error::NotSupported);
        }
        self.snapshot_for(interface).await?;
        let wait = WaitPolicy::Response(self.dispatcher.default_timeout(CommandClass::Wlan));
        let response = self.wlan(command::RSSI, &[], wait).await?.into_response()?;
        let magnitude = *response.payload().first().ok_or(Error::NotAvailable)?;
        Ok(-i16::from(magnitude))
    }

    // ── Access point ──────────────────────────────────────────

    pub async fn start_ap(&self, config: &ApConfiguration) -> Result<()> {
        self.ensure_initialized()?;
        let (settings, opermode) = {
            let state = self.state.lock().await;
            (state.join, state.opermode)
        };
        if !opermode.has_ap() {
            return Err(Error::InvalidMode);
        }
        let ap_request = build_ap_config_request(config, &self.credentials)?;
        let join = build_join_request(&config.into(), &settings, opermode)?;

        self.wlan(
            command::AP_CONFIGURATION,
            &ap_request.encode(),
            self.class_wait(CommandClass::Wlan),
        )
        .await?;
        let wait = WaitPolicy::Response(Self::ms(self.config.join_timeout_ms));
        let response = self.wlan(command::JOIN, &join.encode(), wait).await?.into_response()?;
        expect_sentinel(&response, JOIN_SENTINEL_AP)?;

        let mut state = self.state.lock().await;
        state.ap = Some(config.clone());
        state.interfaces_up[Interface::AccessPoint.index()] = true;
        info!("SESSION: AP up on channel {}", config.channel);
        Ok(())
    }

    pub async fn stop_ap(&self) -> Result<()> {
        self.snapshot_for(Interface::AccessPoint).await?;
        self.wlan(command::AP_STOP, &[], self.class_wait(CommandClass::Wlan))
            .await?;
        let mut state = self.state.lock().await;
        state.ap = None;
        state.interfaces_up[Interface::AccessPoint.index()] = false;
        info!("SESSION: AP stopped");
        Ok(())
    }

    /// Configuration the running AP was started with.
    pub async fn ap_configuration(&self) -> Result<ApConfiguration> {
        self.state.lock().await.ap.clone().ok_or(Error::InterfaceNotUp)
    }

    // ── Events ────────────────────────────────────────────────

    /// Next unsolicited frame, or answer to an asynchronous request, on
    /// `class`.
    pub async fn next_event(&self, class: CommandClass, timeout: Duration) -> Result<Response> {
        self.ensure_initialized()?;
        self.dispatcher.next_event(class, timeout).await
    }
}

fn expect_sentinel(response: &Response, sentinel: u8) -> Result<()> {
    match response.payload().first() {
        Some(&b) if b == sentinel => Ok(()),
        other => {
            warn!(
                "SESSION: 0x{:02X} answered {:?}, expected {:?}",
                response.command(),
                other.map(|&b| b as char),
                sentinel as char
            );
            Err(Error::NotAvailable)
        }
    }
}
