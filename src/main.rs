//! nwp-sim: runs the driver engine against the in-process NWP simulator.
//!
//! ```text
//!  edge_executor::LocalExecutor
//!  ┌──────────────────────────┐       ┌────────────────────┐
//!  │ demo()  ── DriverSession │──────▶│ BusPump ── SimNwp  │
//!  └──────────────────────────┘       └────────────────────┘
//! ```
//!
//! Usage: `nwp-sim [config.json]`. Without an argument the default
//! [`DriverConfig`] is used. `RUST_LOG` sets the log filter.

use anyhow::{Context, Result, anyhow};
use embassy_time::Duration;
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use nwp_host::bus::{BusPump, frame::QUEUE_WLAN_MGMT};
use nwp_host::dispatch::{CommandClass, command};
use nwp_host::power::{BtPerformanceProfile, CoexMode, PerformanceProfile, WifiPerformanceProfile};
use nwp_host::sim::SimulatedNwp;
use nwp_host::wlan::{
    ApConfiguration, ChannelBitmap, ClientConfiguration, Credential, CredentialId, Encryption,
    Interface, MemoryCredentialStore, OperatingMode, ScanConfiguration, SecurityType, Ssid,
};
use nwp_host::{DriverConfig, DriverSession};

// ── Logging ───────────────────────────────────────────────────

/// `RUST_LOG` wins; otherwise info. Driver `log` records are forwarded
/// by the subscriber's log bridge.
fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("logger: {e}"))
}

// ── Config ────────────────────────────────────────────────────

fn load_config(path: Option<String>) -> Result<DriverConfig> {
    let Some(path) = path else {
        return Ok(DriverConfig::default());
    };
    let raw = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
    let config: DriverConfig =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {path}"))?;
    info!("Config loaded from {}", path);
    Ok(config)
}

// ── Demo sequence ─────────────────────────────────────────────

const HOME_CREDENTIAL: CredentialId = CredentialId(1);
const HOTSPOT_CREDENTIAL: CredentialId = CredentialId(2);

async fn demo(session: &DriverSession<MemoryCredentialStore>, sim: &SimulatedNwp) -> Result<()> {
    session
        .init(OperatingMode::Concurrent, CoexMode::WlanBle)
        .await?;

    let home = Ssid::try_from("nwp-lab")?;
    let results = session
        .scan(
            Interface::Client,
            &ScanConfiguration {
                ssid: Some(home.clone()),
                ..ScanConfiguration::default()
            },
        )
        .await?;
    for r in results.iter() {
        info!(
            "Scan: {:?} ch {} {} dBm",
            core::str::from_utf8(r.ssid.as_bytes()),
            r.channel,
            r.rssi
        );
    }
    let channel = results.find(&home).map_or(6, |r| r.channel);

    let target = ClientConfiguration {
        ssid: home,
        security: SecurityType::Wpa2,
        encryption: Encryption::Ccmp,
        credential: HOME_CREDENTIAL,
        channels: ChannelBitmap::single_2g4(channel).unwrap_or_default(),
        ..ClientConfiguration::default()
    };
    let join_timeout = Duration::from_millis(u64::from(session.config().join_timeout_ms));
    session.connect(Interface::Client, &target, join_timeout).await?;
    info!("RSSI: {} dBm", session.rssi(Interface::Client).await?);

    session
        .set_wifi_performance_profile(WifiPerformanceProfile::new(
            PerformanceProfile::AssociatedPowerSave,
        ))
        .await?;
    session
        .set_bt_performance_profile(BtPerformanceProfile::new(
            PerformanceProfile::AssociatedPowerSaveLowLatency,
        ))
        .await?;
    info!("Effective profile: {:?}", session.effective_profile().await);

    let hotspot = ApConfiguration {
        ssid: Ssid::try_from("nwp-hotspot")?,
        security: SecurityType::Wpa2,
        encryption: Encryption::Ccmp,
        credential: HOTSPOT_CREDENTIAL,
        channel: u16::from(channel),
        ..ApConfiguration::default()
    };
    session.start_ap(&hotspot).await?;

    // Remote side drops the station.
    sim.inject_event(QUEUE_WLAN_MGMT, command::DISCONNECT, &[0; 8]);
    match session
        .next_event(CommandClass::Wlan, Duration::from_millis(100))
        .await
    {
        Ok(event) => info!(
            "Event: 0x{:02X} ({} byte payload)",
            event.command(),
            event.payload().len()
        ),
        Err(e) => warn!("No event: {}", e),
    }

    session.stop_ap().await?;
    session.deinit().await?;
    info!("Simulator saw {} frame(s)", sim.sent().len());
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    info!("nwp-sim v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(std::env::args().nth(1))?;
    let mut credentials = MemoryCredentialStore::new();
    credentials.set(HOME_CREDENTIAL, Credential::psk("correct-horse")?);
    credentials.set(HOTSPOT_CREDENTIAL, Credential::psk("battery-staple")?);

    let session = DriverSession::new(config, credentials)?;
    let sim = SimulatedNwp::new();

    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let mut pump = BusPump::new(
        session.dispatcher(),
        sim.clone(),
        session.config().bus_poll_interval(),
    );
    executor.spawn(async move { pump.run().await }).detach();

    futures_lite::future::block_on(executor.run(demo(&session, &sim)))
}
