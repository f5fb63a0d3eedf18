//! Power profile arbitration through a live session.

use nwp_host::config::HostInterface;
use nwp_host::dispatch::command;
use nwp_host::power::command::{CONNECTED_GPIO_BASED_PS, PS_DISABLE};
use nwp_host::power::{
    BtPerformanceProfile, CoexMode, Commit, PerformanceProfile::*, WifiPerformanceProfile,
};
use nwp_host::sim::{ScriptedReply, SimulatedNwp};
use nwp_host::wlan::OperatingMode;
use nwp_host::{DriverConfig, DriverSession};

use crate::harness::{Session, credentials, drive, fast_config};

fn started(coex: CoexMode) -> (Session, SimulatedNwp) {
    let config = DriverConfig {
        host_interface: HostInterface::Gpio,
        ..fast_config()
    };
    let session = DriverSession::new(config, credentials()).unwrap();
    let sim = SimulatedNwp::new();
    drive(session.dispatcher(), &sim, session.init(OperatingMode::Client, coex)).unwrap();
    sim.clear_sent();
    (session, sim)
}

fn pwrmode_bodies(sim: &SimulatedNwp) -> Vec<Vec<u8>> {
    sim.sent()
        .into_iter()
        .filter(|f| f.header.command == command::PWRMODE)
        .map(|f| f.payload)
        .collect()
}

#[test]
fn power_save_is_disabled_before_every_change() {
    let (s, sim) = started(CoexMode::Wlan);
    let r = drive(
        s.dispatcher(),
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(AssociatedPowerSave)),
    );
    assert_eq!(r, Ok(Commit::Applied(AssociatedPowerSave)));

    let bodies = pwrmode_bodies(&sim);
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], vec![0; 10]);
    assert_eq!(bodies[1][0], CONNECTED_GPIO_BASED_PS);
    assert_eq!(&bodies[1][4..6], &50u16.to_le_bytes());
}

#[test]
fn high_performance_sends_only_the_disable() {
    let (s, sim) = started(CoexMode::Wlan);
    drive(
        s.dispatcher(),
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(HighPerformance)),
    )
    .unwrap();
    let bodies = pwrmode_bodies(&sim);
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0][0], PS_DISABLE);
}

#[test]
fn coex_combines_wifi_and_bt() {
    let (s, sim) = started(CoexMode::WlanBle);
    let d = s.dispatcher();

    let wifi = drive(
        d,
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(AssociatedPowerSave)),
    );
    // BT still at high performance holds the NWP awake.
    assert_eq!(wifi, Ok(Commit::Applied(HighPerformance)));

    let bt = drive(
        d,
        &sim,
        s.set_bt_performance_profile(BtPerformanceProfile::new(AssociatedPowerSave)),
    );
    assert_eq!(bt, Ok(Commit::Applied(AssociatedPowerSave)));
    assert_eq!(drive(d, &sim, s.effective_profile()), AssociatedPowerSave);
    assert_eq!(drive(d, &sim, s.bt_performance_profile()).profile, AssociatedPowerSave);
}

#[test]
fn rejected_change_keeps_previous_profile() {
    let (s, sim) = started(CoexMode::Wlan);
    let d = s.dispatcher();
    drive(
        d,
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(AssociatedPowerSave)),
    )
    .unwrap();

    sim.script(command::PWRMODE, ScriptedReply::status(0x2C));
    let r = drive(
        d,
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(
            AssociatedPowerSaveLowLatency,
        )),
    );
    assert!(r.is_err());
    assert_eq!(drive(d, &sim, s.wifi_performance_profile()).profile, AssociatedPowerSave);
    assert_eq!(drive(d, &sim, s.effective_profile()), AssociatedPowerSave);
}

#[test]
fn deep_sleep_with_retention_keeps_session() {
    let (s, sim) = started(CoexMode::Wlan);
    let r = drive(
        s.dispatcher(),
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(DeepSleepWithRamRetention)),
    );
    assert_eq!(r, Ok(Commit::Applied(DeepSleepWithRamRetention)));
    assert!(s.is_initialized());
}

#[test]
fn deep_sleep_without_retention_requires_reinit() {
    let (s, sim) = started(CoexMode::Wlan);
    let d = s.dispatcher();
    let r = drive(
        d,
        &sim,
        s.set_wifi_performance_profile(WifiPerformanceProfile::new(
            DeepSleepWithoutRamRetention,
        )),
    );
    assert_eq!(r, Ok(Commit::SessionLost));
    assert!(!s.is_initialized());
    assert_eq!(drive(d, &sim, s.effective_profile()), HighPerformance);

    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::Wlan)).unwrap();
    assert!(s.is_initialized());
}

#[test]
fn power_save_then_high_performance_round_trip() {
    let (s, sim) = started(CoexMode::Wlan);
    let d = s.dispatcher();
    assert_eq!(drive(d, &sim, s.effective_profile()), HighPerformance);
    for p in [AssociatedPowerSave, HighPerformance] {
        drive(d, &sim, s.set_wifi_performance_profile(WifiPerformanceProfile::new(p))).unwrap();
    }
    assert_eq!(drive(d, &sim, s.effective_profile()), HighPerformance);
    assert!(s.is_initialized());
    assert_eq!(drive(d, &sim, s.coex_mode()), CoexMode::Wlan);
}
