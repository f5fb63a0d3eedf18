//! End-to-end session flows: bring-up, station join, soft AP and
//! teardown.

use embassy_time::Duration;
use nwp_host::bus::frame::QUEUE_WLAN_MGMT;
use nwp_host::dispatch::command;
use nwp_host::power::CoexMode;
use nwp_host::sim::{ScriptedReply, scan_response};
use nwp_host::wlan::{
    ApConfiguration, ChannelBitmap, ClientConfiguration, Encryption, Interface, JoinFeatures,
    MfpMode, OperatingMode, ScanConfiguration, SecurityType, Ssid,
};
use nwp_host::{CommandClass, DriverConfig, Error};

use crate::harness::{CORP, HOME, drive, session};

const JOIN_WAIT: Duration = Duration::from_millis(300);

fn home_network() -> ClientConfiguration {
    ClientConfiguration {
        ssid: Ssid::try_from("home").unwrap(),
        security: SecurityType::Wpa3,
        encryption: Encryption::Ccmp,
        credential: HOME,
        channels: ChannelBitmap::single_2g4(11).unwrap(),
        ..ClientConfiguration::default()
    }
}

#[test]
fn scan_reports_networks_from_the_nwp() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    sim.script(
        command::SCAN,
        ScriptedReply::payload(scan_response(&[(1, 70, b"cafe"), (6, 35, b"home"), (11, 50, b"home")])),
    );

    let results = drive(d, &sim, s.scan(Interface::Client, &ScanConfiguration::default())).unwrap();
    assert_eq!(results.len(), 3);
    let best = results.find(&Ssid::try_from("home").unwrap()).unwrap();
    assert_eq!((best.channel, best.rssi), (6, -35));
}

#[test]
fn wpa3_join_requires_mfp() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    drive(d, &sim, s.connect(Interface::Client, &home_network(), JOIN_WAIT)).unwrap();

    let scan = sim.last_payload(command::SCAN).unwrap();
    assert_eq!(scan[0], 11);
    assert_eq!(&scan[4..9], b"home\0");

    let join = sim.last_payload(command::JOIN).unwrap();
    assert_eq!(join[1], SecurityType::Wpa3.wire() | 0x80);
    let features = JoinFeatures::from_bits_retain(join[102]);
    assert!(features.contains(JoinFeatures::MFP_REQUIRED));
    assert!(features.contains(JoinFeatures::LISTEN_INTERVAL_VALID));
}

#[test]
fn explicit_mfp_mode_overrides_inference() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    drive(d, &sim, s.set_mfp_mode(Some(MfpMode::Disabled)));
    drive(d, &sim, s.connect(Interface::Client, &home_network(), JOIN_WAIT)).unwrap();
    let join = sim.last_payload(command::JOIN).unwrap();
    assert_eq!(join[102] & 0x60, 0);
}

#[test]
fn enterprise_join_sends_eap_configuration() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::EnterpriseClient, CoexMode::WlanOnly)).unwrap();
    sim.clear_sent();
    let corp = ClientConfiguration {
        ssid: Ssid::try_from("corp").unwrap(),
        security: SecurityType::Wpa2Enterprise,
        encryption: Encryption::PeapMschapV2,
        credential: CORP,
        ..ClientConfiguration::default()
    };
    drive(d, &sim, s.connect(Interface::Client, &corp, JOIN_WAIT)).unwrap();
    assert_eq!(
        sim.sent_commands(),
        vec![command::SCAN, command::EAP_CONFIG, command::JOIN]
    );
    let eap = sim.last_payload(command::EAP_CONFIG).unwrap();
    assert_eq!(eap.len(), 342);
    assert_eq!(&eap[64..72], b"\"alice\"\0");
}

#[test]
fn listen_interval_and_tx_power_reach_the_join() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    drive(d, &sim, s.set_listen_interval(300, 3)).unwrap();
    drive(d, &sim, s.set_max_tx_power(nwp_host::wlan::TxPower::Dbm(10), 20)).unwrap();
    drive(d, &sim, s.set_transmit_rate(7));
    drive(d, &sim, s.connect(Interface::Client, &home_network(), JOIN_WAIT)).unwrap();

    let join = sim.last_payload(command::JOIN).unwrap();
    assert_eq!(join[2], 7);
    assert_eq!(join[3], (10 << 2) | 0x80);
    assert_eq!(join[103], 3);
    assert_eq!(&join[106..110], &300u32.to_le_bytes());
    let scan = sim.last_payload(command::SCAN).unwrap();
    assert_eq!(scan[43] >> 3, 20);
}

#[test]
fn join_timeout_is_reported_and_wlan_reset() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    sim.clear_sent();
    sim.script(command::JOIN, ScriptedReply::dropped());
    let r = drive(
        d,
        &sim,
        s.connect(Interface::Client, &home_network(), Duration::from_millis(50)),
    );
    assert_eq!(r, Err(Error::Timeout));
    assert_eq!(sim.sent_commands().last(), Some(&command::INIT));
    assert!(!d.channel(CommandClass::Wlan).is_busy());
}

#[test]
fn concurrent_mode_runs_station_and_ap() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Concurrent, CoexMode::WlanOnly)).unwrap();
    drive(d, &sim, s.connect(Interface::Client, &home_network(), JOIN_WAIT)).unwrap();

    let ap = ApConfiguration {
        ssid: Ssid::try_from("relay").unwrap(),
        security: SecurityType::Wpa2,
        encryption: Encryption::Ccmp,
        credential: HOME,
        channel: 11,
        ..ApConfiguration::default()
    };
    assert_eq!(drive(d, &sim, s.ap_configuration()), Err(Error::InterfaceNotUp));
    drive(d, &sim, s.start_ap(&ap)).unwrap();
    assert!(drive(d, &sim, s.interface_up(Interface::AccessPoint)));

    let config = sim.last_payload(command::AP_CONFIGURATION).unwrap();
    assert_eq!(&config[38..54], b"home-passphrase\0");
    let join = sim.last_payload(command::JOIN).unwrap();
    assert_eq!(join[1], SecurityType::Wpa2.wire());
    assert_eq!(join[110], 1);

    assert_eq!(
        drive(d, &sim, s.disconnect(Interface::AccessPoint)),
        Err(Error::NotSupported)
    );
    drive(d, &sim, s.disconnect(Interface::Client)).unwrap();
    drive(d, &sim, s.stop_ap()).unwrap();
    assert_eq!(drive(d, &sim, s.stop_ap()), Err(Error::InterfaceNotUp));
}

#[test]
fn ap_join_without_ap_sentinel_fails() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::AccessPoint, CoexMode::WlanOnly)).unwrap();
    assert!(!drive(d, &sim, s.interface_up(Interface::Client)));
    sim.script(command::JOIN, ScriptedReply::payload(vec![b'C']));
    let ap = ApConfiguration {
        ssid: Ssid::try_from("open-ap").unwrap(),
        ..ApConfiguration::default()
    };
    assert_eq!(drive(d, &sim, s.start_ap(&ap)), Err(Error::NotAvailable));
    assert_eq!(drive(d, &sim, s.ap_configuration()), Err(Error::InterfaceNotUp));
}

#[test]
fn deinit_ends_the_session_and_allows_reinit() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    drive(d, &sim, s.deinit()).unwrap();
    assert!(!s.is_initialized());
    assert_eq!(drive(d, &sim, s.deinit()), Err(Error::NotInitialized));
    assert_eq!(
        drive(d, &sim, s.rssi(Interface::Client)),
        Err(Error::NotInitialized)
    );
    assert_eq!(
        drive(d, &sim, s.next_event(CommandClass::Wlan, Duration::from_millis(10))).unwrap_err(),
        Error::NotInitialized
    );

    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    assert_eq!(drive(d, &sim, s.rssi(Interface::Client)), Ok(-40));
}

#[test]
fn unsolicited_disconnect_reaches_the_host() {
    let (s, sim) = session();
    let d = s.dispatcher();
    drive(d, &sim, s.init(OperatingMode::Client, CoexMode::WlanOnly)).unwrap();
    sim.inject_event(QUEUE_WLAN_MGMT, command::DISCONNECT, &[0; 8]);
    let event = drive(d, &sim, s.next_event(CommandClass::Wlan, Duration::from_millis(100))).unwrap();
    assert_eq!(event.command(), command::DISCONNECT);
}

#[test]
fn config_survives_both_encodings() {
    let config = DriverConfig {
        scan_timeout_ms: 1234,
        listen_interval: 200,
        ..DriverConfig::default()
    };
    let bytes = config.to_bytes().unwrap();
    assert_eq!(DriverConfig::from_bytes(&bytes).unwrap(), config);

    let json = serde_json::to_string(&config).unwrap();
    let back: DriverConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    assert!(DriverConfig::from_bytes(&bytes[..2]).is_err());
}
