//! Shared setup: a session, a simulator, and a way to run one operation
//! while the bus pump services the simulator.

use core::future::Future;

use embassy_time::Duration;
use futures_lite::future::{block_on, or};
use nwp_host::bus::BusPump;
use nwp_host::sim::SimulatedNwp;
use nwp_host::wlan::{Credential, CredentialId, EapCredential, MemoryCredentialStore};
use nwp_host::{DriverConfig, DriverSession, Dispatcher};

pub const HOME: CredentialId = CredentialId(1);
pub const CORP: CredentialId = CredentialId(2);

pub type Session = DriverSession<MemoryCredentialStore>;

pub fn fast_config() -> DriverConfig {
    DriverConfig {
        scan_timeout_ms: 300,
        join_timeout_ms: 300,
        power_save_timeout_ms: 300,
        ..DriverConfig::default()
    }
}

pub fn credentials() -> MemoryCredentialStore {
    let mut store = MemoryCredentialStore::new();
    store.set(HOME, Credential::psk("home-passphrase").unwrap());
    store.set(
        CORP,
        Credential::Eap(EapCredential {
            username: heapless::String::try_from("alice").unwrap(),
            password: heapless::String::try_from("s3cret").unwrap(),
            certificate_key: heapless::String::new(),
            flags: 0,
        }),
    );
    store
}

pub fn session() -> (Session, SimulatedNwp) {
    let session = DriverSession::new(fast_config(), credentials()).unwrap();
    (session, SimulatedNwp::new())
}

/// Run `op` to completion with a pump servicing `sim`.
pub fn drive<T>(dispatcher: &Dispatcher, sim: &SimulatedNwp, op: impl Future<Output = T>) -> T {
    let mut pump = BusPump::new(dispatcher, sim.clone(), Duration::from_millis(1));
    block_on(or(async { Some(op.await) }, async {
        pump.run().await;
        None
    }))
    .expect("pump never returns")
}
