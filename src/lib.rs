//! Host-side driver engine for a Wi-Fi/BT network co-processor (NWP).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  DriverSession (init · scan · connect · AP · power profiles) │
//! │      │ send_command / next_event                             │
//! │  ┌───▼──────────────────────────────────────────────────┐    │
//! │  │ Dispatcher: per-class channels · correlator · pool    │    │
//! │  └───┬──────────────────────────────────────▲───────────┘    │
//! │      │ next_transmit                 deliver│                │
//! │  ┌───▼──────────────────────────────────────┴───────────┐    │
//! │  │ BusPump: frame decoder · Transport (SPI/UART/sim)     │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Request encoders (`wlan`, `power::command`) are pure; the session and
//! dispatcher hold the only shared state.
//!
//! The library needs `alloc` only. The `std` feature adds the host time
//! driver and the in-process [`sim`] NWP.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unused_must_use)]

extern crate alloc;

pub mod buffer;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod power;
pub mod session;
#[cfg(feature = "std")]
pub mod sim;
pub mod sync;
pub mod wlan;

pub use bus::{BusPump, Transport};
pub use config::DriverConfig;
pub use dispatch::{CommandClass, Dispatcher, Reply, Response, WaitPolicy};
pub use error::{Error, Result};
pub use session::DriverSession;
