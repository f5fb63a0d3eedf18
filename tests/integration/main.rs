//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises one layer of the engine against the
//! in-process NWP simulator. Everything runs on the host.

mod dispatch_tests;
mod harness;
mod power_tests;
mod session_tests;
