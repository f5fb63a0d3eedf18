//! Power profile arbitration and power-save command encoding.

pub mod arbiter;
pub mod command;
pub mod profile;

pub use arbiter::{Commit, PowerSaveLink, ProfileState, ProfileUpdate, effective_profile};
pub use command::{PowerSaveDefaults, PowerSaveRequest, build_power_save_command};
pub use profile::{
    BtPerformanceProfile, CoexMode, DtimAlignment, PerformanceProfile, PspType,
    WifiPerformanceProfile,
};
