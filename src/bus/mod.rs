//! Byte-level link to the NWP.
//!
//! - [`frame`]: descriptor codec and the streaming [`FrameDecoder`]
//! - [`transport`]: the [`Transport`] trait a platform bus implements
//! - [`pump`]: moves frames between the dispatcher and a transport

pub mod frame;
pub mod pump;
pub mod transport;

pub use frame::{FrameDecoder, FrameFlags, FrameHeader};
pub use pump::{Activity, BusPump};
pub use transport::{NullTransport, Transport};
