//! Reactive command/response core for an NXP NTAG21x-family contactless tag
//! emulator: given inbound frames from a radio front-end, produces the
//! replies a genuine NTAG213/215/216 (or the "UltramanZ" collectible-card
//! derivative) would send.
//!
//! The crate does not talk to any radio hardware itself; bit-level
//! modulation and REQA/WUPA/SELECT framing are delegated to the
//! [`codec::RadioCodec`] trait so this core stays host-testable. [`Session`]
//! owns one reader session's state explicitly — there is no global mutable
//! state anywhere in this crate.
//!
//! Enable the `log` feature to get `trace!`/`debug!` diagnostics from the
//! dispatcher; disable the `ntag215`/`ntag216`/`ultramanz` features to drop
//! variants you don't need from the build.

#![cfg_attr(not(test), no_std)]

pub mod auth;
pub mod codec;
pub mod compat;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod session;
pub mod uid;
pub mod ultramanz;
pub mod variant;

pub use auth::AuthState;
pub use codec::{Crc16A, IsoCodec, RadioCodec};
pub use compat::CompatLatch;
pub use error::{CoreError, Nak};
pub use memory::Memory;
pub use session::{Outcome, Session, SessionState};
pub use ultramanz::{UltramanZFlavor, UltramanZMutator};
pub use variant::Variant;

#[cfg(feature = "log")]
pub(crate) use log::{debug as log_debug, trace as log_trace};

#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
pub(crate) use log_debug;
#[cfg(not(feature = "log"))]
pub(crate) use log_trace;
