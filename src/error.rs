//! Error taxonomies used by the core.
//!
//! Two separate kinds of failure exist here and must not be confused:
//! [`Nak`] is a wire-level response the dispatcher sends back to the reader
//! (it is data, not a Rust error); [`CoreError`] is a host-integration
//! mistake detected at construction time (wrong buffer size, unsupported
//! variant) and is returned through ordinary `Result`.

use core::fmt;

/// 4-bit NAK codes returned by the command dispatcher.
///
/// These values are transmitted on the wire as 4-bit frames; the discriminant
/// is the value actually placed in the response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Nak {
    /// Out-of-range page address, malformed `HALT`, or similar argument error.
    InvalidArg = 0x00,
    /// `CRC_A` mismatch while in the `Active` state.
    CrcError = 0x01,
    /// Access predicate denied the operation, or a password mismatch.
    NotAuthed = 0x04,
    /// Reserved; not currently emitted by this core.
    EepromError = 0x05,
}

impl Nak {
    /// Returns the 4-bit wire value of this NAK code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Nak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArg => "INVALID_ARG",
            Self::CrcError => "CRC_ERROR",
            Self::NotAuthed => "NOT_AUTHED",
            Self::EepromError => "EEPROM_ERROR",
        };
        f.write_str(name)
    }
}

/// Host-integration errors raised by fallible constructors.
///
/// These never reach the reader; they indicate that the embedding firmware
/// (or test) misused the API, e.g. by passing too small a backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// The backing buffer passed to [`crate::memory::Memory::new`] is smaller
    /// than `variant.page_count() * PAGE_SIZE` bytes.
    BufferTooSmall {
        /// Number of bytes required for the selected variant.
        required: usize,
        /// Number of bytes actually supplied.
        actual: usize,
    },
    /// The requested variant's Cargo feature was not compiled in.
    VariantNotCompiled,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { required, actual } => write!(
                f,
                "card image buffer too small: need {required} bytes, got {actual}"
            ),
            Self::VariantNotCompiled => {
                f.write_str("requested variant's Cargo feature is not enabled")
            }
        }
    }
}
