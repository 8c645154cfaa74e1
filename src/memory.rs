//! Byte-addressable read/write view over a page-aligned card image.
//!
//! This is the only shared mutable resource in the system (§5 of the
//! specification): the dispatcher, the UltramanZ mutator, and the host's
//! configuration loader all go through it.

use crate::error::CoreError;
use crate::variant::Variant;

/// A page-aligned card image plus the read-only mask that guards writes.
///
/// The backing storage is an owned, fixed-capacity buffer sized to the
/// largest supported variant (`NTAG216`, 231 pages); smaller variants simply
/// use a prefix of it. This avoids any heap allocation, keeping the core
/// usable on a target with no global allocator.
#[derive(Debug, Clone)]
pub struct Memory {
    image: [u8; Variant::Ntag216.image_size()],
    len: usize,
    read_only: bool,
}

impl Memory {
    /// Creates a new view over `variant.image_size()` bytes of storage, all
    /// zeroed, in read-write mode.
    ///
    /// # Errors
    /// Returns [`CoreError::BufferTooSmall`] only in the (practically
    /// unreachable) case that a future variant's image is larger than the
    /// internal backing array; kept as a `Result` so callers that later
    /// plumb in a caller-supplied buffer size have a stable signature to
    /// migrate to.
    pub const fn new(variant: Variant) -> Result<Self, CoreError> {
        let len = variant.image_size();
        if len > Variant::Ntag216.image_size() {
            return Err(CoreError::BufferTooSmall {
                required: len,
                actual: Variant::Ntag216.image_size(),
            });
        }
        Ok(Self {
            image: [0; Variant::Ntag216.image_size()],
            len,
            read_only: false,
        })
    }

    /// Loads a card image from an existing byte slice (e.g. a persisted
    /// dump), copying it into the internal buffer.
    ///
    /// # Errors
    /// Returns [`CoreError::BufferTooSmall`] if `bytes` is shorter than
    /// `variant.image_size()`.
    pub fn from_bytes(variant: Variant, bytes: &[u8]) -> Result<Self, CoreError> {
        let len = variant.image_size();
        if bytes.len() < len {
            return Err(CoreError::BufferTooSmall {
                required: len,
                actual: bytes.len(),
            });
        }
        let mut mem = Self::new(variant)?;
        mem.image[..len].copy_from_slice(&bytes[..len]);
        Ok(mem)
    }

    /// Number of addressable bytes in this image.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the image has zero addressable bytes. Never true for a
    /// [`Memory`] built from a real [`Variant`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether writes are currently suppressed.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Enables or disables write suppression.
    ///
    /// Used to present the card to a hostile or untrusted reader while the
    /// host still wants to simulate the write path without mutating storage.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Reads `dst.len()` bytes starting at `byte_offset`. Always permitted.
    ///
    /// # Panics
    /// Panics if the read would run past the end of the image; the
    /// dispatcher is responsible for bounds-checking page addresses against
    /// `PageCount`/`FirstAuthenticatedPage` before calling this.
    pub fn read(&self, dst: &mut [u8], byte_offset: usize) {
        let end = byte_offset + dst.len();
        assert!(end <= self.len, "card_read out of bounds");
        dst.copy_from_slice(&self.image[byte_offset..end]);
    }

    /// Writes `src` to `byte_offset`. A no-op if the image is read-only.
    ///
    /// # Panics
    /// Panics if the write would run past the end of the image.
    pub fn write(&mut self, src: &[u8], byte_offset: usize) {
        if self.read_only {
            return;
        }
        let end = byte_offset + src.len();
        assert!(end <= self.len, "card_write out of bounds");
        self.image[byte_offset..end].copy_from_slice(src);
    }

    /// Reads a single page (4 bytes) at `page_addr`.
    ///
    /// # Panics
    /// Panics if `page_addr` is out of range for this image.
    #[must_use]
    pub fn read_page(&self, page_addr: u8) -> [u8; crate::variant::PAGE_SIZE] {
        let mut buf = [0u8; crate::variant::PAGE_SIZE];
        self.read(&mut buf, usize::from(page_addr) * crate::variant::PAGE_SIZE);
        buf
    }

    /// Writes a single page (4 bytes) at `page_addr`. A no-op if the image is
    /// read-only.
    ///
    /// # Panics
    /// Panics if `page_addr` is out of range for this image.
    pub fn write_page(&mut self, page_addr: u8, data: &[u8; crate::variant::PAGE_SIZE]) {
        self.write(data, usize::from(page_addr) * crate::variant::PAGE_SIZE);
    }
}
