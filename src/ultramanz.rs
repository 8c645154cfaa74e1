//! Host-initiated mutation of the card image for the "UltramanZ" collectible
//! card variant (§4.4).
//!
//! This is not a reader-facing command: it is invoked directly by the host
//! whenever the card's physical button is pressed, between reader sessions.

use crate::memory::Memory;
use crate::uid::{read_uid, write_uid};
use crate::variant::{PACK_OFFSET, PAGE_SIZE, Variant};

/// Page holding the 4-byte "medal" record: `[type, index, type2, checksum]`.
pub const MEDAL_PAGE: u8 = 0x1F;
/// Page overwritten with the magic marker bytes on flavor reinitialization.
pub const MAGIC_PAGE: u8 = 29;

const MAGIC_BYTES: [u8; PAGE_SIZE] = [0xBA, 0xBD, 0x10, 0x20];
const MAGIC_PACK: [u8; 4] = [0xBE, 0xEF, 0x00, 0x00];

/// Which host control was activated, identified by the on-the-wire type tag
/// used in the medal record (grounded in the original firmware's
/// `Ultraman-Z.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UltramanZFlavor {
    /// "Accessory, positive" button.
    AccPos = 0x01,
    /// "Accessory, negative" button.
    AccNeg = 0x02,
    /// "Character, positive" button.
    CharPos = 0x04,
    /// "Character, negative" button.
    CharNeg = 0x05,
}

impl UltramanZFlavor {
    const fn max_index(self) -> u8 {
        match self {
            Self::AccPos | Self::AccNeg => 20,
            Self::CharPos | Self::CharNeg => 128,
        }
    }

    const fn is_accessory(self) -> bool {
        matches!(self, Self::AccPos | Self::AccNeg)
    }
}

/// The medal record stored at page [`MEDAL_PAGE`]: `[type, index, type2,
/// checksum]`, in that explicit byte order (§9, "Bitfield layout for the
/// UltramanZ medal").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MedalRecord {
    kind: u8,
    index: u8,
    kind2: u8,
    checksum: u8,
}

impl MedalRecord {
    fn read(mem: &Memory) -> Self {
        let raw = mem.read_page(MEDAL_PAGE);
        Self {
            kind: raw[0],
            index: raw[1],
            kind2: raw[2],
            checksum: raw[3],
        }
    }

    fn write(&self, mem: &mut Memory) {
        mem.write_page(
            MEDAL_PAGE,
            &[self.kind, self.index, self.kind2, self.checksum],
        );
    }
}

/// Owns the mutator's persistent index counter, which — grounded in the
/// original firmware — lives outside the card image and therefore does not
/// reset when the medal record is reinitialized for a new flavor (§9,
/// "persistent index").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UltramanZMutator {
    index: u8,
}

impl Default for UltramanZMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl UltramanZMutator {
    /// Creates a mutator with its index counter at its initial value, `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { index: 1 }
    }

    /// The mutator's current index counter, prior to the next invocation's
    /// increment.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Applies one button-press mutation of `flavor` to `mem` (§4.4).
    ///
    /// `mem` should be a [`Variant::Ultramanz`]-geometry image (the medal
    /// page, magic page, and config area addresses used here are the
    /// NTAG213 layout); calling this against a different variant's image is
    /// not meaningful, but the function performs no variant check itself,
    /// matching the original firmware, which never validated `Ntag_Type`
    /// before running this routine.
    pub fn apply(&mut self, mem: &mut Memory, flavor: UltramanZFlavor) {
        let mut record = MedalRecord::read(mem);
        let max_index = flavor.max_index();

        if record.kind != flavor as u8 {
            crate::log_debug!(
                "ultramanz reinitializing medal: {:#04x} -> {:#04x}",
                record.kind,
                flavor as u8
            );
            record.kind = flavor as u8;
            record.kind2 = u8::from(flavor.is_accessory());
            mem.write_page(MAGIC_PAGE, &MAGIC_BYTES);
            mem.write(&MAGIC_PACK, Variant::Ultramanz.config_start_addr() + PACK_OFFSET);
        }

        record.index = self.index;
        self.index = if self.index >= max_index {
            1
        } else {
            self.index + 1
        };

        record.checksum = record
            .kind
            .wrapping_add(record.index)
            .wrapping_add(record.kind2);
        record.write(mem);

        let mut uid = read_uid(mem);
        uid[4] = record.kind;
        uid[5] = record.index;
        uid[6] = record.kind2;
        write_uid(mem, &uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_invocation_reinitializes_and_writes_magic_bytes() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        let mut mutator = UltramanZMutator::new();

        mutator.apply(&mut mem, UltramanZFlavor::AccPos);

        assert_eq!(mem.read_page(MEDAL_PAGE), [0x01, 0x01, 0x01, 0x03]);
        assert_eq!(mem.read_page(MAGIC_PAGE), MAGIC_BYTES);
        let mut pack = [0u8; 4];
        mem.read(
            &mut pack,
            Variant::Ultramanz.config_start_addr() + PACK_OFFSET,
        );
        assert_eq!(pack, MAGIC_PACK);
        assert_eq!(mutator.index(), 2);
    }

    #[test]
    fn uid_tail_mirrors_medal_record() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        write_uid(
            &mut mem,
            &[0x04, 0xA1, 0xB2, 0x00, 0x00, 0x00, 0x00],
        );
        let mut mutator = UltramanZMutator::new();

        mutator.apply(&mut mem, UltramanZFlavor::AccPos);

        let uid = read_uid(&mem);
        assert_eq!(&uid[4..7], &[0x01, 0x01, 0x01]);
        assert_eq!(mem.read_page(2)[0], crate::uid::bcc2(&uid));
    }

    #[test]
    fn second_consecutive_call_does_not_reinitialize_but_advances_index() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        let mut mutator = UltramanZMutator::new();
        mutator.apply(&mut mem, UltramanZFlavor::AccPos);

        // Tamper with the magic page to prove it is not rewritten the second time.
        mem.write_page(MAGIC_PAGE, &[0, 0, 0, 0]);

        mutator.apply(&mut mem, UltramanZFlavor::AccPos);

        assert_eq!(mem.read_page(MEDAL_PAGE), [0x01, 0x02, 0x01, 0x04]);
        assert_eq!(mem.read_page(MAGIC_PAGE), [0, 0, 0, 0]);
        assert_eq!(mutator.index(), 3);
    }

    #[test]
    fn switching_flavor_reinitializes_but_counter_keeps_advancing() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        let mut mutator = UltramanZMutator::new();
        mutator.apply(&mut mem, UltramanZFlavor::AccPos);
        mutator.apply(&mut mem, UltramanZFlavor::AccPos);
        assert_eq!(mutator.index(), 3);

        mutator.apply(&mut mem, UltramanZFlavor::AccNeg);

        let record = mem.read_page(MEDAL_PAGE);
        assert_eq!(record[0], UltramanZFlavor::AccNeg as u8);
        assert_eq!(record[2], 1); // AccNeg is still an accessory flavor.
        assert_eq!(record[1], 3); // index was not reset by reinitialization.
        assert_eq!(mutator.index(), 4);
    }

    #[test]
    fn index_wraps_after_max_for_flavor() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        let mut mutator = UltramanZMutator { index: 20 };
        mutator.apply(&mut mem, UltramanZFlavor::AccPos);
        assert_eq!(mem.read_page(MEDAL_PAGE)[1], 20);
        assert_eq!(mutator.index(), 1);
    }
}
