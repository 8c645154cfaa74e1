//! Reads, composes, and checksums the 7-byte double-size UID used by the
//! NTAG21x family.

use crate::memory::Memory;

/// Cascade tag byte prefixed to the CL1 anticollision block for double-size
/// (7-byte) UIDs, per ISO/IEC 14443-3A.
pub const CASCADE_TAG: u8 = 0x88;

const UID_CL1_ADDRESS: usize = 0x00;
const UID_CL1_SIZE: usize = 3;
const UID_BCC1_ADDRESS: usize = 0x03;
const UID_CL2_ADDRESS: usize = 0x04;
const UID_CL2_SIZE: usize = 4;
const UID_BCC2_ADDRESS: usize = 0x08;

/// The 7 bytes of a double-size UID, in wire order (`uid[0..3]` is the CL1
/// part, `uid[3..7]` is the CL2 part).
pub type Uid = [u8; 7];

/// Reads the 7-byte UID out of the card image. Does not read the BCC bytes.
#[must_use]
pub fn read_uid(mem: &Memory) -> Uid {
    let mut uid = [0u8; 7];
    mem.read(&mut uid[..UID_CL1_SIZE], UID_CL1_ADDRESS);
    mem.read(&mut uid[UID_CL1_SIZE..], UID_CL2_ADDRESS);
    uid
}

/// Writes `uid` into the card image and recomputes both BCC check bytes.
pub fn write_uid(mem: &mut Memory, uid: &Uid) {
    let bcc1 = bcc1(uid);
    let bcc2 = bcc2(uid);
    mem.write(&uid[..UID_CL1_SIZE], UID_CL1_ADDRESS);
    mem.write(&[bcc1], UID_BCC1_ADDRESS);
    mem.write(&uid[UID_CL1_SIZE..], UID_CL2_ADDRESS);
    mem.write(&[bcc2], UID_BCC2_ADDRESS);
}

/// Block Check Character for the CL1 anticollision block: XOR of the cascade
/// tag and the first three UID bytes.
#[must_use]
pub const fn bcc1(uid: &Uid) -> u8 {
    CASCADE_TAG ^ uid[0] ^ uid[1] ^ uid[2]
}

/// Block Check Character for the CL2 anticollision block: XOR of the last
/// four UID bytes.
#[must_use]
pub const fn bcc2(uid: &Uid) -> u8 {
    uid[3] ^ uid[4] ^ uid[5] ^ uid[6]
}

/// The 4-byte CL1 anticollision/select block: `[CASCADE_TAG, uid[0..3]]`.
#[must_use]
pub const fn cl1_block(uid: &Uid) -> [u8; 4] {
    [CASCADE_TAG, uid[0], uid[1], uid[2]]
}

/// The 4-byte CL2 anticollision/select block: `uid[3..7]`.
#[must_use]
pub const fn cl2_block(uid: &Uid) -> [u8; 4] {
    [uid[3], uid[4], uid[5], uid[6]]
}
