//! Command decoding and execution for the `Active` session state (§4.2,
//! §4.3).
//!
//! The dispatcher is deliberately the only place that knows the opcode byte
//! values; everything above it (the session FSM) only knows "hand this frame
//! to the dispatcher and place whatever it returns on the wire."

use crate::auth::{AccessFlags, AuthState};
use crate::compat::CompatLatch;
use crate::error::Nak;
use crate::memory::Memory;
use crate::uid::read_uid;
use crate::variant::{ACCESS_OFFSET, PACK_OFFSET, PAGE_SIZE, PWD_OFFSET, Variant};

const OP_GET_VERSION: u8 = 0x60;
const OP_READ: u8 = 0x30;
const OP_FAST_READ: u8 = 0x3A;
const OP_WRITE: u8 = 0xA2;
const OP_COMPAT_WRITE: u8 = 0xA0;
const OP_PWD_AUTH: u8 = 0x1B;
const OP_READ_CNT: u8 = 0x39;
const OP_READ_SIG: u8 = 0x3C;
const OP_HALT: u8 = 0x50;
const HALT_ARG: u8 = 0x00;

/// Fixed bytes of the `GET_VERSION` reply other than the variant identity
/// byte at index 6: `[00 04 04 02 01 00 <variant> 03]`.
const VERSION_HEAD: [u8; 6] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00];
const VERSION_TAIL: u8 = 0x03;
const READ_SIG_PREFIX: u8 = 0xCA;
const SIGNATURE_LEN: usize = 32;
/// Minimum page address accepted by `WRITE`/`COMPAT_WRITE`: pages 0 and 1
/// hold the UID/BCC and are not writable through these commands.
const MIN_WRITABLE_PAGE: u8 = 2;

/// Every recognized first-opcode-byte value (§4.2). Anything else falls
/// through to the unknown-opcode branch in [`dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    GetVersion,
    Read,
    FastRead,
    Write,
    CompatWrite,
    PwdAuth,
    ReadCnt,
    ReadSig,
    Halt,
}

impl Opcode {
    fn decode(byte: u8) -> Option<Self> {
        Some(match byte {
            OP_GET_VERSION => Self::GetVersion,
            OP_READ => Self::Read,
            OP_FAST_READ => Self::FastRead,
            OP_WRITE => Self::Write,
            OP_COMPAT_WRITE => Self::CompatWrite,
            OP_PWD_AUTH => Self::PwdAuth,
            OP_READ_CNT => Self::ReadCnt,
            OP_READ_SIG => Self::ReadSig,
            OP_HALT => Self::Halt,
            _ => return None,
        })
    }
}

/// Outcome of dispatching one frame while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    /// Bytes to place on the wire, CRC-appended by the caller.
    Data(&'a [u8]),
    /// A 4-bit ACK frame (`0xA`), used only by the second half of
    /// `COMPAT_WRITE`.
    Ack,
    /// A 4-bit NAK frame.
    Nak(Nak),
    /// The tag must transition to `Halt` and emit no reply at all.
    GoHalt,
    /// The tag must transition to `Idle` and emit no reply at all: the
    /// unknown-opcode and `READ_CNT` default branch (§4.2).
    GoIdle,
}

/// Dispatches one decoded command frame against `mem`/`auth`/`latch`.
///
/// `frame` is the command payload with its trailing `CRC_A` already stripped
/// and verified by the caller; `out` is scratch space the dispatcher may
/// write a `Data` response into (callers typically pass the remainder of
/// their own frame buffer).
pub fn dispatch<'a>(
    variant: Variant,
    mem: &mut Memory,
    auth: &mut AuthState,
    latch: &mut CompatLatch,
    frame: &[u8],
    out: &'a mut [u8],
) -> Response<'a> {
    if let Some(page) = latch.armed_page() {
        crate::log_trace!("dispatch COMPAT_WRITE data half for page {page:#04x}");
        latch.disarm();
        let response = compat_write_data_half(mem, page, frame);
        if let Response::Nak(nak) = response {
            crate::log_debug!("dispatch COMPAT_WRITE data half -> NAK({nak})");
        }
        return response;
    }

    let Some(&opcode_byte) = frame.first() else {
        return Response::GoIdle;
    };
    let Some(opcode) = Opcode::decode(opcode_byte) else {
        crate::log_debug!("unrecognized opcode byte {:#04x}", opcode_byte);
        return Response::GoIdle;
    };

    crate::log_trace!("dispatch {opcode:?}");
    let response = match opcode {
        Opcode::GetVersion => get_version(variant, out),
        Opcode::Read => read(variant, mem, auth, frame, out),
        Opcode::FastRead => fast_read(variant, mem, auth, frame, out),
        Opcode::Write => write(variant, mem, auth, frame),
        Opcode::CompatWrite => compat_write_address_half(variant, auth, latch, frame),
        Opcode::PwdAuth => pwd_auth(variant, mem, auth, frame, out),
        // Real silicon returns a 24-bit monotonic counter; this core leaves
        // it unanswered, matching the original firmware's default branch.
        Opcode::ReadCnt => Response::GoIdle,
        Opcode::ReadSig => read_sig(out),
        Opcode::Halt => halt(frame),
    };
    if let Response::Nak(nak) = response {
        crate::log_debug!("dispatch {opcode:?} -> NAK({nak})");
    }
    response
}

fn get_version<'a>(variant: Variant, out: &'a mut [u8]) -> Response<'a> {
    out[..6].copy_from_slice(&VERSION_HEAD);
    out[6] = variant.version_byte();
    out[7] = VERSION_TAIL;
    Response::Data(&out[..8])
}

fn read_sig(out: &mut [u8]) -> Response<'_> {
    out[..SIGNATURE_LEN].fill(READ_SIG_PREFIX);
    Response::Data(&out[..SIGNATURE_LEN])
}

fn halt(frame: &[u8]) -> Response<'static> {
    if frame.get(1) == Some(&HALT_ARG) {
        Response::GoHalt
    } else {
        Response::Nak(Nak::InvalidArg)
    }
}

/// The page-count boundary a read command must respect: the full page count
/// normally, but narrowed to `FirstAuthenticatedPage` when the card is
/// read-protected and the session has not authenticated (§4.2, `READ`).
fn read_limit(variant: Variant, auth: &AuthState) -> usize {
    if auth.is_read_protected() && !auth.is_authenticated() {
        usize::from(auth.first_authenticated_page())
    } else {
        variant.page_count()
    }
}

fn read<'a>(
    variant: Variant,
    mem: &Memory,
    auth: &AuthState,
    frame: &[u8],
    out: &'a mut [u8],
) -> Response<'a> {
    let Some(&start) = frame.get(1) else {
        return Response::Nak(Nak::InvalidArg);
    };
    let limit = read_limit(variant, auth);
    if usize::from(start) >= limit {
        return Response::Nak(Nak::InvalidArg);
    }

    // Sixteen bytes (4 pages), wrapping modulo the read-protect-narrowed
    // limit rather than the full page count.
    for i in 0..4 {
        let page = (usize::from(start) + i) % limit;
        let dst = &mut out[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];
        dst.copy_from_slice(&mem.read_page(u8::try_from(page).unwrap_or(0)));
    }
    Response::Data(&out[..4 * PAGE_SIZE])
}

fn fast_read<'a>(
    variant: Variant,
    mem: &Memory,
    auth: &AuthState,
    frame: &[u8],
    out: &'a mut [u8],
) -> Response<'a> {
    let (Some(&start), Some(&end)) = (frame.get(1), frame.get(2)) else {
        return Response::Nak(Nak::InvalidArg);
    };
    let page_count = variant.page_count();
    if end < start || usize::from(end) >= page_count {
        return Response::Nak(Nak::InvalidArg);
    }
    if auth.is_read_protected() && !(auth.auth_ok(start) && auth.auth_ok(end)) {
        return Response::Nak(Nak::NotAuthed);
    }

    let span = usize::from(end) - usize::from(start) + 1;
    let byte_len = span * PAGE_SIZE;
    for i in 0..span {
        let page = start + u8::try_from(i).unwrap_or(0);
        let dst = &mut out[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];
        dst.copy_from_slice(&mem.read_page(page));
    }
    Response::Data(&out[..byte_len])
}

fn write(variant: Variant, mem: &mut Memory, auth: &AuthState, frame: &[u8]) -> Response<'static> {
    let Some(&page) = frame.get(1) else {
        return Response::Nak(Nak::InvalidArg);
    };
    if frame.len() < 2 + PAGE_SIZE {
        return Response::Nak(Nak::InvalidArg);
    }
    if page < MIN_WRITABLE_PAGE || usize::from(page) >= variant.page_count() {
        return Response::Nak(Nak::InvalidArg);
    }
    if !auth.auth_ok(page) {
        return Response::Nak(Nak::NotAuthed);
    }
    let data: [u8; PAGE_SIZE] = frame[2..2 + PAGE_SIZE].try_into().unwrap_or([0; PAGE_SIZE]);
    mem.write_page(page, &data);
    Response::Ack
}

fn compat_write_address_half(
    variant: Variant,
    auth: &AuthState,
    latch: &mut CompatLatch,
    frame: &[u8],
) -> Response<'static> {
    let Some(&page) = frame.get(1) else {
        return Response::Nak(Nak::InvalidArg);
    };
    if page < MIN_WRITABLE_PAGE || usize::from(page) >= variant.page_count() {
        return Response::Nak(Nak::InvalidArg);
    }
    if !auth.auth_ok(page) {
        return Response::Nak(Nak::NotAuthed);
    }
    latch.arm(page);
    Response::Ack
}

/// Consumes the data half of a `COMPAT_WRITE`: whatever frame arrives next,
/// regardless of its own opcode, is read as `[_, _, d0, d1, d2, d3]` — bytes
/// 2..=5 land at the latched page (§4.2, §8 scenario 4).
fn compat_write_data_half(mem: &mut Memory, page: u8, frame: &[u8]) -> Response<'static> {
    if frame.len() < 6 {
        return Response::Nak(Nak::InvalidArg);
    }
    let data: [u8; PAGE_SIZE] = frame[2..6].try_into().unwrap_or([0; PAGE_SIZE]);
    mem.write_page(page, &data);
    Response::Ack
}

fn pwd_auth<'a>(
    variant: Variant,
    mem: &mut Memory,
    auth: &mut AuthState,
    frame: &[u8],
    out: &'a mut [u8],
) -> Response<'a> {
    if frame.len() < 5 {
        return Response::Nak(Nak::InvalidArg);
    }
    let supplied: [u8; 4] = frame[1..5].try_into().unwrap_or([0; 4]);
    let config_addr = variant.config_start_addr();

    if variant == Variant::Ultramanz {
        // The original firmware's UltramanZ handling never compares the
        // supplied password; it overwrites PWD with it and never sets
        // Authenticated (§9, "UltramanZ PWD_AUTH asymmetry" — documented,
        // not "fixed").
        mem.write(&supplied, config_addr + PWD_OFFSET);
    } else {
        let mut stored_pwd = [0u8; 4];
        mem.read(&mut stored_pwd, config_addr + PWD_OFFSET);
        if supplied != stored_pwd {
            return Response::Nak(Nak::NotAuthed);
        }
        auth.authenticate();
    }

    let mut stored_pack = [0u8; 2];
    mem.read(&mut stored_pack, config_addr + PACK_OFFSET);
    out[0] = stored_pack[0];
    out[1] = stored_pack[1];
    Response::Data(&out[..2])
}

/// Builds a session's [`AuthState`] from the card image's configuration area
/// (§3, "Session state"; §4.3).
#[must_use]
pub fn load_auth_state(variant: Variant, mem: &Memory) -> AuthState {
    let config_addr = variant.config_start_addr();
    let mut auth0 = [0u8; 1];
    mem.read(&mut auth0, config_addr + crate::variant::AUTH0_OFFSET);
    let mut access = [0u8; 1];
    mem.read(&mut access, config_addr + ACCESS_OFFSET);
    let read_protected = AccessFlags::from_bits_truncate(access[0]).contains(AccessFlags::PROT);
    AuthState::new(auth0[0], read_protected)
}

/// The variant-appropriate cascade-level block to offer to
/// [`crate::codec::RadioCodec::select`] for CL1.
#[must_use]
pub fn cl1_select_block(mem: &Memory) -> [u8; 4] {
    crate::uid::cl1_block(&read_uid(mem))
}

/// The variant-appropriate cascade-level block to offer to
/// [`crate::codec::RadioCodec::select`] for CL2.
#[must_use]
pub fn cl2_select_block(mem: &Memory) -> [u8; 4] {
    crate::uid::cl2_block(&read_uid(mem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uid::write_uid;

    fn fresh(variant: Variant) -> (Memory, AuthState, CompatLatch) {
        let mem = Memory::new(variant).expect("construct");
        let auth = AuthState::new(0xFF, false);
        (mem, auth, CompatLatch::Idle)
    }

    #[test]
    fn get_version_reports_variant_byte_at_index_six() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag215);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag215,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_GET_VERSION],
            &mut out,
        );
        assert_eq!(
            resp,
            Response::Data(&[0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x11, 0x03])
        );
    }

    #[test]
    fn read_is_invalid_arg_not_not_authed_when_it_hits_the_narrowed_limit() {
        let mut mem = Memory::new(Variant::Ntag213).expect("construct");
        let mut auth = AuthState::new(0x10, true);
        let mut latch = CompatLatch::Idle;
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_READ, 0x10],
            &mut out,
        );
        assert_eq!(resp, Response::Nak(Nak::InvalidArg));
    }

    #[test]
    fn unauthenticated_read_wraps_at_first_authenticated_page_when_protected() {
        let mut mem = Memory::new(Variant::Ntag213).expect("construct");
        for page in 0u8..4 {
            mem.write_page(page, &[page, page, page, page]);
        }
        let mut auth = AuthState::new(0x10, true);
        let mut latch = CompatLatch::Idle;
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_READ, 0x0E],
            &mut out,
        );
        match resp {
            Response::Data(data) => {
                assert_eq!(data[0], 0x0E);
                assert_eq!(data[4], 0x0F);
                assert_eq!(data[8], 0);
                assert_eq!(data[12], 1);
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn read_ignores_protect_bit_when_not_set() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        auth = AuthState::new(0x10, false);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_READ, 0x10],
            &mut out,
        );
        assert!(matches!(resp, Response::Data(_)));
    }

    #[test]
    fn write_below_page_two_is_invalid_arg() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_WRITE, 0x01, 0, 0, 0, 0],
            &mut out,
        );
        assert_eq!(resp, Response::Nak(Nak::InvalidArg));
    }

    #[test]
    fn write_then_read_round_trips_through_dispatch() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let frame = [OP_WRITE, 0x04, 0xDE, 0xAD, 0xBE, 0xEF];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &frame,
            &mut out,
        );
        assert_eq!(resp, Response::Ack);

        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_READ, 0x04],
            &mut out,
        );
        match resp {
            Response::Data(data) => assert_eq!(&data[..4], &[0xDE, 0xAD, 0xBE, 0xEF]),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn compat_write_requires_two_frames_and_reads_bytes_two_through_five() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_COMPAT_WRITE, 0x04],
            &mut out,
        );
        assert_eq!(resp, Response::Ack);
        assert!(latch.is_armed());

        let data_half = [0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &data_half,
            &mut out,
        );
        assert_eq!(resp, Response::Ack);
        assert!(!latch.is_armed());
        assert_eq!(mem.read_page(0x04), [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn ultramanz_pwd_auth_writes_password_and_never_authenticates() {
        let mut mem = Memory::new(Variant::Ultramanz).expect("construct");
        mem.write(
            &[0x12, 0x34],
            Variant::Ultramanz.config_start_addr() + PACK_OFFSET,
        );
        let mut auth = AuthState::new(0x00, false);
        let mut latch = CompatLatch::Idle;
        let mut out = [0u8; 32];

        let resp = dispatch(
            Variant::Ultramanz,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_PWD_AUTH, 0xAA, 0xBB, 0xCC, 0xDD],
            &mut out,
        );
        assert_eq!(resp, Response::Data(&[0x12, 0x34]));
        assert!(!auth.is_authenticated());
        let mut stored = [0u8; 4];
        mem.read(&mut stored, Variant::Ultramanz.config_start_addr() + PWD_OFFSET);
        assert_eq!(stored, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn non_ultramanz_pwd_auth_rejects_wrong_password() {
        let mut mem = Memory::new(Variant::Ntag213).expect("construct");
        mem.write(
            &[0xAA, 0xBB, 0xCC, 0xDD],
            Variant::Ntag213.config_start_addr() + PWD_OFFSET,
        );
        let mut auth = AuthState::new(0x00, false);
        let mut latch = CompatLatch::Idle;
        let mut out = [0u8; 32];

        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_PWD_AUTH, 0x00, 0x00, 0x00, 0x00],
            &mut out,
        );
        assert_eq!(resp, Response::Nak(Nak::NotAuthed));
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn non_ultramanz_pwd_auth_accepts_correct_password() {
        let mut mem = Memory::new(Variant::Ntag213).expect("construct");
        let config_addr = Variant::Ntag213.config_start_addr();
        mem.write(&[0xAA, 0xBB, 0xCC, 0xDD], config_addr + PWD_OFFSET);
        mem.write(&[0x99, 0x88], config_addr + PACK_OFFSET);
        let mut auth = AuthState::new(0x00, false);
        let mut latch = CompatLatch::Idle;
        let mut out = [0u8; 32];

        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_PWD_AUTH, 0xAA, 0xBB, 0xCC, 0xDD],
            &mut out,
        );
        assert_eq!(resp, Response::Data(&[0x99, 0x88]));
        assert!(auth.is_authenticated());
    }

    #[test]
    fn read_cnt_falls_through_to_go_idle() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_READ_CNT, 0x02],
            &mut out,
        );
        assert_eq!(resp, Response::GoIdle);
    }

    #[test]
    fn halt_with_correct_argument_transitions() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[OP_HALT, 0x00],
            &mut out,
        );
        assert_eq!(resp, Response::GoHalt);
    }

    #[test]
    fn unknown_opcode_falls_through_to_go_idle() {
        let (mut mem, mut auth, mut latch) = fresh(Variant::Ntag213);
        let mut out = [0u8; 32];
        let resp = dispatch(
            Variant::Ntag213,
            &mut mem,
            &mut auth,
            &mut latch,
            &[0xFF],
            &mut out,
        );
        assert_eq!(resp, Response::GoIdle);
    }

    #[test]
    fn select_blocks_reflect_uid() {
        let mut mem = Memory::new(Variant::Ntag213).expect("construct");
        write_uid(&mut mem, &[0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
        assert_eq!(cl1_select_block(&mem), [0x88, 0x04, 0xA1, 0xB2]);
        assert_eq!(cl2_select_block(&mem), [0xC3, 0xD4, 0xE5, 0xF6]);
    }
}
