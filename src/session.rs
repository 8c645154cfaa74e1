//! The per-reader-session finite state machine (§4.1).
//!
//! [`Session`] is an explicit value owned by the host, not a global
//! (§9, "Explicit session state"): a host driving several emulated tags, or
//! resetting one between test cases, just constructs another `Session`
//! instead of reaching for a lazily-initialized singleton.

use crate::auth::AuthState;
use crate::codec::RadioCodec;
use crate::compat::CompatLatch;
use crate::dispatcher::{self, Response};
use crate::memory::Memory;
use crate::variant::Variant;

/// Where the session currently sits in the REQA/WUPA → anticollision →
/// `Active` lifecycle (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Unresponsive to REQA; only WUPA wakes the tag from here.
    Halt,
    /// Powered up, waiting for REQA/WUPA.
    Idle,
    /// CL1 anticollision/select completed; awaiting CL2.
    Ready1,
    /// CL2 anticollision/select completed; awaiting... nothing further, this
    /// collapses directly into `Active` once CL2 `SELECT` succeeds, but is
    /// kept as a named state to mirror the reader-visible cascade stages.
    Ready2,
    /// Fully selected; command frames are dispatched.
    Active,
}

/// What the caller should do with the bytes (if any) a [`Session::poll`] call
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// Place `frame` (already including any trailer the codec added) on the
    /// wire.
    Reply(&'a [u8]),
    /// Emit nothing; the frame was ignored (e.g. REQA while not `Idle`).
    Silent,
}

/// One emulated tag's live protocol state: its variant, its card image, its
/// authentication snapshot, its `COMPAT_WRITE` latch, and its FSM state.
#[derive(Debug, Clone)]
pub struct Session {
    variant: Variant,
    memory: Memory,
    auth: AuthState,
    latch: CompatLatch,
    state: SessionState,
    /// Latched at the `Idle`/`Halt` → `Ready1` transition: whether this wake
    /// came from `Halt`. A later interruption (WUPA, or dropping out of
    /// `Ready1`/`Ready2`/`Active`) falls back to `Halt` rather than `Idle`
    /// when this is set (§4.1, `FromHalt`).
    from_halt: bool,
}

impl Session {
    /// Builds a fresh session over `memory`, starting in `Idle` with
    /// authentication state loaded from the image's configuration area.
    #[must_use]
    pub fn new(variant: Variant, memory: Memory) -> Self {
        let auth = dispatcher::load_auth_state(variant, &memory);
        Self {
            variant,
            memory,
            auth,
            latch: CompatLatch::Idle,
            state: SessionState::Idle,
            from_halt: false,
        }
    }

    /// The session's current FSM state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Shared access to the underlying card image, e.g. for host-side
    /// inspection or for the [`crate::ultramanz`] mutator between sessions.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable access to the underlying card image.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Forces the session back to `Halt`, as a reader's field being switched
    /// off would. `from_halt` wake-up rules then apply to the next REQA/WUPA.
    pub fn go_halt(&mut self) {
        crate::log_trace!("session -> Halt");
        self.state = SessionState::Halt;
        self.auth.reset();
        self.latch.disarm();
        self.from_halt = false;
    }

    /// Resets to `Idle`, as powering the field back on does.
    pub fn go_idle(&mut self) {
        crate::log_trace!("session -> Idle");
        self.state = SessionState::Idle;
        self.auth.reset();
        self.latch.disarm();
        self.from_halt = false;
    }

    /// Feeds one received frame (bit count plus bytes, matching
    /// [`RadioCodec`]'s conventions) through the FSM, dispatching to the
    /// command layer while `Active`.
    ///
    /// `buf` holds the inbound frame on entry and is reused as the reply
    /// buffer; `bit_count` is updated in place to the reply's length.
    pub fn poll<'a, C: RadioCodec>(
        &mut self,
        codec: &C,
        buf: &'a mut [u8],
        bit_count: &mut usize,
    ) -> Outcome<'a> {
        let wupa_only = self.state != SessionState::Idle;
        // REQA/WUPA short frames are recognized from every state (§4.1): a
        // WUPA mid-anticollision resets the cascade, and REQA is only
        // offered while Idle by virtue of `wupa_only`.
        if codec.wake_up(buf, bit_count, crate::codec::ATQA, wupa_only) {
            if self.state == SessionState::Idle || self.state == SessionState::Halt {
                let from_halt = self.state == SessionState::Halt;
                self.go_idle();
                self.from_halt = from_halt;
                self.state = SessionState::Ready1;
                crate::log_trace!("session -> Ready1 (from_halt={from_halt})");
                return Outcome::Reply(buf);
            }
            // A WUPA mid-session (Ready1/Ready2/Active) collapses the
            // session back to whichever quiescent state it woke from,
            // discarding Authenticated/CompatArmed (§4.1, §5 Cancellation).
            if self.from_halt {
                self.go_halt();
            } else {
                self.go_idle();
            }
            return Outcome::Silent;
        }

        match self.state {
            SessionState::Halt | SessionState::Idle => Outcome::Silent,
            SessionState::Ready1 => {
                let uid_block = dispatcher::cl1_select_block(&self.memory);
                if codec.select(buf, bit_count, uid_block, crate::codec::SAK_CL1_INCOMPLETE) {
                    crate::log_trace!("session Ready1 -> Ready2");
                    self.state = SessionState::Ready2;
                    Outcome::Reply(buf)
                } else if buf.first() == Some(&crate::codec::SELECT_CL1) {
                    // Right command, UID mismatch: stays in Ready1 for
                    // another anticollision attempt, as the reader retries.
                    Outcome::Silent
                } else {
                    // Any other command drops straight to Idle, regardless
                    // of FromHalt (§4.1, "Ready1 | other | Idle | none").
                    self.go_idle();
                    Outcome::Silent
                }
            }
            SessionState::Ready2 => {
                let uid_block = dispatcher::cl2_select_block(&self.memory);
                if codec.select(
                    buf,
                    bit_count,
                    uid_block,
                    crate::codec::SAK_CL2_COMPLETE_NOT_COMPLIANT,
                ) {
                    crate::log_trace!("session Ready2 -> Active");
                    self.state = SessionState::Active;
                    Outcome::Reply(buf)
                } else if buf.first() == Some(&crate::codec::SELECT_CL2) {
                    Outcome::Silent
                } else {
                    self.go_idle();
                    Outcome::Silent
                }
            }
            SessionState::Active => self.poll_active(codec, buf, bit_count),
        }
    }

    fn poll_active<'a, C: RadioCodec>(
        &mut self,
        codec: &C,
        buf: &'a mut [u8],
        bit_count: &mut usize,
    ) -> Outcome<'a> {
        let byte_len = bit_count.div_ceil(8);
        // A frame shorter than an opcode byte plus CRC_A can't be a real
        // command; the tag drops silently to Idle (§4.1).
        if byte_len < 3 {
            self.go_idle();
            return Outcome::Silent;
        }
        if !codec.check_crc(buf, byte_len) {
            // Unlike a short frame, a bad CRC on an otherwise-shaped frame
            // keeps the session Active and is NAKed (§4.1, §7).
            buf[0] = crate::error::Nak::CrcError.code();
            *bit_count = 4;
            return Outcome::Reply(&buf[..1]);
        }
        let data_len = byte_len - 2;

        // The dispatcher's `Data` replies borrow from an independent scratch
        // buffer, never from `buf` itself, so that borrow can end before we
        // copy the reply back into `buf` below.
        let mut scratch = [0u8; Variant::Ntag216.image_size()];
        let response = dispatcher::dispatch(
            self.variant,
            &mut self.memory,
            &mut self.auth,
            &mut self.latch,
            &buf[..data_len],
            &mut scratch,
        );

        match response {
            Response::Data(data) => {
                let len = data.len();
                buf[..len].copy_from_slice(data);
                codec.append_crc(buf, len);
                *bit_count = (len + 2) * 8;
                Outcome::Reply(&buf[..len + 2])
            }
            Response::Ack => {
                buf[0] = 0x0A;
                *bit_count = 4;
                Outcome::Reply(&buf[..1])
            }
            Response::Nak(nak) => {
                buf[0] = nak.code();
                *bit_count = 4;
                Outcome::Reply(&buf[..1])
            }
            Response::GoHalt => {
                self.go_halt();
                Outcome::Silent
            }
            Response::GoIdle => {
                self.go_idle();
                Outcome::Silent
            }
        }
    }
}
