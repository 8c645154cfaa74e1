//! Session-scoped authentication state: the authenticated flag, the
//! first-protected-page boundary, and the read-protect bit, all snapshotted
//! at session init (§3, "Session state").

use bitflags::bitflags;

bitflags! {
    /// The card's `ACCESS` configuration byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        /// `PROT`: extends authentication to reads below `AUTH0`, not just
        /// writes.
        const PROT = 0b1000_0000;
        /// `CFGLCK`: the configuration pages themselves become read-only.
        const CFGLCK = 0b0100_0000;
        /// `NFC_CNT_EN`: the NFC counter feature is enabled.
        const NFC_CNT_EN = 0b0001_0000;
    }
}

/// Authentication state for one session. Cleared by [`AuthState::reset`],
/// which a fresh [`crate::session::Session`] calls at construction and on
/// every wake-up-induced reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthState {
    authenticated: bool,
    first_authenticated_page: u8,
    read_protected: bool,
}

impl AuthState {
    /// Snapshots `AUTH0` and the `ACCESS.PROT` bit from the card's
    /// configuration area; starts unauthenticated.
    #[must_use]
    pub const fn new(first_authenticated_page: u8, read_protected: bool) -> Self {
        Self {
            authenticated: false,
            first_authenticated_page,
            read_protected,
        }
    }

    /// Clears the authenticated flag, as happens whenever a session
    /// re-initializes (wake from `Idle`/`Halt`).
    pub fn reset(&mut self) {
        self.authenticated = false;
    }

    /// Marks the session authenticated; set only by a matching `PWD_AUTH`.
    pub fn authenticate(&mut self) {
        self.authenticated = true;
    }

    /// Whether a successful `PWD_AUTH` has occurred in this session.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// `AUTH0`: the first page index requiring authentication.
    #[must_use]
    pub const fn first_authenticated_page(&self) -> u8 {
        self.first_authenticated_page
    }

    /// `ACCESS.PROT`: whether reads below `AUTH0` also require
    /// authentication (not just writes).
    #[must_use]
    pub const fn is_read_protected(&self) -> bool {
        self.read_protected
    }

    /// The access predicate from §4.3: `Authenticated OR addr < AUTH0`.
    #[must_use]
    pub const fn auth_ok(&self, addr: u8) -> bool {
        self.authenticated || addr < self.first_authenticated_page
    }
}
