//! Authentication
//!
//! PAP and CHAP authenticators for both directions, the secrets they check
//! against, the guard that slows down and finally stops password guessing,
//! and the address authorization the IP layer consults once the peer is
//! known.

mod authorize;
pub mod chap;
mod guard;
pub mod pap;
mod secrets;

pub use authorize::Authorization;
pub use chap::Chap;
pub use guard::{LoginGuard, Verdict};
pub use pap::Pap;
pub use secrets::{Secret, Secrets, WILDCARD};

use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Authentications still outstanding in the Authenticate phase
    #[derive(Default)]
    pub struct PendingAuth: u8 {
        /// We are authenticating ourselves with PAP
        const PAP_WITHPEER = 0x01;
        /// The peer is authenticating itself with PAP
        const PAP_PEER = 0x02;
        /// We are authenticating ourselves with CHAP
        const CHAP_WITHPEER = 0x04;
        /// The peer is authenticating itself with CHAP
        const CHAP_PEER = 0x08;
    }
}

/// Authentication policy and authenticator timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Ask the peer to authenticate with PAP
    pub require_pap: bool,
    /// Ask the peer to authenticate with CHAP
    pub require_chap: bool,
    /// Don't authenticate ourselves with PAP
    pub refuse_pap: bool,
    /// Don't authenticate ourselves with CHAP
    pub refuse_chap: bool,
    /// Accept a peer that won't authenticate if the empty PAP identity is valid
    pub null_login: bool,
    pub pap_timeout: Duration,
    pub pap_max_transmits: u32,
    /// How long we wait for the peer's Authenticate-Request
    pub pap_request_timeout: Duration,
    pub chap_restart: Duration,
    pub chap_max_transmits: u32,
    /// Rechallenge interval; zero disables
    pub chap_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_pap: false,
            require_chap: false,
            refuse_pap: false,
            refuse_chap: false,
            null_login: false,
            pap_timeout: Duration::from_secs(3),
            pap_max_transmits: 10,
            pap_request_timeout: Duration::from_secs(30),
            chap_restart: Duration::from_secs(3),
            chap_max_transmits: 10,
            chap_interval: Duration::ZERO,
        }
    }
}

impl AuthConfig {
    /// Whether the peer must authenticate itself
    pub fn auth_required(&self) -> bool {
        self.require_pap || self.require_chap
    }
}

/// Identity and secrets an authenticator works with
pub struct AuthContext<'a> {
    /// Our name: the server in secret lookups, the name in our challenges
    pub our_name: &'a str,
    /// Name we authenticate ourselves with
    pub user: &'a str,
    /// Configured password; when set it wins over the secrets store
    pub password: &'a str,
    pub secrets: &'a Secrets,
    pub guard: &'a mut LoginGuard,
}

impl AuthContext<'_> {
    /// Check a PAP login; the permitted addresses when it is valid
    pub fn check_passwd(&self, user: &str, password: &str) -> Option<Vec<String>> {
        let entry = self.secrets.lookup(user, self.our_name)?;
        if entry.secret == password {
            Some(entry.addresses.clone())
        } else {
            None
        }
    }

    /// Secret the peer `client` must prove it knows
    pub fn peer_secret(&self, client: &str) -> Option<&Secret> {
        self.secrets.lookup(client, self.our_name)
    }

    /// Secret for authenticating ourselves to `server`
    pub fn our_secret(&self, server: &str) -> Option<String> {
        if !self.password.is_empty() {
            return Some(self.password.to_string());
        }
        self.secrets
            .lookup(self.user, server)
            .map(|entry| entry.secret.clone())
    }
}
