//! Which IP addresses an authenticated peer may use

use std::net::Ipv4Addr;
use tracing::warn;

/// Entry that allows nothing
const DENY_ALL: &str = "deny-all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Any,
    Nothing,
    Net { base: u32, mask: u32, permit: bool },
}

impl Rule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        match entry {
            "*" => return Some(Rule::Any),
            "-" | DENY_ALL => return Some(Rule::Nothing),
            _ => {}
        }

        let (permit, net) = match entry.strip_prefix('!') {
            Some(rest) => (false, rest),
            None => (true, entry),
        };
        let (addr, bits) = match net.split_once('/') {
            Some((addr, bits)) => (addr, bits.parse::<u32>().ok().filter(|b| *b <= 32)?),
            None => (net, 32),
        };
        let addr: Ipv4Addr = addr.parse().ok()?;
        let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
        Some(Rule::Net {
            base: u32::from(addr) & mask,
            mask,
            permit,
        })
    }
}

/// Result of peer authentication as far as addressing is concerned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    peer_name: Option<String>,
    addresses: Vec<String>,
}

impl Authorization {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authenticated peer and its permitted addresses
    pub fn grant(&mut self, name: &str, addresses: Vec<String>) {
        self.peer_name = Some(name.to_string());
        self.addresses = addresses;
    }

    /// Forget the authenticated peer
    pub fn revoke(&mut self) {
        self.peer_name = None;
        self.addresses.clear();
    }

    /// Name the peer authenticated with
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// May the peer use `addr`?
    ///
    /// Entries are tried in order and the first match decides; an address
    /// matching nothing is refused. An empty list leaves the peer
    /// unrestricted.
    pub fn ip_allowed(&self, addr: Ipv4Addr) -> bool {
        if addr.is_loopback() || addr.is_multicast() || addr.is_broadcast() || addr.is_unspecified()
        {
            return false;
        }
        if self.addresses.is_empty() {
            return true;
        }

        let addr = u32::from(addr);
        for entry in &self.addresses {
            match Rule::parse(entry) {
                Some(Rule::Any) => return true,
                Some(Rule::Nothing) => return false,
                Some(Rule::Net { base, mask, permit }) if addr & mask == base => return permit,
                Some(Rule::Net { .. }) => {}
                None => warn!("unknown address entry \"{}\" ignored", entry),
            }
        }
        false
    }
}
