//! Link phases - RFC 1661 section 3.2

use crate::protocol::ppp::protocols;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing running
    Dead,
    /// Bringing the lower layer up
    Initialize,
    /// LCP negotiating
    Establish,
    /// Waiting for authentication in either direction
    Authenticate,
    /// Network control protocols running
    Network,
    /// LCP closing the link
    Terminate,
    /// Waiting to reopen a persistent link
    Holdoff,
}

impl Phase {
    /// Whether frames for `protocol` are accepted in this phase
    ///
    /// Until authentication is complete only link-level protocols get
    /// through.
    pub fn admits(self, protocol: u16) -> bool {
        match self {
            Phase::Dead | Phase::Initialize | Phase::Establish | Phase::Authenticate => matches!(
                protocol,
                protocols::LCP | protocols::LQR | protocols::PAP | protocols::CHAP
            ),
            _ => true,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Dead => "Dead",
            Phase::Initialize => "Initialize",
            Phase::Establish => "Establish",
            Phase::Authenticate => "Authenticate",
            Phase::Network => "Network",
            Phase::Terminate => "Terminate",
            Phase::Holdoff => "Holdoff",
        };
        write!(f, "{}", name)
    }
}
