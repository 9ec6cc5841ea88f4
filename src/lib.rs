//! pppd - PPP link negotiation
//!
//! The control plane of a PPP daemon: the generic option-negotiation
//! automaton, LCP with echo keepalive, PAP and CHAP-MD5 authentication,
//! a minimal IPCP, and the link session that sequences the phases and
//! demultiplexes frames between them.
//!
//! Protocol code is transport-agnostic. A [`link::Link`] is fed frames and
//! timer expirations and returns [`event::Action`]s for the embedding
//! program to carry out.

pub mod auth;
pub mod ci;
pub mod config;
pub mod error;
pub mod event;
pub mod fsm;
pub mod ipcp;
pub mod lcp;
pub mod link;
pub mod protocol;
pub mod telemetry;
pub mod timer;

pub use error::{Error, ExitStatus, Result};
