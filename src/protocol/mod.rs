//! PPP wire formats
//!
//! Zero-copy packet views and builders for the PPP frame, the control
//! packet layout shared by LCP and the NCPs, and the PAP/CHAP exchanges.

pub mod chap;
pub mod control;
pub mod ipcp;
pub mod lcp;
pub mod pap;
pub mod ppp;

pub use control::{CiOption, ControlBuilder, ControlPacket, OptionIter};
pub use ppp::{protocol_name, protocols, PppBuilder, PppFrame};
