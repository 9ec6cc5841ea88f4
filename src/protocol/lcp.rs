//! LCP protocol - RFC 1661
//!
//! Link Control Protocol codes, option types and the LCP-only packets
//! (Protocol-Reject, Echo-Request/Reply, Discard-Request). The
//! Configure-*/Terminate-* packets use the generic control packet codec.

use super::control::{ControlBuilder, HEADER_SIZE};
use crate::{Error, Result};

/// LCP packet codes
pub mod codes {
    pub use crate::protocol::control::codes::*;

    /// Protocol-Reject
    pub const PROTOCOL_REJECT: u8 = 8;
    /// Echo-Request
    pub const ECHO_REQUEST: u8 = 9;
    /// Echo-Reply
    pub const ECHO_REPLY: u8 = 10;
    /// Discard-Request
    pub const DISCARD_REQUEST: u8 = 11;
}

/// LCP option types
pub mod options {
    /// Maximum-Receive-Unit
    pub const MRU: u8 = 1;
    /// Async-Control-Character-Map
    pub const ASYNCMAP: u8 = 2;
    /// Authentication-Protocol
    pub const AUTH_PROTOCOL: u8 = 3;
    /// Quality-Protocol
    pub const QUALITY_PROTOCOL: u8 = 4;
    /// Magic-Number
    pub const MAGIC_NUMBER: u8 = 5;
    /// Protocol-Field-Compression
    pub const PFC: u8 = 7;
    /// Address-and-Control-Field-Compression
    pub const ACFC: u8 = 8;
}

/// Authentication protocol values for LCP option 3
pub mod auth {
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xc023;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xc223;
    /// CHAP algorithm: MD5
    pub const CHAP_MD5: u8 = 5;
}

/// Smallest MRU we will let the peer negotiate
pub const MIN_MRU: u16 = 128;

/// Largest MRU we offer to accept by default
pub const MAX_MRU: u16 = 16384;

/// Default async control character map (escape everything below 0x20)
pub const DEFAULT_ASYNCMAP: u32 = 0xffff_ffff;

/// Magic number carried in the first four octets of Echo and Discard data
pub fn echo_magic(data: &[u8]) -> Option<u32> {
    if data.len() >= 4 {
        Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    } else {
        None
    }
}

/// Build an Echo-Request carrying our magic number
pub fn echo_request(identifier: u8, magic: u32) -> Vec<u8> {
    ControlBuilder::new(codes::ECHO_REQUEST, identifier)
        .raw_data(&magic.to_be_bytes())
        .build()
}

/// Build the Echo-Reply for a received Echo-Request
///
/// The request data is returned unchanged except for the leading magic
/// number, which is replaced with ours.
pub fn echo_reply(identifier: u8, magic: u32, request_data: &[u8]) -> Vec<u8> {
    let mut data = request_data.to_vec();
    if data.len() < 4 {
        data.resize(4, 0);
    }
    data[..4].copy_from_slice(&magic.to_be_bytes());
    ControlBuilder::new(codes::ECHO_REPLY, identifier)
        .raw_data(&data)
        .build()
}

/// Build a Protocol-Reject for a frame we cannot handle
///
/// The rejected information is truncated so the whole packet fits in
/// `mru` octets.
pub fn protocol_reject(identifier: u8, protocol: u16, payload: &[u8], mru: u16) -> Vec<u8> {
    let room = (mru as usize).saturating_sub(HEADER_SIZE + 2);
    let take = payload.len().min(room);

    let mut data = Vec::with_capacity(2 + take);
    data.extend_from_slice(&protocol.to_be_bytes());
    data.extend_from_slice(&payload[..take]);

    ControlBuilder::new(codes::PROTOCOL_REJECT, identifier)
        .raw_data(&data)
        .build()
}

/// Rejected protocol number from the data of a Protocol-Reject
pub fn rejected_protocol(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(Error::InvalidPacket("Protocol-Reject too short".into()));
    }
    Ok(u16::from_be_bytes([data[0], data[1]]))
}
