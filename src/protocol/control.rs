//! Control protocol packets - RFC 1661 section 5
//!
//! LCP, IPCP, CCP and friends all share the same packet layout: a 4-octet
//! header (code, identifier, length) followed by code-specific data. For the
//! Configure-* codes that data is a list of type/length/value options.

use crate::{Error, Result};

/// Control packet header size (code + identifier + length)
pub const HEADER_SIZE: usize = 4;

/// Option header size (type + length)
pub const OPTION_HEADER_SIZE: usize = 2;

/// Codes shared by every protocol built on the negotiation FSM
pub mod codes {
    /// Configure-Request
    pub const CONFIGURE_REQUEST: u8 = 1;
    /// Configure-Ack
    pub const CONFIGURE_ACK: u8 = 2;
    /// Configure-Nak
    pub const CONFIGURE_NAK: u8 = 3;
    /// Configure-Reject
    pub const CONFIGURE_REJECT: u8 = 4;
    /// Terminate-Request
    pub const TERMINATE_REQUEST: u8 = 5;
    /// Terminate-Ack
    pub const TERMINATE_ACK: u8 = 6;
    /// Code-Reject
    pub const CODE_REJECT: u8 = 7;
}

/// Name of a generic code, for log lines
pub fn code_name(code: u8) -> &'static str {
    match code {
        codes::CONFIGURE_REQUEST => "Configure-Request",
        codes::CONFIGURE_ACK => "Configure-Ack",
        codes::CONFIGURE_NAK => "Configure-Nak",
        codes::CONFIGURE_REJECT => "Configure-Reject",
        codes::TERMINATE_REQUEST => "Terminate-Request",
        codes::TERMINATE_ACK => "Terminate-Ack",
        codes::CODE_REJECT => "Code-Reject",
        _ => "extension",
    }
}

/// Parsed control packet (zero-copy reference)
///
/// Octets beyond the length field are padding and are not part of
/// [`data`](Self::data).
#[derive(Debug)]
pub struct ControlPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> ControlPacket<'a> {
    /// Parse control packet from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("control packet too short".into()));
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < HEADER_SIZE {
            return Err(Error::Parse("control packet length too small".into()));
        }
        if buffer.len() < length {
            return Err(Error::Parse("control packet truncated".into()));
        }

        Ok(packet)
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier field (for matching requests and responses)
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Length field (total packet length including header)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Data (options for Configure-*, or payload for everything else)
    pub fn data(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[HEADER_SIZE..len]
    }

    /// The packet without padding
    pub fn as_bytes(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[..len]
    }
}

/// A configuration option during iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiOption<'a> {
    /// Option type
    pub kind: u8,
    /// Option value (excluding type and length octets)
    pub value: &'a [u8],
    /// The whole option including its header
    pub raw: &'a [u8],
}

/// Iterator over configuration options
///
/// Iteration stops at the first malformed option. Whatever could not be
/// parsed is available from [`rest`](Self::rest), so callers can tell a
/// clean end from a corrupt tail.
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> OptionIter<'a> {
    /// Iterate over a raw option list
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Octets not yet consumed
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    /// Look at the next option without consuming it
    pub fn peek(&self) -> Option<CiOption<'a>> {
        self.clone().next()
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = CiOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + OPTION_HEADER_SIZE > self.data.len() {
            return None;
        }

        let kind = self.data[self.offset];
        let len = self.data[self.offset + 1] as usize;

        // Option length includes type and length octets
        if len < OPTION_HEADER_SIZE || self.offset + len > self.data.len() {
            return None;
        }

        let start = self.offset;
        let end = self.offset + len;
        self.offset = end;

        Some(CiOption {
            kind,
            value: &self.data[start + OPTION_HEADER_SIZE..end],
            raw: &self.data[start..end],
        })
    }
}

/// Append one option to an option list
pub fn put_option(buf: &mut Vec<u8>, kind: u8, value: &[u8]) {
    buf.push(kind);
    buf.push((OPTION_HEADER_SIZE + value.len()) as u8);
    buf.extend_from_slice(value);
}

/// Builder for control packets
#[derive(Debug, Default)]
pub struct ControlBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl ControlBuilder {
    /// Create a new control packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Set raw data (option list or code-specific payload)
    pub fn raw_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Build the control packet
    pub fn build(self) -> Vec<u8> {
        let length = (HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}
