//! PPP frame - RFC 1661
//!
//! A frame as handed between the link and its lower layer: the 2-octet
//! protocol field followed by the protocol's information field. Address,
//! control, FCS and byte stuffing belong to the transport.

use crate::{Error, Result};

/// PPP header size (protocol field only)
pub const PPP_HEADER_SIZE: usize = 2;

/// Default MRU (RFC 1661)
pub const DEFAULT_MRU: u16 = 1500;

/// PPP protocol numbers
pub mod protocols {
    /// Internet Protocol version 4
    pub const IP: u16 = 0x0021;
    /// Internet Protocol version 6
    pub const IPV6: u16 = 0x0057;
    /// Internet Protocol Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// IPX Control Protocol
    pub const IPXCP: u16 = 0x802b;
    /// IPv6 Control Protocol
    pub const IPV6CP: u16 = 0x8057;
    /// Compression Control Protocol
    pub const CCP: u16 = 0x80fd;
    /// Link Control Protocol
    pub const LCP: u16 = 0xc021;
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xc023;
    /// Link Quality Report
    pub const LQR: u16 = 0xc025;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xc223;
}

/// Human readable protocol name for log lines
pub fn protocol_name(protocol: u16) -> &'static str {
    match protocol {
        protocols::IP => "IP",
        protocols::IPV6 => "IPv6",
        protocols::IPCP => "IPCP",
        protocols::IPXCP => "IPXCP",
        protocols::IPV6CP => "IPV6CP",
        protocols::CCP => "CCP",
        protocols::LCP => "LCP",
        protocols::PAP => "PAP",
        protocols::LQR => "LQR",
        protocols::CHAP => "CHAP",
        _ => "unknown",
    }
}

/// Parsed PPP frame (zero-copy reference)
#[derive(Debug)]
pub struct PppFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppFrame<'a> {
    /// Parse PPP frame from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PPP_HEADER_SIZE {
            return Err(Error::Parse("PPP frame too short".into()));
        }
        Ok(Self { buffer })
    }

    /// Protocol field
    pub fn protocol(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Payload (protocol-specific data)
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[PPP_HEADER_SIZE..]
    }

}

/// Builder for PPP frames
#[derive(Debug, Default)]
pub struct PppBuilder {
    protocol: u16,
    payload: Vec<u8>,
}

impl PppBuilder {
    /// Create a new PPP frame builder
    pub fn new(protocol: u16) -> Self {
        Self {
            protocol,
            payload: Vec::new(),
        }
    }

    /// Set the payload
    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the PPP frame
    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(PPP_HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&self.protocol.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lcp() {
        let data = [
            0xc0, 0x21, // Protocol: LCP
            0x01, 0x01, 0x00, 0x04, // LCP payload
        ];

        let frame = PppFrame::parse(&data).unwrap();
        assert_eq!(frame.protocol(), protocols::LCP);
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x00, 0x04]);
    }

    #[test]
    fn test_parse_ip() {
        let data = [0x00, 0x21, 0x45, 0x00];

        let frame = PppFrame::parse(&data).unwrap();
        assert_eq!(frame.protocol(), protocols::IP);
        assert_eq!(frame.payload(), &[0x45, 0x00]);
    }

    #[test]
    fn test_build_lcp() {
        let payload = [0x01, 0x01, 0x00, 0x04];
        let frame = PppBuilder::new(protocols::LCP).payload(&payload).build();

        assert_eq!(frame[0..2], [0xc0, 0x21]);
        assert_eq!(&frame[2..], &payload);
    }

    #[test]
    fn test_build_chap() {
        let frame = PppBuilder::new(protocols::CHAP).payload(&[0x01]).build();
        assert_eq!(frame, vec![0xc2, 0x23, 0x01]);
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(protocols::LCP), "LCP");
        assert_eq!(protocol_name(protocols::CHAP), "CHAP");
        assert_eq!(protocol_name(0x1234), "unknown");
    }

    #[test]
    fn test_parse_too_short() {
        let data = [0xc0];
        assert!(PppFrame::parse(&data).is_err());
    }

    #[test]
    fn test_parse_empty_payload() {
        let data = [0xc0, 0x21];
        let frame = PppFrame::parse(&data).unwrap();
        assert_eq!(frame.protocol(), protocols::LCP);
        assert!(frame.payload().is_empty());
    }
}
