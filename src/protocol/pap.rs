//! PAP protocol - RFC 1334
//!
//! Password Authentication Protocol packets. PAP shares the control packet
//! header layout but carries length-prefixed strings instead of options.

use super::control::{ControlBuilder, ControlPacket};
use crate::{Error, Result};

/// PAP packet codes
pub mod codes {
    /// Authenticate-Request
    pub const AUTHENTICATE_REQUEST: u8 = 1;
    /// Authenticate-Ack (success)
    pub const AUTHENTICATE_ACK: u8 = 2;
    /// Authenticate-Nak (failure)
    pub const AUTHENTICATE_NAK: u8 = 3;
}

/// Parsed PAP packet (zero-copy reference)
#[derive(Debug)]
pub struct PapPacket<'a> {
    inner: ControlPacket<'a>,
}

impl<'a> PapPacket<'a> {
    /// Parse PAP packet from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let inner = ControlPacket::parse(buffer)
            .map_err(|e| Error::Parse(format!("PAP: {}", e)))?;
        Ok(Self { inner })
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.inner.code()
    }

    /// Identifier field
    pub fn identifier(&self) -> u8 {
        self.inner.identifier()
    }

    /// Data field
    pub fn data(&self) -> &'a [u8] {
        self.inner.data()
    }

    /// Peer-ID and Password from an Authenticate-Request
    ///
    /// Format: Peer-ID-Length (1) + Peer-ID + Passwd-Length (1) + Password
    pub fn credentials(&self) -> Result<(&'a [u8], &'a [u8])> {
        if self.code() != codes::AUTHENTICATE_REQUEST {
            return Err(Error::InvalidPacket("not an Authenticate-Request".into()));
        }
        let data = self.data();
        let (peer_id, rest) = split_counted(data)
            .ok_or_else(|| Error::InvalidPacket("PAP Peer-ID truncated".into()))?;
        let (password, _) = split_counted(rest)
            .ok_or_else(|| Error::InvalidPacket("PAP Password truncated".into()))?;
        Ok((peer_id, password))
    }

    /// Message from an Authenticate-Ack/Nak
    ///
    /// A missing or truncated message is treated as empty.
    pub fn message(&self) -> &'a [u8] {
        split_counted(self.data()).map(|(msg, _)| msg).unwrap_or(&[])
    }
}

/// Split a one-octet length prefixed field off the front of `data`
fn split_counted(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = data.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

fn push_counted(data: &mut Vec<u8>, value: &[u8]) {
    let len = value.len().min(u8::MAX as usize);
    data.push(len as u8);
    data.extend_from_slice(&value[..len]);
}

/// Build an Authenticate-Request
pub fn authenticate_request(identifier: u8, peer_id: &str, password: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + peer_id.len() + password.len());
    push_counted(&mut data, peer_id.as_bytes());
    push_counted(&mut data, password.as_bytes());
    ControlBuilder::new(codes::AUTHENTICATE_REQUEST, identifier)
        .raw_data(&data)
        .build()
}

/// Build an Authenticate-Ack or Authenticate-Nak
pub fn authenticate_response(identifier: u8, success: bool, message: &str) -> Vec<u8> {
    let code = if success {
        codes::AUTHENTICATE_ACK
    } else {
        codes::AUTHENTICATE_NAK
    };
    let mut data = Vec::with_capacity(1 + message.len());
    push_counted(&mut data, message.as_bytes());
    ControlBuilder::new(code, identifier).raw_data(&data).build()
}
