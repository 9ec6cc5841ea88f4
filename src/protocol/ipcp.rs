//! IPCP protocol - RFC 1332
//!
//! Internet Protocol Control Protocol option types. IPCP uses the generic
//! control packet codes and codec unchanged.

use std::net::Ipv4Addr;

/// IPCP option types
pub mod options {
    /// IP-Addresses (deprecated, RFC 1172)
    pub const IP_ADDRESSES: u8 = 1;
    /// IP-Compression-Protocol
    pub const IP_COMPRESSION: u8 = 2;
    /// IP-Address
    pub const IP_ADDRESS: u8 = 3;
    /// Primary DNS Server Address (RFC 1877)
    pub const PRIMARY_DNS: u8 = 129;
    /// Primary NBNS Server Address (RFC 1877)
    pub const PRIMARY_NBNS: u8 = 130;
    /// Secondary DNS Server Address (RFC 1877)
    pub const SECONDARY_DNS: u8 = 131;
    /// Secondary NBNS Server Address (RFC 1877)
    pub const SECONDARY_NBNS: u8 = 132;
}

/// Read an IPv4 address option value
pub fn addr_value(value: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = value.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}
