//! LCP option records and how each option is encoded and negotiated

use crate::ci::{self, CiDesc};
use crate::protocol::lcp::{auth, options, DEFAULT_ASYNCMAP, MIN_MRU};
use crate::protocol::ppp::{protocols, DEFAULT_MRU};
use crate::{Error, Result};

/// Authentication protocol carried in an Authentication-Protocol option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    None,
    Pap,
    /// CHAP with the digest algorithm
    Chap(u8),
}

/// One set of LCP options: what we want, what we are asking for, what we
/// allow the peer, or what the peer asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcpOptions {
    pub neg_mru: bool,
    pub mru: u16,
    pub neg_asyncmap: bool,
    pub asyncmap: u32,
    pub neg_upap: bool,
    pub neg_chap: bool,
    pub chap_mdtype: u8,
    pub neg_magic: bool,
    pub magic: u32,
    pub neg_pcomp: bool,
    pub neg_accomp: bool,
    pub neg_lqr: bool,
    pub lqr_period: u32,
    /// Magic-number collisions seen this negotiation
    pub numloops: u32,
}

impl Default for LcpOptions {
    fn default() -> Self {
        Self {
            neg_mru: false,
            mru: DEFAULT_MRU,
            neg_asyncmap: false,
            asyncmap: 0,
            neg_upap: false,
            neg_chap: false,
            chap_mdtype: auth::CHAP_MD5,
            neg_magic: false,
            magic: 0,
            neg_pcomp: false,
            neg_accomp: false,
            neg_lqr: false,
            lqr_period: 0,
            numloops: 0,
        }
    }
}

impl LcpOptions {
    pub fn auth_type(&self) -> AuthType {
        if self.neg_chap {
            AuthType::Chap(self.chap_mdtype)
        } else if self.neg_upap {
            AuthType::Pap
        } else {
            AuthType::None
        }
    }

    /// MRU in effect, 1500 unless negotiated
    pub fn effective_mru(&self) -> u16 {
        if self.neg_mru {
            self.mru
        } else {
            DEFAULT_MRU
        }
    }
}

/// A random nonzero magic number
pub fn new_magic() -> u32 {
    loop {
        let magic: u32 = rand::random();
        if magic != 0 {
            return magic;
        }
    }
}

/// Encoded value of an Authentication-Protocol option for `auth_type`
pub fn auth_value(auth_type: AuthType) -> Vec<u8> {
    match auth_type {
        AuthType::Chap(md) => {
            let mut v = auth::CHAP.to_be_bytes().to_vec();
            v.push(md);
            v
        }
        AuthType::Pap => auth::PAP.to_be_bytes().to_vec(),
        AuthType::None => Vec::new(),
    }
}

/// Encoded value of a Quality-Protocol option for LQR
pub fn lqr_value(period: u32) -> Vec<u8> {
    let mut v = protocols::LQR.to_be_bytes().to_vec();
    v.extend_from_slice(&period.to_be_bytes());
    v
}

/// Read an Authentication-Protocol value
pub fn parse_auth(value: &[u8]) -> Result<(u16, &[u8])> {
    if value.len() < 2 {
        return Err(Error::InvalidPacket("short auth option".into()));
    }
    Ok((u16::from_be_bytes([value[0], value[1]]), &value[2..]))
}

/// Read a Quality-Protocol value as (protocol, period)
pub fn parse_quality(value: &[u8]) -> Result<(u16, u32)> {
    if value.len() != 6 {
        return Err(Error::InvalidPacket(format!(
            "quality option of {} octets",
            value.len()
        )));
    }
    let protocol = u16::from_be_bytes([value[0], value[1]]);
    let period = u32::from_be_bytes([value[2], value[3], value[4], value[5]]);
    Ok((protocol, period))
}

fn nak_mru(next: &mut LcpOptions, got: &LcpOptions, value: &[u8]) -> Result<()> {
    let mru = ci::short_value(value)?;
    // Only go along with a smaller MRU, or one up to the default
    if mru >= MIN_MRU && (mru <= got.mru || mru <= DEFAULT_MRU) {
        next.mru = mru;
    }
    Ok(())
}

fn unsolicited_mru(next: &mut LcpOptions, value: &[u8]) -> Result<()> {
    let mru = ci::short_value(value)?;
    if mru >= MIN_MRU && mru < DEFAULT_MRU {
        next.neg_mru = true;
        next.mru = mru;
    }
    Ok(())
}

fn nak_asyncmap(next: &mut LcpOptions, got: &LcpOptions, value: &[u8]) -> Result<()> {
    next.asyncmap = got.asyncmap | ci::long_value(value)?;
    Ok(())
}

fn nak_auth(next: &mut LcpOptions, got: &LcpOptions, value: &[u8]) -> Result<()> {
    let (protocol, rest) = parse_auth(value)?;
    if protocol == auth::PAP && rest.is_empty() {
        // Asking for CHAP they obviously don't want; asking for PAP makes
        // a PAP suggestion nonsense
        if !got.neg_chap {
            return Err(Error::InvalidPacket("Nak suggests the PAP we asked for".into()));
        }
        next.neg_chap = false;
    } else if protocol == auth::CHAP && rest.len() == 1 {
        if got.neg_chap {
            // Must want another digest; we only do MD5
            next.neg_chap = false;
        } else {
            next.neg_upap = false;
        }
    } else if got.neg_chap {
        next.neg_chap = false;
    } else {
        next.neg_upap = false;
    }
    Ok(())
}

fn unsolicited_auth(_next: &mut LcpOptions, value: &[u8]) -> Result<()> {
    parse_auth(value).map(|_| ())
}

fn nak_quality(next: &mut LcpOptions, _got: &LcpOptions, value: &[u8]) -> Result<()> {
    let (protocol, period) = parse_quality(value)?;
    if protocol == protocols::LQR {
        next.lqr_period = period;
    } else {
        next.neg_lqr = false;
    }
    Ok(())
}

fn unsolicited_quality(_next: &mut LcpOptions, value: &[u8]) -> Result<()> {
    parse_quality(value).map(|_| ())
}

fn nak_magic(next: &mut LcpOptions, got: &LcpOptions, value: &[u8]) -> Result<()> {
    let magic = ci::long_value(value)?;
    if magic == got.magic {
        next.numloops += 1;
    }
    next.magic = new_magic();
    Ok(())
}

fn unsolicited_long(_next: &mut LcpOptions, value: &[u8]) -> Result<()> {
    ci::long_value(value).map(|_| ())
}

fn unsolicited_void(_next: &mut LcpOptions, value: &[u8]) -> Result<()> {
    ci::void_value(value)
}

/// LCP options in the order they are requested
pub fn descriptors() -> [CiDesc<LcpOptions>; 7] {
    [
        CiDesc {
            kind: options::MRU,
            name: "MRU",
            enabled: |o| o.neg_mru && o.mru != DEFAULT_MRU,
            encode: |o, b| b.extend_from_slice(&o.mru.to_be_bytes()),
            nak: nak_mru,
            reject: |n| n.neg_mru = false,
            unsolicited: unsolicited_mru,
        },
        CiDesc {
            kind: options::ASYNCMAP,
            name: "asyncmap",
            enabled: |o| o.neg_asyncmap && o.asyncmap != DEFAULT_ASYNCMAP,
            encode: |o, b| b.extend_from_slice(&o.asyncmap.to_be_bytes()),
            nak: nak_asyncmap,
            reject: |n| n.neg_asyncmap = false,
            unsolicited: unsolicited_long,
        },
        CiDesc {
            kind: options::AUTH_PROTOCOL,
            name: "auth",
            enabled: |o| o.neg_chap || o.neg_upap,
            encode: |o, b| b.extend_from_slice(&auth_value(o.auth_type())),
            nak: nak_auth,
            reject: |n| {
                n.neg_chap = false;
                n.neg_upap = false;
            },
            unsolicited: unsolicited_auth,
        },
        CiDesc {
            kind: options::QUALITY_PROTOCOL,
            name: "quality",
            enabled: |o| o.neg_lqr,
            encode: |o, b| b.extend_from_slice(&lqr_value(o.lqr_period)),
            nak: nak_quality,
            reject: |n| n.neg_lqr = false,
            unsolicited: unsolicited_quality,
        },
        CiDesc {
            kind: options::MAGIC_NUMBER,
            name: "magic",
            enabled: |o| o.neg_magic,
            encode: |o, b| b.extend_from_slice(&o.magic.to_be_bytes()),
            nak: nak_magic,
            reject: |n| n.neg_magic = false,
            unsolicited: unsolicited_long,
        },
        CiDesc {
            kind: options::PFC,
            name: "pcomp",
            enabled: |o| o.neg_pcomp,
            encode: |_, _| {},
            nak: |n, _, _| {
                n.neg_pcomp = false;
                Ok(())
            },
            reject: |n| n.neg_pcomp = false,
            unsolicited: unsolicited_void,
        },
        CiDesc {
            kind: options::ACFC,
            name: "accomp",
            enabled: |o| o.neg_accomp,
            encode: |_, _| {},
            nak: |n, _, _| {
                n.neg_accomp = false;
                Ok(())
            },
            reject: |n| n.neg_accomp = false,
            unsolicited: unsolicited_void,
        },
    ]
}
