//! Configuration-information codec
//!
//! Each control protocol describes its options once, as a table of
//! [`CiDesc`] entries in the order they are requested. The walkers here
//! use that table to build a Configure-Request and to check the peer's
//! Configure-Ack, Configure-Nak and Configure-Reject against what was
//! asked for.
//!
//! Ack and Reject must list our options in the order we sent them and
//! with the values we sent; anything else makes the whole packet bad.
//! A Nak may only carry options in our order, followed by options we did
//! not request at all.

use crate::protocol::control::{codes, put_option, OptionIter};
use crate::{Error, Result};

/// Description of one negotiable option of an option record `O`
pub struct CiDesc<O> {
    /// Option type on the wire
    pub kind: u8,
    /// Name for log lines
    pub name: &'static str,
    /// Whether the record requests this option
    pub enabled: fn(&O) -> bool,
    /// Append the option value (without type and length)
    pub encode: fn(&O, &mut Vec<u8>),
    /// Apply the peer's suggested value to the next attempt
    ///
    /// Called with the record being built for the next attempt, the record
    /// that was sent, and the value the peer suggested.
    pub nak: fn(&mut O, &O, &[u8]) -> Result<()>,
    /// Stop requesting the option
    pub reject: fn(&mut O),
    /// The peer suggested an option we did not request
    pub unsolicited: fn(&mut O, &[u8]) -> Result<()>,
}

/// Length of the option list `opts` would produce
pub fn cilen<O>(table: &[CiDesc<O>], opts: &O) -> usize {
    let mut buf = Vec::new();
    add(table, opts, &mut buf);
    buf.len()
}

/// Append every enabled option to a Configure-Request body
pub fn add<O>(table: &[CiDesc<O>], opts: &O, buf: &mut Vec<u8>) {
    for desc in table.iter().filter(|d| (d.enabled)(opts)) {
        let mut value = Vec::new();
        (desc.encode)(opts, &mut value);
        put_option(buf, desc.kind, &value);
    }
}

fn encoded<O>(desc: &CiDesc<O>, opts: &O) -> Vec<u8> {
    let mut value = Vec::new();
    (desc.encode)(opts, &mut value);
    let mut raw = Vec::with_capacity(2 + value.len());
    put_option(&mut raw, desc.kind, &value);
    raw
}

/// Check a Configure-Ack against what we sent
///
/// The Ack must repeat our request exactly: same options, same order, same
/// values, nothing extra.
pub fn ack<O>(table: &[CiDesc<O>], opts: &O, data: &[u8]) -> bool {
    let mut iter = OptionIter::new(data);
    for desc in table.iter().filter(|d| (d.enabled)(opts)) {
        match iter.next() {
            Some(opt) if opt.raw == encoded(desc, opts).as_slice() => {}
            _ => return false,
        }
    }
    iter.next().is_none() && iter.rest().is_empty()
}

/// Work out the next request from a Configure-Nak
///
/// Returns the record to request next; `got` is left untouched so the
/// caller decides whether to commit it.
pub fn nak<O: Clone>(table: &[CiDesc<O>], got: &O, data: &[u8]) -> Result<O> {
    let mut next = got.clone();
    let mut iter = OptionIter::new(data);
    let mut seen: Vec<u8> = Vec::new();

    for desc in table.iter().filter(|d| (d.enabled)(got)) {
        if let Some(opt) = iter.peek() {
            if opt.kind == desc.kind {
                iter.next();
                (desc.nak)(&mut next, got, opt.value)?;
                seen.push(desc.kind);
            }
        }
    }

    // Whatever follows must be options we did not ask for
    for opt in iter.by_ref() {
        let Some(desc) = table.iter().find(|d| d.kind == opt.kind) else {
            continue;
        };
        if (desc.enabled)(got) || seen.contains(&opt.kind) {
            return Err(Error::InvalidPacket(format!(
                "Nak of {} out of order or repeated",
                desc.name
            )));
        }
        (desc.unsolicited)(&mut next, opt.value)?;
        seen.push(opt.kind);
    }

    if !iter.rest().is_empty() {
        return Err(Error::InvalidPacket("malformed option in Nak".into()));
    }
    Ok(next)
}

/// Work out the next request from a Configure-Reject
///
/// Every rejected option must be one we sent, with the value we sent, in
/// the order we sent it.
pub fn reject<O: Clone>(table: &[CiDesc<O>], got: &O, data: &[u8]) -> Result<O> {
    let mut next = got.clone();
    let mut iter = OptionIter::new(data);

    for desc in table.iter().filter(|d| (d.enabled)(got)) {
        if let Some(opt) = iter.peek() {
            if opt.kind == desc.kind {
                if opt.raw != encoded(desc, got).as_slice() {
                    return Err(Error::InvalidPacket(format!(
                        "Reject of {} does not match request",
                        desc.name
                    )));
                }
                iter.next();
                (desc.reject)(&mut next);
            }
        }
    }

    if iter.next().is_some() || !iter.rest().is_empty() {
        return Err(Error::InvalidPacket(
            "Reject lists options we did not send".into(),
        ));
    }
    Ok(next)
}

/// [`CiDesc::unsolicited`] handler that leaves the record alone
pub fn ignore_unsolicited<O>(_opts: &mut O, _value: &[u8]) -> Result<()> {
    Ok(())
}

/// Read a big-endian u16 option value of exactly two octets
pub fn short_value(value: &[u8]) -> Result<u16> {
    let octets: [u8; 2] = value
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("expected 2 octets, got {}", value.len())))?;
    Ok(u16::from_be_bytes(octets))
}

/// Read a big-endian u32 option value of exactly four octets
pub fn long_value(value: &[u8]) -> Result<u32> {
    let octets: [u8; 4] = value
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("expected 4 octets, got {}", value.len())))?;
    Ok(u32::from_be_bytes(octets))
}

/// Require an empty option value
pub fn void_value(value: &[u8]) -> Result<()> {
    if value.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidPacket("expected empty option".into()))
    }
}

/// Verdict on one option of a peer's Configure-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiVerdict {
    Ack,
    /// Nak, suggesting this option value instead
    Nak(Vec<u8>),
    Reject,
}

/// Collects per-option verdicts into the reply to a Configure-Request
///
/// The reply is a Configure-Ack echoing the request if every option was
/// acceptable, otherwise a Configure-Reject of the unacceptable options if
/// there are any, otherwise a Configure-Nak with our suggestions.
#[derive(Debug)]
pub struct ReplyBuilder {
    reject_if_disagree: bool,
    ack: Vec<u8>,
    nak: Vec<u8>,
    rej: Vec<u8>,
}

impl ReplyBuilder {
    /// `reject_if_disagree` turns Naks into Rejects, for when we have
    /// Nak'd too often already
    pub fn new(reject_if_disagree: bool) -> Self {
        Self {
            reject_if_disagree,
            ack: Vec::new(),
            nak: Vec::new(),
            rej: Vec::new(),
        }
    }

    /// Record the verdict for one received option
    ///
    /// `exempt` options keep being Nak'd even when we are fed up.
    pub fn push(&mut self, kind: u8, raw: &[u8], verdict: CiVerdict, exempt: bool) {
        match verdict {
            CiVerdict::Ack => self.ack.extend_from_slice(raw),
            CiVerdict::Nak(_) if self.reject_if_disagree && !exempt => {
                self.rej.extend_from_slice(raw)
            }
            CiVerdict::Nak(value) => put_option(&mut self.nak, kind, &value),
            CiVerdict::Reject => self.rej.extend_from_slice(raw),
        }
    }

    /// Reject raw octets that do not parse as options
    pub fn push_malformed(&mut self, raw: &[u8]) {
        self.rej.extend_from_slice(raw);
    }

    /// Add a Nak for an option the peer did not include
    pub fn suggest(&mut self, kind: u8, value: &[u8]) {
        if !self.reject_if_disagree {
            put_option(&mut self.nak, kind, value);
        }
    }

    /// Whether anything has been Nak'd or rejected so far
    pub fn has_disagreement(&self) -> bool {
        !self.rej.is_empty() || !self.nak.is_empty()
    }

    /// Reply code and body
    pub fn finish(self) -> (u8, Vec<u8>) {
        if !self.rej.is_empty() {
            (codes::CONFIGURE_REJECT, self.rej)
        } else if !self.nak.is_empty() {
            (codes::CONFIGURE_NAK, self.nak)
        } else {
            (codes::CONFIGURE_ACK, self.ack)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Opts {
        neg_size: bool,
        size: u16,
        neg_flag: bool,
        neg_tag: bool,
        tag: u32,
    }

    fn opts() -> Opts {
        Opts {
            neg_size: true,
            size: 1500,
            neg_flag: true,
            neg_tag: true,
            tag: 0xaabbccdd,
        }
    }

    fn table() -> [CiDesc<Opts>; 3] {
        [
            CiDesc {
                kind: 1,
                name: "size",
                enabled: |o| o.neg_size,
                encode: |o, b| b.extend_from_slice(&o.size.to_be_bytes()),
                nak: |n, _, v| {
                    n.size = short_value(v)?;
                    Ok(())
                },
                reject: |n| n.neg_size = false,
                unsolicited: |n, v| {
                    n.neg_size = true;
                    n.size = short_value(v)?;
                    Ok(())
                },
            },
            CiDesc {
                kind: 7,
                name: "flag",
                enabled: |o| o.neg_flag,
                encode: |_, _| {},
                nak: |n, _, v| {
                    void_value(v)?;
                    n.neg_flag = false;
                    Ok(())
                },
                reject: |n| n.neg_flag = false,
                unsolicited: ignore_unsolicited,
            },
            CiDesc {
                kind: 5,
                name: "tag",
                enabled: |o| o.neg_tag,
                encode: |o, b| b.extend_from_slice(&o.tag.to_be_bytes()),
                nak: |n, _, v| {
                    n.tag = long_value(v)?.wrapping_add(1);
                    Ok(())
                },
                reject: |n| n.neg_tag = false,
                unsolicited: ignore_unsolicited,
            },
        ]
    }

    #[test]
    fn test_add_in_table_order() {
        let mut buf = Vec::new();
        add(&table(), &opts(), &mut buf);
        assert_eq!(
            buf,
            vec![0x01, 0x04, 0x05, 0xdc, 0x07, 0x02, 0x05, 0x06, 0xaa, 0xbb, 0xcc, 0xdd]
        );
        assert_eq!(cilen(&table(), &opts()), 12);
    }

    #[test]
    fn test_add_skips_disabled() {
        let mut o = opts();
        o.neg_flag = false;
        let mut buf = Vec::new();
        add(&table(), &o, &mut buf);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_ack_exact() {
        let mut buf = Vec::new();
        add(&table(), &opts(), &mut buf);
        assert!(ack(&table(), &opts(), &buf));
    }

    #[test]
    fn test_ack_wrong_value() {
        let mut buf = Vec::new();
        let mut o = opts();
        o.size = 1400;
        add(&table(), &o, &mut buf);
        assert!(!ack(&table(), &opts(), &buf));
    }

    #[test]
    fn test_ack_reordered_is_bad() {
        let data = [0x07, 0x02, 0x01, 0x04, 0x05, 0xdc, 0x05, 0x06, 0xaa, 0xbb, 0xcc, 0xdd];
        assert!(!ack(&table(), &opts(), &data));
    }

    #[test]
    fn test_ack_extra_option_is_bad() {
        let mut buf = Vec::new();
        add(&table(), &opts(), &mut buf);
        buf.extend_from_slice(&[0x08, 0x02]);
        assert!(!ack(&table(), &opts(), &buf));
    }

    #[test]
    fn test_nak_applies_suggestion() {
        let data = [0x01, 0x04, 0x01, 0x28];
        let got = opts();
        let next = nak(&table(), &got, &data).unwrap();
        assert_eq!(next.size, 296);
        assert_eq!(got.size, 1500);
    }

    #[test]
    fn test_nak_unsolicited() {
        let mut got = opts();
        got.neg_size = false;
        let data = [0x01, 0x04, 0x02, 0x00];
        let next = nak(&table(), &got, &data).unwrap();
        assert!(next.neg_size);
        assert_eq!(next.size, 512);
    }

    #[test]
    fn test_nak_out_of_order_is_bad() {
        // tag first, then size: size was requested, so it cannot come late
        let data = [0x05, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0x04, 0x01, 0x28];
        assert!(nak(&table(), &opts(), &data).is_err());
    }

    #[test]
    fn test_nak_bad_length() {
        let data = [0x01, 0x03, 0x01];
        assert!(nak(&table(), &opts(), &data).is_err());
    }

    #[test]
    fn test_nak_malformed_tail() {
        let data = [0x01, 0x04, 0x01, 0x28, 0x09];
        assert!(nak(&table(), &opts(), &data).is_err());
    }

    #[test]
    fn test_nak_unknown_kind_ignored() {
        let data = [0x63, 0x02];
        let next = nak(&table(), &opts(), &data).unwrap();
        assert_eq!(next, opts());
    }

    #[test]
    fn test_reject_drops_option() {
        let data = [0x07, 0x02];
        let next = reject(&table(), &opts(), &data).unwrap();
        assert!(!next.neg_flag);
        assert!(next.neg_size);

        // And it is not offered again
        let mut buf = Vec::new();
        add(&table(), &next, &mut buf);
        assert!(!OptionIter::new(&buf).any(|o| o.kind == 7));
    }

    #[test]
    fn test_reject_value_mismatch() {
        let data = [0x01, 0x04, 0x01, 0x28];
        assert!(reject(&table(), &opts(), &data).is_err());
    }

    #[test]
    fn test_reject_reordered_is_bad() {
        let data = [0x07, 0x02, 0x01, 0x04, 0x05, 0xdc];
        assert!(reject(&table(), &opts(), &data).is_err());
    }

    #[test]
    fn test_reject_unsent_option_is_bad() {
        let mut got = opts();
        got.neg_flag = false;
        let data = [0x07, 0x02];
        assert!(reject(&table(), &got, &data).is_err());
    }

    #[test]
    fn test_reject_empty_is_valid() {
        let next = reject(&table(), &opts(), &[]).unwrap();
        assert_eq!(next, opts());
    }

    #[test]
    fn test_reply_all_ack() {
        let mut reply = ReplyBuilder::new(false);
        reply.push(1, &[0x01, 0x04, 0x05, 0xdc], CiVerdict::Ack, false);
        reply.push(7, &[0x07, 0x02], CiVerdict::Ack, false);
        assert_eq!(
            reply.finish(),
            (codes::CONFIGURE_ACK, vec![0x01, 0x04, 0x05, 0xdc, 0x07, 0x02])
        );
    }

    #[test]
    fn test_reply_reject_wins() {
        let mut reply = ReplyBuilder::new(false);
        reply.push(1, &[0x01, 0x04, 0x00, 0x40], CiVerdict::Nak(vec![0x00, 0x80]), false);
        reply.push(9, &[0x09, 0x02], CiVerdict::Reject, false);
        assert_eq!(reply.finish(), (codes::CONFIGURE_REJECT, vec![0x09, 0x02]));
    }

    #[test]
    fn test_reply_nak() {
        let mut reply = ReplyBuilder::new(false);
        reply.push(7, &[0x07, 0x02], CiVerdict::Ack, false);
        reply.push(1, &[0x01, 0x04, 0x00, 0x40], CiVerdict::Nak(vec![0x00, 0x80]), false);
        assert!(reply.has_disagreement());
        assert_eq!(
            reply.finish(),
            (codes::CONFIGURE_NAK, vec![0x01, 0x04, 0x00, 0x80])
        );
    }

    #[test]
    fn test_reply_fed_up_rejects_instead_of_nak() {
        let mut reply = ReplyBuilder::new(true);
        reply.push(1, &[0x01, 0x04, 0x00, 0x40], CiVerdict::Nak(vec![0x00, 0x80]), false);
        assert_eq!(
            reply.finish(),
            (codes::CONFIGURE_REJECT, vec![0x01, 0x04, 0x00, 0x40])
        );
    }

    #[test]
    fn test_reply_fed_up_exempt_still_naks() {
        let mut reply = ReplyBuilder::new(true);
        reply.push(5, &[0x05, 0x06, 1, 2, 3, 4], CiVerdict::Nak(vec![5, 6, 7, 8]), true);
        assert_eq!(
            reply.finish(),
            (codes::CONFIGURE_NAK, vec![0x05, 0x06, 5, 6, 7, 8])
        );
    }
}
