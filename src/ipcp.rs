//! IP Control Protocol - RFC 1332, RFC 1877
//!
//! Negotiates the IPv4 addresses of both ends and, optionally, DNS server
//! addresses. Peer-proposed addresses are checked against what the
//! authenticated peer is allowed to use.

use crate::auth::Authorization;
use crate::ci::{self, CiDesc, CiVerdict, ReplyBuilder};
use crate::event::{Io, Notice};
use crate::fsm::{Fsm, FsmCallbacks, FsmConfig, NakDisposition, State};
use crate::protocol::control::OptionIter;
use crate::protocol::ipcp::{addr_value, options};
use crate::protocol::ppp::protocols;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use tracing::{debug, error, info};

/// A network control protocol the link opens once authentication is done
pub trait NetworkProtocol: std::fmt::Debug {
    /// Control protocol number
    fn protocol(&self) -> u16;

    /// Data protocol carried once the control protocol is up
    fn data_protocol(&self) -> u16;

    fn name(&self) -> &'static str;

    fn state(&self) -> State;

    fn lowerup(&mut self, io: &mut Io, authz: &Authorization);

    fn lowerdown(&mut self, io: &mut Io, authz: &Authorization);

    fn open(&mut self, io: &mut Io, authz: &Authorization);

    fn close(&mut self, io: &mut Io, authz: &Authorization, reason: &str);

    fn input(&mut self, io: &mut Io, authz: &Authorization, packet: &[u8]);

    /// The peer rejected this protocol
    fn protrej(&mut self, io: &mut Io, authz: &Authorization);

    /// Retransmit timer expired
    fn timeout(&mut self, io: &mut Io, authz: &Authorization);
}

/// IPCP settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpcpConfig {
    pub fsm: FsmConfig,
    /// Our address; None to learn it from the peer
    pub local: Option<Ipv4Addr>,
    /// Address for the peer; None to take what it asks for
    pub remote: Option<Ipv4Addr>,
    /// Accept the peer's idea of our address
    pub accept_local: bool,
    /// Accept the peer's idea of its address
    pub accept_remote: bool,
    /// Ask the peer for DNS servers
    pub usepeerdns: bool,
    /// DNS servers we hand out
    pub ms_dns: Vec<Ipv4Addr>,
}

/// IPCP option record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcpOptions {
    pub neg_addr: bool,
    pub ouraddr: Ipv4Addr,
    pub hisaddr: Ipv4Addr,
    pub accept_local: bool,
    pub accept_remote: bool,
    pub req_dns1: bool,
    pub req_dns2: bool,
    pub dnsaddr: [Ipv4Addr; 2],
}

impl Default for IpcpOptions {
    fn default() -> Self {
        Self {
            neg_addr: false,
            ouraddr: Ipv4Addr::UNSPECIFIED,
            hisaddr: Ipv4Addr::UNSPECIFIED,
            accept_local: false,
            accept_remote: false,
            req_dns1: false,
            req_dns2: false,
            dnsaddr: [Ipv4Addr::UNSPECIFIED; 2],
        }
    }
}

fn addr_option(value: &[u8]) -> Result<Ipv4Addr> {
    addr_value(value)
        .ok_or_else(|| Error::InvalidPacket(format!("bad address length {}", value.len())))
}

fn nak_addr(next: &mut IpcpOptions, sent: &IpcpOptions, value: &[u8]) -> Result<()> {
    let addr = addr_option(value)?;
    if sent.accept_local && !addr.is_unspecified() {
        next.ouraddr = addr;
    }
    Ok(())
}

fn unsolicited_addr(next: &mut IpcpOptions, value: &[u8]) -> Result<()> {
    let addr = addr_option(value)?;
    if next.accept_local && !addr.is_unspecified() {
        next.neg_addr = true;
        next.ouraddr = addr;
    }
    Ok(())
}

fn nak_dns1(next: &mut IpcpOptions, _sent: &IpcpOptions, value: &[u8]) -> Result<()> {
    next.dnsaddr[0] = addr_option(value)?;
    Ok(())
}

fn nak_dns2(next: &mut IpcpOptions, _sent: &IpcpOptions, value: &[u8]) -> Result<()> {
    next.dnsaddr[1] = addr_option(value)?;
    Ok(())
}

fn descriptors() -> [CiDesc<IpcpOptions>; 3] {
    [
        CiDesc {
            kind: options::IP_ADDRESS,
            name: "addr",
            enabled: |o| o.neg_addr,
            encode: |o, b| b.extend_from_slice(&o.ouraddr.octets()),
            nak: nak_addr,
            reject: |n| n.neg_addr = false,
            unsolicited: unsolicited_addr,
        },
        CiDesc {
            kind: options::PRIMARY_DNS,
            name: "ms-dns1",
            enabled: |o| o.req_dns1,
            encode: |o, b| b.extend_from_slice(&o.dnsaddr[0].octets()),
            nak: nak_dns1,
            reject: |n| n.req_dns1 = false,
            unsolicited: ci::ignore_unsolicited,
        },
        CiDesc {
            kind: options::SECONDARY_DNS,
            name: "ms-dns2",
            enabled: |o| o.req_dns2,
            encode: |o, b| b.extend_from_slice(&o.dnsaddr[1].octets()),
            nak: nak_dns2,
            reject: |n| n.req_dns2 = false,
            unsolicited: ci::ignore_unsolicited,
        },
    ]
}

#[derive(Debug)]
struct IpcpNegotiation {
    want: IpcpOptions,
    got: IpcpOptions,
    /// Let the peer negotiate its address
    allow_addr: bool,
    his: IpcpOptions,
    ms_dns: Vec<Ipv4Addr>,
    is_up: bool,
    /// Close requested from inside a callback
    close_reason: Option<String>,
}

/// Callbacks for one FSM event, with the authorization in effect
struct IpcpCallbacks<'a> {
    neg: &'a mut IpcpNegotiation,
    authz: &'a Authorization,
}

impl IpcpCallbacks<'_> {
    fn judge_addr(&mut self, value: &[u8]) -> CiVerdict {
        let Ok(addr) = addr_option(value) else {
            return CiVerdict::Reject;
        };
        if !self.neg.allow_addr {
            return CiVerdict::Reject;
        }
        let wo = &self.neg.want;
        let nak_his = CiVerdict::Nak(wo.hisaddr.octets().to_vec());

        if addr != wo.hisaddr && (addr.is_unspecified() || !wo.accept_remote) {
            if wo.hisaddr.is_unspecified() {
                return CiVerdict::Reject;
            }
            return nak_his;
        }
        if addr.is_unspecified() {
            // Neither of us knows the peer's address
            return CiVerdict::Reject;
        }
        if !self.authz.ip_allowed(addr) {
            info!("Peer is not authorized to use remote address {}", addr);
            if !wo.hisaddr.is_unspecified() && self.authz.ip_allowed(wo.hisaddr) {
                return nak_his;
            }
            return CiVerdict::Reject;
        }

        self.neg.his.neg_addr = true;
        self.neg.his.hisaddr = addr;
        CiVerdict::Ack
    }

    fn judge_dns(&mut self, index: usize, value: &[u8]) -> CiVerdict {
        let Ok(addr) = addr_option(value) else {
            return CiVerdict::Reject;
        };
        match self.neg.ms_dns.get(index) {
            Some(ours) if *ours == addr => CiVerdict::Ack,
            Some(ours) => CiVerdict::Nak(ours.octets().to_vec()),
            None => CiVerdict::Reject,
        }
    }
}

impl FsmCallbacks for IpcpCallbacks<'_> {
    fn resetci(&mut self) {
        self.neg.got = self.neg.want.clone();
    }

    fn cilen(&self) -> usize {
        ci::cilen(&descriptors(), &self.neg.got)
    }

    fn addci(&self, buf: &mut Vec<u8>) {
        ci::add(&descriptors(), &self.neg.got, buf);
    }

    fn ackci(&self, data: &[u8]) -> bool {
        ci::ack(&descriptors(), &self.neg.got, data)
    }

    fn nakci(&mut self, _io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition> {
        let next = ci::nak(&descriptors(), &self.neg.got, data)?;
        if commit {
            self.neg.got = next;
        }
        Ok(NakDisposition::Resend)
    }

    fn rejci(&mut self, _io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition> {
        let next = ci::reject(&descriptors(), &self.neg.got, data)?;
        if commit {
            self.neg.got = next;
        }
        Ok(NakDisposition::Resend)
    }

    fn reqci(&mut self, _io: &mut Io, data: &[u8], reject_if_disagree: bool) -> (u8, Vec<u8>) {
        self.neg.his = IpcpOptions::default();
        let mut reply = ReplyBuilder::new(reject_if_disagree);

        let mut iter = OptionIter::new(data);
        for opt in iter.by_ref() {
            let verdict = match opt.kind {
                options::IP_ADDRESS => self.judge_addr(opt.value),
                options::PRIMARY_DNS => self.judge_dns(0, opt.value),
                options::SECONDARY_DNS => self.judge_dns(1, opt.value),
                _ => CiVerdict::Reject,
            };
            if verdict != CiVerdict::Ack {
                debug!("IPCP: peer option {}: {:?}", opt.kind, verdict);
            }
            reply.push(opt.kind, opt.raw, verdict, false);
        }
        if !iter.rest().is_empty() {
            reply.push_malformed(iter.rest());
        }

        // Tell a peer that didn't ask for an address which one to use
        let wo = &self.neg.want;
        if !self.neg.his.neg_addr
            && self.neg.allow_addr
            && !wo.hisaddr.is_unspecified()
            && !wo.accept_remote
            && !reply.has_disagreement()
        {
            reply.suggest(options::IP_ADDRESS, &wo.hisaddr.octets());
        }

        reply.finish()
    }

    fn up(&mut self, io: &mut Io) {
        let neg = &mut *self.neg;
        let remote = if neg.his.neg_addr {
            neg.his.hisaddr
        } else {
            neg.want.hisaddr
        };
        let local = neg.got.ouraddr;

        if remote.is_unspecified() {
            error!("Could not determine remote IP address");
            neg.close_reason = Some("Could not determine remote IP address".into());
            return;
        }
        if local.is_unspecified() {
            error!("Could not determine local IP address");
            neg.close_reason = Some("Could not determine local IP address".into());
            return;
        }
        if !self.authz.ip_allowed(remote) {
            error!("Peer is not authorized to use remote address {}", remote);
            neg.close_reason = Some("Unauthorized remote IP address".into());
            return;
        }

        let dns: Vec<Ipv4Addr> = [
            (neg.got.req_dns1, neg.got.dnsaddr[0]),
            (neg.got.req_dns2, neg.got.dnsaddr[1]),
        ]
        .into_iter()
        .filter(|(requested, addr)| *requested && !addr.is_unspecified())
        .map(|(_, addr)| addr)
        .collect();

        info!("local  IP address {}", local);
        info!("remote IP address {}", remote);
        for addr in &dns {
            info!("DNS address {}", addr);
        }

        neg.is_up = true;
        io.notify(Notice::IpUp { local, remote, dns });
        io.notify(Notice::NetworkUp(protocols::IPCP));
    }

    fn down(&mut self, io: &mut Io) {
        if self.neg.is_up {
            self.neg.is_up = false;
            io.notify(Notice::IpDown);
            io.notify(Notice::NetworkDown(protocols::IPCP));
        }
    }

    fn finished(&mut self, io: &mut Io) {
        io.notify(Notice::NetworkFinished(protocols::IPCP));
    }
}

/// IPCP instance for one link
#[derive(Debug)]
pub struct Ipcp {
    fsm: Fsm,
    neg: IpcpNegotiation,
}

impl Ipcp {
    pub fn new(config: &IpcpConfig) -> Self {
        let ouraddr = config.local.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let hisaddr = config.remote.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let want = IpcpOptions {
            neg_addr: true,
            ouraddr,
            hisaddr,
            // Unknown addresses have to come from the peer
            accept_local: config.accept_local || ouraddr.is_unspecified(),
            accept_remote: config.accept_remote || hisaddr.is_unspecified(),
            req_dns1: config.usepeerdns,
            req_dns2: config.usepeerdns,
            dnsaddr: [Ipv4Addr::UNSPECIFIED; 2],
        };

        Self {
            fsm: Fsm::new(protocols::IPCP, "IPCP", config.fsm),
            neg: IpcpNegotiation {
                got: want.clone(),
                want,
                allow_addr: true,
                his: IpcpOptions::default(),
                ms_dns: config.ms_dns.clone(),
                is_up: false,
                close_reason: None,
            },
        }
    }

    /// Options we negotiated for our side
    pub fn got(&self) -> &IpcpOptions {
        &self.neg.got
    }

    /// Options the peer negotiated
    pub fn his(&self) -> &IpcpOptions {
        &self.neg.his
    }

    fn drive<F>(&mut self, io: &mut Io, authz: &Authorization, op: F)
    where
        F: FnOnce(&mut Fsm, &mut dyn FsmCallbacks, &mut Io),
    {
        let mut cb = IpcpCallbacks {
            neg: &mut self.neg,
            authz,
        };
        op(&mut self.fsm, &mut cb, io);

        if let Some(reason) = self.neg.close_reason.take() {
            let mut cb = IpcpCallbacks {
                neg: &mut self.neg,
                authz,
            };
            self.fsm.close(&mut cb, io, &reason);
        }
    }
}

impl NetworkProtocol for Ipcp {
    fn protocol(&self) -> u16 {
        protocols::IPCP
    }

    fn data_protocol(&self) -> u16 {
        protocols::IP
    }

    fn name(&self) -> &'static str {
        "IPCP"
    }

    fn state(&self) -> State {
        self.fsm.state()
    }

    fn lowerup(&mut self, io: &mut Io, authz: &Authorization) {
        self.drive(io, authz, |fsm, cb, io| fsm.lowerup(cb, io));
    }

    fn lowerdown(&mut self, io: &mut Io, authz: &Authorization) {
        self.drive(io, authz, |fsm, cb, io| fsm.lowerdown(cb, io));
    }

    fn open(&mut self, io: &mut Io, authz: &Authorization) {
        self.drive(io, authz, |fsm, cb, io| fsm.open(cb, io));
    }

    fn close(&mut self, io: &mut Io, authz: &Authorization, reason: &str) {
        self.drive(io, authz, |fsm, cb, io| fsm.close(cb, io, reason));
    }

    fn input(&mut self, io: &mut Io, authz: &Authorization, packet: &[u8]) {
        self.drive(io, authz, |fsm, cb, io| fsm.input(cb, io, packet));
    }

    fn protrej(&mut self, io: &mut Io, authz: &Authorization) {
        self.drive(io, authz, |fsm, cb, io| fsm.protreject(cb, io));
    }

    fn timeout(&mut self, io: &mut Io, authz: &Authorization) {
        self.drive(io, authz, |fsm, cb, io| fsm.timeout(cb, io));
    }
}
