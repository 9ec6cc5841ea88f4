//! Link Control Protocol - RFC 1661
//!
//! LCP is the first protocol on the link. It negotiates framing options,
//! tells the link which authentication to run in each direction, detects
//! looped-back lines through the magic number, and keeps the link alive
//! with Echo-Requests.

mod echo;
pub mod options;

pub use echo::Echo;
pub use options::{AuthType, LcpOptions};

use crate::auth::AuthConfig;
use crate::ci::{self, CiVerdict, ReplyBuilder};
use crate::error::ExitStatus;
use crate::event::{Io, LinkParams, Notice, Timeout};
use crate::fsm::{Fsm, FsmCallbacks, FsmConfig, FsmFlags, NakDisposition, State};
use crate::protocol::control::OptionIter;
use crate::protocol::lcp::{
    self as wire, auth, codes, DEFAULT_ASYNCMAP, MAX_MRU, MIN_MRU,
};
use crate::protocol::ppp::{protocols, DEFAULT_MRU};
use crate::Result;
use options::{auth_value, descriptors, lqr_value, new_magic, parse_auth, parse_quality};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default magic-number collisions before the line counts as looped back
pub const DEFAULT_LOOPBACK_FAIL: u32 = 5;

/// LCP settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcpConfig {
    pub fsm: FsmConfig,
    /// MRU we ask for
    pub mru: u16,
    /// Largest MRU we let the peer ask for
    pub mru_ceiling: u16,
    pub asyncmap: u32,
    /// Negotiate a magic number
    pub magic: bool,
    pub pcomp: bool,
    pub accomp: bool,
    /// LQR reporting period; 0 leaves LQR off
    pub lqr_period: u32,
    /// Echo-Request interval; zero disables keepalive
    pub echo_interval: Duration,
    /// Unanswered Echo-Requests before the peer is declared dead
    pub echo_failure: u32,
    pub loopback_fail: u32,
}

impl Default for LcpConfig {
    fn default() -> Self {
        Self {
            fsm: FsmConfig::default(),
            mru: DEFAULT_MRU,
            mru_ceiling: MAX_MRU,
            asyncmap: 0,
            magic: true,
            pcomp: true,
            accomp: true,
            lqr_period: 0,
            echo_interval: Duration::ZERO,
            echo_failure: 0,
            loopback_fail: DEFAULT_LOOPBACK_FAIL,
        }
    }
}

/// Option records and echo state; the FSM's callbacks
#[derive(Debug)]
struct LcpNegotiation {
    /// Options we want to request
    want: LcpOptions,
    /// Options we are requesting this attempt
    got: LcpOptions,
    /// Options we let the peer request
    allow: LcpOptions,
    /// Options the peer requested and we acked
    his: LcpOptions,
    echo: Echo,
    loopback_fail: u32,
}

impl LcpNegotiation {
    fn our_magic(&self) -> u32 {
        if self.got.neg_magic {
            self.got.magic
        } else {
            0
        }
    }

    fn link_params(&self) -> LinkParams {
        LinkParams {
            mtu: self.his.effective_mru().min(self.allow.mru),
            mru: self.got.effective_mru(),
            tx_asyncmap: if self.his.neg_asyncmap {
                self.his.asyncmap
            } else {
                DEFAULT_ASYNCMAP
            },
            rx_asyncmap: if self.got.neg_asyncmap {
                self.got.asyncmap
            } else {
                DEFAULT_ASYNCMAP
            },
            tx_pcomp: self.his.neg_pcomp,
            tx_accomp: self.his.neg_accomp,
            rx_pcomp: self.got.neg_pcomp,
            rx_accomp: self.got.neg_accomp,
        }
    }

    /// Judge one option of the peer's request; the flag marks Naks that
    /// must not turn into Rejects
    fn judge(&mut self, kind: u8, value: &[u8]) -> (CiVerdict, bool) {
        use crate::protocol::lcp::options as opt;

        let verdict = match kind {
            opt::MRU => match ci::short_value(value) {
                Ok(_) if !self.allow.neg_mru => CiVerdict::Reject,
                Ok(mru) if mru < MIN_MRU => CiVerdict::Nak(MIN_MRU.to_be_bytes().to_vec()),
                Ok(mru) if mru > self.allow.mru => {
                    CiVerdict::Nak(self.allow.mru.to_be_bytes().to_vec())
                }
                Ok(mru) => {
                    self.his.neg_mru = true;
                    self.his.mru = mru;
                    CiVerdict::Ack
                }
                Err(_) => CiVerdict::Reject,
            },
            opt::ASYNCMAP => match ci::long_value(value) {
                Ok(_) if !self.allow.neg_asyncmap => CiVerdict::Reject,
                Ok(map) if self.allow.asyncmap & !map != 0 => {
                    CiVerdict::Nak((self.allow.asyncmap | map).to_be_bytes().to_vec())
                }
                Ok(map) => {
                    self.his.neg_asyncmap = true;
                    self.his.asyncmap = map;
                    CiVerdict::Ack
                }
                Err(_) => CiVerdict::Reject,
            },
            opt::AUTH_PROTOCOL => self.judge_auth(value),
            opt::QUALITY_PROTOCOL => match parse_quality(value) {
                Ok(_) if !self.allow.neg_lqr => CiVerdict::Reject,
                Ok((protocol, _)) if protocol != protocols::LQR => {
                    CiVerdict::Nak(lqr_value(self.allow.lqr_period))
                }
                Ok((_, period)) => {
                    self.his.neg_lqr = true;
                    self.his.lqr_period = period;
                    CiVerdict::Ack
                }
                Err(_) => CiVerdict::Reject,
            },
            opt::MAGIC_NUMBER => match ci::long_value(value) {
                Ok(_) if !(self.allow.neg_magic || self.got.neg_magic) => CiVerdict::Reject,
                Ok(magic) if self.got.neg_magic && magic == self.got.magic => {
                    // Our own magic number: probably a loop
                    self.got.numloops += 1;
                    debug!("LCP: peer magic equals ours ({} collisions)", self.got.numloops);
                    return (CiVerdict::Nak(new_magic().to_be_bytes().to_vec()), true);
                }
                Ok(magic) => {
                    self.his.neg_magic = true;
                    self.his.magic = magic;
                    CiVerdict::Ack
                }
                Err(_) => CiVerdict::Reject,
            },
            opt::PFC => {
                if self.allow.neg_pcomp && value.is_empty() {
                    self.his.neg_pcomp = true;
                    CiVerdict::Ack
                } else {
                    CiVerdict::Reject
                }
            }
            opt::ACFC => {
                if self.allow.neg_accomp && value.is_empty() {
                    self.his.neg_accomp = true;
                    CiVerdict::Ack
                } else {
                    CiVerdict::Reject
                }
            }
            _ => CiVerdict::Reject,
        };
        (verdict, false)
    }

    /// The peer asks us to authenticate ourselves with some protocol
    fn judge_auth(&mut self, value: &[u8]) -> CiVerdict {
        let preferred = if self.allow.neg_chap {
            AuthType::Chap(auth::CHAP_MD5)
        } else {
            AuthType::Pap
        };

        let Ok((protocol, rest)) = parse_auth(value) else {
            return CiVerdict::Reject;
        };
        if !(self.allow.neg_upap || self.allow.neg_chap) {
            return CiVerdict::Reject;
        }

        match protocol {
            auth::PAP => {
                if self.his.neg_chap || !rest.is_empty() {
                    CiVerdict::Reject
                } else if !self.allow.neg_upap || (self.want.neg_chap && self.allow.neg_chap) {
                    // CHAP required here, so steer the peer away from PAP
                    CiVerdict::Nak(auth_value(AuthType::Chap(auth::CHAP_MD5)))
                } else {
                    self.his.neg_upap = true;
                    CiVerdict::Ack
                }
            }
            auth::CHAP => {
                if self.his.neg_upap || rest.len() != 1 {
                    CiVerdict::Reject
                } else if !self.allow.neg_chap {
                    CiVerdict::Nak(auth_value(AuthType::Pap))
                } else if rest[0] != auth::CHAP_MD5 {
                    CiVerdict::Nak(auth_value(AuthType::Chap(auth::CHAP_MD5)))
                } else {
                    self.his.neg_chap = true;
                    self.his.chap_mdtype = rest[0];
                    CiVerdict::Ack
                }
            }
            _ => CiVerdict::Nak(auth_value(preferred)),
        }
    }
}

impl FsmCallbacks for LcpNegotiation {
    fn resetci(&mut self) {
        self.got = self.want.clone();
        self.got.magic = new_magic();
        self.got.numloops = 0;
    }

    fn cilen(&self) -> usize {
        ci::cilen(&descriptors(), &self.got)
    }

    fn addci(&self, buf: &mut Vec<u8>) {
        ci::add(&descriptors(), &self.got, buf);
    }

    fn ackci(&self, data: &[u8]) -> bool {
        ci::ack(&descriptors(), &self.got, data)
    }

    fn nakci(&mut self, io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition> {
        let next = ci::nak(&descriptors(), &self.got, data)?;
        if !commit {
            return Ok(NakDisposition::Resend);
        }
        self.got = next;

        if self.loopback_fail > 0 && self.got.numloops >= self.loopback_fail {
            warn!("Serial line is looped back.");
            io.notify(Notice::Status(ExitStatus::Loopback));
            return Ok(NakDisposition::Close("Loopback detected".to_string()));
        }
        Ok(NakDisposition::Resend)
    }

    fn rejci(&mut self, _io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition> {
        let next = ci::reject(&descriptors(), &self.got, data)?;
        if commit {
            self.got = next;
        }
        Ok(NakDisposition::Resend)
    }

    fn reqci(&mut self, _io: &mut Io, data: &[u8], reject_if_disagree: bool) -> (u8, Vec<u8>) {
        self.his = LcpOptions::default();
        let mut reply = ReplyBuilder::new(reject_if_disagree);

        let mut iter = OptionIter::new(data);
        for opt in iter.by_ref() {
            let (verdict, exempt) = self.judge(opt.kind, opt.value);
            if verdict != CiVerdict::Ack {
                debug!("LCP: peer option {} len {}: {:?}", opt.kind, opt.raw.len(), verdict);
            }
            reply.push(opt.kind, opt.raw, verdict, exempt);
        }
        if !iter.rest().is_empty() {
            debug!("LCP: malformed options in Configure-Request");
            reply.push_malformed(iter.rest());
        }

        reply.finish()
    }

    fn up(&mut self, io: &mut Io) {
        let params = self.link_params();
        info!(
            "LCP: link up, mtu {} mru {}, local auth {:?}, peer auth {:?}",
            params.mtu,
            params.mru,
            self.got.auth_type(),
            self.his.auth_type()
        );
        let magic = self.our_magic();
        self.echo.start(io, magic);
        io.notify(Notice::LinkUp(params));
    }

    fn down(&mut self, io: &mut Io) {
        self.echo.stop(io);
        io.notify(Notice::LinkDown);
    }

    fn starting(&mut self, io: &mut Io) {
        io.notify(Notice::LinkStarting);
    }

    fn finished(&mut self, io: &mut Io) {
        io.notify(Notice::LinkFinished);
    }

    fn extcode(&mut self, io: &mut Io, state: State, code: u8, id: u8, data: &[u8]) -> bool {
        match code {
            codes::PROTOCOL_REJECT => {
                if state != State::Opened {
                    debug!("LCP: Protocol-Reject discarded in state {}", state);
                    return true;
                }
                match wire::rejected_protocol(data) {
                    Ok(protocol) => io.notify(Notice::ProtocolRejected(protocol)),
                    Err(e) => debug!("LCP: {}", e),
                }
            }
            codes::ECHO_REQUEST => {
                if state == State::Opened {
                    let reply = wire::echo_reply(id, self.our_magic(), data);
                    io.send(protocols::LCP, &reply);
                }
            }
            codes::ECHO_REPLY => {
                if state == State::Opened {
                    let ours = self.got.neg_magic.then_some(self.got.magic);
                    self.echo.reply_received(io, data, ours);
                }
            }
            codes::DISCARD_REQUEST => {}
            _ => return false,
        }
        true
    }
}

/// LCP instance for one link
#[derive(Debug)]
pub struct Lcp {
    fsm: Fsm,
    neg: LcpNegotiation,
}

impl Lcp {
    pub fn new(config: &LcpConfig, auth_config: &AuthConfig, flags: FsmFlags) -> Self {
        let want = LcpOptions {
            neg_mru: true,
            mru: config.mru,
            neg_asyncmap: true,
            asyncmap: config.asyncmap,
            neg_upap: auth_config.require_pap,
            neg_chap: auth_config.require_chap,
            chap_mdtype: auth::CHAP_MD5,
            neg_magic: config.magic,
            magic: 0,
            neg_pcomp: config.pcomp,
            neg_accomp: config.accomp,
            neg_lqr: config.lqr_period > 0,
            lqr_period: config.lqr_period,
            numloops: 0,
        };
        let allow = LcpOptions {
            mru: config.mru_ceiling,
            neg_upap: !auth_config.refuse_pap,
            neg_chap: !auth_config.refuse_chap,
            ..want.clone()
        };

        let mut fsm = Fsm::new(protocols::LCP, "LCP", config.fsm);
        fsm.set_flags(flags);

        Self {
            fsm,
            neg: LcpNegotiation {
                got: want.clone(),
                want,
                allow,
                his: LcpOptions::default(),
                echo: Echo::new(config.echo_interval, config.echo_failure),
                loopback_fail: config.loopback_fail,
            },
        }
    }

    pub fn state(&self) -> State {
        self.fsm.state()
    }

    /// Options we negotiated for our side
    pub fn got(&self) -> &LcpOptions {
        &self.neg.got
    }

    /// Options the peer negotiated
    pub fn his(&self) -> &LcpOptions {
        &self.neg.his
    }

    /// Largest packet the peer accepts
    pub fn peer_mru(&self) -> u16 {
        self.neg.his.effective_mru()
    }

    #[cfg(test)]
    /// Our magic number, 0 if not negotiated
    pub fn magic(&self) -> u32 {
        self.neg.our_magic()
    }

    #[cfg(test)]
    pub fn echos_pending(&self) -> u32 {
        self.neg.echo.pending()
    }

    pub fn open(&mut self, io: &mut Io) {
        self.fsm.open(&mut self.neg, io);
    }

    pub fn close(&mut self, io: &mut Io, reason: &str) {
        let old = self.fsm.state();
        self.fsm.close(&mut self.neg, io, reason);
        if old == State::Stopped
            && self
                .fsm
                .flags()
                .intersects(FsmFlags::PASSIVE | FsmFlags::SILENT)
        {
            // Nobody will ever answer; finish now so the link can exit
            self.fsm.force_finished(&mut self.neg, io);
        }
    }

    pub fn lowerup(&mut self, io: &mut Io) {
        self.fsm.lowerup(&mut self.neg, io);
    }

    pub fn lowerdown(&mut self, io: &mut Io) {
        self.fsm.lowerdown(&mut self.neg, io);
    }

    pub fn input(&mut self, io: &mut Io, packet: &[u8]) {
        self.fsm.input(&mut self.neg, io, packet);
    }

    /// The peer rejected LCP itself
    pub fn protocol_rejected(&mut self, io: &mut Io) {
        self.fsm.protreject(&mut self.neg, io);
    }

    pub fn timeout(&mut self, io: &mut Io, key: Timeout) {
        match key {
            Timeout::Fsm(_) => self.fsm.timeout(&mut self.neg, io),
            Timeout::LcpEcho => self.echo_timeout(io),
            _ => {}
        }
    }

    fn echo_timeout(&mut self, io: &mut Io) {
        if self.neg.echo.peer_dead() {
            info!("No response to {} echo-requests", self.neg.echo.pending());
            info!("Serial link appears to be disconnected.");
            io.notify(Notice::Status(ExitStatus::PeerDead));
            self.close(io, "Peer not responding");
            self.neg.echo.clear_pending();
        }
        if self.fsm.state() == State::Opened {
            let magic = self.neg.our_magic();
            self.neg.echo.tick(io, magic);
        }
    }

    /// Reject a frame for a protocol we don't run
    pub fn send_protocol_reject(&mut self, io: &mut Io, protocol: u16, payload: &[u8]) {
        debug!("LCP: Protocol-Reject for protocol 0x{:04x}", protocol);
        let id = self.fsm.next_id();
        let packet = wire::protocol_reject(id, protocol, payload, self.peer_mru());
        io.send(protocols::LCP, &packet);
        io.stats().protocol_rejects.inc();
    }
}
