//! PPP link session
//!
//! A [`Link`] owns every protocol running over one PPP link and moves the
//! link through its phases: LCP establishes the link, the authenticators
//! run in whichever directions LCP agreed on, and then the network control
//! protocols are opened. Protocol code reports back through [`Notice`]s,
//! which the link works off after each entry point returns.
//!
//! The link never blocks and never reads a clock. The caller feeds it
//! frames, expired timers and administrative events, and collects the
//! resulting [`Action`]s.

mod phase;

pub use phase::Phase;

use crate::auth::{
    AuthConfig, AuthContext, Authorization, Chap, LoginGuard, Pap, PendingAuth, Secrets, WILDCARD,
};
use crate::error::ExitStatus;
use crate::event::{Action, Io, LinkParams, Notice, Timeout};
use crate::fsm::{FsmFlags, State};
use crate::ipcp::{Ipcp, IpcpConfig, NetworkProtocol};
use crate::lcp::{Lcp, LcpConfig};
use crate::protocol::ppp::{protocol_name, protocols, PppFrame};
use crate::telemetry::LinkStats;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// External scripts run on link events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scripts {
    /// After the peer has authenticated itself
    pub auth_up: Option<PathBuf>,
    /// When an authenticated link goes down
    pub auth_down: Option<PathBuf>,
    pub ip_up: Option<PathBuf>,
    pub ip_down: Option<PathBuf>,
}

/// Everything a link needs to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Our name for authentication
    pub name: String,
    /// Name we authenticate ourselves with
    pub user: String,
    pub password: String,
    /// Reopen the link after it terminates
    pub persist: bool,
    /// Wait before reopening
    pub holdoff: Duration,
    pub passive: bool,
    pub silent: bool,
    pub lcp: LcpConfig,
    pub auth: AuthConfig,
    pub secrets: Secrets,
    /// None leaves IPCP disabled
    pub ipcp: Option<IpcpConfig>,
    pub scripts: Scripts,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name: "pppd".to_string(),
            user: String::new(),
            password: String::new(),
            persist: false,
            holdoff: Duration::ZERO,
            passive: false,
            silent: false,
            lcp: LcpConfig::default(),
            auth: AuthConfig::default(),
            secrets: Secrets::default(),
            ipcp: Some(IpcpConfig::default()),
            scripts: Scripts::default(),
        }
    }
}

fn auth_context<'a>(config: &'a LinkConfig, guard: &'a mut LoginGuard) -> AuthContext<'a> {
    AuthContext {
        our_name: &config.name,
        user: &config.user,
        password: &config.password,
        secrets: &config.secrets,
        guard,
    }
}

/// One PPP link and every protocol running over it
#[derive(Debug)]
pub struct Link {
    config: LinkConfig,
    io: Io,
    phase: Phase,
    lcp: Lcp,
    pap: Pap,
    chap: Chap,
    ncps: Vec<Box<dyn NetworkProtocol>>,
    authz: Authorization,
    guard: LoginGuard,
    pending: PendingAuth,
    /// auth-up has run and auth-down is owed
    auth_script_up: bool,
    num_np_open: u32,
    num_np_up: u32,
    status: ExitStatus,
    /// Closed administratively; don't reopen
    user_close: bool,
}

impl Link {
    pub fn new(config: LinkConfig, now: Instant) -> Self {
        Self::with_stats(config, now, Arc::new(LinkStats::new()))
    }

    /// Create a link that counts into shared statistics
    pub fn with_stats(config: LinkConfig, now: Instant, stats: Arc<LinkStats>) -> Self {
        let mut flags = FsmFlags::empty();
        if config.passive {
            flags |= FsmFlags::PASSIVE;
        }
        if config.silent {
            flags |= FsmFlags::SILENT;
        }

        let ncps: Vec<Box<dyn NetworkProtocol>> = config
            .ipcp
            .iter()
            .map(|c| Box::new(Ipcp::new(c)) as Box<dyn NetworkProtocol>)
            .collect();

        Self {
            lcp: Lcp::new(&config.lcp, &config.auth, flags),
            pap: Pap::new(&config.auth),
            chap: Chap::new(&config.auth),
            ncps,
            io: Io::new(now, stats),
            phase: Phase::Dead,
            authz: Authorization::new(),
            guard: LoginGuard::new(),
            pending: PendingAuth::empty(),
            auth_script_up: false,
            num_np_open: 0,
            num_np_up: 0,
            status: ExitStatus::Ok,
            user_close: false,
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Why the link ended, or would end now
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn lcp(&self) -> &Lcp {
        &self.lcp
    }

    /// Authentications still outstanding
    pub fn pending_auth(&self) -> PendingAuth {
        self.pending
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authz
    }

    /// State of the network control protocol `protocol`, if it is enabled
    pub fn ncp_state(&self, protocol: u16) -> Option<State> {
        self.ncps
            .iter()
            .find(|ncp| ncp.protocol() == protocol)
            .map(|ncp| ncp.state())
    }

    pub fn stats(&self) -> &LinkStats {
        self.io.stats()
    }

    /// When [`handle_timeouts`](Self::handle_timeouts) next has work
    pub fn next_deadline(&self) -> Option<Instant> {
        self.io.next_deadline()
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.io.drain_actions()
    }

    /// Bring the link up
    pub fn open(&mut self, now: Instant) {
        self.io.set_now(now);
        self.user_close = false;
        self.start();
        self.process_notices();
    }

    /// Administrative close
    pub fn close(&mut self, now: Instant, reason: &str) {
        self.io.set_now(now);
        self.user_close = true;
        match self.phase {
            Phase::Dead => {}
            Phase::Holdoff => {
                self.status = ExitStatus::UserRequest;
                self.io.untimeout(Timeout::Holdoff);
                self.new_phase(Phase::Dead);
                self.io.action(Action::Exit(self.status));
            }
            _ => {
                self.status = ExitStatus::UserRequest;
                self.close_lcp(reason);
            }
        }
        self.process_notices();
    }

    /// The lower layer went away under us
    pub fn lower_down(&mut self, now: Instant) {
        self.io.set_now(now);
        if matches!(self.phase, Phase::Dead | Phase::Holdoff) {
            return;
        }
        info!("Lower layer down");
        self.status = ExitStatus::Hangup;
        self.link_terminated();
        self.process_notices();
    }

    /// A frame arrived: protocol field followed by the information field
    pub fn input(&mut self, now: Instant, frame: &[u8]) {
        self.io.set_now(now);
        self.io.stats().record_rx(frame.len());
        match PppFrame::parse(frame) {
            Ok(frame) => self.demux(frame.protocol(), frame.payload()),
            Err(e) => {
                debug!("{}", e);
                self.io.stats().bad_packets.inc();
            }
        }
        self.process_notices();
    }

    /// Run every timer that has expired by `now`
    pub fn handle_timeouts(&mut self, now: Instant) {
        self.io.set_now(now);
        while let Some(key) = self.io.pop_expired() {
            self.dispatch_timeout(key);
            self.process_notices();
        }
    }

    fn demux(&mut self, protocol: u16, payload: &[u8]) {
        if protocol != protocols::LCP && self.lcp.state() != State::Opened {
            debug!(
                "Discarded non-LCP frame (0x{:04x}) when LCP not open",
                protocol
            );
            self.io.stats().discarded.inc();
            return;
        }
        if !self.phase.admits(protocol) {
            debug!(
                "Discarded {} frame (0x{:04x}) in phase {}",
                protocol_name(protocol),
                protocol,
                self.phase
            );
            self.io.stats().discarded.inc();
            return;
        }

        match protocol {
            protocols::LCP => self.lcp.input(&mut self.io, payload),
            protocols::PAP => {
                let mut ctx = auth_context(&self.config, &mut self.guard);
                self.pap.input(&mut self.io, &mut ctx, payload);
            }
            protocols::CHAP => {
                let mut ctx = auth_context(&self.config, &mut self.guard);
                self.chap.input(&mut self.io, &mut ctx, payload);
            }
            protocols::LQR if self.lcp.got().neg_lqr || self.lcp.his().neg_lqr => {
                debug!("LQR report ignored");
            }
            _ => self.demux_network(protocol, payload),
        }
    }

    fn demux_network(&mut self, protocol: u16, payload: &[u8]) {
        if let Some(ncp) = self.ncps.iter_mut().find(|ncp| ncp.protocol() == protocol) {
            ncp.input(&mut self.io, &self.authz, payload);
            return;
        }
        if let Some(ncp) = self.ncps.iter().find(|ncp| ncp.data_protocol() == protocol) {
            if ncp.state() == State::Opened {
                self.io.action(Action::Deliver {
                    protocol,
                    payload: payload.to_vec(),
                });
            } else {
                debug!("{} frame dropped, {} not open", protocol_name(protocol), ncp.name());
                self.io.stats().discarded.inc();
            }
            return;
        }

        debug!("Unsupported protocol 0x{:04x} received", protocol);
        self.lcp.send_protocol_reject(&mut self.io, protocol, payload);
    }

    fn dispatch_timeout(&mut self, key: Timeout) {
        match key {
            Timeout::Fsm(protocols::LCP) | Timeout::LcpEcho => self.lcp.timeout(&mut self.io, key),
            Timeout::Fsm(protocol) => {
                if let Some(ncp) = self.ncps.iter_mut().find(|ncp| ncp.protocol() == protocol) {
                    ncp.timeout(&mut self.io, &self.authz);
                }
            }
            Timeout::PapClient | Timeout::PapServer | Timeout::DelayedReply(protocols::PAP) => {
                self.pap.timeout(&mut self.io, key)
            }
            Timeout::DelayedReply(_) => {}
            Timeout::ChapChallenge | Timeout::ChapRechallenge => {
                self.chap.timeout(&mut self.io, key)
            }
            Timeout::Holdoff => {
                if self.phase == Phase::Holdoff {
                    self.start();
                }
            }
        }
    }

    fn process_notices(&mut self) {
        while let Some(notice) = self.io.pop_notice() {
            self.handle_notice(notice);
        }
    }

    fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::LinkUp(params) => {
                self.io.action(Action::ConfigureLink(params));
                self.link_established();
            }
            Notice::LinkDown => {
                self.io.action(Action::ConfigureLink(LinkParams::default()));
                self.link_down();
            }
            Notice::LinkStarting => {}
            Notice::LinkFinished => self.link_terminated(),
            Notice::ProtocolRejected(protocol) => self.protocol_rejected(protocol),
            Notice::AuthPeerSuccess {
                protocol,
                name,
                addresses,
            } => {
                self.authz.grant(&name, addresses);
                let bit = if protocol == protocols::CHAP {
                    PendingAuth::CHAP_PEER
                } else {
                    PendingAuth::PAP_PEER
                };
                self.auth_done(bit);
            }
            Notice::AuthPeerFailure { protocol } => {
                warn!("{} authentication of peer failed", protocol_name(protocol));
                self.status = ExitStatus::PeerAuthFailed;
                self.close_lcp("Authentication failed");
            }
            Notice::AuthWithPeerSuccess { protocol } => {
                info!("{} authentication succeeded", protocol_name(protocol));
                let bit = if protocol == protocols::CHAP {
                    PendingAuth::CHAP_WITHPEER
                } else {
                    PendingAuth::PAP_WITHPEER
                };
                self.auth_done(bit);
            }
            Notice::AuthWithPeerFailure { .. } => {
                self.status = ExitStatus::AuthTopeerFailed;
                self.close_lcp("Failed to authenticate ourselves to peer");
            }
            Notice::NetworkUp(protocol) => {
                if self.num_np_up == 0 {
                    // First network protocol up: the link did its job
                    self.status = ExitStatus::Ok;
                }
                self.num_np_up += 1;
                debug!("{} up, {} running", protocol_name(protocol), self.num_np_up);
            }
            Notice::NetworkDown(_) => self.num_np_up = self.num_np_up.saturating_sub(1),
            Notice::NetworkFinished(protocol) => {
                debug!("{} finished", protocol_name(protocol));
                self.num_np_open = self.num_np_open.saturating_sub(1);
                if self.num_np_open == 0 && self.phase == Phase::Network {
                    self.close_lcp("No network protocols running");
                }
            }
            Notice::IpUp { local, remote, dns } => {
                let mut args = vec![local.to_string(), remote.to_string()];
                args.extend(dns.iter().map(Ipv4Addr::to_string));
                let script = self.config.scripts.ip_up.clone();
                self.io.action(Action::IpUp { local, remote, dns });
                self.run_script(script, args);
            }
            Notice::IpDown => {
                let script = self.config.scripts.ip_down.clone();
                self.io.action(Action::IpDown);
                self.run_script(script, Vec::new());
            }
            Notice::Status(status) => self.status = status,
            Notice::Fatal(status) => {
                error!("Exiting: {}", status);
                self.status = status;
                self.new_phase(Phase::Dead);
                self.io.action(Action::Exit(status));
            }
        }
    }

    fn new_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("phase {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn start(&mut self) {
        self.status = ExitStatus::NegotiationFailed;
        self.new_phase(Phase::Initialize);
        self.lcp.open(&mut self.io);
        self.new_phase(Phase::Establish);
        self.lcp.lowerup(&mut self.io);
    }

    fn close_lcp(&mut self, reason: &str) {
        if self.phase != Phase::Dead {
            self.new_phase(Phase::Terminate);
        }
        self.lcp.close(&mut self.io, reason);
    }

    fn run_script(&mut self, path: Option<PathBuf>, args: Vec<String>) {
        if let Some(path) = path {
            debug!("running {} {:?}", path.display(), args);
            self.io.action(Action::RunScript { path, args });
        }
    }

    /// LCP is up: start authentication in each direction LCP agreed on
    fn link_established(&mut self) {
        self.pap.lowerup(&mut self.io);
        self.chap.lowerup(&mut self.io);
        for ncp in self.ncps.iter_mut() {
            ncp.lowerup(&mut self.io, &self.authz);
        }

        let got = self.lcp.got().clone();
        let his = self.lcp.his().clone();

        if self.config.auth.auth_required() && !(got.neg_chap || got.neg_upap) {
            if self.config.auth.null_login && self.null_login() {
                info!("Peer accepted with null login");
            } else {
                warn!("peer refused to authenticate: terminating link");
                self.status = ExitStatus::PeerAuthFailed;
                self.close_lcp("peer refused to authenticate");
                return;
            }
        }

        self.new_phase(Phase::Authenticate);
        let mut pending = PendingAuth::empty();

        if got.neg_chap {
            self.chap.auth_peer(&mut self.io, &self.config.name);
            pending |= PendingAuth::CHAP_PEER;
        } else if got.neg_upap {
            self.pap.auth_peer(&mut self.io);
            pending |= PendingAuth::PAP_PEER;
        }

        if his.neg_chap {
            self.chap.auth_withpeer();
            pending |= PendingAuth::CHAP_WITHPEER;
        } else if his.neg_upap {
            let password = auth_context(&self.config, &mut self.guard)
                .our_secret(WILDCARD)
                .unwrap_or_else(|| {
                    error!("No secret found for PAP login");
                    String::new()
                });
            self.pap
                .auth_withpeer(&mut self.io, &self.config.user, &password);
            pending |= PendingAuth::PAP_WITHPEER;
        }

        self.pending = pending;
        if pending.is_empty() {
            self.network_phase();
        }
    }

    /// Accept a peer that won't authenticate if the empty identity is valid
    fn null_login(&mut self) -> bool {
        let addresses = auth_context(&self.config, &mut self.guard).check_passwd("", "");
        match addresses {
            Some(addresses) => {
                self.authz.grant("", addresses);
                true
            }
            None => false,
        }
    }

    fn auth_done(&mut self, bit: PendingAuth) {
        if self.phase != Phase::Authenticate {
            return;
        }
        self.pending.remove(bit);
        if self.pending.is_empty() {
            self.network_phase();
        }
    }

    fn network_phase(&mut self) {
        let got = self.lcp.got();
        if got.neg_chap || got.neg_upap {
            let peer = self.authz.peer_name().unwrap_or_default().to_string();
            let script = self.config.scripts.auth_up.clone();
            self.run_script(script, vec![peer, self.config.user.clone()]);
            self.auth_script_up = true;
        }

        self.new_phase(Phase::Network);
        self.num_np_open = 0;
        for ncp in self.ncps.iter_mut() {
            ncp.open(&mut self.io, &self.authz);
            self.num_np_open += 1;
        }
        if self.num_np_open == 0 {
            self.close_lcp("No network protocols running");
        }
    }

    /// LCP left Opened: take everything above it down
    fn link_down(&mut self) {
        if self.auth_script_up {
            self.auth_script_up = false;
            let peer = self.authz.peer_name().unwrap_or_default().to_string();
            let script = self.config.scripts.auth_down.clone();
            self.run_script(script, vec![peer, self.config.user.clone()]);
        }

        self.pap.lowerdown(&mut self.io);
        self.chap.lowerdown(&mut self.io);
        for ncp in self.ncps.iter_mut() {
            ncp.lowerdown(&mut self.io, &self.authz);
            ncp.close(&mut self.io, &self.authz, "LCP down");
        }
        self.num_np_open = 0;
        self.num_np_up = 0;
        self.pending = PendingAuth::empty();
        self.authz.revoke();

        if matches!(self.phase, Phase::Authenticate | Phase::Network) {
            self.new_phase(Phase::Establish);
        }
    }

    /// LCP is done with the lower layer
    fn link_terminated(&mut self) {
        if matches!(self.phase, Phase::Dead | Phase::Holdoff) {
            return;
        }
        self.new_phase(Phase::Dead);
        self.lcp.lowerdown(&mut self.io);
        info!("Connection terminated: {}", self.status);

        if self.config.persist && !self.user_close {
            if self.config.holdoff.is_zero() {
                self.start();
            } else {
                self.new_phase(Phase::Holdoff);
                self.io.timeout(Timeout::Holdoff, self.config.holdoff);
            }
        } else {
            self.io.action(Action::Exit(self.status));
        }
    }

    fn protocol_rejected(&mut self, protocol: u16) {
        match protocol {
            protocols::LCP => {
                error!("Received Protocol-Reject for LCP!");
                self.lcp.protocol_rejected(&mut self.io);
            }
            protocols::PAP => self.pap.protrej(&mut self.io),
            protocols::CHAP => self.chap.protrej(&mut self.io),
            _ => {
                let ncp = self
                    .ncps
                    .iter_mut()
                    .find(|ncp| ncp.protocol() == protocol || ncp.data_protocol() == protocol);
                match ncp {
                    Some(ncp) => {
                        warn!("Protocol-Reject for {}", ncp.name());
                        ncp.protrej(&mut self.io, &self.authz);
                    }
                    None => warn!(
                        "Protocol-Reject for unsupported protocol 0x{:04x}",
                        protocol
                    ),
                }
            }
        }
    }
}
