//! Password Authentication Protocol - RFC 1334
//!
//! The client side sends the configured user and password until the peer
//! answers or we run out of transmissions. The server side waits for the
//! peer's Authenticate-Request and checks it against the secrets store.

use super::{AuthConfig, AuthContext, Verdict};
use crate::error::ExitStatus;
use crate::event::{Io, Notice, Timeout};
use crate::protocol::pap::{self as wire, codes, PapPacket};
use crate::protocol::ppp::protocols;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MSG_LOGIN_OK: &str = "Login ok";
const MSG_LOGIN_INCORRECT: &str = "Login incorrect";

/// Our side: authenticating ourselves to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Lower layer down, not requested
    Initial,
    /// Lower layer up, not requested
    Closed,
    /// Requested, waiting for the lower layer
    Pending,
    /// Authenticate-Request sent
    AuthReq,
    Open,
    BadAuth,
}

/// Peer's side: the peer authenticating itself to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initial,
    Closed,
    Pending,
    /// Waiting for an Authenticate-Request
    Listen,
    Open,
    BadAuth,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// PAP instance for one link
#[derive(Debug)]
pub struct Pap {
    user: String,
    password: String,
    client: ClientState,
    server: ServerState,
    id: u8,
    transmits: u32,
    /// Nak held back by the login guard
    delayed_nak: Option<u8>,
    timeout: Duration,
    max_transmits: u32,
    request_timeout: Duration,
}

impl Pap {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            client: ClientState::Initial,
            server: ServerState::Initial,
            id: 0,
            transmits: 0,
            delayed_nak: None,
            timeout: config.pap_timeout,
            max_transmits: config.pap_max_transmits,
            request_timeout: config.pap_request_timeout,
        }
    }

    #[cfg(test)]
    pub fn client_state(&self) -> ClientState {
        self.client
    }

    #[cfg(test)]
    pub fn server_state(&self) -> ServerState {
        self.server
    }

    /// Start authenticating ourselves as `user`
    pub fn auth_withpeer(&mut self, io: &mut Io, user: &str, password: &str) {
        self.user = user.to_string();
        self.password = password.to_string();
        self.transmits = 0;

        if matches!(self.client, ClientState::Initial | ClientState::Pending) {
            self.client = ClientState::Pending;
            return;
        }
        self.send_request(io);
    }

    /// Start waiting for the peer to authenticate itself
    pub fn auth_peer(&mut self, io: &mut Io) {
        if matches!(self.server, ServerState::Initial | ServerState::Pending) {
            self.server = ServerState::Pending;
            return;
        }
        self.listen(io);
    }

    pub fn lowerup(&mut self, io: &mut Io) {
        match self.client {
            ClientState::Initial => self.client = ClientState::Closed,
            ClientState::Pending => self.send_request(io),
            _ => {}
        }
        match self.server {
            ServerState::Initial => self.server = ServerState::Closed,
            ServerState::Pending => self.listen(io),
            _ => {}
        }
    }

    pub fn lowerdown(&mut self, io: &mut Io) {
        io.untimeout(Timeout::PapClient);
        io.untimeout(Timeout::PapServer);
        io.untimeout(Timeout::DelayedReply(protocols::PAP));
        self.delayed_nak = None;
        self.client = ClientState::Initial;
        self.server = ServerState::Initial;
    }

    /// The peer rejected PAP
    pub fn protrej(&mut self, io: &mut Io) {
        if self.client == ClientState::AuthReq {
            error!("PAP authentication failed due to protocol-reject");
            io.notify(Notice::AuthWithPeerFailure {
                protocol: protocols::PAP,
            });
        }
        if self.server == ServerState::Listen {
            error!("PAP authentication of peer failed (protocol-reject)");
            io.notify(Notice::AuthPeerFailure {
                protocol: protocols::PAP,
            });
        }
        self.lowerdown(io);
    }

    pub fn timeout(&mut self, io: &mut Io, key: Timeout) {
        match key {
            Timeout::PapClient => self.request_timeout_expired(io),
            Timeout::PapServer => self.listen_timeout_expired(io),
            Timeout::DelayedReply(_) => self.send_delayed_nak(io),
            _ => {}
        }
    }

    pub fn input(&mut self, io: &mut Io, ctx: &mut AuthContext<'_>, packet: &[u8]) {
        let pkt = match PapPacket::parse(packet) {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("PAP: {}", e);
                io.stats().bad_packets.inc();
                return;
            }
        };

        match pkt.code() {
            codes::AUTHENTICATE_REQUEST => self.rauthreq(io, ctx, &pkt),
            codes::AUTHENTICATE_ACK => self.rauthack(io, &pkt),
            codes::AUTHENTICATE_NAK => self.rauthnak(io, &pkt),
            code => debug!("PAP: unknown code {} dropped", code),
        }
    }

    fn rauthreq(&mut self, io: &mut Io, ctx: &mut AuthContext<'_>, pkt: &PapPacket<'_>) {
        let id = pkt.identifier();
        match self.server {
            ServerState::Listen if self.delayed_nak.is_some() => return,
            ServerState::Listen => {}
            ServerState::Open => {
                io.send(
                    protocols::PAP,
                    &wire::authenticate_response(id, true, MSG_LOGIN_OK),
                );
                return;
            }
            ServerState::BadAuth => {
                io.send(
                    protocols::PAP,
                    &wire::authenticate_response(id, false, MSG_LOGIN_INCORRECT),
                );
                return;
            }
            _ => return,
        }

        let (user, password) = match pkt.credentials() {
            Ok(creds) => creds,
            Err(e) => {
                debug!("PAP: {}", e);
                io.stats().bad_packets.inc();
                return;
            }
        };
        let user = String::from_utf8_lossy(user).into_owned();
        let password = String::from_utf8_lossy(password);

        if let Some(addresses) = ctx.check_passwd(&user, &password) {
            ctx.guard.record_success();
            io.untimeout(Timeout::PapServer);
            io.send(
                protocols::PAP,
                &wire::authenticate_response(id, true, MSG_LOGIN_OK),
            );
            self.server = ServerState::Open;
            info!("PAP peer authentication succeeded for {:?}", user);
            io.notify(Notice::AuthPeerSuccess {
                protocol: protocols::PAP,
                name: user,
                addresses,
            });
            return;
        }

        warn!("PAP peer authentication failed for {:?}", user);
        match ctx.guard.record_failure() {
            Verdict::Reply => self.fail_peer(io, id),
            Verdict::Delay(delay) => {
                io.untimeout(Timeout::PapServer);
                self.delayed_nak = Some(id);
                io.timeout(Timeout::DelayedReply(protocols::PAP), delay);
            }
            Verdict::Fatal => {
                self.fail_peer(io, id);
                io.notify(Notice::Fatal(ExitStatus::TooManyLoginFailures));
            }
        }
    }

    fn fail_peer(&mut self, io: &mut Io, id: u8) {
        io.untimeout(Timeout::PapServer);
        io.send(
            protocols::PAP,
            &wire::authenticate_response(id, false, MSG_LOGIN_INCORRECT),
        );
        self.server = ServerState::BadAuth;
        io.notify(Notice::AuthPeerFailure {
            protocol: protocols::PAP,
        });
    }

    fn send_delayed_nak(&mut self, io: &mut Io) {
        if let Some(id) = self.delayed_nak.take() {
            self.fail_peer(io, id);
        }
    }

    fn rauthack(&mut self, io: &mut Io, pkt: &PapPacket<'_>) {
        if self.client != ClientState::AuthReq || pkt.identifier() != self.id {
            return;
        }
        io.untimeout(Timeout::PapClient);
        let message = pkt.message();
        if !message.is_empty() {
            info!("Remote message: {}", String::from_utf8_lossy(message));
        }
        self.client = ClientState::Open;
        io.notify(Notice::AuthWithPeerSuccess {
            protocol: protocols::PAP,
        });
    }

    fn rauthnak(&mut self, io: &mut Io, pkt: &PapPacket<'_>) {
        if self.client != ClientState::AuthReq || pkt.identifier() != self.id {
            return;
        }
        io.untimeout(Timeout::PapClient);
        let message = pkt.message();
        if !message.is_empty() {
            info!("Remote message: {}", String::from_utf8_lossy(message));
        }
        error!("PAP authentication failed");
        self.client = ClientState::BadAuth;
        io.notify(Notice::AuthWithPeerFailure {
            protocol: protocols::PAP,
        });
    }

    fn request_timeout_expired(&mut self, io: &mut Io) {
        if self.client != ClientState::AuthReq {
            return;
        }
        if self.transmits >= self.max_transmits {
            error!("No response to PAP authenticate-requests");
            self.client = ClientState::BadAuth;
            io.notify(Notice::AuthWithPeerFailure {
                protocol: protocols::PAP,
            });
            return;
        }
        self.send_request(io);
    }

    fn listen_timeout_expired(&mut self, io: &mut Io) {
        if self.server != ServerState::Listen || self.delayed_nak.is_some() {
            return;
        }
        warn!("Peer did not send a PAP authenticate-request");
        self.server = ServerState::BadAuth;
        io.notify(Notice::AuthPeerFailure {
            protocol: protocols::PAP,
        });
    }

    fn listen(&mut self, io: &mut Io) {
        self.server = ServerState::Listen;
        if !self.request_timeout.is_zero() {
            io.timeout(Timeout::PapServer, self.request_timeout);
        }
    }

    fn send_request(&mut self, io: &mut Io) {
        self.id = self.id.wrapping_add(1);
        io.send(
            protocols::PAP,
            &wire::authenticate_request(self.id, &self.user, &self.password),
        );
        debug!("PAP: sent Authenticate-Request id={} user={:?}", self.id, self.user);
        io.timeout(Timeout::PapClient, self.timeout);
        self.transmits += 1;
        self.client = ClientState::AuthReq;
    }
}
