//! Challenge Handshake Authentication Protocol - RFC 1994
//!
//! Only the MD5 digest is supported. As authenticator we send a random
//! challenge, retransmit it until the peer answers, and optionally
//! rechallenge while the link is up. As peer we answer every challenge
//! with `MD5(id || secret || challenge)`.

use super::{AuthConfig, AuthContext, Verdict};
use crate::error::ExitStatus;
use crate::event::{Io, Notice, Timeout};
use crate::protocol::chap::{self as wire, codes, ChapPacket, MD5_RESPONSE_LEN};
use crate::protocol::ppp::protocols;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIN_CHALLENGE_LEN: usize = 16;
const MAX_CHALLENGE_LEN: usize = 24;

const MSG_SUCCESS: &str = "Access granted";
const MSG_FAILURE: &str = "Access denied";

/// Our side: answering the peer's challenges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initial,
    Closed,
    Pending,
    /// Waiting for a challenge
    Listen,
    /// Response sent
    Response,
    Open,
}

/// Peer's side: challenging the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initial,
    Closed,
    Pending,
    /// First challenge outstanding
    InitialChal,
    Open,
    /// Periodic challenge outstanding
    Rechallenge,
    BadAuth,
}

/// CHAP instance for one link
#[derive(Debug)]
pub struct Chap {
    client: ClientState,
    server: ServerState,
    /// Name we put in our challenges
    our_name: String,
    challenge: Vec<u8>,
    chal_id: u8,
    chal_transmits: u32,
    /// Identifier of the last challenge we answered
    resp_id: u8,
    restart: Duration,
    max_transmits: u32,
    interval: Duration,
}

impl Chap {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            client: ClientState::Initial,
            server: ServerState::Initial,
            our_name: String::new(),
            challenge: Vec::new(),
            chal_id: 0,
            chal_transmits: 0,
            resp_id: 0,
            restart: config.chap_restart,
            max_transmits: config.chap_max_transmits,
            interval: config.chap_interval,
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

    /// Start answering the peer's challenges
    pub fn auth_withpeer(&mut self) {
        if matches!(self.client, ClientState::Initial | ClientState::Pending) {
            self.client = ClientState::Pending;
        } else {
            self.client = ClientState::Listen;
        }
    }

    /// Start challenging the peer in the name of `our_name`
    pub fn auth_peer(&mut self, io: &mut Io, our_name: &str) {
        self.our_name = our_name.to_string();
        if matches!(self.server, ServerState::Initial | ServerState::Pending) {
            self.server = ServerState::Pending;
            return;
        }
        self.new_challenge();
        self.send_challenge(io);
        self.server = ServerState::InitialChal;
    }

    pub fn lowerup(&mut self, io: &mut Io) {
        match self.client {
            ClientState::Initial => self.client = ClientState::Closed,
            ClientState::Pending => self.client = ClientState::Listen,
            _ => {}
        }
        match self.server {
            ServerState::Initial => self.server = ServerState::Closed,
            ServerState::Pending => {
                self.new_challenge();
                self.send_challenge(io);
                self.server = ServerState::InitialChal;
            }
            _ => {}
        }
    }

    pub fn lowerdown(&mut self, io: &mut Io) {
        io.untimeout(Timeout::ChapChallenge);
        io.untimeout(Timeout::ChapRechallenge);
        self.client = ClientState::Initial;
        self.server = ServerState::Initial;
    }

    /// The peer rejected CHAP
    pub fn protrej(&mut self, io: &mut Io) {
        if !matches!(self.server, ServerState::Initial | ServerState::Closed) {
            error!("CHAP authentication of peer failed (protocol-reject)");
            io.notify(Notice::AuthPeerFailure {
                protocol: protocols::CHAP,
            });
        }
        if !matches!(self.client, ClientState::Initial | ClientState::Closed) {
            error!("CHAP authentication failed due to protocol-reject");
            io.notify(Notice::AuthWithPeerFailure {
                protocol: protocols::CHAP,
            });
        }
        self.lowerdown(io);
    }

    pub fn timeout(&mut self, io: &mut Io, key: Timeout) {
        match key {
            Timeout::ChapChallenge => self.challenge_timeout(io),
            Timeout::ChapRechallenge => self.rechallenge(io),
            _ => {}
        }
    }

    pub fn input(&mut self, io: &mut Io, ctx: &mut AuthContext<'_>, packet: &[u8]) {
        let pkt = match ChapPacket::parse(packet) {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("CHAP: {}", e);
                io.stats().bad_packets.inc();
                return;
            }
        };

        match pkt.code() {
            codes::CHALLENGE => self.rchallenge(io, ctx, &pkt),
            codes::RESPONSE => self.rresponse(io, ctx, &pkt),
            codes::SUCCESS => self.rsuccess(io, &pkt),
            codes::FAILURE => self.rfailure(io, &pkt),
            code => debug!("CHAP: unknown code {} dropped", code),
        }
    }

    fn rchallenge(&mut self, io: &mut Io, ctx: &mut AuthContext<'_>, pkt: &ChapPacket<'_>) {
        if matches!(
            self.client,
            ClientState::Initial | ClientState::Closed | ClientState::Pending
        ) {
            debug!("CHAP: challenge received in state {:?}", self.client);
            return;
        }
        let (value, name) = match pkt.value_and_name() {
            Ok(parts) => parts,
            Err(e) => {
                debug!("CHAP: {}", e);
                io.stats().bad_packets.inc();
                return;
            }
        };
        let server = String::from_utf8_lossy(name);

        let secret = ctx.our_secret(&server).unwrap_or_else(|| {
            warn!("No CHAP secret found for authenticating us to {:?}", server);
            String::new()
        });
        let id = pkt.identifier();
        let digest = wire::md5_response(id, secret.as_bytes(), value);
        let our_name = if ctx.user.is_empty() {
            ctx.our_name
        } else {
            ctx.user
        };
        io.send(protocols::CHAP, &wire::response(id, &digest, our_name));
        debug!("CHAP: sent Response id={} to {:?}", id, server);

        self.resp_id = id;
        self.client = ClientState::Response;
    }

    fn rsuccess(&mut self, io: &mut Io, pkt: &ChapPacket<'_>) {
        if self.client != ClientState::Response || pkt.identifier() != self.resp_id {
            debug!("CHAP: unexpected Success in state {:?}", self.client);
            return;
        }
        let message = pkt.message();
        if !message.is_empty() {
            info!("Remote message: {}", String::from_utf8_lossy(message));
        }
        self.client = ClientState::Open;
        io.notify(Notice::AuthWithPeerSuccess {
            protocol: protocols::CHAP,
        });
    }

    fn rfailure(&mut self, io: &mut Io, pkt: &ChapPacket<'_>) {
        if self.client != ClientState::Response || pkt.identifier() != self.resp_id {
            debug!("CHAP: unexpected Failure in state {:?}", self.client);
            return;
        }
        let message = pkt.message();
        if !message.is_empty() {
            info!("Remote message: {}", String::from_utf8_lossy(message));
        }
        error!("CHAP authentication failed");
        self.client = ClientState::Listen;
        io.notify(Notice::AuthWithPeerFailure {
            protocol: protocols::CHAP,
        });
    }

    fn rresponse(&mut self, io: &mut Io, ctx: &mut AuthContext<'_>, pkt: &ChapPacket<'_>) {
        let id = pkt.identifier();
        match self.server {
            ServerState::InitialChal | ServerState::Rechallenge if id == self.chal_id => {}
            ServerState::Open if id == self.chal_id => {
                io.send(protocols::CHAP, &wire::status(id, true, MSG_SUCCESS));
                return;
            }
            ServerState::BadAuth if id == self.chal_id => {
                io.send(protocols::CHAP, &wire::status(id, false, MSG_FAILURE));
                return;
            }
            _ => {
                debug!("CHAP: response id={} dropped in state {:?}", id, self.server);
                return;
            }
        }

        let (value, name) = match pkt.value_and_name() {
            Ok(parts) => parts,
            Err(e) => {
                debug!("CHAP: {}", e);
                io.stats().bad_packets.inc();
                return;
            }
        };
        io.untimeout(Timeout::ChapChallenge);
        let name = String::from_utf8_lossy(name).into_owned();

        let addresses = match ctx.peer_secret(&name) {
            Some(entry) => {
                let expected = wire::md5_response(id, entry.secret.as_bytes(), &self.challenge);
                (value.len() == MD5_RESPONSE_LEN && value == expected)
                    .then(|| entry.addresses.clone())
            }
            None => {
                error!("No CHAP secret found for authenticating {:?}", name);
                None
            }
        };

        match addresses {
            Some(addresses) => {
                io.send(protocols::CHAP, &wire::status(id, true, MSG_SUCCESS));
                ctx.guard.record_success();
                let first = self.server == ServerState::InitialChal;
                self.server = ServerState::Open;
                if first {
                    info!("CHAP peer authentication succeeded for {:?}", name);
                    io.notify(Notice::AuthPeerSuccess {
                        protocol: protocols::CHAP,
                        name,
                        addresses,
                    });
                }
                if !self.interval.is_zero() {
                    io.timeout(Timeout::ChapRechallenge, self.interval);
                }
            }
            None => {
                io.send(protocols::CHAP, &wire::status(id, false, MSG_FAILURE));
                error!("CHAP peer authentication failed for {:?}", name);
                self.server = ServerState::BadAuth;
                let verdict = ctx.guard.record_failure();
                io.notify(Notice::AuthPeerFailure {
                    protocol: protocols::CHAP,
                });
                if verdict == Verdict::Fatal {
                    io.notify(Notice::Fatal(ExitStatus::TooManyLoginFailures));
                }
            }
        }
    }

    fn challenge_timeout(&mut self, io: &mut Io) {
        if !matches!(
            self.server,
            ServerState::InitialChal | ServerState::Rechallenge
        ) {
            return;
        }
        if self.chal_transmits >= self.max_transmits {
            error!("Peer failed to respond to CHAP challenge");
            self.server = ServerState::BadAuth;
            io.notify(Notice::AuthPeerFailure {
                protocol: protocols::CHAP,
            });
            return;
        }
        self.send_challenge(io);
    }

    fn rechallenge(&mut self, io: &mut Io) {
        if self.server != ServerState::Open {
            return;
        }
        self.new_challenge();
        self.send_challenge(io);
        self.server = ServerState::Rechallenge;
    }

    fn new_challenge(&mut self) {
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN);
        self.challenge = vec![0; len];
        rng.fill(&mut self.challenge[..]);
        self.chal_id = self.chal_id.wrapping_add(1);
        self.chal_transmits = 0;
    }

    fn send_challenge(&mut self, io: &mut Io) {
        io.send(
            protocols::CHAP,
            &wire::challenge(self.chal_id, &self.challenge, &self.our_name),
        );
        debug!("CHAP: sent Challenge id={}", self.chal_id);
        io.timeout(Timeout::ChapChallenge, self.restart);
        self.chal_transmits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LoginGuard, Secret, Secrets};

    fn secrets() -> Secrets {
        Secrets::new(vec![
            Secret::new("alice", "gw", "wonderland", &["10.0.0.2"]),
            Secret::new("gw", "isp", "gateway-secret", &[]),
        ])
    }

    fn deliver(chap: &mut Chap, io: &mut Io, guard: &mut LoginGuard, packet: &[u8]) {
        let secrets = secrets();
        let mut ctx = AuthContext {
            our_name: "gw",
            user: "gw",
            password: "",
            secrets: &secrets,
            guard,
        };
        chap.input(io, &mut ctx, packet);
    }

    /// Server that has sent its first challenge; returns (id, challenge)
    fn challenging(config: &AuthConfig) -> (Chap, Io, u8, Vec<u8>) {
        let mut chap = Chap::new(config);
        let mut io = Io::for_test();
        chap.lowerup(&mut io);
        chap.auth_peer(&mut io, "gw");
        assert_eq!(chap.server_state(), ServerState::InitialChal);
        let sent = io.take_sent(protocols::CHAP);
        assert_eq!(sent.len(), 1);
        let pkt = ChapPacket::parse(&sent[0]).unwrap();
        let (value, name) = pkt.value_and_name().unwrap();
        assert_eq!(name, b"gw");
        (chap, io, pkt.identifier(), value.to_vec())
    }

    fn answer(id: u8, secret: &str, challenge: &[u8], name: &str) -> Vec<u8> {
        wire::response(id, &wire::md5_response(id, secret.as_bytes(), challenge), name)
    }

    fn codes_sent(io: &mut Io) -> Vec<u8> {
        io.take_sent(protocols::CHAP)
            .iter()
            .map(|p| ChapPacket::parse(p).unwrap().code())
            .collect()
    }

    #[test]
    fn test_challenge_length() {
        for _ in 0..20 {
            let (_, _, _, challenge) = challenging(&AuthConfig::default());
            assert!((MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN).contains(&challenge.len()));
        }
    }

    #[test]
    fn test_server_accepts_valid_response() {
        let (mut chap, mut io, id, challenge) = challenging(&AuthConfig::default());
        let mut guard = LoginGuard::new();

        deliver(&mut chap, &mut io, &mut guard, &answer(id, "wonderland", &challenge, "alice"));
        assert_eq!(chap.server_state(), ServerState::Open);
        assert_eq!(codes_sent(&mut io), vec![codes::SUCCESS]);
        assert!(!io.is_armed(Timeout::ChapChallenge));
        assert!(!io.is_armed(Timeout::ChapRechallenge));
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthPeerSuccess {
                protocol: protocols::CHAP,
                name: "alice".into(),
                addresses: vec!["10.0.0.2".into()],
            }]
        );

        // A repeated response gets the same answer and nothing else
        deliver(&mut chap, &mut io, &mut guard, &answer(id, "wonderland", &challenge, "alice"));
        assert_eq!(codes_sent(&mut io), vec![codes::SUCCESS]);
        assert!(io.take_notices().is_empty());
    }

    #[test]
    fn test_server_rejects_wrong_secret() {
        let (mut chap, mut io, id, challenge) = challenging(&AuthConfig::default());
        let mut guard = LoginGuard::new();

        deliver(&mut chap, &mut io, &mut guard, &answer(id, "guess", &challenge, "alice"));
        assert_eq!(chap.server_state(), ServerState::BadAuth);
        assert_eq!(codes_sent(&mut io), vec![codes::FAILURE]);
        assert_eq!(guard.failures(), 1);
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthPeerFailure {
                protocol: protocols::CHAP
            }]
        );
    }

    #[test]
    fn test_server_unknown_name() {
        let (mut chap, mut io, id, challenge) = challenging(&AuthConfig::default());
        let mut guard = LoginGuard::new();
        deliver(&mut chap, &mut io, &mut guard, &answer(id, "wonderland", &challenge, "mallory"));
        assert_eq!(chap.server_state(), ServerState::BadAuth);
    }

    #[test]
    fn test_server_ignores_wrong_id() {
        let (mut chap, mut io, id, challenge) = challenging(&AuthConfig::default());
        let mut guard = LoginGuard::new();
        let other = id.wrapping_add(1);
        deliver(&mut chap, &mut io, &mut guard, &answer(other, "wonderland", &challenge, "alice"));
        assert_eq!(chap.server_state(), ServerState::InitialChal);
        assert!(codes_sent(&mut io).is_empty());
        assert!(io.is_armed(Timeout::ChapChallenge));
    }

    #[test]
    fn test_server_fatal_after_too_many_failures() {
        let (mut chap, mut io, id, challenge) = challenging(&AuthConfig::default());
        let mut guard = LoginGuard::new();
        for _ in 0..10 {
            guard.record_failure();
        }
        deliver(&mut chap, &mut io, &mut guard, &answer(id, "guess", &challenge, "alice"));
        assert_eq!(
            io.take_notices(),
            vec![
                Notice::AuthPeerFailure {
                    protocol: protocols::CHAP
                },
                Notice::Fatal(ExitStatus::TooManyLoginFailures),
            ]
        );
    }

    #[test]
    fn test_challenge_retransmit_and_give_up() {
        let config = AuthConfig {
            chap_max_transmits: 2,
            ..AuthConfig::default()
        };
        let (mut chap, mut io, id, _) = challenging(&config);

        chap.timeout(&mut io, Timeout::ChapChallenge);
        let sent = io.take_sent(protocols::CHAP);
        assert_eq!(sent.len(), 1);
        assert_eq!(ChapPacket::parse(&sent[0]).unwrap().identifier(), id);

        chap.timeout(&mut io, Timeout::ChapChallenge);
        assert!(io.take_sent(protocols::CHAP).is_empty());
        assert_eq!(chap.server_state(), ServerState::BadAuth);
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthPeerFailure {
                protocol: protocols::CHAP
            }]
        );
    }

    #[test]
    fn test_rechallenge() {
        let config = AuthConfig {
            chap_interval: Duration::from_secs(60),
            ..AuthConfig::default()
        };
        let (mut chap, mut io, id, challenge) = challenging(&config);
        let mut guard = LoginGuard::new();
        deliver(&mut chap, &mut io, &mut guard, &answer(id, "wonderland", &challenge, "alice"));
        assert!(io.is_armed(Timeout::ChapRechallenge));
        io.take_sent(protocols::CHAP);
        io.take_notices();

        chap.timeout(&mut io, Timeout::ChapRechallenge);
        assert_eq!(chap.server_state(), ServerState::Rechallenge);
        let sent = io.take_sent(protocols::CHAP);
        let pkt = ChapPacket::parse(&sent[0]).unwrap();
        let new_id = pkt.identifier();
        assert_ne!(new_id, id);
        let new_challenge = pkt.value_and_name().unwrap().0.to_vec();

        // Success on a rechallenge is not announced again
        deliver(
            &mut chap,
            &mut io,
            &mut guard,
            &answer(new_id, "wonderland", &new_challenge, "alice"),
        );
        assert_eq!(chap.server_state(), ServerState::Open);
        assert!(io.take_notices().is_empty());

        // Failure on a rechallenge is
        chap.timeout(&mut io, Timeout::ChapRechallenge);
        let sent = io.take_sent(protocols::CHAP);
        let pkt = ChapPacket::parse(sent.last().unwrap()).unwrap();
        let (third_id, third) = (pkt.identifier(), pkt.value_and_name().unwrap().0.to_vec());
        deliver(&mut chap, &mut io, &mut guard, &answer(third_id, "guess", &third, "alice"));
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthPeerFailure {
                protocol: protocols::CHAP
            }]
        );
    }

    #[test]
    fn test_client_answers_challenge() {
        let mut chap = Chap::new(&AuthConfig::default());
        let mut io = Io::for_test();
        let mut guard = LoginGuard::new();
        chap.auth_withpeer();
        chap.lowerup(&mut io);
        assert_eq!(chap.client_state(), ClientState::Listen);

        let challenge = [0x5a; 16];
        deliver(&mut chap, &mut io, &mut guard, &wire::challenge(7, &challenge, "isp"));
        assert_eq!(chap.client_state(), ClientState::Response);
        let sent = io.take_sent(protocols::CHAP);
        let pkt = ChapPacket::parse(&sent[0]).unwrap();
        assert_eq!(pkt.code(), codes::RESPONSE);
        assert_eq!(pkt.identifier(), 7);
        let (value, name) = pkt.value_and_name().unwrap();
        assert_eq!(value, wire::md5_response(7, b"gateway-secret", &challenge));
        assert_eq!(name, b"gw");

        deliver(&mut chap, &mut io, &mut guard, &wire::status(7, true, "welcome"));
        assert_eq!(chap.client_state(), ClientState::Open);
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthWithPeerSuccess {
                protocol: protocols::CHAP
            }]
        );
    }

    #[test]
    fn test_client_failure() {
        let mut chap = Chap::new(&AuthConfig::default());
        let mut io = Io::for_test();
        let mut guard = LoginGuard::new();
        chap.lowerup(&mut io);
        chap.auth_withpeer();

        deliver(&mut chap, &mut io, &mut guard, &wire::challenge(3, &[1; 16], "unknown"));
        deliver(&mut chap, &mut io, &mut guard, &wire::status(3, false, ""));
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthWithPeerFailure {
                protocol: protocols::CHAP
            }]
        );
    }

    #[test]
    fn test_client_ignores_challenge_before_start() {
        let mut chap = Chap::new(&AuthConfig::default());
        let mut io = Io::for_test();
        let mut guard = LoginGuard::new();
        chap.lowerup(&mut io);
        deliver(&mut chap, &mut io, &mut guard, &wire::challenge(1, &[1; 16], "isp"));
        assert!(io.take_sent(protocols::CHAP).is_empty());
    }

    #[test]
    fn test_protocol_reject() {
        let (mut chap, mut io, _, _) = challenging(&AuthConfig::default());
        chap.protrej(&mut io);
        assert_eq!(
            io.take_notices(),
            vec![Notice::AuthPeerFailure {
                protocol: protocols::CHAP
            }]
        );
        assert_eq!(chap.server_state(), ServerState::Initial);
        assert!(!io.is_armed(Timeout::ChapChallenge));
    }
}
