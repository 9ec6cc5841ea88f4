//! Generic option-negotiation state machine - RFC 1661 section 4
//!
//! One [`Fsm`] drives the Configure/Terminate exchange for one control
//! protocol. Everything protocol specific (which options exist, what is
//! acceptable, what to do when the layer comes up) lives behind
//! [`FsmCallbacks`], which the owning protocol passes in on every call.

use crate::event::{Io, Timeout};
use crate::protocol::control::{code_name, codes, ControlBuilder, ControlPacket};
use crate::Result;
use bitflags::bitflags;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retransmit timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default Configure-Request retransmissions
pub const DEFAULT_MAX_CONFIGURE: u32 = 10;
/// Default Terminate-Request retransmissions
pub const DEFAULT_MAX_TERMINATE: u32 = 3;
/// Default Nak loops before giving up or rejecting
pub const DEFAULT_MAX_NAK_LOOPS: u32 = 5;

/// Consecutive empty Configure-Rejects that stop negotiation
const MAX_EMPTY_REJECTS: u32 = 2;

bitflags! {
    /// Behaviour switches for an FSM
    #[derive(Default)]
    pub struct FsmFlags: u8 {
        /// Don't die if we get no response
        const PASSIVE = 0x01;
        /// Treat 2nd open as a restart
        const RESTART = 0x02;
        /// Wait for the peer to speak first
        const SILENT = 0x04;
    }
}

/// FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Lower layer down, not opened
    Initial,
    /// Lower layer down, opened
    Starting,
    /// Lower layer up, not opened
    Closed,
    /// Lower layer up, opened but not negotiating
    Stopped,
    /// Terminating, not opened
    Closing,
    /// Terminating, opened
    Stopping,
    /// Configure-Request sent
    RequestSent,
    /// Configure-Ack received
    AckReceived,
    /// Configure-Ack sent
    AckSent,
    /// Negotiation complete
    Opened,
}

impl State {
    /// Whether a Configure-Request exchange is in progress
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            State::RequestSent | State::AckReceived | State::AckSent
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Initial => "Initial",
            State::Starting => "Starting",
            State::Closed => "Closed",
            State::Stopped => "Stopped",
            State::Closing => "Closing",
            State::Stopping => "Stopping",
            State::RequestSent => "Req-Sent",
            State::AckReceived => "Ack-Rcvd",
            State::AckSent => "Ack-Sent",
            State::Opened => "Opened",
        };
        f.write_str(name)
    }
}

/// Timers and retry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmConfig {
    /// Time to wait for a reply before retransmitting
    pub timeout: Duration,
    /// Configure-Request retransmissions before giving up
    pub max_configure: u32,
    /// Terminate-Request retransmissions before giving up
    pub max_terminate: u32,
    /// Configure-Naks tolerated in either direction
    pub max_nak_loops: u32,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_configure: DEFAULT_MAX_CONFIGURE,
            max_terminate: DEFAULT_MAX_TERMINATE,
            max_nak_loops: DEFAULT_MAX_NAK_LOOPS,
        }
    }
}

/// What to do after a valid Configure-Nak or Configure-Reject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NakDisposition {
    /// Send a fresh Configure-Request with the revised options
    Resend,
    /// Stop negotiating and close with this reason
    Close(String),
}

/// Protocol-specific half of the FSM
pub trait FsmCallbacks {
    /// Reset our requested options for a new negotiation attempt
    fn resetci(&mut self);

    /// Length of our Configure-Request options
    fn cilen(&self) -> usize;

    /// Append our Configure-Request options
    fn addci(&self, buf: &mut Vec<u8>);

    /// Does a Configure-Ack exactly match our request?
    fn ackci(&self, data: &[u8]) -> bool;

    /// Process a Configure-Nak. Options are only updated when `commit` is
    /// set. An error means the packet is bad and must be ignored.
    fn nakci(&mut self, io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition>;

    /// Process a Configure-Reject, like [`nakci`](Self::nakci)
    fn rejci(&mut self, io: &mut Io, data: &[u8], commit: bool) -> Result<NakDisposition>;

    /// Judge the peer's Configure-Request; returns the reply code and body
    fn reqci(&mut self, io: &mut Io, data: &[u8], reject_if_disagree: bool) -> (u8, Vec<u8>);

    /// Negotiation finished, the layer is up
    fn up(&mut self, _io: &mut Io) {}

    /// Leaving the Opened state
    fn down(&mut self, _io: &mut Io) {}

    /// We need the lower layer
    fn starting(&mut self, _io: &mut Io) {}

    /// We are done with the lower layer
    fn finished(&mut self, _io: &mut Io) {}

    /// About to retransmit a Configure-Request
    fn retransmit(&mut self, _io: &mut Io) {}

    /// Handle a code the generic FSM doesn't know; false to Code-Reject it
    fn extcode(&mut self, _io: &mut Io, _state: State, _code: u8, _id: u8, _data: &[u8]) -> bool {
        false
    }
}

/// Negotiation state for one control protocol on one link
#[derive(Debug)]
pub struct Fsm {
    protocol: u16,
    name: &'static str,
    state: State,
    flags: FsmFlags,
    config: FsmConfig,
    /// Last identifier used
    id: u8,
    /// Identifier of the outstanding request
    reqid: u8,
    /// A valid Ack/Nak/Reject arrived for the outstanding request
    seen_ack: bool,
    retransmits: u32,
    /// Configure-Naks we sent in a row
    naks_sent: u32,
    /// Configure-Naks we received this attempt
    naks_received: u32,
    /// Empty Configure-Rejects received in a row
    empty_rejects: u32,
    term_reason: String,
}

impl Fsm {
    pub fn new(protocol: u16, name: &'static str, config: FsmConfig) -> Self {
        Self {
            protocol,
            name,
            state: State::Initial,
            flags: FsmFlags::empty(),
            config,
            id: 0,
            reqid: 0,
            seen_ack: false,
            retransmits: 0,
            naks_sent: 0,
            naks_received: 0,
            empty_rejects: 0,
            term_reason: String::new(),
        }
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn flags(&self) -> FsmFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FsmFlags) {
        self.flags = flags;
    }

    #[cfg(test)]
    /// Retransmissions left for the packet in flight
    pub fn retransmits_left(&self) -> u32 {
        self.retransmits
    }

    #[cfg(test)]
    /// Identifier of the outstanding Configure-Request
    pub fn request_id(&self) -> u8 {
        self.reqid
    }

    /// Allocate a packet identifier
    pub fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    fn timer(&self) -> Timeout {
        Timeout::Fsm(self.protocol)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("{}: {} -> {}", self.name, self.state, state);
            self.state = state;
        }
    }

    /// Administrative open
    pub fn open(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Initial => {
                self.set_state(State::Starting);
                cb.starting(io);
            }
            State::Closed => {
                if self.flags.contains(FsmFlags::SILENT) {
                    self.set_state(State::Stopped);
                } else {
                    self.send_conf_req(cb, io, false);
                    self.set_state(State::RequestSent);
                }
            }
            State::Closing => {
                self.set_state(State::Stopping);
                self.restart_if_requested(cb, io);
            }
            State::Stopped | State::Opened => self.restart_if_requested(cb, io),
            _ => {}
        }
    }

    fn restart_if_requested(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        if self.flags.contains(FsmFlags::RESTART) {
            self.lowerdown(cb, io);
            self.lowerup(cb, io);
        }
    }

    /// Administrative close
    pub fn close(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, reason: &str) {
        self.term_reason = reason.to_string();
        match self.state {
            State::Starting => self.set_state(State::Initial),
            State::Stopped => self.set_state(State::Closed),
            State::Stopping => self.set_state(State::Closing),
            State::RequestSent | State::AckReceived | State::AckSent | State::Opened => {
                self.terminate_layer(cb, io, State::Closing)
            }
            _ => {}
        }
    }

    /// Stop waiting in Stopped and report the layer finished
    pub fn force_finished(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        self.set_state(State::Closed);
        cb.finished(io);
    }

    /// The lower layer is up
    pub fn lowerup(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Initial => self.set_state(State::Closed),
            State::Starting => {
                if self.flags.contains(FsmFlags::SILENT) {
                    self.set_state(State::Stopped);
                } else {
                    self.send_conf_req(cb, io, false);
                    self.set_state(State::RequestSent);
                }
            }
            _ => debug!("{}: Up event in state {}", self.name, self.state),
        }
    }

    /// The lower layer is down
    pub fn lowerdown(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Closed => self.set_state(State::Initial),
            State::Stopped => {
                self.set_state(State::Starting);
                cb.starting(io);
            }
            State::Closing => {
                self.set_state(State::Initial);
                io.untimeout(self.timer());
            }
            State::Stopping | State::RequestSent | State::AckReceived | State::AckSent => {
                self.set_state(State::Starting);
                io.untimeout(self.timer());
            }
            State::Opened => {
                cb.down(io);
                self.set_state(State::Starting);
            }
            _ => debug!("{}: Down event in state {}", self.name, self.state),
        }
    }

    /// The peer rejected this protocol
    pub fn protreject(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Closing | State::Closed => {
                io.untimeout(self.timer());
                self.set_state(State::Closed);
                cb.finished(io);
            }
            State::Stopping
            | State::RequestSent
            | State::AckReceived
            | State::AckSent
            | State::Stopped => {
                io.untimeout(self.timer());
                self.set_state(State::Stopped);
                cb.finished(io);
            }
            State::Opened => self.terminate_layer(cb, io, State::Stopping),
            _ => debug!("{}: Protocol-Reject in state {}", self.name, self.state),
        }
    }

    /// The retransmit timer fired
    pub fn timeout(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Closing | State::Stopping => {
                if self.retransmits == 0 {
                    // Waited long enough for the Terminate-Ack
                    let next = if self.state == State::Closing {
                        State::Closed
                    } else {
                        State::Stopped
                    };
                    self.set_state(next);
                    cb.finished(io);
                } else {
                    self.reqid = self.next_id();
                    self.send_data(io, codes::TERMINATE_REQUEST, self.reqid, self.term_reason.as_bytes());
                    io.timeout(self.timer(), self.config.timeout);
                    self.retransmits -= 1;
                }
            }
            State::RequestSent | State::AckReceived | State::AckSent => {
                if self.retransmits == 0 {
                    warn!("{}: timeout sending Config-Requests", self.name);
                    self.set_state(State::Stopped);
                    if !self.flags.contains(FsmFlags::PASSIVE) {
                        cb.finished(io);
                    }
                } else {
                    cb.retransmit(io);
                    self.send_conf_req(cb, io, true);
                    if self.state == State::AckReceived {
                        self.set_state(State::RequestSent);
                    }
                }
            }
            _ => debug!("{}: Timeout event in state {}", self.name, self.state),
        }
    }

    /// A packet for this protocol arrived
    pub fn input(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, packet: &[u8]) {
        let pkt = match ControlPacket::parse(packet) {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("{}: discarding bad packet: {}", self.name, e);
                io.stats().bad_packets.inc();
                return;
            }
        };

        if matches!(self.state, State::Initial | State::Starting) {
            debug!("{}: Rcvd packet in state {}", self.name, self.state);
            return;
        }

        let (code, id, data) = (pkt.code(), pkt.identifier(), pkt.data());
        debug!("{}: Rcvd {} id={} len={}", self.name, code_name(code), id, data.len());

        match code {
            codes::CONFIGURE_REQUEST => self.rconfreq(cb, io, id, data),
            codes::CONFIGURE_ACK => self.rconfack(cb, io, id, data),
            codes::CONFIGURE_NAK | codes::CONFIGURE_REJECT => {
                self.rconfnakrej(cb, io, code, id, data)
            }
            codes::TERMINATE_REQUEST => self.rtermreq(cb, io, id, data),
            codes::TERMINATE_ACK => self.rtermack(cb, io),
            codes::CODE_REJECT => self.rcoderej(data),
            _ => {
                if !cb.extcode(io, self.state, code, id, data) {
                    let reject_id = self.next_id();
                    self.send_data(io, codes::CODE_REJECT, reject_id, pkt.as_bytes());
                }
            }
        }
    }

    fn rconfreq(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, id: u8, data: &[u8]) {
        match self.state {
            State::Closed => {
                // Go away, we're closed
                self.send_data(io, codes::TERMINATE_ACK, id, &[]);
                return;
            }
            State::Closing | State::Stopping => return,
            State::Opened => self.renegotiate(cb, io),
            State::Stopped => {
                // Negotiation started by our peer
                self.send_conf_req(cb, io, false);
                self.set_state(State::RequestSent);
            }
            _ => {}
        }

        let reject_if_disagree = self.naks_sent >= self.config.max_nak_loops;
        let (code, reply) = cb.reqci(io, data, reject_if_disagree);
        self.send_data(io, code, id, &reply);

        if code == codes::CONFIGURE_ACK {
            if self.state == State::AckReceived {
                io.untimeout(self.timer());
                self.set_state(State::Opened);
                cb.up(io);
            } else {
                self.set_state(State::AckSent);
            }
            self.naks_sent = 0;
        } else {
            if self.state != State::AckReceived {
                self.set_state(State::RequestSent);
            }
            if code == codes::CONFIGURE_NAK {
                self.naks_sent += 1;
            }
        }
    }

    fn rconfack(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, id: u8, data: &[u8]) {
        if id != self.reqid || self.seen_ack {
            debug!("{}: ignoring Configure-Ack id {} (expecting {})", self.name, id, self.reqid);
            return;
        }
        if !cb.ackci(data) {
            warn!("{}: received bad Configure-Ack", self.name);
            io.stats().bad_packets.inc();
            return;
        }
        self.seen_ack = true;
        self.naks_received = 0;

        match self.state {
            State::Closed | State::Stopped => self.send_data(io, codes::TERMINATE_ACK, id, &[]),
            State::RequestSent => {
                self.set_state(State::AckReceived);
                self.retransmits = self.config.max_configure;
            }
            State::AckReceived => {
                // An extra valid Ack? Start over
                io.untimeout(self.timer());
                self.send_conf_req(cb, io, false);
                self.set_state(State::RequestSent);
            }
            State::AckSent => {
                io.untimeout(self.timer());
                self.set_state(State::Opened);
                self.retransmits = self.config.max_configure;
                cb.up(io);
            }
            State::Opened => self.renegotiate(cb, io),
            _ => {}
        }
    }

    fn rconfnakrej(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, code: u8, id: u8, data: &[u8]) {
        if id != self.reqid || self.seen_ack {
            debug!("{}: ignoring {} id {} (expecting {})", self.name, code_name(code), id, self.reqid);
            return;
        }

        let commit = self.state != State::Opened;
        let result = if code == codes::CONFIGURE_NAK {
            cb.nakci(io, data, commit)
        } else {
            cb.rejci(io, data, commit)
        };
        let disposition = match result {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!("{}: received bad {}: {}", self.name, code_name(code), e);
                io.stats().bad_packets.inc();
                return;
            }
        };
        self.seen_ack = true;

        if code == codes::CONFIGURE_NAK {
            self.naks_received += 1;
            self.empty_rejects = 0;
        } else if data.is_empty() {
            self.empty_rejects += 1;
        } else {
            self.empty_rejects = 0;
        }

        match self.state {
            State::Closed | State::Stopped => self.send_data(io, codes::TERMINATE_ACK, id, &[]),
            State::RequestSent | State::AckSent | State::AckReceived => {
                io.untimeout(self.timer());
                match self.give_up_reason(disposition) {
                    Some(reason) => {
                        warn!("{}: {}", self.name, reason);
                        self.close(cb, io, &reason);
                    }
                    None => {
                        self.send_conf_req(cb, io, false);
                        self.set_state(State::RequestSent);
                    }
                }
            }
            State::Opened => self.renegotiate(cb, io),
            _ => {}
        }
    }

    fn give_up_reason(&self, disposition: NakDisposition) -> Option<String> {
        match disposition {
            NakDisposition::Close(reason) => Some(reason),
            NakDisposition::Resend if self.naks_received > self.config.max_nak_loops => {
                Some("Too many Configure-Naks".to_string())
            }
            NakDisposition::Resend if self.empty_rejects >= MAX_EMPTY_REJECTS => {
                Some("Peer rejected all options".to_string())
            }
            NakDisposition::Resend => None,
        }
    }

    fn rtermreq(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, id: u8, data: &[u8]) {
        match self.state {
            State::AckReceived | State::AckSent => {
                // Start over but keep trying
                self.set_state(State::RequestSent);
            }
            State::Opened => {
                if data.is_empty() {
                    info!("{} terminated by peer", self.name);
                } else {
                    info!("{} terminated by peer ({})", self.name, String::from_utf8_lossy(data));
                }
                self.retransmits = 0;
                self.set_state(State::Stopping);
                cb.down(io);
                io.timeout(self.timer(), self.config.timeout);
            }
            _ => {}
        }
        self.send_data(io, codes::TERMINATE_ACK, id, &[]);
    }

    fn rtermack(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        match self.state {
            State::Closing => {
                io.untimeout(self.timer());
                self.set_state(State::Closed);
                cb.finished(io);
            }
            State::Stopping => {
                io.untimeout(self.timer());
                self.set_state(State::Stopped);
                cb.finished(io);
            }
            State::AckReceived => self.set_state(State::RequestSent),
            State::Opened => self.renegotiate(cb, io),
            _ => {}
        }
    }

    fn rcoderej(&mut self, data: &[u8]) {
        if data.len() < 2 {
            debug!("{}: Rcvd short Code-Reject packet", self.name);
            return;
        }
        warn!("{}: Rcvd Code-Reject for code {}, id {}", self.name, data[0], data[1]);
        if self.state == State::AckReceived {
            self.set_state(State::RequestSent);
        }
    }

    /// Leave Opened and start a fresh negotiation
    ///
    /// The state leaves Opened before the options are reset, so negotiated
    /// values never change while the layer is up.
    fn renegotiate(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io) {
        cb.down(io);
        self.set_state(State::RequestSent);
        self.reset_attempt(cb);
        self.send_conf_req(cb, io, false);
    }

    fn reset_attempt(&mut self, cb: &mut dyn FsmCallbacks) {
        cb.resetci();
        self.naks_sent = 0;
        self.naks_received = 0;
        self.empty_rejects = 0;
    }

    fn terminate_layer(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, next: State) {
        if self.state == State::Opened {
            cb.down(io);
        } else {
            io.untimeout(self.timer());
        }

        self.retransmits = self.config.max_terminate;
        self.reqid = self.next_id();
        self.send_data(io, codes::TERMINATE_REQUEST, self.reqid, self.term_reason.as_bytes());

        if self.retransmits == 0 {
            // No Terminate-Ack wanted; just close it
            let done = if next == State::Closing {
                State::Closed
            } else {
                State::Stopped
            };
            self.set_state(done);
            cb.finished(io);
            return;
        }

        io.timeout(self.timer(), self.config.timeout);
        self.set_state(next);
    }

    /// Send a Configure-Request, either a new one or a retransmission
    ///
    /// A new request uses a new identifier and a full retransmit budget; a
    /// retransmission repeats the identifier and uses up one retry.
    fn send_conf_req(&mut self, cb: &mut dyn FsmCallbacks, io: &mut Io, retransmit: bool) {
        if !self.state.is_negotiating() {
            // Not currently negotiating - reset options
            self.reset_attempt(cb);
        }

        if retransmit {
            self.retransmits = self.retransmits.saturating_sub(1);
        } else {
            self.retransmits = self.config.max_configure;
            self.reqid = self.next_id();
        }
        self.seen_ack = false;

        let mut body = Vec::with_capacity(cb.cilen());
        cb.addci(&mut body);
        self.send_data(io, codes::CONFIGURE_REQUEST, self.reqid, &body);

        io.timeout(self.timer(), self.config.timeout);
    }

    fn send_data(&self, io: &mut Io, code: u8, id: u8, data: &[u8]) {
        debug!("{}: Sent {} id={} len={}", self.name, code_name(code), id, data.len());
        let packet = ControlBuilder::new(code, id).raw_data(data).build();
        io.send(self.protocol, &packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTO: u16 = 0x8021;
    const OPTS: [u8; 2] = [0x07, 0x02];

    #[derive(Default)]
    struct Mock {
        calls: Vec<&'static str>,
        nak_result: Option<NakDisposition>,
        reqci_code: Option<u8>,
        disagree_flags: Vec<bool>,
        resets: u32,
    }

    impl FsmCallbacks for Mock {
        fn resetci(&mut self) {
            self.resets += 1;
        }
        fn cilen(&self) -> usize {
            OPTS.len()
        }
        fn addci(&self, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&OPTS);
        }
        fn ackci(&self, data: &[u8]) -> bool {
            data == OPTS
        }
        fn nakci(&mut self, _io: &mut Io, _data: &[u8], _commit: bool) -> Result<NakDisposition> {
            Ok(self.nak_result.clone().unwrap_or(NakDisposition::Resend))
        }
        fn rejci(&mut self, _io: &mut Io, _data: &[u8], _commit: bool) -> Result<NakDisposition> {
            Ok(NakDisposition::Resend)
        }
        fn reqci(&mut self, _io: &mut Io, data: &[u8], reject_if_disagree: bool) -> (u8, Vec<u8>) {
            self.disagree_flags.push(reject_if_disagree);
            (self.reqci_code.unwrap_or(codes::CONFIGURE_ACK), data.to_vec())
        }
        fn up(&mut self, _io: &mut Io) {
            self.calls.push("up");
        }
        fn down(&mut self, _io: &mut Io) {
            self.calls.push("down");
        }
        fn starting(&mut self, _io: &mut Io) {
            self.calls.push("starting");
        }
        fn finished(&mut self, _io: &mut Io) {
            self.calls.push("finished");
        }
    }

    fn config(max_configure: u32, max_terminate: u32) -> FsmConfig {
        FsmConfig {
            timeout: Duration::from_secs(3),
            max_configure,
            max_terminate,
            max_nak_loops: 2,
        }
    }

    /// Sent control packets as (code, id, data)
    fn sent(io: &mut Io) -> Vec<(u8, u8, Vec<u8>)> {
        io.take_sent(PROTO)
            .iter()
            .map(|p| {
                let pkt = ControlPacket::parse(p).unwrap();
                (pkt.code(), pkt.identifier(), pkt.data().to_vec())
            })
            .collect()
    }

    fn packet(code: u8, id: u8, data: &[u8]) -> Vec<u8> {
        ControlBuilder::new(code, id).raw_data(data).build()
    }

    /// FSM in Req-Sent with its first Configure-Request already drained
    fn requesting(cfg: FsmConfig) -> (Fsm, Mock, Io) {
        let mut fsm = Fsm::new(PROTO, "TEST", cfg);
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.open(&mut cb, &mut io);
        fsm.lowerup(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::RequestSent);
        sent(&mut io);
        (fsm, cb, io)
    }

    fn opened() -> (Fsm, Mock, Io) {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 42, &[]));
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::Opened);
        sent(&mut io);
        (fsm, cb, io)
    }

    #[test]
    fn test_open_then_lowerup_sends_request() {
        let mut fsm = Fsm::new(PROTO, "TEST", FsmConfig::default());
        let mut cb = Mock::default();
        let mut io = Io::for_test();

        fsm.open(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Starting);
        assert_eq!(cb.calls, vec!["starting"]);
        assert!(sent(&mut io).is_empty());

        fsm.lowerup(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::RequestSent);
        assert_eq!(cb.resets, 1);
        let out = sent(&mut io);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, codes::CONFIGURE_REQUEST);
        assert_eq!(out[0].2, OPTS);
        assert!(io.is_armed(Timeout::Fsm(PROTO)));
    }

    #[test]
    fn test_lowerup_then_open() {
        let mut fsm = Fsm::new(PROTO, "TEST", FsmConfig::default());
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.lowerup(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Closed);
        fsm.open(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::RequestSent);
        assert_eq!(sent(&mut io).len(), 1);
    }

    #[test]
    fn test_full_handshake() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();

        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 9, &[0x08, 0x02]));
        assert_eq!(fsm.state(), State::AckSent);
        assert_eq!(sent(&mut io), vec![(codes::CONFIGURE_ACK, 9, vec![0x08, 0x02])]);

        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::Opened);
        assert_eq!(cb.calls, vec!["starting", "up"]);
        assert!(!io.is_armed(Timeout::Fsm(PROTO)));
    }

    #[test]
    fn test_ack_then_request_opens() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::AckReceived);
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 1, &[]));
        assert_eq!(fsm.state(), State::Opened);
        assert_eq!(cb.calls.last(), Some(&"up"));
    }

    #[test]
    fn test_stale_ack_ignored() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid.wrapping_add(5), &OPTS));
        assert_eq!(fsm.state(), State::RequestSent);
        assert!(sent(&mut io).is_empty());
    }

    #[test]
    fn test_duplicate_ack_ignored() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::AckReceived);
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::AckReceived);
        assert!(sent(&mut io).is_empty());
    }

    #[test]
    fn test_bad_ack_ignored() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &[0x08, 0x02]));
        assert_eq!(fsm.state(), State::RequestSent);
        assert_eq!(io.stats().bad_packets.get(), 1);

        // The real Ack is still accepted afterwards
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        assert_eq!(fsm.state(), State::AckReceived);
    }

    #[test]
    fn test_retransmit_count() {
        let (mut fsm, mut cb, mut io) = requesting(config(4, 2));
        assert_eq!(fsm.retransmits_left(), 4);
        let reqid = fsm.request_id();
        let mut requests = 1;

        for _ in 0..10 {
            io.advance(Duration::from_secs(3));
            fsm.timeout(&mut cb, &mut io);
            let out = sent(&mut io);
            for (code, id, _) in &out {
                assert_eq!(*code, codes::CONFIGURE_REQUEST);
                assert_eq!(*id, reqid);
            }
            requests += out.len();
            if fsm.state() == State::Stopped {
                break;
            }
        }

        assert_eq!(requests, 5);
        assert_eq!(fsm.state(), State::Stopped);
        assert_eq!(cb.calls.last(), Some(&"finished"));
    }

    #[test]
    fn test_passive_gives_up_quietly() {
        let mut fsm = Fsm::new(PROTO, "TEST", config(1, 2));
        fsm.set_flags(FsmFlags::PASSIVE);
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.lowerup(&mut cb, &mut io);
        fsm.open(&mut cb, &mut io);
        fsm.timeout(&mut cb, &mut io);
        fsm.timeout(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Stopped);
        assert!(!cb.calls.contains(&"finished"));

        // Still answers a peer that starts negotiating
        sent(&mut io);
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 3, &[]));
        let out = sent(&mut io);
        assert_eq!(out[0].0, codes::CONFIGURE_REQUEST);
        assert_eq!(out[1].0, codes::CONFIGURE_ACK);
        assert_eq!(fsm.state(), State::AckSent);
    }

    #[test]
    fn test_silent_waits_for_peer() {
        let mut fsm = Fsm::new(PROTO, "TEST", FsmConfig::default());
        fsm.set_flags(FsmFlags::SILENT);
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.open(&mut cb, &mut io);
        fsm.lowerup(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Stopped);
        assert!(sent(&mut io).is_empty());

        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 3, &[]));
        assert_eq!(fsm.state(), State::AckSent);
        assert_eq!(sent(&mut io).len(), 2);
    }

    #[test]
    fn test_close_from_opened() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.close(&mut cb, &mut io, "bye");
        assert_eq!(fsm.state(), State::Closing);
        assert_eq!(cb.calls.last(), Some(&"down"));
        let out = sent(&mut io);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, codes::TERMINATE_REQUEST);
        assert_eq!(out[0].2, b"bye");

        fsm.input(&mut cb, &mut io, &packet(codes::TERMINATE_ACK, out[0].1, &[]));
        assert_eq!(fsm.state(), State::Closed);
        assert_eq!(cb.calls.last(), Some(&"finished"));
    }

    #[test]
    fn test_terminate_retransmits_then_finishes() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.close(&mut cb, &mut io, "bye");
        let mut requests = sent(&mut io).len();
        for _ in 0..5 {
            fsm.timeout(&mut cb, &mut io);
            requests += sent(&mut io).len();
        }
        assert_eq!(requests, 3);
        assert_eq!(fsm.state(), State::Closed);
        assert_eq!(cb.calls.iter().filter(|c| **c == "finished").count(), 1);
    }

    #[test]
    fn test_zero_max_terminate_closes_immediately() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 0));
        fsm.close(&mut cb, &mut io, "");
        assert_eq!(fsm.state(), State::Closed);
        assert_eq!(sent(&mut io).len(), 1);
        assert_eq!(cb.calls.last(), Some(&"finished"));
        assert!(!io.is_armed(Timeout::Fsm(PROTO)));
    }

    #[test]
    fn test_peer_terminate_in_opened() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.input(&mut cb, &mut io, &packet(codes::TERMINATE_REQUEST, 77, b"going"));
        assert_eq!(fsm.state(), State::Stopping);
        assert_eq!(cb.calls.last(), Some(&"down"));
        assert_eq!(sent(&mut io), vec![(codes::TERMINATE_ACK, 77, vec![])]);

        fsm.timeout(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Stopped);
        assert!(sent(&mut io).is_empty());
        assert_eq!(cb.calls.last(), Some(&"finished"));
    }

    #[test]
    fn test_terminate_request_in_ack_sent_restarts() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 1, &[]));
        assert_eq!(fsm.state(), State::AckSent);
        fsm.input(&mut cb, &mut io, &packet(codes::TERMINATE_REQUEST, 2, &[]));
        assert_eq!(fsm.state(), State::RequestSent);
    }

    #[test]
    fn test_closed_answers_request_with_terminate_ack() {
        let mut fsm = Fsm::new(PROTO, "TEST", FsmConfig::default());
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.lowerup(&mut cb, &mut io);
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 5, &[]));
        assert_eq!(sent(&mut io), vec![(codes::TERMINATE_ACK, 5, vec![])]);
        assert_eq!(fsm.state(), State::Closed);
    }

    #[test]
    fn test_nak_resends_with_new_id() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_NAK, reqid, &[]));
        let out = sent(&mut io);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, codes::CONFIGURE_REQUEST);
        assert_ne!(out[0].1, reqid);
        assert_eq!(fsm.state(), State::RequestSent);
        assert_eq!(cb.resets, 1);
    }

    #[test]
    fn test_nak_loop_gives_up() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        for _ in 0..3 {
            let reqid = fsm.request_id();
            fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_NAK, reqid, &[]));
        }
        assert_eq!(fsm.state(), State::Closing);
        let out = sent(&mut io);
        assert_eq!(out.last().map(|p| p.0), Some(codes::TERMINATE_REQUEST));
    }

    #[test]
    fn test_nak_close_disposition() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        cb.nak_result = Some(NakDisposition::Close("Loopback detected".into()));
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_NAK, reqid, &[]));
        assert_eq!(fsm.state(), State::Closing);
        let out = sent(&mut io);
        assert_eq!(out[0].2, b"Loopback detected");
    }

    #[test]
    fn test_repeated_empty_reject_stops_requests() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REJECT, reqid, &[]));
        assert_eq!(fsm.state(), State::RequestSent);
        assert_eq!(sent(&mut io)[0].0, codes::CONFIGURE_REQUEST);

        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REJECT, reqid, &[]));
        assert_eq!(fsm.state(), State::Closing);
        let out = sent(&mut io);
        assert!(out.iter().all(|p| p.0 != codes::CONFIGURE_REQUEST));
    }

    #[test]
    fn test_reject_if_disagree_after_naks_sent() {
        let (mut fsm, mut cb, mut io) = requesting(config(10, 2));
        cb.reqci_code = Some(codes::CONFIGURE_NAK);
        for id in 0..3 {
            fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, id, &[]));
        }
        assert_eq!(cb.disagree_flags, vec![false, false, true]);
    }

    #[test]
    fn test_unknown_code_rejected() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let unknown = packet(0x42, 7, &[1, 2, 3]);
        fsm.input(&mut cb, &mut io, &unknown);
        let out = sent(&mut io);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, codes::CODE_REJECT);
        assert_eq!(out[0].2, unknown);
    }

    #[test]
    fn test_code_reject_in_ack_received() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        let reqid = fsm.request_id();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_ACK, reqid, &OPTS));
        fsm.input(&mut cb, &mut io, &packet(codes::CODE_REJECT, 1, &[0x0c, 0x01, 0x00, 0x04]));
        assert_eq!(fsm.state(), State::RequestSent);
    }

    #[test]
    fn test_protreject_in_opened() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.protreject(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Stopping);
        assert_eq!(cb.calls.last(), Some(&"down"));
    }

    #[test]
    fn test_protreject_while_negotiating() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        fsm.protreject(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Stopped);
        assert_eq!(cb.calls.last(), Some(&"finished"));
        assert!(!io.is_armed(Timeout::Fsm(PROTO)));
    }

    #[test]
    fn test_lowerdown_in_opened() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.lowerdown(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Starting);
        assert_eq!(cb.calls.last(), Some(&"down"));
    }

    #[test]
    fn test_restart_flag_bounces_layer() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.set_flags(FsmFlags::RESTART);
        fsm.open(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::RequestSent);
        assert!(cb.calls.contains(&"down"));
        assert_eq!(sent(&mut io)[0].0, codes::CONFIGURE_REQUEST);
    }

    #[test]
    fn test_open_without_restart_is_noop_when_opened() {
        let (mut fsm, mut cb, mut io) = opened();
        fsm.open(&mut cb, &mut io);
        assert_eq!(fsm.state(), State::Opened);
        assert!(sent(&mut io).is_empty());
    }

    #[test]
    fn test_request_in_opened_renegotiates() {
        let (mut fsm, mut cb, mut io) = opened();
        let resets = cb.resets;
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 50, &[]));
        assert_eq!(cb.calls.last(), Some(&"down"));
        assert_eq!(cb.resets, resets + 1);
        let out = sent(&mut io);
        assert_eq!(out[0].0, codes::CONFIGURE_REQUEST);
        assert_eq!(out[1], (codes::CONFIGURE_ACK, 50, vec![]));
        assert_eq!(fsm.state(), State::AckSent);
    }

    #[test]
    fn test_input_ignored_before_lowerup() {
        let mut fsm = Fsm::new(PROTO, "TEST", FsmConfig::default());
        let mut cb = Mock::default();
        let mut io = Io::for_test();
        fsm.input(&mut cb, &mut io, &packet(codes::CONFIGURE_REQUEST, 1, &[]));
        assert_eq!(fsm.state(), State::Initial);
        assert!(sent(&mut io).is_empty());
    }

    #[test]
    fn test_truncated_packet_counted() {
        let (mut fsm, mut cb, mut io) = requesting(FsmConfig::default());
        fsm.input(&mut cb, &mut io, &[0x01, 0x01, 0x00, 0x20]);
        assert_eq!(io.stats().bad_packets.get(), 1);
        assert_eq!(fsm.state(), State::RequestSent);
    }
}
