//! Side effects of the negotiation core
//!
//! Protocol code never touches sockets, clocks or other protocols directly.
//! Everything it wants to happen goes through [`Io`]: frames to send,
//! timeouts to arm or cancel, and [`Notice`]s for the link to act on once
//! the current handler has returned. The link turns the results into
//! [`Action`]s for the program embedding it.

use crate::error::ExitStatus;
use crate::protocol::ppp::PppBuilder;
use crate::telemetry::LinkStats;
use crate::timer::TimerQueue;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of a pending timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Retransmit timer of the FSM for a protocol
    Fsm(u16),
    /// LCP echo keepalive interval
    LcpEcho,
    /// PAP Authenticate-Request retransmission
    PapClient,
    /// Waiting for the peer's Authenticate-Request
    PapServer,
    /// Delayed reply after repeated failed logins
    DelayedReply(u16),
    /// CHAP challenge retransmission
    ChapChallenge,
    /// Periodic CHAP rechallenge
    ChapRechallenge,
    /// Wait before reopening a persistent link
    Holdoff,
}

/// Link parameters in effect after LCP negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    /// Largest frame we may send
    pub mtu: u16,
    /// Largest frame we accept
    pub mru: u16,
    /// Characters to escape when sending
    pub tx_asyncmap: u32,
    /// Characters the peer escapes
    pub rx_asyncmap: u32,
    /// We may compress the protocol field
    pub tx_pcomp: bool,
    /// We may omit address and control fields
    pub tx_accomp: bool,
    /// Peer may compress the protocol field
    pub rx_pcomp: bool,
    /// Peer may omit address and control fields
    pub rx_accomp: bool,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            mtu: crate::protocol::ppp::DEFAULT_MRU,
            mru: crate::protocol::ppp::DEFAULT_MRU,
            tx_asyncmap: crate::protocol::lcp::DEFAULT_ASYNCMAP,
            rx_asyncmap: crate::protocol::lcp::DEFAULT_ASYNCMAP,
            tx_pcomp: false,
            tx_accomp: false,
            rx_pcomp: false,
            rx_accomp: false,
        }
    }
}

/// Upward notifications from protocol code to the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// LCP reached Opened
    LinkUp(LinkParams),
    /// LCP left Opened
    LinkDown,
    /// LCP wants the lower layer
    LinkStarting,
    /// LCP has finished with the lower layer
    LinkFinished,
    /// The peer sent a Protocol-Reject for this protocol
    ProtocolRejected(u16),
    /// The peer authenticated itself to us
    AuthPeerSuccess {
        protocol: u16,
        name: String,
        addresses: Vec<String>,
    },
    /// The peer failed to authenticate itself to us
    AuthPeerFailure { protocol: u16 },
    /// We authenticated ourselves to the peer
    AuthWithPeerSuccess { protocol: u16 },
    /// We failed to authenticate ourselves to the peer
    AuthWithPeerFailure { protocol: u16 },
    /// A network control protocol reached Opened
    NetworkUp(u16),
    /// A network control protocol left Opened
    NetworkDown(u16),
    /// A network control protocol has given up
    NetworkFinished(u16),
    /// IPv4 addresses are configured
    IpUp {
        local: Ipv4Addr,
        remote: Ipv4Addr,
        dns: Vec<Ipv4Addr>,
    },
    /// IPv4 addresses are going away
    IpDown,
    /// Record why the link is ending
    Status(ExitStatus),
    /// Terminate the whole process
    Fatal(ExitStatus),
}

/// Work for the program embedding the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit a PPP frame (protocol field + information)
    Send(Vec<u8>),
    /// Apply negotiated framing parameters to the lower layer
    ConfigureLink(LinkParams),
    /// Run an external script without waiting for it
    RunScript { path: PathBuf, args: Vec<String> },
    /// Bring up IPv4 on the link
    IpUp {
        local: Ipv4Addr,
        remote: Ipv4Addr,
        dns: Vec<Ipv4Addr>,
    },
    /// Take IPv4 down
    IpDown,
    /// A data frame for a network protocol that is up
    Deliver { protocol: u16, payload: Vec<u8> },
    /// Exit the process with this status
    Exit(ExitStatus),
}

/// Per-link side-effect sink
#[derive(Debug)]
pub struct Io {
    now: Instant,
    timers: TimerQueue<Timeout>,
    actions: Vec<Action>,
    notices: VecDeque<Notice>,
    stats: Arc<LinkStats>,
}

impl Io {
    pub fn new(now: Instant, stats: Arc<LinkStats>) -> Self {
        Self {
            now,
            timers: TimerQueue::new(),
            actions: Vec::new(),
            notices: VecDeque::new(),
            stats,
        }
    }

    pub fn set_now(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Queue a frame for `protocol`
    pub fn send(&mut self, protocol: u16, payload: &[u8]) {
        let frame = PppBuilder::new(protocol).payload(payload).build();
        self.stats.record_tx(frame.len());
        self.actions.push(Action::Send(frame));
    }

    /// Arm `key`, replacing any earlier instance
    pub fn timeout(&mut self, key: Timeout, delay: Duration) {
        self.timers.schedule(key, self.now, delay);
    }

    /// Disarm `key`; nothing happens if it is not armed
    pub fn untimeout(&mut self, key: Timeout) {
        self.timers.cancel(key);
    }

    pub fn is_armed(&self, key: Timeout) -> bool {
        self.timers.is_armed(key)
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push_back(notice);
    }

    pub fn action(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub(crate) fn pop_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    pub(crate) fn pop_expired(&mut self) -> Option<Timeout> {
        self.timers.pop_expired(self.now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

#[cfg(test)]
impl Io {
    /// Io for unit tests
    pub(crate) fn for_test() -> Self {
        Self::new(Instant::now(), Arc::new(LinkStats::new()))
    }

    /// Advance the clock
    pub(crate) fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Frames sent so far, with the protocol field stripped
    pub(crate) fn take_sent(&mut self, protocol: u16) -> Vec<Vec<u8>> {
        let mut sent = Vec::new();
        self.actions.retain(|a| match a {
            Action::Send(frame) if frame.len() >= 2 && frame[..2] == protocol.to_be_bytes() => {
                sent.push(frame[2..].to_vec());
                false
            }
            _ => true,
        });
        sent
    }

    pub(crate) fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }
}
