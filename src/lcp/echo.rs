//! LCP echo keepalive
//!
//! While LCP is Opened an Echo-Request goes out every interval. Any
//! Echo-Reply that isn't our own looped-back echo clears the pending count;
//! when the count reaches the failure limit the peer is declared dead.

use crate::event::{Io, Timeout};
use crate::protocol::lcp::{echo_magic, echo_request};
use crate::protocol::ppp::protocols;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Echo {
    interval: Duration,
    /// Unanswered requests tolerated; 0 never gives up
    fails: u32,
    pending: u32,
    number: u8,
    running: bool,
}

impl Echo {
    pub fn new(interval: Duration, fails: u32) -> Self {
        Self {
            interval,
            fails,
            pending: 0,
            number: 0,
            running: false,
        }
    }

    /// Requests sent since the last reply
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// LCP came up: send the first request and arm the timer
    pub fn start(&mut self, io: &mut Io, magic: u32) {
        self.pending = 0;
        self.number = 0;
        if self.interval.is_zero() {
            return;
        }
        self.running = true;
        self.send_request(io, magic);
        io.timeout(Timeout::LcpEcho, self.interval);
    }

    /// LCP went down
    pub fn stop(&mut self, io: &mut Io) {
        if self.running {
            io.untimeout(Timeout::LcpEcho);
        }
        self.running = false;
        self.pending = 0;
    }

    /// Whether the peer has missed too many requests
    pub fn peer_dead(&self) -> bool {
        self.fails > 0 && self.pending >= self.fails
    }

    /// Forget missed requests after declaring the link failed
    pub fn clear_pending(&mut self) {
        self.pending = 0;
    }

    /// Timer fired with LCP still Opened
    pub fn tick(&mut self, io: &mut Io, magic: u32) {
        if !self.running {
            return;
        }
        self.send_request(io, magic);
        io.timeout(Timeout::LcpEcho, self.interval);
    }

    fn send_request(&mut self, io: &mut Io, magic: u32) {
        let id = self.number;
        self.number = self.number.wrapping_add(1);
        io.send(protocols::LCP, &echo_request(id, magic));
        self.pending += 1;
        io.stats().echo_requests.inc();
    }

    /// An Echo-Reply arrived; `our_magic` is our negotiated magic, if any
    pub fn reply_received(&mut self, io: &mut Io, data: &[u8], our_magic: Option<u32>) {
        let Some(magic) = echo_magic(data) else {
            debug!("LCP: received short Echo-Reply, length {}", data.len());
            return;
        };
        if our_magic == Some(magic) {
            warn!("appear to have received our own echo-reply!");
            return;
        }
        self.pending = 0;
        io.stats().echo_replies.inc();
    }
}
