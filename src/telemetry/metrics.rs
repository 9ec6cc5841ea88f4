//! Link statistics.
//!
//! Provides thread-safe counters the link updates while it runs and the
//! daemon reads when it reports a summary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-link statistics.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Number of frames received.
    pub frames_in: Counter,
    /// Number of bytes received.
    pub bytes_in: Counter,
    /// Number of frames transmitted.
    pub frames_out: Counter,
    /// Number of bytes transmitted.
    pub bytes_out: Counter,
    /// Frames or control packets that could not be parsed.
    pub bad_packets: Counter,
    /// Frames discarded because of the link phase or LCP state.
    pub discarded: Counter,
    /// Protocol-Rejects we sent.
    pub protocol_rejects: Counter,
    /// LCP Echo-Requests we sent.
    pub echo_requests: Counter,
    /// LCP Echo-Replies we counted as liveness.
    pub echo_replies: Counter,
}

impl LinkStats {
    /// Creates new link statistics initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received frame.
    pub fn record_rx(&self, bytes: usize) {
        self.frames_in.inc();
        self.bytes_in.add(bytes as u64);
    }

    /// Records a transmitted frame.
    pub fn record_tx(&self, bytes: usize) {
        self.frames_out.inc();
        self.bytes_out.add(bytes as u64);
    }
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} bytes in {} frames, received {} bytes in {} frames, {} bad, {} discarded, {} protocol-rejects, echo {}/{}",
            self.bytes_out.get(),
            self.frames_out.get(),
            self.bytes_in.get(),
            self.frames_in.get(),
            self.bad_packets.get(),
            self.discarded.get(),
            self.protocol_rejects.get(),
            self.echo_replies.get(),
            self.echo_requests.get(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_link_stats() {
        let stats = LinkStats::new();

        stats.record_rx(100);
        stats.record_rx(200);
        stats.record_tx(150);

        assert_eq!(stats.frames_in.get(), 2);
        assert_eq!(stats.bytes_in.get(), 300);
        assert_eq!(stats.frames_out.get(), 1);
        assert_eq!(stats.bytes_out.get(), 150);
    }

    #[test]
    fn test_summary() {
        let stats = LinkStats::new();
        stats.record_tx(10);
        stats.echo_requests.inc();
        let line = stats.to_string();
        assert!(line.starts_with("sent 10 bytes in 1 frames"));
        assert!(line.ends_with("echo 0/1"));
    }

    #[test]
    fn test_counter_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(Counter::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    c.inc();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(), 10000);
    }
}
