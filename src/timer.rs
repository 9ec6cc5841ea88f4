//! Timer queue
//!
//! Timeouts are identified by a key rather than by a handle. Scheduling a
//! key that is already armed replaces the earlier instance, and cancelling
//! a key that is not armed does nothing. Expired entries come out in
//! deadline order; entries with the same deadline come out in the order
//! they were scheduled.

use std::fmt::Debug;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<K> {
    deadline: Instant,
    seq: u64,
    key: K,
}

/// Queue of pending timeouts keyed by identity
#[derive(Debug)]
pub struct TimerQueue<K> {
    entries: Vec<Entry<K>>,
    next_seq: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<K: Copy + Eq + Debug> TimerQueue<K> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire `delay` after `now`
    pub fn schedule(&mut self, key: K, now: Instant, delay: Duration) {
        self.cancel(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            deadline: now + delay,
            seq,
            key,
        });
    }

    /// Disarm `key`; returns whether it was armed
    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        self.entries.len() != before
    }

    /// Whether `key` is armed
    pub fn is_armed(&self, key: K) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Earliest deadline, if anything is armed
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Remove and return the earliest entry due at `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| (e.deadline, e.seq))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(idx).key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        A,
        B,
        C,
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(Key::A, now, Duration::from_secs(3));
        q.schedule(Key::B, now, Duration::from_secs(1));
        q.schedule(Key::C, now, Duration::from_secs(2));

        let later = now + Duration::from_secs(5);
        assert_eq!(q.pop_expired(later), Some(Key::B));
        assert_eq!(q.pop_expired(later), Some(Key::C));
        assert_eq!(q.pop_expired(later), Some(Key::A));
        assert_eq!(q.pop_expired(later), None);
    }

    #[test]
    fn test_same_deadline_keeps_schedule_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(Key::C, now, Duration::from_secs(1));
        q.schedule(Key::A, now, Duration::from_secs(1));

        let later = now + Duration::from_secs(1);
        assert_eq!(q.pop_expired(later), Some(Key::C));
        assert_eq!(q.pop_expired(later), Some(Key::A));
    }

    #[test]
    fn test_not_expired_yet() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(Key::A, now, Duration::from_secs(3));
        assert_eq!(q.pop_expired(now + Duration::from_secs(2)), None);
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(3)));
    }

    #[test]
    fn test_reschedule_replaces() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(Key::A, now, Duration::from_secs(1));
        q.schedule(Key::A, now, Duration::from_secs(10));
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(10)));
        assert_eq!(q.pop_expired(now + Duration::from_secs(5)), None);
        assert_eq!(q.pop_expired(now + Duration::from_secs(10)), Some(Key::A));
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn test_cancel_unarmed_is_noop() {
        let mut q: TimerQueue<Key> = TimerQueue::new();
        assert!(!q.cancel(Key::A));
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(Key::A, now, Duration::from_secs(1));
        q.schedule(Key::B, now, Duration::from_secs(1));
        assert!(q.cancel(Key::A));
        assert!(!q.is_armed(Key::A));
        assert!(q.is_armed(Key::B));
        assert_eq!(q.pop_expired(now + Duration::from_secs(1)), Some(Key::B));
    }
}
