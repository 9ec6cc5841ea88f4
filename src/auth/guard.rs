//! Failed-login throttling

use std::time::Duration;
use tracing::warn;

/// Failures answered without delay
const FREE_ATTEMPTS: u32 = 3;

/// Failures after which the process gives up
const MAX_FAILURES: u32 = 10;

/// Extra delay per failure beyond the free ones
const DELAY_STEP: Duration = Duration::from_secs(5);

/// How to answer a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reply right away
    Reply,
    /// Reply after this long
    Delay(Duration),
    /// Too many failures; stop the whole process
    Fatal,
}

/// Consecutive failed logins on a link
#[derive(Debug, Default)]
pub struct LoginGuard {
    failures: u32,
}

impl LoginGuard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) -> Verdict {
        self.failures += 1;
        if self.failures > MAX_FAILURES {
            warn!("{} LOGIN FAILURES", self.failures);
            Verdict::Fatal
        } else if self.failures > FREE_ATTEMPTS {
            Verdict::Delay(DELAY_STEP * (self.failures - FREE_ATTEMPTS))
        } else {
            Verdict::Reply
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation() {
        let mut guard = LoginGuard::new();
        for _ in 0..3 {
            assert_eq!(guard.record_failure(), Verdict::Reply);
        }
        assert_eq!(guard.record_failure(), Verdict::Delay(Duration::from_secs(5)));
        assert_eq!(guard.record_failure(), Verdict::Delay(Duration::from_secs(10)));
        for _ in 6..=10 {
            assert!(matches!(guard.record_failure(), Verdict::Delay(_)));
        }
        assert_eq!(guard.failures(), 10);
        assert_eq!(guard.record_failure(), Verdict::Fatal);
    }

    #[test]
    fn test_success_resets() {
        let mut guard = LoginGuard::new();
        for _ in 0..5 {
            guard.record_failure();
        }
        guard.record_success();
        assert_eq!(guard.failures(), 0);
        assert_eq!(guard.record_failure(), Verdict::Reply);
    }
}
