//! Poll-with-timeout.
//!
//! Readiness checks (a workload reaching its running replica count, a node
//! joining) are expressed as a predicate retried at a fixed interval
//! until it succeeds or the deadline passes.

use std::future::Future;
use std::time::Duration;

/// Result of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The check succeeded after `elapsed`.
    Ready { elapsed: Duration },
    /// The deadline passed without a successful check.
    TimedOut { elapsed: Duration },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Ready { elapsed } | PollOutcome::TimedOut { elapsed } => *elapsed,
        }
    }
}

/// Check immediately, then every `interval`, until the check returns `true`
/// or `timeout` has elapsed.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return PollOutcome::Ready {
                elapsed: start.elapsed(),
            };
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return PollOutcome::TimedOut { elapsed };
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Blocking variant of [`poll_until`] for synchronous callers.
pub fn poll_until_blocking<F>(timeout: Duration, interval: Duration, mut check: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    loop {
        if check() {
            return PollOutcome::Ready {
                elapsed: start.elapsed(),
            };
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return PollOutcome::TimedOut { elapsed };
        }
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}
