//! Bounded retry policy for readiness polling.
//!
//! A poll ends at the first of: a successful probe, `max_attempts` failed
//! probes, the policy timeout, or the caller's cancel signal (which also
//! carries the overall deploy deadline). Waits between probes go through
//! the injected clock.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use cutover_core::{CancelSignal, Clock, HealthCheckSpec, Interrupted};

/// Attempts, spacing, and hard time budget for a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` polls until the timeout.
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    pub timeout: Duration,
}

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    /// `max_attempts` probes failed.
    Exhausted { attempts: u32 },
    /// The policy timeout elapsed first.
    TimedOut { attempts: u32, elapsed: Duration },
    /// Cancelled, or the overall deadline passed.
    Interrupted { attempts: u32, reason: Interrupted },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            Self::Ready { attempts }
            | Self::Exhausted { attempts }
            | Self::TimedOut { attempts, .. }
            | Self::Interrupted { attempts, .. } => attempts,
        }
    }
}

impl RetryPolicy {
    /// Policy for a configured health check, capped by `hard_timeout`.
    pub fn for_health_check(spec: &HealthCheckSpec, hard_timeout: Duration) -> Self {
        Self {
            max_attempts: Some(spec.max_attempts.max(1)),
            interval: Duration::from_secs(spec.interval_secs),
            timeout: hard_timeout,
        }
    }

    /// Policy for waiting on raw running status: unbounded attempts, one
    /// second apart, until `timeout`.
    pub fn for_startup(timeout: Duration) -> Self {
        Self {
            max_attempts: None,
            interval: Duration::from_secs(1),
            timeout,
        }
    }

    /// Call `probe` until it returns true or the policy gives up.
    ///
    /// `probe` receives the 1-based attempt number.
    pub async fn poll<F, Fut>(&self, clock: &dyn Clock, cancel: &CancelSignal, mut probe: F) -> PollOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = clock.now();
        let mut attempts = 0;

        loop {
            if let Err(reason) = cancel.check(clock.now()) {
                return PollOutcome::Interrupted { attempts, reason };
            }

            attempts += 1;
            if probe(attempts).await {
                return PollOutcome::Ready { attempts };
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return PollOutcome::Exhausted { attempts };
            }

            let elapsed = clock.now().saturating_duration_since(start);
            if elapsed >= self.timeout {
                return PollOutcome::TimedOut { attempts, elapsed };
            }

            let wait = self.interval.min(self.timeout - elapsed);
            debug!(attempt = attempts, wait_ms = wait.as_millis() as u64, "probe not ready, waiting");
            if let Err(reason) = cancel.sleep(clock, wait).await {
                return PollOutcome::Interrupted { attempts, reason };
            }
        }
    }
}
