//! Backoff and restart policies for tenant workers.

use std::time::Duration;

use tokio::time::Instant;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// No delay between restarts.
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        // Jitter in [-range, range]
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * delay * self.jitter;

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

/// Worker restart policy.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum restart attempts within the window.
    pub max_restarts: u32,

    /// Time window for counting restarts.
    pub window: Duration,

    /// Backoff policy for restarts.
    pub backoff: BackoffPolicy,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RestartPolicy {
    /// Drop restart timestamps that fell out of the window and return the
    /// number still counting against the budget.
    pub(crate) fn prune(&self, restarts: &mut Vec<Instant>, now: Instant) -> usize {
        restarts.retain(|t| now.duration_since(*t) < self.window);
        restarts.len()
    }

    /// Whether another restart is allowed given `recent` restarts.
    pub(crate) fn allows(&self, recent: usize) -> bool {
        recent < self.max_restarts as usize
    }
}
