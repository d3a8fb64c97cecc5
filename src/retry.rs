//! Bounded polling with a fixed or exponential pause between attempts.
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { interval_ms: u64 },
    /// Doubles after every miss, capped at `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(200), 50)
    }
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::Fixed {
                interval_ms: duration_ms(interval),
            },
            max_attempts,
        }
    }

    pub fn exponential(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::Exponential {
                initial_ms: duration_ms(initial),
                max_ms: duration_ms(max),
            },
            max_attempts,
        }
    }

    /// Pause after the zero-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Backoff::Exponential { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
                Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }

    /// Upper bound on the total time spent sleeping between attempts.
    pub fn total_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|a| self.delay_for(a))
            .sum()
    }

    /// Runs `probe` until it yields a value or the attempts run out.
    ///
    /// At least one attempt is always made.
    pub async fn poll<T, F, Fut>(&self, mut probe: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            if let Some(value) = probe().await {
                return Some(value);
            }
            if attempt + 1 < attempts {
                let delay = self.delay_for(attempt);
                trace!(attempt, ?delay, "probe missed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        None
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
