//! Fixed-schedule retry.
//!
//! Delays are taken from a list in order and the last one is held once the
//! list runs out, so `[2s, 5s, 10s]` with five retries waits
//! 2, 5, 10, 10, 10 seconds.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl RetrySchedule {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Vec::new())
    }

    /// Same delay before every retry.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(max_retries, vec![delay])
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let idx = retry.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
/// or the schedule is exhausted. `op` receives the 1-based attempt number.
pub async fn retry_with_schedule<T, E, F, Fut, P>(
    schedule: &RetrySchedule,
    mut should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt > schedule.max_retries || !should_retry(&err) {
                    return Err(err);
                }
                let delay = schedule.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
