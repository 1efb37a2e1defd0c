use crate::ingest::error::FetchError;
use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffGrowth {
    /// `attempt * base_delay`
    Linear,
    /// `2^(attempt - 1) * base_delay`
    Exponential,
}

impl std::str::FromStr for BackoffGrowth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(BackoffGrowth::Linear),
            "exponential" => Ok(BackoffGrowth::Exponential),
            other => anyhow::bail!("unknown backoff growth {other:?} (expected linear or exponential)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub growth: BackoffGrowth,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            growth: BackoffGrowth::Linear,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = match self.growth {
            BackoffGrowth::Linear => attempt,
            BackoffGrowth::Exponential => 1u32 << attempt.saturating_sub(1).min(16),
        };
        self.base_delay.saturating_mul(factor)
    }
}

/// Blocking wait used between attempts and between entities.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt budget is spent.
/// `op` receives the 1-based attempt number. No sleep happens after the final attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(err);
                }
                let backoff = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    ?backoff,
                    request = label,
                    error = %err,
                    "market data request failed; retrying"
                );
                sleeper.sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requested delays instead of waiting.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }
}
