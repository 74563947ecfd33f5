use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

use crate::metrics::RETRY_ATTEMPTS_TOTAL;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    /// Downstream sync calls.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_max: None,
        }
    }
}

impl RetryConfig {
    /// Evaluation, transcription and audio fetches.
    pub fn ai_service() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_max: None,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(current.mul_f64(self.multiplier), self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl RetryError<anyhow::Error> {
    /// Folds the attempt count into the last error's context chain.
    pub fn into_anyhow(self) -> anyhow::Error {
        let attempts = self.attempts();
        self.into_last()
            .context(format!("failed after {} attempts", attempts))
    }
}

lazy_static! {
    static ref RETRYABLE: Regex = Regex::new(
        r"(?i)connection refused|connection reset|timeout|timed out|deadline exceeded|temporary failure|service unavailable|rate limit|too many requests|\b(429|500|502|503|504)\b"
    )
    .unwrap();
}

/// Whether an error looks transient. Only informs logging; the executor
/// retries every failure up to `max_attempts`.
pub fn is_retryable(err: &dyn Display) -> bool {
    RETRYABLE.is_match(&err.to_string())
}

/// Runs `f` until it succeeds or `max_attempts` calls have failed, sleeping
/// with exponential backoff in between.
pub async fn retry_async_with_config<F, Fut, T, E>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(v) => {
                RETRY_ATTEMPTS_TOTAL
                    .with_label_values(&[operation, "success"])
                    .inc();
                if attempt > 1 {
                    tracing::info!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) => {
                RETRY_ATTEMPTS_TOTAL
                    .with_label_values(&[operation, "failure"])
                    .inc();
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    retryable = is_retryable(&e),
                    error = %e,
                    "attempt failed"
                );

                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }

                // apply jitter
                let wait = match config.jitter_max {
                    Some(jitter_max) if !jitter_max.is_zero() => {
                        let jitter_ms = jitter_max.as_millis() as u64;
                        delay + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
                    }
                    _ => delay,
                };
                tokio::time::sleep(std::cmp::min(wait, config.max_delay)).await;

                delay = config.next_delay(delay);
            }
        }
    }
}
