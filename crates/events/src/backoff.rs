use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Capped exponential backoff with jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffOptions {
    /// Timeout for each individual attempt.
    pub attempt_timeout: Duration,

    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Maximum number of attempts before giving up.
    pub max_attempts: usize,

    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            base_delay: Duration::from_millis(100),
            max_attempts: 10,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// The retry budget ran out.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: usize,
    pub last_error: String,
}

// Doubles with 0-10% jitter, capped at `max`.
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current.mul_f64(fastrand::f64().mul_add(0.1, 2.0)), max)
}

/// Runs `operation` until it succeeds or the attempts in `options` run out.
pub async fn retry<F, Fut, R, E>(
    options: &BackoffOptions,
    operation_name: &str,
    mut operation: F,
) -> Result<R, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: Display,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempts = 0;
    let mut delay = options.base_delay;

    loop {
        attempts += 1;

        let last_error = match tokio::time::timeout(options.attempt_timeout, operation()).await {
            Ok(Ok(result)) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", options.attempt_timeout),
        };

        if attempts >= max_attempts {
            error!(
                operation = operation_name,
                attempts,
                error = %last_error,
                "Operation failed after maximum retries"
            );
            return Err(Exhausted {
                attempts,
                last_error,
            });
        }

        warn!(
            operation = operation_name,
            attempt = attempts,
            max_attempts,
            delay = ?delay,
            error = %last_error,
            "Operation failed, retrying"
        );

        tokio::time::sleep(delay).await;
        delay = next_delay(delay, options.max_delay);
    }
}
