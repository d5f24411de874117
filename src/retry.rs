use std::{future::Future, time::Duration};

use reqwest::{Method, StatusCode, Url};
use tokio::time::sleep;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Status code carried by a response or error, if any.
pub trait HttpStatus {
    fn http_status(&self) -> Option<StatusCode>;

    /// The failure happened before anything was sent, so repeating the call cannot help.
    fn is_local(&self) -> bool {
        false
    }
}

/// What the policy is shown after each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub attempt: u32,
    pub status: Option<StatusCode>,
    pub failed: bool,
    pub local: bool,
}

/// Retry decision and backoff schedule applied around a single provider call.
///
/// Holds no per-call state: the attempt counter lives in [`RetryPolicy::run`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub should_retry: fn(&Outcome) -> bool,
    pub backoff: fn(u32) -> Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            should_retry: retry_on_non_success,
            backoff: exponential_backoff,
        }
    }
}

/// Retries everything except a clean 2xx, 401 and local failures.
pub fn retry_on_non_success(outcome: &Outcome) -> bool {
    if outcome.local {
        return false;
    }
    let status = outcome.status.map(|s| s.as_u16());
    let succeeded = !outcome.failed && matches!(status, Some(200..=299));
    !(succeeded || status == Some(401))
}

/// `2^(attempt - 1)` seconds.
pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.saturating_sub(1)))
}

impl RetryPolicy {
    /// Runs `op` until the policy stops retrying or attempts run out, returning the last result.
    pub async fn run<T, E, F, Fut>(&self, method: &Method, url: &Url, mut op: F) -> Result<T, E>
    where
        T: HttpStatus,
        E: HttpStatus,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = op().await;
            let outcome = Outcome {
                attempt,
                status: match &result {
                    Ok(response) => response.http_status(),
                    Err(e) => e.http_status(),
                },
                failed: result.is_err(),
                local: matches!(&result, Err(e) if e.is_local()),
            };

            if !(self.should_retry)(&outcome) {
                return result;
            }
            if attempt >= self.max_attempts {
                debug!(
                    %method,
                    %url,
                    attempt,
                    status = ?outcome.status,
                    "giving up after {} attempts",
                    attempt
                );
                return result;
            }

            let wait = (self.backoff)(attempt);
            debug!(
                %method,
                %url,
                attempt,
                status = ?outcome.status,
                "backing off {} before retrying",
                humantime::format_duration(wait)
            );
            sleep(wait).await;
        }
    }
}
