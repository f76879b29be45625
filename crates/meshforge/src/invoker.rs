//! Resilient invocation of remote calls.
//!
//! Every remote call goes through [`Invoker::invoke`]. Transient failures
//! are retried with exponential backoff, except when the message carries a
//! quota hint (`retry in H:MM:SS`), in which case the hinted wait is used
//! and the backoff delay is left alone. Both kinds draw on one budget:
//! at most `max_retries + 1` attempts in total.

use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::RemoteError;
use crate::error::ForgeError;
use forgeconf::RetryConfig;

static QUOTA_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry in (\d+(?::\d+){0,2})").expect("quota hint pattern is valid")
});

/// Slack added to every quota wait so the retry lands after the reset.
const QUOTA_SLACK: Duration = Duration::from_millis(1000);

/// Announced before every wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNotice {
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub wait: Duration,
    /// True when `wait` came from a quota hint.
    pub quota: bool,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("{label}: {message}")]
    Fatal { label: String, message: String },

    #[error("{label}: gave up after {attempts} attempts: {last}")]
    Exhausted {
        label: String,
        attempts: u32,
        last: RemoteError,
        /// Whether the last failure carried a quota hint.
        quota: bool,
    },
}

impl From<InvokeError> for ForgeError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Fatal { label, message } => ForgeError::FatalRemote { label, message },
            InvokeError::Exhausted {
                label,
                attempts,
                last,
                quota: true,
            } => ForgeError::QuotaExceeded {
                label,
                attempts,
                message: last.message().to_string(),
            },
            InvokeError::Exhausted {
                label,
                attempts,
                last,
                quota: false,
            } => ForgeError::TransientRemote {
                label,
                attempts,
                message: last.message().to_string(),
            },
        }
    }
}

/// Parse a `retry in H:MM:SS` hint into the wait before the next attempt.
///
/// Components are right-aligned: `retry in 45` is 45 seconds and
/// `retry in 2:00` is two minutes.
pub fn quota_wait(message: &str) -> Option<Duration> {
    let captures = QUOTA_HINT.captures(message)?;
    let mut parts = [0u64; 3];
    let fields: Vec<u64> = captures[1]
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    let offset = parts.len() - fields.len();
    parts[offset..].copy_from_slice(&fields);

    let [hours, minutes, seconds] = parts;
    let secs = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    Some(Duration::from_secs(secs) + QUOTA_SLACK)
}

/// Bounded retry loop around remote calls.
#[derive(Debug, Clone)]
pub struct Invoker {
    max_retries: u32,
    initial_delay: Duration,
}

impl Invoker {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_delay())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn invoke<T, F, Fut>(&self, label: &str, op: F) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.invoke_observed(label, op, |_| {}).await
    }

    /// Like [`Invoker::invoke`], calling `observe` before each wait.
    pub async fn invoke_observed<T, F, Fut, O>(
        &self,
        label: &str,
        mut op: F,
        mut observe: O,
    ) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        O: FnMut(&RetryNotice),
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let message = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(RemoteError::Fatal(message)) => {
                    warn!(label, attempt, error = %message, "remote call failed, not retrying");
                    return Err(InvokeError::Fatal {
                        label: label.to_string(),
                        message,
                    });
                }
                Err(RemoteError::Transient(message)) => message,
            };

            let hinted = quota_wait(&message);
            if attempt > self.max_retries {
                warn!(label, attempts = attempt, error = %message, "retry budget exhausted");
                return Err(InvokeError::Exhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    last: RemoteError::Transient(message),
                    quota: hinted.is_some(),
                });
            }

            let notice = match hinted {
                Some(wait) => RetryNotice {
                    attempt,
                    wait,
                    quota: true,
                },
                None => {
                    let wait = delay;
                    delay = delay.saturating_mul(2);
                    RetryNotice {
                        attempt,
                        wait,
                        quota: false,
                    }
                }
            };

            warn!(
                label,
                attempt,
                wait_ms = notice.wait.as_millis() as u64,
                quota = notice.quota,
                error = %message,
                "remote call failed, retrying"
            );
            observe(&notice);
            tokio::time::sleep(notice.wait).await;
        }
    }
}
