use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Anything that carries an HTTP-like status code.
pub trait Outcome {
    fn status_code(&self) -> u16;

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

impl Outcome for reqwest::Response {
    fn status_code(&self) -> u16 {
        reqwest::Response::status(self).as_u16()
    }
}

impl Outcome for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

/// Retry and backoff parameters for one logical delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Backoff base in seconds; retry `n` waits `base^n`.
    pub base: f64,
    /// Retries allowed after the first attempt.
    pub max_retry_attempts: u32,
    /// From this retry number on the delay stays at `ceiling_secs`.
    pub ceiling_attempt: u32,
    pub ceiling_secs: u64,
    /// Status codes worth another attempt. Anything else that is not a
    /// success is final.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 2.0,
            max_retry_attempts: 15,
            ceiling_attempt: 8,
            ceiling_secs: 5 * 60,
            transient_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    /// Delay to wait before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt >= self.ceiling_attempt {
            return self.ceiling();
        }

        let secs = self.base.powi(attempt as i32);
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| self.ceiling())
    }

    pub fn is_transient(&self, status: u16) -> bool {
        self.transient_statuses.contains(&status)
    }
}

/// The last failure seen before giving up, passed through untouched.
#[derive(Debug)]
pub enum Failure<R, E> {
    /// The peer answered with a transient status.
    Status(R),
    /// The attempt never produced a response.
    Error(E),
}

#[derive(Debug)]
pub enum DeliveryError<R, E> {
    /// Answered with a status that must not be retried.
    Rejected(R),
    /// Every allowed attempt failed.
    Exhausted { attempts: u32, last: Failure<R, E> },
    /// The caller cancelled the delivery. No retry or fallback happened.
    Cancelled,
}

impl<R: Outcome, E: fmt::Display> fmt::Display for DeliveryError<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Rejected(r) => {
                write!(f, "delivery rejected with status {}", r.status_code())
            }
            DeliveryError::Exhausted {
                attempts,
                last: Failure::Status(r),
            } => write!(
                f,
                "delivery failed after {} attempts, last status {}",
                attempts,
                r.status_code()
            ),
            DeliveryError::Exhausted {
                attempts,
                last: Failure::Error(e),
            } => write!(f, "delivery failed after {} attempts: {}", attempts, e),
            DeliveryError::Cancelled => write!(f, "delivery cancelled"),
        }
    }
}

impl<R, E> std::error::Error for DeliveryError<R, E>
where
    R: Outcome + fmt::Debug,
    E: fmt::Display + fmt::Debug,
{
}

/// Run `send` until it succeeds, fails permanently, runs out of attempts or
/// `cancel` fires.
///
/// `send` may be called many times for the same logical payload and must not
/// have side effects beyond the delivery itself. No lock is held while
/// sleeping between attempts.
pub async fn send_with_retry<F, Fut, R, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut send: F,
) -> Result<R, DeliveryError<R, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: Outcome,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            outcome = send() => outcome,
        };

        let failure = match outcome {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) if !policy.is_transient(response.status_code()) => {
                return Err(DeliveryError::Rejected(response));
            }
            Ok(response) => {
                warn!(attempt, status = response.status_code(), "Transient delivery status");
                Failure::Status(response)
            }
            Err(e) => {
                warn!(attempt, error = %e, "Delivery attempt failed");
                Failure::Error(e)
            }
        };

        if attempt >= policy.max_retry_attempts {
            return Err(DeliveryError::Exhausted {
                attempts: attempt + 1,
                last: failure,
            });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, delay_secs = delay.as_secs_f64(), "Backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
