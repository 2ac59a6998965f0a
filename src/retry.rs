//! Retry decisions and the backoff schedule.
//!
//! Both are pure: [`RetryPolicy::check`] looks only at the outcome of one
//! attempt and the request context, and [`compute_backoff`] only at its
//! arguments.

use std::time::Duration;

use crate::{
    context::{Context, ContextError},
    transport::{TransportError, TransportErrorKind},
    NetterError, Result,
};

/// What one physical attempt produced, as seen by the policy.
#[derive(Clone, Copy, Debug)]
pub enum Outcome<'a> {
    /// A response arrived with this status code.
    Status(u16),
    /// The transport failed before a response arrived.
    Failed(&'a TransportError),
}

impl<'a> From<&'a std::result::Result<reqwest::Response, TransportError>> for Outcome<'a> {
    fn from(result: &'a std::result::Result<reqwest::Response, TransportError>) -> Self {
        match result {
            Ok(response) => Outcome::Status(response.status().as_u16()),
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// Verdict of [`RetryPolicy::check`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// The failure looks transient; try again if the budget allows.
    Retry,
    /// Hand the outcome back to the caller as-is.
    Stop,
    /// The request context is done; surface this error instead.
    Abort(ContextError),
}

/// Attempt budget and backoff bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    wait_min: Duration,
    wait_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            wait_min: Duration::from_secs(2),
            wait_max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// `max_retries` counts attempts after the first one.
    ///
    /// Fails when `wait_min` exceeds `wait_max`.
    pub fn new(max_retries: usize, wait_min: Duration, wait_max: Duration) -> Result<Self> {
        if wait_min > wait_max {
            return Err(NetterError::Config(format!(
                "retry wait_min ({wait_min:?}) must not exceed wait_max ({wait_max:?})"
            )));
        }
        Ok(Self {
            max_retries,
            wait_min,
            wait_max,
        })
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn wait_min(&self) -> Duration {
        self.wait_min
    }

    pub fn wait_max(&self) -> Duration {
        self.wait_max
    }

    /// Decides whether the attempt that produced `outcome` should be retried.
    pub fn check(&self, ctx: &Context, outcome: Outcome<'_>) -> RetryDecision {
        if let Some(reason) = ctx.err() {
            return RetryDecision::Abort(reason);
        }

        let retry = match outcome {
            Outcome::Failed(err) => match err.kind() {
                TransportErrorKind::RedirectLimit
                | TransportErrorKind::UntrustedAuthority
                | TransportErrorKind::UnsupportedScheme => false,
                TransportErrorKind::Other => true,
            },
            Outcome::Status(status) => is_retryable_status(status),
        };

        if retry {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }

    /// Wait before the attempt following attempt `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        compute_backoff(self.wait_min, self.wait_max, attempt)
    }
}

/// `0` means no usable response; 501 is a permanent capability gap.
pub fn is_retryable_status(status: u16) -> bool {
    status == 0 || ((500..=599).contains(&status) && status != 501)
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// `wait_min * 2^attempt`, clamped to `wait_max` (also on overflow).
pub fn compute_backoff(wait_min: Duration, wait_max: Duration, attempt: u32) -> Duration {
    if wait_min.is_zero() {
        return Duration::ZERO;
    }
    1u128
        .checked_shl(attempt)
        .and_then(|factor| wait_min.as_nanos().checked_mul(factor))
        .filter(|nanos| *nanos <= wait_max.as_nanos())
        .and_then(duration_from_nanos)
        .unwrap_or(wait_max)
}

fn duration_from_nanos(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, subsec))
}
