use std::time::Duration;

use serde::Deserialize;

use crate::{NetterError, Result, RetryPolicy};

/// Configures transport tuning and retry behavior.
///
/// Deserializes from partial documents: missing fields take their defaults.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Overall timeout of one attempt in milliseconds. `0` disables it.
    pub timeout_ms: u64,
    /// Connection establishment timeout in milliseconds. `0` disables it.
    pub connect_timeout_ms: u64,
    /// How long an idle pooled connection is kept, in milliseconds.
    pub pool_idle_timeout_ms: u64,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// First backoff in milliseconds; doubles on every retry.
    pub wait_min_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub wait_max_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            pool_idle_timeout_ms: 90_000,
            pool_max_idle_per_host: 100,
            max_retries: 4,
            wait_min_ms: 2_000,
            wait_max_ms: 8_000,
        }
    }
}

impl ClientOptions {
    /// Validated retry policy described by these options.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.wait_min_ms),
            Duration::from_millis(self.wait_max_ms),
        )
    }

    /// Per-attempt timeout, `None` when `timeout_ms` is `0`.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.timeout_ms)
    }

    /// Connect timeout, `None` when `connect_timeout_ms` is `0`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connect_timeout_ms)
    }

    /// Defaults overlaid with `NETTER_*` environment variables.
    ///
    /// Reads:
    /// - `NETTER_TIMEOUT_MS`
    /// - `NETTER_CONNECT_TIMEOUT_MS`
    /// - `NETTER_POOL_IDLE_TIMEOUT_MS`
    /// - `NETTER_POOL_MAX_IDLE_PER_HOST`
    /// - `NETTER_MAX_RETRIES`
    /// - `NETTER_WAIT_MIN_MS`
    /// - `NETTER_WAIT_MAX_MS`
    ///
    /// Unset variables keep the default; set but empty or unparsable ones
    /// are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut opts = Self::default();
        override_from(&lookup, "NETTER_TIMEOUT_MS", &mut opts.timeout_ms)?;
        override_from(&lookup, "NETTER_CONNECT_TIMEOUT_MS", &mut opts.connect_timeout_ms)?;
        override_from(&lookup, "NETTER_POOL_IDLE_TIMEOUT_MS", &mut opts.pool_idle_timeout_ms)?;
        override_from(
            &lookup,
            "NETTER_POOL_MAX_IDLE_PER_HOST",
            &mut opts.pool_max_idle_per_host,
        )?;
        override_from(&lookup, "NETTER_MAX_RETRIES", &mut opts.max_retries)?;
        override_from(&lookup, "NETTER_WAIT_MIN_MS", &mut opts.wait_min_ms)?;
        override_from(&lookup, "NETTER_WAIT_MAX_MS", &mut opts.wait_max_ms)?;
        Ok(opts)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn override_from<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    if raw.trim().is_empty() {
        return Err(NetterError::Config(format!("{name} is set but empty")));
    }
    *slot = raw
        .trim()
        .parse()
        .map_err(|err| NetterError::Config(format!("{name}={raw}: {err}")))?;
    Ok(())
}
