use reqwest::{header::InvalidHeaderValue, Url};

use crate::{context::ContextError, transport::TransportError};

/// Boxed error produced by body suppliers and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NetterError {
    /// The body supplier could not produce a payload. Never retried.
    #[error("request body: {0}")]
    Body(#[source] BoxError),
    /// Transport failure that was not retried (or could not be).
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),
    /// The request context was cancelled or its deadline passed.
    #[error("{0}")]
    Canceled(#[source] ContextError),
    /// Every attempt allowed by the retry policy failed transiently.
    #[error("netter: {url} giving up after {attempts} attempts")]
    GivingUp {
        /// Target of the request.
        url: Url,
        /// Physical attempts made, including the first one.
        attempts: usize,
    },
    #[error("invalid url: {0}")]
    InvalidUrl(#[source] url::ParseError),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[source] InvalidHeaderValue),
    #[error("json encode error: {0}")]
    Json(#[source] serde_json::Error),
    /// Rejected client or retry configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NetterError {
    /// Returns `true` when the request ended because its context was
    /// cancelled or expired.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}
