//! The single-shot send primitive the retry loop drives.
//!
//! [`ReqwestTransport`] is the production implementation. Its errors are
//! classified once, here, into [`TransportErrorKind`] so the retry policy
//! never has to inspect concrete error types.

use std::{error::Error as StdError, fmt, future::Future, io, sync::Arc, time::Duration};

use crate::{BoxError, ClientOptions, NetterError, Result};

/// Sends one physical HTTP request and returns the response head.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = std::result::Result<reqwest::Response, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = std::result::Result<reqwest::Response, TransportError>> + Send {
        (**self).send(request)
    }
}

/// Category of a transport failure, as far as retrying is concerned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// The redirect policy gave up.
    RedirectLimit,
    /// The server certificate was signed by an unknown authority.
    UntrustedAuthority,
    /// The URL scheme is not one the transport can speak.
    UnsupportedScheme,
    /// Anything else: timeouts, resets, refused connections, DNS failures.
    Other,
}

impl TransportErrorKind {
    /// Permanent kinds describe a request that can never succeed as sent.
    pub fn is_permanent(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// A classified transport failure.
#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The underlying `reqwest` error, when the failure came from reqwest.
    pub fn reqwest(&self) -> Option<&reqwest::Error> {
        self.source.downcast_ref::<reqwest::Error>()
    }

    pub fn is_timeout(&self) -> bool {
        self.reqwest().is_some_and(reqwest::Error::is_timeout)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(classify(&err), err)
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_redirect() {
        return TransportErrorKind::RedirectLimit;
    }
    // reqwest rejects non-http(s) URLs as a builder error at send time.
    if err.is_builder()
        && err
            .url()
            .is_some_and(|url| !matches!(url.scheme(), "http" | "https"))
    {
        return TransportErrorKind::UnsupportedScheme;
    }
    if has_unknown_issuer(err) {
        return TransportErrorKind::UntrustedAuthority;
    }
    TransportErrorKind::Other
}

/// Walks the source chain looking for rustls' unknown-issuer verdict.
///
/// `io::Error` does not expose its payload through `source()`, so wrapped
/// payloads are unpacked with `get_ref()`.
fn has_unknown_issuer(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err
            .downcast_ref::<rustls::Error>()
            .is_some_and(is_unknown_issuer)
        {
            return true;
        }
        if let Some(inner) = err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            if inner
                .downcast_ref::<rustls::Error>()
                .is_some_and(is_unknown_issuer)
            {
                return true;
            }
            if has_unknown_issuer(inner) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

fn is_unknown_issuer(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer)
    )
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a `reqwest::Client` tuned from `options`.
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_millis(options.pool_idle_timeout_ms))
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30));
        if let Some(timeout) = options.attempt_timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = options.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| NetterError::Transport(err.into()))?;
        Ok(Self { http })
    }

    /// Wraps an existing client, keeping whatever tuning it already has.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = std::result::Result<reqwest::Response, TransportError>> + Send {
        let pending = self.http.execute(request);
        async move { pending.await.map_err(TransportError::from) }
    }
}
