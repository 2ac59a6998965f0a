use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::BoxError;

type Supply = dyn Fn() -> Result<reqwest::Body, BoxError> + Send + Sync;

/// Produces a fresh request body for every attempt.
///
/// A `reqwest::Body` is consumed by the attempt that sends it, so the retry
/// loop asks the supplier for a new one each time. Suppliers must be
/// idempotent: every call yields a body equivalent to the first.
#[derive(Clone)]
pub struct BodySupplier {
    supply: Arc<Supply>,
}

impl BodySupplier {
    /// Wraps a factory closure. Errors it returns abort the request without
    /// retrying.
    pub fn from_fn<F>(supply: F) -> Self
    where
        F: Fn() -> Result<reqwest::Body, BoxError> + Send + Sync + 'static,
    {
        Self {
            supply: Arc::new(supply),
        }
    }

    /// Replays the same in-memory bytes on every attempt.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_fn(move || Ok(reqwest::Body::from(bytes.clone())))
    }

    pub(crate) fn materialize(&self) -> Result<reqwest::Body, BoxError> {
        (self.supply)()
    }
}

impl fmt::Debug for BodySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySupplier").finish_non_exhaustive()
    }
}

impl From<Bytes> for BodySupplier {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for BodySupplier {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for BodySupplier {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for BodySupplier {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static [u8]> for BodySupplier {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(bytes)
    }
}
