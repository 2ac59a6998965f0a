//! Cancellation and deadlines attached to a request.
//!
//! A [`Context`] travels with a [`Request`](crate::Request) through every
//! attempt. It is consulted before each retry decision, raced against the
//! in-flight send and raced against the backoff sleep.

use std::{future, sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};

/// Why a [`Context`] is done.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline.
///
/// The default value never cancels and has no deadline.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the [`Context`] it was created with. Cloneable; cancelling is
/// idempotent.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Creates a cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    /// Adds a deadline `timeout` from now. An earlier existing deadline wins.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    /// Adds an absolute deadline. An earlier existing deadline wins.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is done, or `None` while it is live.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(ContextError::Canceled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(ContextError::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context, or once every
    /// [`CancelHandle`] has been dropped without cancelling and there is no
    /// deadline.
    pub async fn done(&self) -> ContextError {
        let canceled = async {
            if let Some(rx) = &self.cancel {
                let mut rx = rx.clone();
                if rx.wait_for(|canceled| *canceled).await.is_ok() {
                    return ContextError::Canceled;
                }
            }
            future::pending::<ContextError>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    ContextError::DeadlineExceeded
                }
                None => future::pending::<ContextError>().await,
            }
        };

        tokio::select! {
            reason = canceled => reason,
            reason = expired => reason,
        }
    }
}
