//! `netter` is a resilient async HTTP client built on `reqwest`.
//!
//! A request is issued once; transient failures (network errors and 5xx
//! responses other than 501) are retried with deterministic exponential
//! backoff until a response, a permanent error, cancellation or the attempt
//! budget ends the call:
//! - [`Client::execute`]
//! - [`Client::get`] / [`Client::head`] / [`Client::post`] / [`Client::post_json`]
//! - [`get`] / [`post`] on the process-wide [`default_client`]
//!
//! ```no_run
//! # async fn run() -> netter::Result<()> {
//! use netter::{Client, ClientOptions};
//!
//! let client = Client::from_options(&ClientOptions {
//!     max_retries: 2,
//!     ..ClientOptions::default()
//! })?;
//! let response = client.get("https://example.com/robots.txt").await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod context;
mod error;
mod logger;
mod options;
mod request;
pub mod retry;
mod transport;

pub use body::BodySupplier;
pub use client::{default_client, get, post, Client};
pub use context::{CancelHandle, Context, ContextError};
pub use error::{BoxError, NetterError};
pub use logger::{Logger, NopLogger, TracingLogger};
pub use options::ClientOptions;
pub use request::Request;
pub use retry::{compute_backoff, RetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportErrorKind};

pub type Result<T> = std::result::Result<T, NetterError>;
