use std::{fmt, sync::Arc, sync::OnceLock};

use reqwest::{
    header::{self, HeaderValue},
    Method, Response, Url,
};
use serde::Serialize;
use tokio::time::sleep;

use crate::{
    retry::{Outcome, RetryDecision},
    BodySupplier, ClientOptions, Logger, NetterError, ReqwestTransport, Request, Result,
    RetryPolicy, TracingLogger, Transport,
};

/// Bytes read from a discarded response before it is dropped, so that
/// short error bodies do not keep their connection out of the pool.
const DRAIN_LIMIT: usize = 4096;

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// Returns the process-wide client, building it on first use.
///
/// Its settings are [`ClientOptions::default`] and never change; build a
/// separate [`Client`] for anything else.
pub fn default_client() -> Result<&'static Client> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = Client::new()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

/// Sends a GET request with the process-wide client.
pub async fn get(url: &str) -> Result<Response> {
    default_client()?.get(url).await
}

/// Sends a POST request with the process-wide client.
pub async fn post(
    url: &str,
    content_type: &str,
    body: impl Into<BodySupplier>,
) -> Result<Response> {
    default_client()?.post(url, content_type, body).await
}

/// HTTP client that retries transient failures with exponential backoff.
#[derive(Clone)]
pub struct Client<T = ReqwestTransport> {
    transport: T,
    logger: Arc<dyn Logger>,
    retry: RetryPolicy,
}

impl<T: fmt::Debug> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with [`ClientOptions::default`]: 30s timeout and
    /// four retries backing off from 2s to 8s.
    pub fn new() -> Result<Self> {
        Self::from_options(&ClientOptions::default())
    }

    /// Creates a reqwest-backed client from explicit options.
    pub fn from_options(opts: &ClientOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(opts)?;
        Ok(Client::with_transport(transport, opts.retry_policy()?))
    }

    /// Creates a client from [`ClientOptions::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::from_options(&ClientOptions::from_env()?)
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client around any transport, logging through `tracing`.
    pub fn with_transport(transport: T, retry: RetryPolicy) -> Self {
        Self {
            transport,
            logger: Arc::new(TracingLogger),
            retry,
        }
    }

    /// Replaces the logger.
    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a GET request.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.execute(Request::new(Method::GET, url)?).await
    }

    /// Sends a HEAD request.
    pub async fn head(&self, url: &str) -> Result<Response> {
        self.execute(Request::new(Method::HEAD, url)?).await
    }

    /// Sends a POST request with the given `Content-Type`.
    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<BodySupplier>,
    ) -> Result<Response> {
        let content_type =
            HeaderValue::from_str(content_type).map_err(NetterError::InvalidHeader)?;
        let request = Request::new(Method::POST, url)?
            .header(header::CONTENT_TYPE, content_type)
            .with_body(body);
        self.execute(request).await
    }

    /// Serializes `payload` once and POSTs it as `application/json`.
    pub async fn post_json<P: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &P,
    ) -> Result<Response> {
        let bytes = serde_json::to_vec(payload).map_err(NetterError::Json)?;
        self.post(url, "application/json", bytes).await
    }

    /// Runs `request` until it succeeds, fails permanently, runs out of
    /// retries or its context is done.
    ///
    /// Any response the retry policy does not consider transient is returned
    /// as `Ok`, whatever its status. Interpreting 4xx and friends is up to the
    /// caller.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let ctx = request.context();
        let url = request.url();
        let max_retries = self.retry.max_retries();

        let mut attempt = 0usize;
        loop {
            let http_request = request.to_attempt()?;

            tracing::debug!(method = %request.method(), %url, attempt, "sending request");

            let result = tokio::select! {
                reason = ctx.done() => return Err(NetterError::Canceled(reason)),
                result = self.transport.send(http_request) => result,
            };

            if let Err(err) = &result {
                self.logger
                    .log(format_args!("netter: {url} request failed: {err}"));
            }

            let decision = self.retry.check(ctx, Outcome::from(&result));
            match decision {
                RetryDecision::Abort(reason) => return Err(NetterError::Canceled(reason)),
                RetryDecision::Stop => return result.map_err(NetterError::Transport),
                RetryDecision::Retry => {}
            }

            let remain = max_retries.saturating_sub(attempt);
            if remain == 0 {
                // The last response, if any, is dropped here, closing it.
                break;
            }

            let status = match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let drained = self.drain(response).await;
                    tracing::trace!(%url, status, drained, "discarded retryable response");
                    status
                }
                Err(_) => 0,
            };

            let wait = self
                .retry
                .backoff(u32::try_from(attempt).unwrap_or(u32::MAX));
            self.logger.log(format_args!(
                "netter: {url} (status: {status}) retrying in {wait:?} ({remain} left)"
            ));

            tokio::select! {
                reason = ctx.done() => return Err(NetterError::Canceled(reason)),
                _ = sleep(wait) => {}
            }

            attempt += 1;
        }

        Err(NetterError::GivingUp {
            url: Url::clone(url),
            attempts: max_retries + 1,
        })
    }

    /// Reads and discards the body of `response`, returning the byte count.
    ///
    /// Stops at end of body or once [`DRAIN_LIMIT`] bytes have been read.
    /// The limit is checked between chunks, so the final chunk may carry the
    /// count past it. A body left unfinished closes its connection on drop.
    async fn drain(&self, mut response: Response) -> usize {
        let mut drained = 0usize;
        while drained < DRAIN_LIMIT {
            match response.chunk().await {
                Ok(Some(chunk)) => drained += chunk.len(),
                Ok(None) => break,
                Err(err) => {
                    self.logger
                        .log(format_args!("netter: reading response body: {err}"));
                    break;
                }
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        fmt, future,
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use reqwest::Response;

    use super::Client;
    use crate::{
        BodySupplier, Context, ContextError, NetterError, Request, RetryPolicy, TransportError,
        TransportErrorKind, Transport,
    };

    type Step = std::result::Result<Response, TransportError>;

    /// Replays a fixed script of outcomes, then keeps answering 500.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        sends: AtomicUsize,
        bodies: Mutex<Vec<Vec<u8>>>,
        hang: bool,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                hang: true,
                ..Self::default()
            })
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            request: reqwest::Request,
        ) -> impl future::Future<Output = Step> + Send {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if let Some(bytes) = request.body().and_then(|body| body.as_bytes()) {
                self.bodies.lock().expect("bodies mutex").push(bytes.to_vec());
            }
            let next = self
                .script
                .lock()
                .expect("script mutex")
                .pop_front()
                .unwrap_or_else(|| Ok(status(500)));
            let hang = self.hang;
            async move {
                if hang {
                    future::pending::<()>().await;
                }
                next
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLogger(Arc<Mutex<Vec<String>>>);

    impl RecordingLogger {
        fn lines(&self) -> Vec<String> {
            self.0.lock().expect("log mutex").clone()
        }
    }

    impl crate::Logger for RecordingLogger {
        fn log(&self, message: fmt::Arguments<'_>) {
            self.0.lock().expect("log mutex").push(message.to_string());
        }
    }

    fn status(code: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(code)
                .body("server says no")
                .expect("valid response"),
        )
    }

    fn reset() -> Step {
        Err(TransportError::new(
            TransportErrorKind::Other,
            io::Error::from(io::ErrorKind::ConnectionReset),
        ))
    }

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_secs(2), Duration::from_secs(8))
            .expect("valid policy")
    }

    fn client(
        transport: &Arc<ScriptedTransport>,
        max_retries: usize,
    ) -> (Client<Arc<ScriptedTransport>>, RecordingLogger) {
        let logger = RecordingLogger::default();
        let client = Client::with_transport(transport.clone(), policy(max_retries))
            .with_logger(logger.clone());
        (client, logger)
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_is_spent() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, logger) = client(&transport, 4);

        let err = client
            .get("http://127.0.0.1:9/always-500")
            .await
            .expect_err("must give up");

        assert!(matches!(err, NetterError::GivingUp { attempts: 5, .. }));
        assert_eq!(
            err.to_string(),
            "netter: http://127.0.0.1:9/always-500 giving up after 5 attempts"
        );
        assert_eq!(transport.sends(), 5);

        let lines = logger.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "netter: http://127.0.0.1:9/always-500 (status: 500) retrying in 2s (4 left)"
        );
        assert!(lines[2].ends_with("retrying in 8s (2 left)"));
        assert!(lines[3].ends_with("retrying in 8s (1 left)"));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Ok(status(500)),
            reset(),
            Ok(status(503)),
            Ok(status(200)),
        ]);
        let (client, logger) = client(&transport, 5);

        let response = client
            .get("http://127.0.0.1:9/")
            .await
            .expect("must succeed on fourth attempt");

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(transport.sends(), 4);

        let lines = logger.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("request failed"));
        assert!(lines[2].contains("(status: 0) retrying in 4s"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_a_single_attempt() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, logger) = client(&transport, 0);

        let err = client.get("http://127.0.0.1:9/").await.expect_err("must fail");

        assert!(err.to_string().contains("giving up after 1 attempts"));
        assert_eq!(transport.sends(), 1);
        assert!(logger.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn final_statuses_are_returned_without_retry() {
        for code in [200, 204, 301, 404, 501] {
            let transport = ScriptedTransport::new(vec![Ok(status(code))]);
            let (client, _) = client(&transport, 3);

            let response = client.get("http://127.0.0.1:9/").await.expect("must return response");
            assert_eq!(response.status().as_u16(), code);
            assert_eq!(transport.sends(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_transport_errors_surface_unchanged() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::new(
            TransportErrorKind::UntrustedAuthority,
            "invalid peer certificate: UnknownIssuer",
        ))]);
        let (client, logger) = client(&transport, 3);

        let err = client.get("https://127.0.0.1:9/").await.expect_err("must fail");

        match err {
            NetterError::Transport(inner) => {
                assert_eq!(inner.kind(), TransportErrorKind::UntrustedAuthority)
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(transport.sends(), 1);
        assert_eq!(logger.lines().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn body_is_replayed_on_every_attempt() {
        let transport =
            ScriptedTransport::new(vec![Ok(status(502)), Ok(status(502)), Ok(status(201))]);
        let (client, _) = client(&transport, 4);

        let response = client
            .post("http://127.0.0.1:9/items", "text/plain", "id=42")
            .await
            .expect("must succeed");

        assert_eq!(response.status().as_u16(), 201);
        let bodies = transport.bodies.lock().expect("bodies mutex");
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|body| body == b"id=42"));
    }

    #[tokio::test(start_paused = true)]
    async fn body_supplier_failure_aborts_before_sending() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, _) = client(&transport, 4);
        let request = Request::post("http://127.0.0.1:9/")
            .expect("valid url")
            .with_body(BodySupplier::from_fn(|| Err("no payload".into())));

        let err = client.execute(request).await.expect_err("must fail");

        assert!(matches!(err, NetterError::Body(_)));
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_returns_immediately() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, _) = client(&transport, 4);
        let (ctx, handle) = Context::with_cancel();
        let request = Request::get("http://127.0.0.1:9/").expect("valid url").with_context(ctx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = client.execute(request).await.expect_err("must be cancelled");

        assert!(matches!(err, NetterError::Canceled(ContextError::Canceled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_hanging_send() {
        let transport = ScriptedTransport::hanging();
        let (client, _) = client(&transport, 4);
        let ctx = Context::background().timeout(Duration::from_millis(50));
        let request = Request::get("http://127.0.0.1:9/").expect("valid url").with_context(ctx);

        let err = client.execute(request).await.expect_err("must expire");

        assert!(matches!(
            err,
            NetterError::Canceled(ContextError::DeadlineExceeded)
        ));
        assert!(err.is_canceled());
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_canceled_context_wins_over_success() {
        let transport = ScriptedTransport::new(vec![Ok(status(200))]);
        let (client, _) = client(&transport, 4);
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        let request = Request::get("http://127.0.0.1:9/").expect("valid url").with_context(ctx);

        let err = client.execute(request).await.expect_err("must be cancelled");
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn drain_reads_short_bodies_to_the_end() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, logger) = client(&transport, 0);

        assert_eq!(client.drain(status(500)).await, "server says no".len());

        let empty = Response::from(
            http::Response::builder()
                .status(503)
                .body(Vec::new())
                .expect("valid response"),
        );
        assert_eq!(client.drain(empty).await, 0);
        assert!(logger.lines().is_empty());
    }

    #[test]
    fn debug_shows_retry_policy_but_not_logger() {
        let client = Client::new()
            .expect("default client must build")
            .with_retry_policy(policy(1));
        let debug = format!("{client:?}");
        assert!(debug.contains("max_retries: 1"));
        assert!(!debug.contains("logger"));
    }
}
