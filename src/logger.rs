use std::fmt;

/// Diagnostic sink used by the retry loop.
///
/// Logging is fire-and-forget: implementations must not panic, and nothing
/// they do can change the outcome of a request.
pub trait Logger: Send + Sync {
    fn log(&self, message: fmt::Arguments<'_>);
}

/// Forwards every message to `tracing` at `WARN` level under the `netter`
/// target. This is the default logger.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(target: "netter", "{}", message);
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _message: fmt::Arguments<'_>) {}
}

impl<F> Logger for F
where
    F: Fn(fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, message: fmt::Arguments<'_>) {
        self(message)
    }
}
