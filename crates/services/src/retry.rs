//! Exponential backoff with jitter for every network-facing call.

use std::future::Future;
use std::time::Duration;

use compliance_core::policy::RetrySettings;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Error codes that fail immediately, compared case-insensitively with `_` and `-` folded.
pub const NON_RETRYABLE_CODES: &[&str] = &[
    "permission-denied",
    "unauthenticated",
    "invalid-argument",
    "not-found",
    "already-exists",
    "failed-precondition",
    "forbidden",
    "unauthorized",
    "bad-request",
];

/// Message fragments that mark an error as non-retryable.
pub const NON_RETRYABLE_MESSAGE_PATTERNS: &[&str] = &[
    "validation",
    "invalid",
    "permission",
    "unauthorized",
    "not found",
    "not-found",
];

const JITTER_FRACTION: f64 = 0.1;

/// Errors that carry enough information to decide whether to retry.
pub trait RetryClassify: std::error::Error {
    /// Machine-readable code such as `PERMISSION_DENIED`.
    fn error_code(&self) -> Option<&str>;

    fn is_retryable(&self) -> bool {
        is_retryable(self.error_code(), &self.to_string())
    }
}

/// Classification rule shared by every error type.
#[must_use]
pub fn is_retryable(code: Option<&str>, message: &str) -> bool {
    if let Some(code) = code {
        let folded = code.trim().to_ascii_lowercase().replace('_', "-");
        if NON_RETRYABLE_CODES.contains(&folded.as_str()) {
            return false;
        }
    }
    let message = message.to_lowercase();
    !NON_RETRYABLE_MESSAGE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{operation} failed: {source}")]
    NonRetryable {
        operation: String,
        #[source]
        source: E,
    },

    #[error(
        "{operation} failed after {attempts} attempts (last error {}: {last_message})",
        .last_code.as_deref().unwrap_or("UNKNOWN")
    )]
    Exhausted {
        operation: String,
        attempts: u32,
        last_code: Option<String>,
        last_message: String,
        #[source]
        last_error: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// `RETRY_EXHAUSTED` for exhaustion, otherwise the underlying code.
    #[must_use]
    pub fn code(&self) -> Option<&str>
    where
        E: RetryClassify,
    {
        match self {
            Self::NonRetryable { source, .. } => source.error_code(),
            Self::Exhausted { .. } => Some("RETRY_EXHAUSTED"),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &E {
        match self {
            Self::NonRetryable { source, .. } => source,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::NonRetryable { source, .. } => source,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Retries an async operation with `min(initial * 2^(attempt-1), max)` backoff
/// plus uniform ±10% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    settings: RetrySettings,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

impl RetryExecutor {
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> RetrySettings {
        self.settings
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.max(1)
    }

    /// Backoff before retrying after failed attempt `attempt` (1-based), without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1_u32 << exponent;
        self.settings
            .initial_delay
            .saturating_mul(factor)
            .min(self.settings.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        base.mul_f64(1.0 + spread)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `RetryError::NonRetryable` on the first non-retryable failure and
    /// `RetryError::Exhausted` once every attempt failed.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify + 'static,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(operation, attempt, error = %err, "non-retryable failure");
                    return Err(RetryError::NonRetryable {
                        operation: operation.to_owned(),
                        source: err,
                    });
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_owned(),
                        attempts: attempt,
                        last_code: err.error_code().map(str::to_owned),
                        last_message: err.to_string(),
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct FakeError {
        code: Option<&'static str>,
        message: &'static str,
    }

    impl RetryClassify for FakeError {
        fn error_code(&self) -> Option<&str> {
            self.code
        }
    }

    fn transient() -> FakeError {
        FakeError {
            code: Some("UNAVAILABLE"),
            message: "connection reset",
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let exec = RetryExecutor::default();
        assert_eq!(exec.base_delay(1), Duration::from_millis(100));
        assert_eq!(exec.base_delay(2), Duration::from_millis(200));
        assert_eq!(exec.base_delay(3), Duration::from_millis(400));
        assert_eq!(exec.base_delay(10), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let exec = RetryExecutor::default();
        for _ in 0..200 {
            let delay = exec.jittered_delay(2);
            assert!(delay >= Duration::from_millis(180), "{delay:?}");
            assert!(delay <= Duration::from_millis(220), "{delay:?}");
        }
    }

    #[test]
    fn classifies_codes_and_messages() {
        assert!(!is_retryable(Some("PERMISSION_DENIED"), "nope"));
        assert!(!is_retryable(Some("failed-precondition"), ""));
        assert!(!is_retryable(None, "Invalid argument supplied"));
        assert!(!is_retryable(None, "document not found"));
        assert!(is_retryable(Some("UNAVAILABLE"), "connection reset"));
        assert!(is_retryable(None, "deadline exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let exec = RetryExecutor::default();
        let counter = Arc::clone(&calls);
        let result = exec
            .execute("flaky", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_after_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let exec = RetryExecutor::default();
        let counter = Arc::clone(&calls);
        let err = exec
            .execute("denied", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(FakeError {
                        code: Some("PERMISSION_DENIED"),
                        message: "caller lacks access",
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::NonRetryable { .. }));
        assert_eq!(err.code(), Some("PERMISSION_DENIED"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let exec = RetryExecutor::default();
        let counter = Arc::clone(&calls);
        let err = exec
            .execute("always-down", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                last_code,
                last_message,
                ..
            } => {
                assert_eq!(operation, "always-down");
                assert_eq!(attempts, 3);
                assert_eq!(last_code.as_deref(), Some("UNAVAILABLE"));
                assert_eq!(last_message, "connection reset");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
