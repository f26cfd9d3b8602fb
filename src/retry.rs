//! Retry logic for handling transient failures.

use crate::error::{BridgeError, BridgeResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// The blocking-dispatch profile: 1 s, 2 s, 4 s, ... capped at 60 s,
    /// three attempts.
    pub fn letta_dispatch() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// The conversation-busy profile: 1 s, 2 s, 4 s delays, three retries.
    pub fn conversation_busy() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the backoff duration for a given attempt.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let mut backoff_ms = base_backoff.min(self.max_backoff.as_millis() as f64) as u64;

        // ±25% randomization
        if self.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.75..1.25);
            backoff_ms = (backoff_ms as f64 * jitter_factor) as u64;
        }

        Duration::from_millis(backoff_ms)
    }
}

/// Trait for determining if an error is retryable.
pub trait Retryable {
    /// Check if the error should trigger a retry.
    fn is_retryable(&self) -> bool;

    /// Get a custom retry delay if applicable (e.g., from Retry-After header).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for BridgeError {
    fn is_retryable(&self) -> bool {
        match self {
            BridgeError::RateLimit { .. } => true,
            BridgeError::RequestTimeout { .. } => true,
            BridgeError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            // 5xx from either API; 4xx surfaces to the caller.
            BridgeError::LettaApi { status, .. } | BridgeError::Matrix { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            BridgeError::RateLimit { retry_after, .. } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Execute an async operation with retry logic.
pub async fn retry_with_config<T, F, Fut>(config: &RetryConfig, operation: F) -> BridgeResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() || attempt == config.max_attempts - 1 {
                    return Err(error);
                }

                let backoff = if let Some(retry_after) = error.retry_after() {
                    retry_after
                } else {
                    config.calculate_backoff(attempt)
                };

                tracing::warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );

                last_error = Some(error);
                sleep(backoff).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| BridgeError::Config {
        message: "Retry logic failed unexpectedly".to_string(),
    }))
}

/// Retry a Letta call on busy conversations with the fixed 1/2/4 s schedule.
///
/// Any other error is returned as-is; exhaustion surfaces a typed
/// [`BridgeError::ConversationBusy`].
pub async fn retry_conversation_busy<T, F, Fut>(
    conversation: &str,
    operation: F,
) -> BridgeResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let config = RetryConfig::conversation_busy();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if error.is_conversation_busy() => {
                if attempts >= config.max_attempts {
                    return Err(BridgeError::ConversationBusy {
                        conversation: conversation.to_string(),
                        attempts,
                    });
                }
                let backoff = config.calculate_backoff(attempts - 1);
                tracing::warn!(
                    conversation,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "conversation busy, retrying"
                );
                sleep(backoff).await;
            }
            Err(error) => return Err(error),
        }
    }
}
