//! Exponential backoff retry policy, shared by the DAG scheduler and every
//! provider that talks to the outside world (AI APIs, webhooks, shell
//! commands).
//!
//! ```rust
//! use checkgraph_tooling::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3)
//!     .with_initial_delay_ms(500)
//!     .with_backoff_factor(2.0)
//!     .with_max_delay_ms(8_000);
//!
//! for attempt in 0..policy.max_attempts {
//!     if attempt > 0 {
//!         let _delay = policy.delay_for_attempt(attempt);
//!     }
//! }
//! ```

use rand::Rng;
use std::time::Duration;

/// Backoff shape. Only `Exponential` is used by default; `Fixed` is kept
/// for checks that want constant spacing between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

/// Configuration for retrying a fallible operation with exponential backoff
/// and optional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub mode: BackoffMode,
    pub jitter: bool,
    /// If non-empty, only errors whose `Display` contains one of these
    /// substrings are retried; otherwise every error is retryable.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            mode: BackoffMode::Exponential,
            jitter: true,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_mode(mut self, mode: BackoffMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_errors(mut self, substrings: Vec<String>) -> Self {
        self.retryable_errors = substrings;
        self
    }

    /// Whether another attempt is allowed after `attempt` (0-indexed) has
    /// failed.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Whether `error_text` matches the retryable-error allowlist. An empty
    /// allowlist means "everything is retryable".
    pub fn is_retryable(&self, error_text: &str) -> bool {
        if self.retryable_errors.is_empty() {
            return true;
        }
        self.retryable_errors
            .iter()
            .any(|needle| error_text.contains(needle.as_str()))
    }

    /// Delay to wait before the given (0-indexed, about-to-be-made) attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let raw_ms = match self.mode {
            BackoffMode::Fixed => base_ms,
            BackoffMode::Exponential => base_ms * self.backoff_factor.powi(attempt as i32),
        };
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let final_ms = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_ms * rng.gen_range(0.5..1.5)
        } else {
            capped_ms
        };
        Duration::from_millis(final_ms.max(0.0) as u64)
    }
}

/// Run `op` under `policy`, sleeping between attempts. `op` receives the
/// 0-indexed attempt number. Retries do not apply to errors rejected by
/// `RetryPolicy::is_retryable`.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let text = err.to_string();
                if !policy.is_retryable(&text) || !policy.should_retry(attempt) {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, error = %text, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn retryable_errors_allowlist() {
        let policy = RetryPolicy::new(3).with_retryable_errors(vec!["timeout".into()]);
        assert!(policy.is_retryable("request timeout after 30s"));
        assert!(!policy.is_retryable("invalid credentials"));
    }

    #[test]
    fn empty_allowlist_retries_everything() {
        let policy = RetryPolicy::new(3);
        assert!(policy.is_retryable("anything"));
    }

    #[test]
    fn exponential_delay_grows() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay_ms(100)
            .with_backoff_factor(2.0)
            .with_jitter(false);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay_ms(1000)
            .with_backoff_factor(10.0)
            .with_max_delay_ms(2000)
            .with_jitter(false);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn retry_async_succeeds_after_failures() {
        let policy = RetryPolicy::new(3).with_initial_delay_ms(1).with_jitter(false);
        let mut calls = 0;
        let result: Result<i32, String> = retry_async(&policy, |attempt| {
            calls += 1;
            async move {
                if attempt < 2 {
                    Err("timeout".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_async_gives_up_on_non_retryable() {
        let policy = RetryPolicy::new(3)
            .with_initial_delay_ms(1)
            .with_retryable_errors(vec!["timeout".into()]);
        let result: Result<i32, String> = retry_async(&policy, |_| async { Err("fatal".to_string()) }).await;
        assert_eq!(result, Err("fatal".to_string()));
    }
}
