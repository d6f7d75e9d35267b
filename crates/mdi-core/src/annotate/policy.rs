use std::time::Duration;

use crate::error::AppError;
use crate::traits::LlmClient;

/// Transient-error handling around a single LLM request.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    /// Fixed pause before every request.
    pub request_sleep: Duration,
    /// Retries after the first request.
    pub max_retries: u32,
    /// Rate-limit backoff unit, multiplied by `attempt + 1`.
    pub backoff_base: Duration,
    /// Timeout backoff unit, multiplied by `attempt + 1`.
    pub timeout_backoff: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            request_sleep: Duration::ZERO,
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            timeout_backoff: Duration::from_secs(1),
        }
    }
}

/// What to do after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RequestPolicy {
    /// `attempt` is the zero-based index of the request that just failed.
    pub fn decide(&self, error: &AppError, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        if error.is_rate_limit() {
            RetryDecision::RetryAfter(self.backoff_base * (attempt + 1))
        } else if error.is_timeout() {
            RetryDecision::RetryAfter(self.timeout_backoff * (attempt + 1))
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Send `prompt`, retrying rate limits and timeouts.
    pub async fn invoke<L: LlmClient>(&self, llm: &L, prompt: &str) -> Result<String, AppError> {
        let mut attempt = 0;
        loop {
            if !self.request_sleep.is_zero() {
                tokio::time::sleep(self.request_sleep).await;
            }

            let error = match llm.invoke(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(e) => e,
            };

            match self.decide(&error, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}
