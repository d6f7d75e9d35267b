use thiserror::Error;

/// Application-wide error types for the collector and annotator.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError { message: String, status_code: u16 },

    /// Model output does not match the annotation schema.
    #[error("Schema validation error: {0}")]
    SchemaValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or writing an input/output table failed.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::IoError(format!("CSV: {err}"))
    }
}

impl AppError {
    /// Returns true for HTTP 429 or a provider message that reports throttling.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            AppError::RateLimitExceeded => true,
            AppError::LlmError {
                status_code,
                message,
                ..
            } => *status_code == 429 || mentions_rate_limit(message),
            AppError::HttpError(msg) | AppError::NetworkError(msg) => mentions_rate_limit(msg),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::Timeout(_) => true,
            AppError::HttpError(msg) | AppError::NetworkError(msg) => {
                msg.to_lowercase().contains("timed out")
            }
            _ => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("ratelimit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(AppError::RateLimitExceeded.is_rate_limit());
        assert!(
            AppError::LlmError {
                message: "slow down".into(),
                status_code: 429,
            }
            .is_rate_limit()
        );
        assert!(
            AppError::LlmError {
                message: "Too Many Requests for model".into(),
                status_code: 200,
            }
            .is_rate_limit()
        );
        assert!(!AppError::Timeout(10).is_rate_limit());
        assert!(
            !AppError::LlmError {
                message: "server error".into(),
                status_code: 500,
            }
            .is_rate_limit()
        );
    }

    #[test]
    fn test_timeout_detection() {
        assert!(AppError::Timeout(60).is_timeout());
        assert!(AppError::HttpError("operation timed out".into()).is_timeout());
        assert!(!AppError::RateLimitExceeded.is_timeout());
    }
}
