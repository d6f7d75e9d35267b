use std::time::Duration;

use mdi_core::annotate::{AnnotateConfig, SYSTEM_PROMPT};
use mdi_core::error::AppError;
use mdi_core::traits::LlmClient;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible chat-completions client.
///
/// Sends the system prompt plus one user message and returns the raw
/// completion text; parsing and validation happen in the annotation state
/// machine. Works with any server that speaks the `/chat/completions`
/// protocol (OpenAI, vLLM, Ollama, compatibility layers).
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    timeout_secs: u64,
    system_prompt: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, DEFAULT_BASE_URL, DEFAULT_LLM_TIMEOUT)
    }

    /// Client for an annotation run: model, endpoint, temperature and
    /// timeout from the config, key from its environment variable.
    pub fn from_config(config: &AnnotateConfig) -> Result<Self, AppError> {
        let api_key = config.api_key()?;
        let client = Self::build(&api_key, &config.model, &config.base_url, config.timeout())?;
        Ok(client.with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            timeout_secs: timeout.as_secs(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        })
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        }
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Error for a non-2xx provider response. 429 is a rate limit.
fn status_error(status_code: u16, body: &str) -> AppError {
    if status_code == 429 {
        return AppError::RateLimitExceeded;
    }
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
    AppError::LlmError {
        message,
        status_code,
    }
}

fn completion_text(response: ChatResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AppError::LlmError {
            message: "Empty response from LLM".into(),
            status_code: 200,
        })
}

impl LlmClient for OpenAiClient {
    async fn invoke(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to parse LLM response: {e}"))
            }
        })?;

        let content = completion_text(chat_response)?;
        tracing::trace!(model = %self.model, chars = content.len(), "LLM response received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_system_prompt_and_temperature() {
        let client = OpenAiClient::new("sk-test", "gpt-4o-mini")
            .unwrap()
            .with_temperature(0.2);
        let body = serde_json::to_value(client.request("Аннотируй")).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "Аннотируй");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::build(
            "k",
            "m",
            "http://localhost:11434/v1/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        assert_eq!(client.timeout_secs, 5);
    }

    #[test]
    fn rate_limit_status_maps_to_rate_limit_error() {
        let error = status_error(429, "{}");
        assert!(error.is_rate_limit());
    }

    #[test]
    fn provider_error_message_is_extracted() {
        let error = status_error(400, r#"{"error": {"message": "bad model"}}"#);
        match error {
            AppError::LlmError {
                message,
                status_code,
            } => {
                assert_eq!(message, "bad model");
                assert_eq!(status_code, 400);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let error = status_error(503, "upstream down");
        assert!(matches!(
            error,
            AppError::LlmError { status_code: 503, ref message } if message == "HTTP 503: upstream down"
        ));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(completion_text(response).is_err());

        let response: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "{\"stance\": \"neutral\"}"}}]}"#)
                .unwrap();
        assert_eq!(completion_text(response).unwrap(), r#"{"stance": "neutral"}"#);
    }
}
