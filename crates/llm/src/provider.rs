//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol
//! (Together AI by default). One call to [`GenerationPort::generate`] is one
//! HTTP request; retries and per-call deadlines are layered on top by
//! [`crate::RetryingGenerator`].

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    ChatMessage, GenerationError, GenerationPort, ModelName, ModelSettings, PipelineError,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tracing::{debug, instrument};

/// Chat-completions provider.
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: ModelName,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsProvider {
    /// Creates a provider for `settings` authenticating with `api_key`.
    pub fn new(settings: &ModelSettings, api_key: impl Into<String>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| PipelineError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: settings.name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    /// Creates a provider reading the API key from the environment variable
    /// named by `settings.api_key_env`.
    pub fn from_env(settings: &ModelSettings) -> Result<Self, PipelineError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "API key not configured: set {}",
                    settings.api_key_env
                ))
            })?;
        Self::new(settings, api_key)
    }

    pub fn model(&self) -> &ModelName {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request_body(&self, context: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model.as_str(),
            "messages": context,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationPort for ChatCompletionsProvider {
    #[instrument(skip_all, fields(model = %self.model, messages = context.len()))]
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_request_body(context))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body, retry_after));
        }

        let content = extract_content(&body)?;
        debug!(chars = content.len(), "generation completed");
        Ok(content)
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Pulls `choices[0].message.content` out of a successful response body.
fn extract_content(body: &str) -> Result<String, GenerationError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::fatal(format!("unreadable completion response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| GenerationError::fatal("completion response has no message content"))
}

/// Maps a non-2xx HTTP status to a transient or fatal error.
fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> GenerationError {
    let message = format!("HTTP {status}: {}", truncate(body, 500));
    match status {
        408 | 409 | 429 | 500..=599 => GenerationError::Transient {
            message,
            retry_after,
        },
        _ => GenerationError::Fatal { message },
    }
}

fn map_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        GenerationError::transient(e.to_string())
    } else {
        GenerationError::fatal(e.to_string())
    }
}

/// Reads a delta-seconds `Retry-After` header.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn settings() -> ModelSettings {
        ModelSettings {
            name: ModelName::new("meta-llama/Llama-3.3-70B-Instruct-Turbo").unwrap(),
            base_url: "https://api.together.xyz/v1/".into(),
            api_key_env: "SPYGLASS_TEST_UNSET_KEY".into(),
            temperature: 0.2,
            max_tokens: 512,
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }

    #[test]
    fn endpoint_joins_base_url_without_double_slash() {
        let provider = ChatCompletionsProvider::new(&settings(), "key").unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://api.together.xyz/v1/chat/completions"
        );
    }

    #[test]
    fn request_body_carries_model_parameters_and_roles() {
        let provider = ChatCompletionsProvider::new(&settings(), "key").unwrap();
        let body = provider.build_request_body(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("trends?"),
        ]);
        assert_eq!(body["model"], "meta-llama/Llama-3.3-70B-Instruct-Turbo");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "trends?");
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = ChatCompletionsProvider::from_env(&settings()).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration { .. }));
        assert!(err.to_string().contains("SPYGLASS_TEST_UNSET_KEY"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(429, "slow down", Some(Duration::from_secs(3))),
            GenerationError::Transient { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(matches!(classify_status(503, "", None), GenerationError::Transient { .. }));
        assert!(matches!(classify_status(408, "", None), GenerationError::Transient { .. }));
        assert!(matches!(classify_status(401, "bad key", None), GenerationError::Fatal { .. }));
        assert!(matches!(classify_status(400, "", None), GenerationError::Fatal { .. }));
        assert!(matches!(classify_status(404, "", None), GenerationError::Fatal { .. }));
    }

    #[test]
    fn content_extraction() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_content(ok).unwrap(), "hello");

        let empty = r#"{"choices":[]}"#;
        assert!(matches!(extract_content(empty), Err(GenerationError::Fatal { .. })));

        assert!(matches!(extract_content("<html>"), Err(GenerationError::Fatal { .. })));
    }

    #[test]
    fn retry_after_header_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn long_error_bodies_are_truncated_on_char_boundaries() {
        let body = "é".repeat(600);
        let GenerationError::Fatal { message } = classify_status(400, &body, None) else {
            panic!("expected fatal");
        };
        assert_eq!(message.chars().count(), "HTTP 400: ".len() + 500);
    }
}
