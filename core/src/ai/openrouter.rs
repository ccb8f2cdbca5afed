use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::SystemTime;

use super::retry::{is_retryable_status, parse_retry_after};
use super::{ProviderError, ProviderResponse, TokenUsage, TranslationProvider};
use crate::config::ProviderSettings;
use crate::request::TranslationRequest;

/// OpenAI-compatible chat-completions client, OpenRouter by default.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    settings: ProviderSettings,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, settings: ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::fatal("missing API key"));
        }
        let client = Client::builder()
            .build()
            .map_err(|error| ProviderError::fatal(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TranslationProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let payload = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", &self.settings.title)
            .json(&payload)
            .send()
            .await
            .map_err(|error| ProviderError::transient(format!("request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, SystemTime::now()));
            let body = response.text().await.unwrap_or_default();
            return Err(map_failure(status, &body, retry_after));
        }

        let completion = response
            .json::<ChatCompletion>()
            .await
            .map_err(|error| ProviderError::transient(format!("malformed response body: {error}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProviderError::transient("response carried no choices"))?;

        Ok(ProviderResponse {
            text,
            usage: completion.usage.map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            }),
        })
    }
}

fn map_failure(
    status: StatusCode,
    body: &str,
    retry_after: Option<std::time::Duration>,
) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::PAYMENT_REQUIRED
    {
        return ProviderError::Fatal { message };
    }

    let lowered = body.to_ascii_lowercase();
    if lowered.contains("insufficient_quota")
        || lowered.contains("insufficient quota")
        || lowered.contains("insufficient credits")
    {
        return ProviderError::Fatal { message };
    }

    if is_retryable_status(status) {
        return ProviderError::Transient {
            message,
            retry_after,
        };
    }

    ProviderError::Fatal { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn auth_failures_are_fatal() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::PAYMENT_REQUIRED,
        ] {
            assert!(map_failure(status, "", None).is_fatal());
        }
    }

    #[test]
    fn quota_wording_is_fatal_even_on_429() {
        let error = map_failure(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"code":"insufficient_quota"}}"#,
            None,
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn rate_limits_keep_the_hint() {
        let error = map_failure(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            Some(Duration::from_secs(7)),
        );
        assert_eq!(
            error,
            ProviderError::Transient {
                message: "HTTP 429: slow down".into(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[test]
    fn other_client_errors_are_fatal() {
        assert!(map_failure(StatusCode::BAD_REQUEST, "bad model", None).is_fatal());
        assert!(!map_failure(StatusCode::SERVICE_UNAVAILABLE, "", None).is_fatal());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(OpenRouterProvider::new("  ", ProviderSettings::default()).is_err());
    }
}
