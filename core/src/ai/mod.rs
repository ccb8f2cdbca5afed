use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::request::TranslationRequest;

pub mod mock;
pub mod openrouter;
pub mod retry;

pub use mock::{EchoProvider, ScriptedProvider};
pub use openrouter::OpenRouterProvider;
pub use retry::{evaluate_retry, parse_retry_after, RetryDecision, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Rate limits, server errors and network failures; worth another attempt.
    #[error("transient provider failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("provider call timed out after {after:?}")]
    Timeout { after: Duration },
    /// Authentication, quota and malformed-request failures.
    #[error("provider rejected the request: {message}")]
    Fatal { message: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A model backend able to translate one protected unit per call.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<ProviderResponse, ProviderError>;
}

#[async_trait]
impl<P: TranslationProvider + ?Sized> TranslationProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        (**self).translate(request).await
    }
}
