/// Configuration for a localization run
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::ai::RetryPolicy;
use crate::protector::TokenDelimiters;
use crate::request::Tone;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_retries,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RunSettings {
    /// Used for units that leave their source language blank
    pub source_lang: Option<String>,
    /// Used for units that leave their target language blank
    pub target_lang: Option<String>,
    pub tone: Tone,
    pub max_in_flight: usize,
    /// Provider requests started per rolling minute, retries included; unlimited when unset
    pub max_requests_per_minute: Option<u32>,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            source_lang: None,
            target_lang: None,
            tone: Tone::Professional,
            max_in_flight: 4,
            max_requests_per_minute: None,
            request_timeout_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

impl RunSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorOptions {
    pub check_numbers: bool,
    /// Also flag numbers the translation adds
    pub check_extra_numbers: bool,
    pub check_glossary: bool,
    pub check_untranslated: bool,
    /// Sources at or below this many literal characters may legitimately stay unchanged
    pub untranslated_min_chars: usize,
    pub check_length: bool,
    pub min_length_ratio: f64,
    pub max_length_ratio: f64,
    /// Milder warning between this ratio and `max_length_ratio`
    pub overflow_length_ratio: f64,
    pub length_min_source_chars: usize,
    pub check_punctuation: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            check_numbers: true,
            check_extra_numbers: true,
            check_glossary: true,
            check_untranslated: true,
            untranslated_min_chars: 15,
            check_length: true,
            min_length_ratio: 0.5,
            max_length_ratio: 2.0,
            overflow_length_ratio: 1.5,
            length_min_source_chars: 10,
            check_punctuation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PricingConfig {
    /// Falls back to the provider model when unset
    pub model: Option<String>,
    /// USD per 1k tokens, overriding the built-in table
    pub rate_per_1k: Option<f64>,
    pub tokens_per_char: f64,
    pub prompt_overhead_tokens: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            model: None,
            rate_per_1k: None,
            tokens_per_char: 0.3,
            prompt_overhead_tokens: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub referer: String,
    pub title: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            referer: "http://localhost:8501".to_string(),
            title: "Course Localizer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub run: RunSettings,
    pub tokens: TokenDelimiters,
    pub validator: ValidatorOptions,
    pub pricing: PricingConfig,
    pub provider: ProviderSettings,
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.json` files as JSON and everything else as YAML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.max_in_flight == 0 {
            return Err(ConfigError::Invalid("run.maxInFlight must be at least 1".into()));
        }
        if self.run.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "run.requestTimeoutSecs must be at least 1".into(),
            ));
        }
        if self.run.max_requests_per_minute == Some(0) {
            return Err(ConfigError::Invalid(
                "run.maxRequestsPerMinute must be at least 1 when set".into(),
            ));
        }
        if self.tokens.open.is_empty() || self.tokens.close.is_empty() {
            return Err(ConfigError::Invalid("token delimiters must not be empty".into()));
        }
        if self.tokens.open == self.tokens.close {
            return Err(ConfigError::Invalid(
                "token open and close delimiters must differ".into(),
            ));
        }
        let validator = &self.validator;
        if validator.min_length_ratio < 0.0 || validator.min_length_ratio > validator.max_length_ratio {
            return Err(ConfigError::Invalid(
                "validator length ratio bounds are inverted".into(),
            ));
        }
        if validator.overflow_length_ratio > validator.max_length_ratio {
            return Err(ConfigError::Invalid(
                "validator.overflowLengthRatio must not exceed maxLengthRatio".into(),
            ));
        }
        if self.pricing.tokens_per_char <= 0.0 {
            return Err(ConfigError::Invalid(
                "pricing.tokensPerChar must be positive".into(),
            ));
        }
        Ok(())
    }
}
