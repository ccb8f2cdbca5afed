use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ai::{evaluate_retry, ProviderError, ProviderResponse, RetryPolicy, TranslationProvider};
use crate::glossary::{GlossaryMatch, GlossaryTarget};
use crate::llm_guards::{build_system_prompt, TranslationConstraints};
use crate::orchestrator::CancellationFlag;
use crate::protector::ProtectedUnit;
use crate::throttle::RequestThrottle;
use crate::unit::TranslationUnit;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Formal,
    Informal,
}

impl Tone {
    pub fn instruction(&self) -> &'static str {
        match self {
            Tone::Professional => {
                "Use professional, businesslike language appropriate for corporate training."
            }
            Tone::Formal => {
                "Use formal, polite language. Use formal pronouns (e.g., 'usted' in Spanish, 'vous' in French)."
            }
            Tone::Informal => {
                "Use casual, conversational language. Use informal pronouns (e.g., 'tú' in Spanish, 'tu' in French)."
            }
        }
    }
}

/// One glossary entry relevant to the unit, listed once however often it occurs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryHint {
    pub entry: usize,
    pub source: String,
    pub target: GlossaryTarget,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub unit_id: String,
    pub protected_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub tone: Tone,
    pub glossary: Vec<GlossaryHint>,
    pub context: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("provider still failing after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },
    #[error(transparent)]
    Fatal(ProviderError),
    #[error("provider returned an empty translation")]
    EmptyTranslation,
    #[error("run cancelled before the request completed")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub response: ProviderResponse,
    pub attempts: u32,
}

pub fn build_request(
    unit: &TranslationUnit,
    protected: &ProtectedUnit,
    matches: &[GlossaryMatch],
    tone: Tone,
    constraints: &TranslationConstraints,
) -> TranslationRequest {
    let mut glossary: Vec<GlossaryHint> = Vec::new();
    for found in matches {
        if glossary.iter().all(|hint| hint.entry != found.entry) {
            glossary.push(GlossaryHint {
                entry: found.entry,
                source: found.source.clone(),
                target: found.target.clone(),
            });
        }
    }

    let tokens: Vec<String> = protected
        .token_map()
        .tokens
        .iter()
        .map(|token| token.token.clone())
        .collect();
    let system_prompt =
        build_system_prompt(&unit.source_lang, &unit.target_lang, constraints, &tokens);
    let user_prompt = build_user_prompt(
        protected.masked_text(),
        &unit.source_lang,
        &unit.target_lang,
        tone,
        &glossary,
        unit.context.as_deref(),
    );

    TranslationRequest {
        unit_id: unit.id.clone(),
        protected_text: protected.masked_text().to_string(),
        source_lang: unit.source_lang.clone(),
        target_lang: unit.target_lang.clone(),
        tone,
        glossary,
        context: unit.context.clone(),
        system_prompt,
        user_prompt,
    }
}

fn build_user_prompt(
    text: &str,
    source_lang: &str,
    target_lang: &str,
    tone: Tone,
    glossary: &[GlossaryHint],
    context: Option<&str>,
) -> String {
    let mut parts = vec![
        format!("Translate the following {source_lang} text to {target_lang}."),
        String::new(),
        format!("**Tone:** {}", tone.instruction()),
    ];

    if !glossary.is_empty() {
        parts.push(String::new());
        parts.push("**Glossary (use these exact translations):**".to_string());
        for hint in glossary {
            match &hint.target {
                GlossaryTarget::Term(term) => parts.push(format!("- '{}' → '{}'", hint.source, term)),
                GlossaryTarget::DoNotTranslate => parts.push(format!(
                    "- '{}' → Keep as '{}' (do not translate)",
                    hint.source, hint.source
                )),
            }
        }
    }

    if let Some(context) = context.filter(|context| !context.trim().is_empty()) {
        parts.push(String::new());
        parts.push(format!("**Context:** {context}"));
    }

    parts.push(String::new());
    parts.push("**Text to translate:**".to_string());
    parts.push(text.to_string());
    parts.push(String::new());
    parts.push("**Your translation (ONLY the translated text, no explanations):**".to_string());
    parts.join("\n")
}

/// Sends `request`, retrying transient failures under `policy`.
///
/// `throttle` paces every attempt; raising `stop` ends the loop before the next
/// attempt or during a backoff wait.
pub async fn submit(
    provider: &dyn TranslationProvider,
    request: &TranslationRequest,
    policy: RetryPolicy,
    timeout: Duration,
    throttle: Option<&RequestThrottle>,
    stop: &CancellationFlag,
) -> Result<SubmitOutcome, RequestError> {
    let mut retries = 0u32;
    loop {
        if stop.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        if let Some(throttle) = throttle {
            tokio::select! {
                _ = throttle.acquire() => {}
                _ = stop.cancelled() => return Err(RequestError::Cancelled),
            }
        }

        let result = match tokio::time::timeout(timeout, provider.translate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout { after: timeout }),
        };

        match result {
            Ok(response) if response.text.trim().is_empty() => {
                return Err(RequestError::EmptyTranslation)
            }
            Ok(response) => {
                return Ok(SubmitOutcome {
                    response,
                    attempts: retries + 1,
                })
            }
            Err(error) if error.is_fatal() => return Err(RequestError::Fatal(error)),
            Err(error) => {
                let decision = evaluate_retry(&error, policy, retries);
                if !decision.should_retry {
                    return Err(RequestError::Exhausted {
                        attempts: retries + 1,
                        last: error,
                    });
                }
                log::warn!(
                    "unit {}: {} attempt {} failed ({}); retrying in {:?}",
                    request.unit_id,
                    provider.name(),
                    retries + 1,
                    error,
                    decision.delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(decision.delay) => {}
                    _ = stop.cancelled() => return Err(RequestError::Cancelled),
                }
                retries += 1;
            }
        }
    }
}
