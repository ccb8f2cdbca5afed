use serde::{Deserialize, Serialize};

use crate::spans::FormatHint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Protected,
    Translated,
    Restored,
    Validated,
    Failed,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 6] = [
        UnitStatus::Pending,
        UnitStatus::Protected,
        UnitStatus::Translated,
        UnitStatus::Restored,
        UnitStatus::Validated,
        UnitStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Protected => "protected",
            UnitStatus::Translated => "translated",
            UnitStatus::Restored => "restored",
            UnitStatus::Validated => "validated",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Validated | UnitStatus::Failed)
    }

    fn can_advance_to(&self, next: UnitStatus) -> bool {
        match (self, next) {
            (UnitStatus::Pending, UnitStatus::Protected)
            | (UnitStatus::Protected, UnitStatus::Translated)
            | (UnitStatus::Translated, UnitStatus::Restored)
            | (UnitStatus::Restored, UnitStatus::Validated) => true,
            (current, UnitStatus::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unit {unit_id}: cannot move from {from:?} to {to:?}")]
pub struct StateError {
    pub unit_id: String,
    pub from: UnitStatus,
    pub to: UnitStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslationUnit {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub target: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub format: FormatHint,
    /// Resource name or translator notes carried by the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default = "pending")]
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

fn pending() -> UnitStatus {
    UnitStatus::Pending
}

impl TranslationUnit {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: String::new(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            format: FormatHint::default(),
            context: None,
            status: UnitStatus::Pending,
            failure_reason: None,
        }
    }

    pub fn with_format(mut self, format: FormatHint) -> Self {
        self.format = format;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn advance(&mut self, next: UnitStatus) -> Result<(), StateError> {
        if !self.status.can_advance_to(next) {
            return Err(StateError {
                unit_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        log::debug!("unit {}: {:?} -> {:?}", self.id, self.status, next);
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.advance(UnitStatus::Failed)?;
        let reason = reason.into();
        log::warn!("unit {} failed: {}", self.id, reason);
        self.failure_reason = Some(reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> TranslationUnit {
        TranslationUnit::new("u1", "Hello", "en", "es")
    }

    #[test]
    fn happy_path_transitions() {
        let mut unit = unit();
        for next in [
            UnitStatus::Protected,
            UnitStatus::Translated,
            UnitStatus::Restored,
            UnitStatus::Validated,
        ] {
            unit.advance(next).unwrap();
        }
        assert!(unit.status.is_terminal());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut unit = unit();
        let error = unit.advance(UnitStatus::Translated).unwrap_err();
        assert_eq!(error.from, UnitStatus::Pending);
        assert_eq!(unit.status, UnitStatus::Pending);
    }

    #[test]
    fn failure_from_any_non_terminal_state() {
        let mut unit = unit();
        unit.advance(UnitStatus::Protected).unwrap();
        unit.fail("provider gave up").unwrap();
        assert_eq!(unit.status, UnitStatus::Failed);
        assert_eq!(unit.failure_reason.as_deref(), Some("provider gave up"));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut unit = unit();
        unit.fail("bad markup").unwrap();
        assert!(unit.fail("again").is_err());
        assert!(unit.advance(UnitStatus::Protected).is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let unit: TranslationUnit = serde_json::from_str(
            r#"{"id":"t1","source":"Hi","sourceLang":"en","targetLang":"fr","format":"rich_text"}"#,
        )
        .unwrap();
        assert_eq!(unit.status, UnitStatus::Pending);
        assert_eq!(unit.format, FormatHint::RichText);
        assert!(unit.target.is_empty());
    }
}
