/// QA findings shared by the restorer, the validator and the run report
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// A protected token never came back from the provider
    MissingTag,
    /// The provider produced a token-shaped marker with no mapping
    ExtraTag,
    /// A protected token came back more than once
    DuplicateTag,
    /// A token resolved to markup that is not in the restored text
    TagCorruption,
    NumericMismatch,
    GlossaryViolation,
    /// Empty, unchanged or never-received translation
    TranslationFailure,
    /// Source markup could not be extracted or tokenized
    MalformedMarkup,
    LengthRatio,
    Punctuation,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::MissingTag => "missing_tag",
            IssueCategory::ExtraTag => "extra_tag",
            IssueCategory::DuplicateTag => "duplicate_tag",
            IssueCategory::TagCorruption => "tag_corruption",
            IssueCategory::NumericMismatch => "numeric_mismatch",
            IssueCategory::GlossaryViolation => "glossary_violation",
            IssueCategory::TranslationFailure => "translation_failure",
            IssueCategory::MalformedMarkup => "malformed_markup",
            IssueCategory::LengthRatio => "length_ratio",
            IssueCategory::Punctuation => "punctuation",
        }
    }

    /// Categories describing token round-trip problems.
    pub fn is_tag_integrity(&self) -> bool {
        matches!(
            self,
            IssueCategory::MissingTag | IssueCategory::ExtraTag | IssueCategory::DuplicateTag
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub unit_id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Issue {
    pub fn error(unit_id: &str, category: IssueCategory, detail: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            category,
            severity: Severity::Error,
            detail: detail.into(),
            subject: None,
        }
    }

    pub fn warning(unit_id: &str, category: IssueCategory, detail: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            category,
            severity: Severity::Warning,
            detail: detail.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
