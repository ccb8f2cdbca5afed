/// QA report export for a finished run
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::issue::{Issue, IssueCategory, Severity};
use crate::unit::TranslationUnit;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to serialize report entry: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QaReportRow {
    pub unit_id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub detail: String,
    pub subject: String,
    pub source: String,
    pub target: String,
}

/// One JSONL line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QaLogEntry<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    issue: &'a Issue,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub errors: usize,
    pub warnings: usize,
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QaReport {
    issues: Vec<Issue>,
    texts: HashMap<String, (String, String)>,
}

impl QaReport {
    pub fn new(issues: Vec<Issue>, units: &[TranslationUnit]) -> Self {
        let texts = units
            .iter()
            .map(|unit| (unit.id.clone(), (unit.source.clone(), unit.target.clone())))
            .collect();
        Self { issues, texts }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn rows(&self) -> Vec<QaReportRow> {
        self.issues
            .iter()
            .map(|issue| {
                let (source, target) = self
                    .texts
                    .get(&issue.unit_id)
                    .cloned()
                    .unwrap_or_default();
                QaReportRow {
                    unit_id: issue.unit_id.clone(),
                    category: issue.category,
                    severity: issue.severity,
                    detail: issue.detail.clone(),
                    subject: issue.subject.clone().unwrap_or_default(),
                    source,
                    target,
                }
            })
            .collect()
    }

    pub fn summary(&self) -> IssueSummary {
        let mut summary = IssueSummary {
            total: self.issues.len(),
            ..Default::default()
        };
        for issue in &self.issues {
            match issue.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
            }
            *summary
                .by_category
                .entry(issue.category.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in self.rows() {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> Result<(), ReportError> {
        let timestamp = Utc::now();
        for issue in &self.issues {
            let entry = QaLogEntry { timestamp, issue };
            writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
        }
        writer.flush()?;
        Ok(())
    }
}
