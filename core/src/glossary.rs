/// Terminology constraints applied to every unit of a run
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::protector::ProtectedUnit;

const DO_NOT_TRANSLATE: &str = "do not translate";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GlossaryTarget {
    Term(String),
    DoNotTranslate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryEntry {
    pub source: String,
    pub target: GlossaryTarget,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl GlossaryEntry {
    pub fn new(source: impl Into<String>, target: GlossaryTarget, case_sensitive: bool) -> Self {
        Self {
            source: source.into(),
            target,
            case_sensitive,
        }
    }

    /// The term a compliant translation has to contain.
    pub fn expected_term(&self) -> &str {
        match &self.target {
            GlossaryTarget::Term(term) => term,
            GlossaryTarget::DoNotTranslate => &self.source,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryMatch {
    pub entry: usize,
    pub source: String,
    pub target: GlossaryTarget,
    /// Byte range in the masked text.
    pub range: (usize, usize),
    /// Matched wording, numbers written out
    pub matched: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GlossaryError {
    #[error("line {line}: expected `source | target`, got {content:?}")]
    InvalidLine { line: usize, content: String },
    #[error("glossary entry has an empty source term")]
    EmptyTerm,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to compile term pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    source: Regex,
    expected: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
    compiled: Vec<CompiledEntry>,
    /// Entry indices, longest source term first.
    order: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    source: String,
    target: String,
    #[serde(default)]
    case_sensitive: Option<String>,
}

impl Glossary {
    pub fn new(entries: Vec<GlossaryEntry>) -> Result<Self, GlossaryError> {
        let mut compiled = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.source.trim().is_empty() {
                return Err(GlossaryError::EmptyTerm);
            }
            compiled.push(CompiledEntry {
                source: term_regex(&entry.source, entry.case_sensitive)?,
                expected: term_regex(entry.expected_term(), entry.case_sensitive)?,
            });
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by(|a, b| {
            entries[*b]
                .source
                .chars()
                .count()
                .cmp(&entries[*a].source.chars().count())
        });

        Ok(Self {
            entries,
            compiled,
            order,
        })
    }

    /// `source | target [| case]`, one entry per line.
    pub fn from_pipe_lines(input: &str) -> Result<Self, GlossaryError> {
        let mut entries = Vec::new();
        for (number, line) in input.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = trimmed.split('|').map(str::trim).collect();
            if columns.len() < 2 || columns[0].is_empty() || columns[1].is_empty() {
                return Err(GlossaryError::InvalidLine {
                    line: number + 1,
                    content: line.to_string(),
                });
            }
            let case_sensitive = columns.get(2).map_or(false, |flag| parse_flag(flag));
            entries.push(entry_from_columns(columns[0], columns[1], case_sensitive));
        }
        Self::new(entries)
    }

    /// CSV with a header row: `source,target[,case_sensitive]`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, GlossaryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let mut entries = Vec::new();
        for record in csv_reader.deserialize::<CsvRecord>() {
            let record = record?;
            if record.source.is_empty() {
                continue;
            }
            let case_sensitive = record.case_sensitive.as_deref().map_or(false, parse_flag);
            entries.push(entry_from_columns(&record.source, &record.target, case_sensitive));
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&GlossaryEntry> {
        self.entries.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source-term occurrences in the literal regions of `unit`, never inside a
    /// structural or placeholder token. Numbers count as literal text, so a term
    /// like `Office 365` still matches.
    pub fn annotate(&self, unit: &ProtectedUnit) -> Vec<GlossaryMatch> {
        let segments = unit.searchable_segments();
        let mut occupied = vec![false; unit.masked_text().len()];
        let mut matches = Vec::new();

        for &index in &self.order {
            let entry = &self.entries[index];
            let regex = &self.compiled[index].source;
            for segment in &segments {
                for (start, end) in whole_word_matches(regex, &segment.text) {
                    let range = segment.masked_range(start, end);
                    let Some(taken) = occupied.get_mut(range.0..range.1) else {
                        continue;
                    };
                    if taken.iter().any(|flag| *flag) {
                        continue;
                    }
                    taken.fill(true);
                    matches.push(GlossaryMatch {
                        entry: index,
                        source: entry.source.clone(),
                        target: entry.target.clone(),
                        range,
                        matched: segment.text[start..end].to_string(),
                    });
                }
            }
        }

        matches.sort_by_key(|found| found.range.0);
        matches
    }

    /// Whether the entry's expected term occurs in `text` as a whole word.
    pub fn expected_term_in(&self, index: usize, text: &str) -> bool {
        self.compiled
            .get(index)
            .map_or(false, |compiled| !whole_word_matches(&compiled.expected, text).is_empty())
    }
}

fn entry_from_columns(source: &str, target: &str, case_sensitive: bool) -> GlossaryEntry {
    let target = if target.eq_ignore_ascii_case(DO_NOT_TRANSLATE)
        || target.eq_ignore_ascii_case("do_not_translate")
        || target == source
    {
        GlossaryTarget::DoNotTranslate
    } else {
        GlossaryTarget::Term(target.to_string())
    };
    GlossaryEntry::new(source, target, case_sensitive)
}

fn parse_flag(flag: &str) -> bool {
    matches!(
        flag.to_ascii_lowercase().as_str(),
        "case" | "cs" | "true" | "yes" | "1"
    )
}

fn term_regex(term: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(term.trim()))
        .case_insensitive(!case_sensitive)
        .build()
}

/// Matches not glued to a neighbouring letter or digit.
fn whole_word_matches(regex: &Regex, text: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut position = 0usize;
    while position <= text.len() {
        let Some(mat) = regex.find_at(text, position) else {
            break;
        };
        let before = text[..mat.start()].chars().next_back();
        let after = text[mat.end()..].chars().next();
        let glued = before.map_or(false, char::is_alphanumeric)
            || after.map_or(false, char::is_alphanumeric);
        if !glued && mat.end() > mat.start() {
            found.push((mat.start(), mat.end()));
            position = mat.end();
        } else {
            // Retry one character further on.
            match text[mat.start()..].chars().next() {
                Some(c) => position = mat.start() + c.len_utf8(),
                None => break,
            }
        }
    }
    found
}
