use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::issue::{Issue, IssueCategory};
use crate::spans::{Span, SpanKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenDelimiters {
    pub open: String,
    pub close: String,
    pub prefix: String,
}

impl Default for TokenDelimiters {
    fn default() -> Self {
        Self {
            open: "⟦".to_string(),
            close: "⟧".to_string(),
            prefix: "T".to_string(),
        }
    }
}

impl TokenDelimiters {
    pub fn token(&self, index: usize) -> String {
        format!("{}{}{}{}", self.open, self.prefix, index, self.close)
    }

    /// Models sometimes pad markers with spaces (`⟦ T0 ⟧`); those still count.
    fn marker_regex(&self) -> Result<Regex, regex::Error> {
        Regex::new(&format!(
            r"{}\s*{}\s*([0-9]+)\s*{}",
            regex::escape(&self.open),
            regex::escape(&self.prefix),
            regex::escape(&self.close)
        ))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedToken {
    pub token: String,
    pub index: usize,
    pub kind: SpanKind,
    pub raw: String,
    /// Byte range of the token inside the masked text.
    pub span: (usize, usize),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMap {
    pub tokens: Vec<ProtectedToken>,
}

impl TokenMap {
    pub fn get(&self, index: usize) -> Option<&ProtectedToken> {
        self.tokens.get(index)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtectError {
    #[error("unit text already contains the token delimiter {delimiter:?}")]
    DelimiterCollision { delimiter: String },
    #[error("token delimiters must be non-empty and distinct")]
    InvalidDelimiters,
    #[error("failed to build token pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone)]
pub struct Protector {
    delimiters: TokenDelimiters,
    marker: Regex,
}

#[derive(Debug, Clone)]
pub struct ProtectedUnit {
    original: String,
    masked: String,
    map: TokenMap,
    marker: Regex,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Restoration {
    pub text: String,
    pub expected_tokens: usize,
    pub found_tokens: usize,
    /// Occurrence count per token index.
    pub occurrences: Vec<usize>,
    pub unknown_markers: Vec<String>,
    pub issues: Vec<Issue>,
}

impl Restoration {
    pub fn has_tag_errors(&self) -> bool {
        self.issues.iter().any(|issue| issue.category.is_tag_integrity())
    }
}

/// Searchable text plus the masked-text offset of each of its byte boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableSegment {
    pub text: String,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl SearchableSegment {
    fn starting_at(offset: usize) -> Self {
        Self {
            text: String::new(),
            starts: Vec::new(),
            ends: vec![offset],
        }
    }

    fn push_literal(&mut self, offset: usize, literal: &str) {
        for index in 0..literal.len() {
            self.starts.push(offset + index);
            self.ends.push(offset + index + 1);
        }
        self.text.push_str(literal);
    }

    /// A match touching any digit of a numeric token covers the whole token.
    fn push_numeric(&mut self, raw: &str, (start, end): (usize, usize)) {
        for _ in 0..raw.len() {
            self.starts.push(start);
            self.ends.push(end);
        }
        self.text.push_str(raw);
    }

    fn finish(mut self) -> Option<Self> {
        if self.text.is_empty() {
            return None;
        }
        let end = self.ends.last().copied().unwrap_or_default();
        self.starts.push(end);
        Some(self)
    }

    /// Byte range of the masked text behind `start..end` of `text`.
    pub fn masked_range(&self, start: usize, end: usize) -> (usize, usize) {
        let masked_start = self.starts.get(start).copied().unwrap_or_default();
        let masked_end = self.ends.get(end).copied().unwrap_or(masked_start);
        (masked_start, masked_end)
    }
}

impl Protector {
    pub fn new(delimiters: TokenDelimiters) -> Result<Self, ProtectError> {
        if delimiters.open.is_empty()
            || delimiters.close.is_empty()
            || delimiters.open == delimiters.close
        {
            return Err(ProtectError::InvalidDelimiters);
        }
        let marker = delimiters.marker_regex()?;
        Ok(Self { delimiters, marker })
    }

    pub fn delimiters(&self) -> &TokenDelimiters {
        &self.delimiters
    }

    pub fn protect(&self, spans: &[Span]) -> Result<ProtectedUnit, ProtectError> {
        let mut original = String::new();
        let mut masked = String::new();
        let mut tokens = Vec::new();

        for span in spans {
            match span {
                Span::Literal { text } => {
                    for delimiter in [&self.delimiters.open, &self.delimiters.close] {
                        if text.contains(delimiter.as_str()) {
                            return Err(ProtectError::DelimiterCollision {
                                delimiter: delimiter.clone(),
                            });
                        }
                    }
                    original.push_str(text);
                    masked.push_str(text);
                }
                Span::Protected(protected) => {
                    let index = tokens.len();
                    let token = self.delimiters.token(index);
                    let start = masked.len();
                    masked.push_str(&token);
                    original.push_str(&protected.raw);
                    tokens.push(ProtectedToken {
                        token,
                        index,
                        kind: protected.kind,
                        raw: protected.raw.clone(),
                        span: (start, masked.len()),
                    });
                }
            }
        }

        Ok(ProtectedUnit {
            original,
            masked,
            map: TokenMap { tokens },
            marker: self.marker.clone(),
        })
    }
}

impl ProtectedUnit {
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn masked_text(&self) -> &str {
        &self.masked
    }

    pub fn token_map(&self) -> &TokenMap {
        &self.map
    }

    /// Runs of literal text between structural and placeholder tokens, with
    /// numeric tokens read back as their digits.
    pub fn searchable_segments(&self) -> Vec<SearchableSegment> {
        let mut segments = Vec::new();
        let mut current = SearchableSegment::starting_at(0);
        let mut cursor = 0usize;
        for token in &self.map.tokens {
            let (start, end) = token.span;
            current.push_literal(cursor, &self.masked[cursor..start]);
            if token.kind == SpanKind::NumericLiteral {
                current.push_numeric(&token.raw, (start, end));
            } else {
                let next = SearchableSegment::starting_at(end);
                segments.extend(std::mem::replace(&mut current, next).finish());
            }
            cursor = end;
        }
        current.push_literal(cursor, &self.masked[cursor..]);
        segments.extend(current.finish());
        segments
    }

    /// Removes every token-shaped marker from `text`.
    pub fn strip_tokens(&self, text: &str) -> String {
        self.marker.replace_all(text, "").into_owned()
    }

    /// `text` with numeric tokens expanded and every other marker blanked.
    pub fn plain_text(&self, text: &str) -> String {
        self.marker
            .replace_all(text, |capture: &Captures| {
                capture
                    .get(1)
                    .and_then(|digits| digits.as_str().parse::<usize>().ok())
                    .and_then(|index| self.map.get(index))
                    .filter(|token| token.kind == SpanKind::NumericLiteral)
                    .map_or_else(|| " ".to_string(), |token| token.raw.clone())
            })
            .into_owned()
    }

    pub fn restore(&self, unit_id: &str, translated: &str) -> Restoration {
        let tokens = &self.map.tokens;
        let mut occurrences = vec![0usize; tokens.len()];
        let mut unknown_markers = Vec::new();
        let mut issues = Vec::new();
        let mut found_tokens = 0usize;
        let mut output = String::with_capacity(translated.len());
        let mut cursor = 0usize;

        for capture in self.marker.captures_iter(translated) {
            let Some(matched) = capture.get(0) else {
                continue;
            };
            output.push_str(&translated[cursor..matched.start()]);
            cursor = matched.end();

            let index = capture
                .get(1)
                .and_then(|digits| digits.as_str().parse::<usize>().ok());
            match index.and_then(|index| tokens.get(index)) {
                Some(token) => {
                    output.push_str(&token.raw);
                    occurrences[token.index] += 1;
                    found_tokens += 1;
                }
                None => {
                    issues.push(
                        Issue::error(
                            unit_id,
                            IssueCategory::ExtraTag,
                            format!("unknown marker {} removed", matched.as_str()),
                        )
                        .with_subject(matched.as_str()),
                    );
                    unknown_markers.push(matched.as_str().to_string());
                }
            }
        }
        output.push_str(&translated[cursor..]);

        for (token, count) in tokens.iter().zip(&occurrences) {
            match *count {
                0 if token.kind != SpanKind::NumericLiteral => issues.push(
                    Issue::error(
                        unit_id,
                        IssueCategory::MissingTag,
                        format!("{} ({}) missing from translation", token.token, token.raw),
                    )
                    .with_subject(token.raw.clone()),
                ),
                0 | 1 => {}
                many => issues.push(
                    Issue::error(
                        unit_id,
                        IssueCategory::DuplicateTag,
                        format!("{} ({}) appears {} times", token.token, token.raw, many),
                    )
                    .with_subject(token.raw.clone()),
                ),
            }
        }

        Restoration {
            text: output,
            expected_tokens: tokens.len(),
            found_tokens,
            occurrences,
            unknown_markers,
            issues,
        }
    }
}
