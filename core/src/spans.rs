/// Span extraction for translatable units
///
/// A unit's raw text is split into literal text and protected regions (inline
/// tags, placeholders, variables and numbers). Concatenating the spans always
/// gives back the input byte-for-byte.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// <g id="1">, </g>, <x id="2"/>, <br/>
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9_:.\-]*)((?:\s[^<>]*?)?)\s*(/?)>").expect("valid tag regex")
});

// Storyline variables: %Score%, %UserName%%
static VARIABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%[A-Za-z_][A-Za-z0-9_.]*%%?").expect("valid variable regex")
});

// Mustache/Handlebars: {{name}}
static MUSTACHE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}]+\}\}").expect("valid mustache regex"));

// Braced placeholders: {0}, {name}, {1:0.##}
static BRACE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[A-Za-z0-9_]+(?::[^{}]+)?\}").expect("valid brace placeholder regex")
});

// C/printf style: %s, %1$s, %d, %.2f
static PRINTF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%(?:\d+\$)?[-+0#]*\d*(?:\.\d+)?[sdif]").expect("valid printf regex")
});

// 5, 3.14, 1,000.50
pub(crate) static NUMERIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:[.,]\d+)*\b").expect("valid numeric regex"));

// Inline elements that never take a closing tag, with or without the slash.
const VOID_TAGS: &[&str] = &["x", "bx", "ex", "br", "hr", "img"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatHint {
    /// XLIFF source with inline XML/HTML markup
    #[default]
    XliffInline,
    /// Run-level rich text from a Word table cell; angle brackets are text
    RichText,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    InlineTagPair,
    SelfClosingTag,
    Placeholder,
    VariableReference,
    NumericLiteral,
}

impl SpanKind {
    pub fn is_structural(&self) -> bool {
        matches!(self, SpanKind::InlineTagPair | SpanKind::SelfClosingTag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedSpan {
    pub kind: SpanKind,
    pub raw: String,
    /// Ordinal among the unit's protected spans, 0-based.
    pub order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Span {
    Literal { text: String },
    Protected(ProtectedSpan),
}

impl Span {
    pub fn as_str(&self) -> &str {
        match self {
            Span::Literal { text } => text,
            Span::Protected(span) => &span.raw,
        }
    }

    pub fn as_protected(&self) -> Option<&ProtectedSpan> {
        match self {
            Span::Literal { .. } => None,
            Span::Protected(span) => Some(span),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMarkupError {
    #[error("closing tag </{tag}> at byte {offset} has no matching open tag")]
    UnmatchedClose { tag: String, offset: usize },
    #[error("closing tag </{found}> at byte {offset} does not close <{expected}>")]
    MismatchedClose {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("tag <{tag}> opened at byte {offset} is never closed")]
    Unclosed { tag: String, offset: usize },
    #[error("tag starting at byte {offset} is truncated")]
    Truncated { offset: usize },
    #[error("extracted spans do not reproduce the unit text")]
    Unreconstructable,
}

#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    kind: SpanKind,
}

/// Splits `text` into an ordered span sequence.
pub fn extract(text: &str, hint: FormatHint) -> Result<Vec<Span>, MalformedMarkupError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut occupied = vec![false; text.len()];
    let mut candidates = Vec::new();

    if hint == FormatHint::XliffInline {
        collect_structural(text, &mut candidates, &mut occupied)?;
    }

    // Precedence: variables and placeholders before bare numbers.
    collect_pattern(text, &VARIABLE_REGEX, SpanKind::VariableReference, &mut candidates, &mut occupied);
    collect_pattern(text, &MUSTACHE_REGEX, SpanKind::Placeholder, &mut candidates, &mut occupied);
    collect_pattern(text, &BRACE_REGEX, SpanKind::Placeholder, &mut candidates, &mut occupied);
    collect_pattern(text, &PRINTF_REGEX, SpanKind::Placeholder, &mut candidates, &mut occupied);
    collect_pattern(text, &NUMERIC_REGEX, SpanKind::NumericLiteral, &mut candidates, &mut occupied);

    candidates.sort_by_key(|candidate| candidate.start);

    let mut spans = Vec::with_capacity(candidates.len() * 2 + 1);
    let mut cursor = 0usize;
    for (order, candidate) in candidates.iter().enumerate() {
        if candidate.start > cursor {
            spans.push(Span::Literal {
                text: text[cursor..candidate.start].to_string(),
            });
        }
        spans.push(Span::Protected(ProtectedSpan {
            kind: candidate.kind,
            raw: text[candidate.start..candidate.end].to_string(),
            order,
        }));
        cursor = candidate.end;
    }
    if cursor < text.len() {
        spans.push(Span::Literal {
            text: text[cursor..].to_string(),
        });
    }

    if concat(&spans) != text {
        return Err(MalformedMarkupError::Unreconstructable);
    }

    Ok(spans)
}

pub fn concat(spans: &[Span]) -> String {
    spans.iter().map(Span::as_str).collect()
}

pub fn protected_spans(spans: &[Span]) -> impl Iterator<Item = &ProtectedSpan> {
    spans.iter().filter_map(Span::as_protected)
}

/// Literal (translatable) text only, protected regions omitted.
pub fn literal_text(spans: &[Span]) -> String {
    spans
        .iter()
        .filter_map(|span| match span {
            Span::Literal { text } => Some(text.as_str()),
            Span::Protected(_) => None,
        })
        .collect()
}

fn collect_structural(
    text: &str,
    candidates: &mut Vec<Candidate>,
    occupied: &mut [bool],
) -> Result<(), MalformedMarkupError> {
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut cursor = 0usize;

    for capture in TAG_REGEX.captures_iter(text) {
        let Some(whole) = capture.get(0) else {
            continue;
        };
        check_truncation(text, cursor, whole.start())?;
        cursor = whole.end();

        let closing = capture.get(1).map_or(false, |m| !m.as_str().is_empty());
        let self_closing = capture.get(4).map_or(false, |m| !m.as_str().is_empty());
        let name = capture.get(2).map_or("", |m| m.as_str()).to_string();

        let kind = if closing {
            match stack.pop() {
                None => {
                    return Err(MalformedMarkupError::UnmatchedClose {
                        tag: name,
                        offset: whole.start(),
                    })
                }
                Some((open, _)) if open != name => {
                    return Err(MalformedMarkupError::MismatchedClose {
                        expected: open,
                        found: name,
                        offset: whole.start(),
                    })
                }
                Some(_) => SpanKind::InlineTagPair,
            }
        } else if self_closing || VOID_TAGS.contains(&name.to_ascii_lowercase().as_str()) {
            SpanKind::SelfClosingTag
        } else {
            stack.push((name, whole.start()));
            SpanKind::InlineTagPair
        };

        for flag in &mut occupied[whole.start()..whole.end()] {
            *flag = true;
        }
        candidates.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            kind,
        });
    }
    check_truncation(text, cursor, text.len())?;

    if let Some((tag, offset)) = stack.pop() {
        return Err(MalformedMarkupError::Unclosed { tag, offset });
    }

    Ok(())
}

/// A `<` that starts a name or a closing slash but never became a tag match.
fn check_truncation(text: &str, from: usize, to: usize) -> Result<(), MalformedMarkupError> {
    let region = &text[from..to];
    for (index, _) in region.match_indices('<') {
        let next = region[index + 1..].chars().next();
        if matches!(next, Some(c) if c.is_ascii_alphabetic() || c == '/') {
            return Err(MalformedMarkupError::Truncated {
                offset: from + index,
            });
        }
    }
    Ok(())
}

fn collect_pattern(
    text: &str,
    regex: &Regex,
    kind: SpanKind,
    candidates: &mut Vec<Candidate>,
    occupied: &mut [bool],
) {
    for mat in regex.find_iter(text) {
        if mat.as_str().is_empty() {
            continue;
        }
        let (start, end) = (mat.start(), mat.end());
        if occupied[start..end].iter().any(|taken| *taken) {
            continue;
        }
        for flag in &mut occupied[start..end] {
            *flag = true;
        }
        candidates.push(Candidate { start, end, kind });
    }
}
