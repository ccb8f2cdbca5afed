/// Post-restoration quality checks
use std::collections::BTreeMap;

use crate::config::ValidatorOptions;
use crate::glossary::{Glossary, GlossaryMatch};
use crate::issue::{Issue, IssueCategory};
use crate::protector::{ProtectedUnit, Restoration};
use crate::spans::{SpanKind, NUMERIC_REGEX};

const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?'];
const TARGET_TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Everything the checks look at for one unit.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub unit_id: &'a str,
    pub protected: &'a ProtectedUnit,
    /// Raw provider output, still tokenized
    pub model_output: &'a str,
    pub restoration: &'a Restoration,
    pub glossary: &'a Glossary,
    pub matches: &'a [GlossaryMatch],
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();
        check_tag_integrity(input, &mut issues);
        check_tag_identity(input, &mut issues);
        if self.options.check_numbers {
            check_numbers(input, self.options.check_extra_numbers, &mut issues);
        }
        if self.options.check_glossary {
            check_glossary(input, &mut issues);
        }
        if self.options.check_untranslated {
            self.check_degenerate(input, &mut issues);
        }
        if self.options.check_length {
            self.check_length(input, &mut issues);
        }
        if self.options.check_punctuation {
            check_punctuation(input, &mut issues);
        }
        issues
    }

    fn check_degenerate(&self, input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
        if input.model_output.trim().is_empty() {
            issues.push(Issue::error(
                input.unit_id,
                IssueCategory::TranslationFailure,
                "translation is empty",
            ));
            return;
        }

        let source = normalize(&input.protected.plain_text(input.protected.masked_text()));
        let target = normalize(&input.protected.plain_text(input.model_output));
        if source.chars().count() > self.options.untranslated_min_chars && source == target {
            issues.push(Issue::error(
                input.unit_id,
                IssueCategory::TranslationFailure,
                "translation is identical to the source text",
            ));
        }
    }

    fn check_length(&self, input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
        let source_len = literal_len(&input.protected.plain_text(input.protected.masked_text()));
        if source_len < self.options.length_min_source_chars || source_len == 0 {
            return;
        }
        let target_len = literal_len(&input.protected.plain_text(input.model_output));
        let ratio = target_len as f64 / source_len as f64;

        if ratio < self.options.min_length_ratio {
            issues.push(Issue::warning(
                input.unit_id,
                IssueCategory::LengthRatio,
                format!(
                    "target much shorter than source ({target_len} vs {source_len} chars, {:.0}%)",
                    ratio * 100.0
                ),
            ));
        } else if ratio > self.options.max_length_ratio {
            issues.push(Issue::warning(
                input.unit_id,
                IssueCategory::LengthRatio,
                format!(
                    "target much longer than source ({target_len} vs {source_len} chars, {:.0}%)",
                    ratio * 100.0
                ),
            ));
        } else if ratio > self.options.overflow_length_ratio {
            issues.push(Issue::warning(
                input.unit_id,
                IssueCategory::LengthRatio,
                format!(
                    "target longer than source ({target_len} vs {source_len} chars, {:.0}%), may overflow text box",
                    ratio * 100.0
                ),
            ));
        }
    }
}

/// Every expected/found count mismatch surfaces as a per-token issue on the restoration.
fn check_tag_integrity(input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
    issues.extend(
        input
            .restoration
            .issues
            .iter()
            .filter(|issue| issue.category.is_tag_integrity())
            .cloned(),
    );
}

fn check_tag_identity(input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
    let tokens = &input.protected.token_map().tokens;
    for (token, count) in tokens.iter().zip(&input.restoration.occurrences) {
        if *count > 0 && !input.restoration.text.contains(token.raw.as_str()) {
            issues.push(
                Issue::error(
                    input.unit_id,
                    IssueCategory::TagCorruption,
                    format!("{} did not restore to {}", token.token, token.raw),
                )
                .with_subject(token.raw.clone()),
            );
        }
    }
}

/// Digits only, so `1,000` and `1.000` compare equal.
fn numeric_key(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Occurrence count and first spelling per numeric key.
type NumberTally = BTreeMap<String, (usize, String)>;

fn tally<'a>(numbers: impl Iterator<Item = &'a str>) -> NumberTally {
    let mut tally = NumberTally::new();
    for raw in numbers {
        let slot = tally
            .entry(numeric_key(raw))
            .or_insert_with(|| (0, raw.to_string()));
        slot.0 += 1;
    }
    tally
}

fn check_numbers(input: &ValidationInput<'_>, report_extra: bool, issues: &mut Vec<Issue>) {
    let source = tally(
        input
            .protected
            .token_map()
            .tokens
            .iter()
            .filter(|token| token.kind == SpanKind::NumericLiteral)
            .map(|token| token.raw.as_str()),
    );
    let target_text = input.protected.plain_text(input.model_output);
    let target = tally(NUMERIC_REGEX.find_iter(&target_text).map(|mat| mat.as_str()));

    for (key, (count, raw)) in &source {
        let present = target.get(key).map_or(0, |(count, _)| *count);
        for _ in present..*count {
            issues.push(
                Issue::warning(
                    input.unit_id,
                    IssueCategory::NumericMismatch,
                    format!("number {raw} is missing from the translation"),
                )
                .with_subject(raw.clone()),
            );
        }
    }

    if !report_extra {
        return;
    }
    for (key, (count, raw)) in &target {
        let expected = source.get(key).map_or(0, |(count, _)| *count);
        for _ in expected..*count {
            issues.push(
                Issue::warning(
                    input.unit_id,
                    IssueCategory::NumericMismatch,
                    format!("number {raw} does not appear in the source"),
                )
                .with_subject(raw.clone()),
            );
        }
    }
}

fn check_glossary(input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
    let stripped = input.protected.strip_tokens(input.model_output);
    let mut checked: Vec<usize> = Vec::new();
    for found in input.matches {
        if checked.contains(&found.entry) {
            continue;
        }
        checked.push(found.entry);

        let Some(entry) = input.glossary.entry(found.entry) else {
            continue;
        };
        let compliant = input
            .glossary
            .expected_term_in(found.entry, &input.restoration.text)
            || input.glossary.expected_term_in(found.entry, &stripped);
        if !compliant {
            issues.push(
                Issue::warning(
                    input.unit_id,
                    IssueCategory::GlossaryViolation,
                    format!(
                        "'{}' should be translated as '{}'",
                        entry.source,
                        entry.expected_term()
                    ),
                )
                .with_subject(entry.source.clone()),
            );
        }
    }
}

fn check_punctuation(input: &ValidationInput<'_>, issues: &mut Vec<Issue>) {
    let source = input.protected.plain_text(input.protected.masked_text());
    let target = input.protected.plain_text(input.model_output);
    let (Some(source_end), Some(target_end)) =
        (source.trim_end().chars().last(), target.trim_end().chars().last())
    else {
        return;
    };

    if TERMINAL_PUNCTUATION.contains(&source_end) && !TARGET_TERMINAL_PUNCTUATION.contains(&target_end)
    {
        issues.push(Issue::warning(
            input.unit_id,
            IssueCategory::Punctuation,
            format!("source ends with '{source_end}' but the translation ends with '{target_end}'"),
        ));
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn literal_len(text: &str) -> usize {
    text.trim().chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protector::{Protector, TokenDelimiters};
    use crate::spans::{extract, FormatHint};

    struct Case {
        protected: ProtectedUnit,
        glossary: Glossary,
        matches: Vec<GlossaryMatch>,
    }

    fn case(source: &str, glossary: &str) -> Case {
        let spans = extract(source, FormatHint::XliffInline).unwrap();
        let protected = Protector::new(TokenDelimiters::default())
            .unwrap()
            .protect(&spans)
            .unwrap();
        let glossary = Glossary::from_pipe_lines(glossary).unwrap();
        let matches = glossary.annotate(&protected);
        Case {
            protected,
            glossary,
            matches,
        }
    }

    fn run(case: &Case, output: &str) -> Vec<Issue> {
        let restoration = case.protected.restore("u1", output);
        Validator::default().validate(&ValidationInput {
            unit_id: "u1",
            protected: &case.protected,
            model_output: output,
            restoration: &restoration,
            glossary: &case.glossary,
            matches: &case.matches,
        })
    }

    fn categories(issues: &[Issue]) -> Vec<IssueCategory> {
        issues.iter().map(|issue| issue.category).collect()
    }

    #[test]
    fn clean_translation_has_no_issues() {
        let case = case("Click <b>Continue</b> to proceed.", "");
        assert!(run(&case, "Haga clic en ⟦T0⟧Continuar⟦T1⟧ para seguir.").is_empty());
    }

    #[test]
    fn missing_tag_scenario() {
        let case = case("Click <b>Continue</b> to proceed.", "");
        let issues = run(&case, "Haga clic en ⟦T0⟧Continuar para seguir.");
        assert_eq!(categories(&issues), vec![IssueCategory::MissingTag]);
        assert!(issues[0].is_error());
    }

    #[test]
    fn glossary_compliance() {
        let case = case(
            "Contact the HR Department for details.",
            "HR Department | Departamento de RRHH",
        );
        let compliant = run(&case, "Contacte al Departamento de RRHH para más detalles.");
        assert!(compliant
            .iter()
            .all(|issue| issue.category != IssueCategory::GlossaryViolation));

        let violating = run(&case, "Contacte a Recursos Humanos para más detalles.");
        let violations: Vec<_> = violating
            .iter()
            .filter(|issue| issue.category == IssueCategory::GlossaryViolation)
            .collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].subject.as_deref(), Some("HR Department"));
    }

    #[test]
    fn numbered_terms_are_checked() {
        let case = case(
            "Open Office 365 and follow Step 2.",
            "Office 365 | DO NOT TRANSLATE\nStep 2 | Paso 2",
        );
        assert_eq!(case.matches.len(), 2);
        assert!(run(&case, "Abra Office ⟦T0⟧ y siga el Paso ⟦T1⟧.").is_empty());

        let issues = run(&case, "Abra Office ⟦T0⟧ y siga la etapa ⟦T1⟧.");
        assert_eq!(categories(&issues), vec![IssueCategory::GlossaryViolation]);
        assert_eq!(issues[0].subject.as_deref(), Some("Step 2"));
    }

    #[test]
    fn one_violation_per_entry_even_with_repeats() {
        let case = case("HR Department and HR Department again.", "HR Department | RRHH");
        let issues = run(&case, "Recursos y recursos otra vez.");
        assert_eq!(
            categories(&issues)
                .iter()
                .filter(|category| **category == IssueCategory::GlossaryViolation)
                .count(),
            1
        );
    }

    #[test]
    fn numeric_drift_is_a_warning() {
        let case = case("You have 5 attempts remaining.", "");
        let issues = run(&case, "Le quedan cinco intentos.");
        assert_eq!(categories(&issues), vec![IssueCategory::NumericMismatch]);
        assert!(!issues[0].is_error());
        assert_eq!(issues[0].subject.as_deref(), Some("5"));
    }

    #[test]
    fn retyped_numbers_are_accepted() {
        let case = case("You have 5 attempts remaining.", "");
        assert!(run(&case, "Le quedan 5 intentos.").is_empty());
    }

    #[test]
    fn localized_separators_are_accepted() {
        let case = case("Budget of 1,000.50 dollars.", "");
        assert!(run(&case, "Presupuesto de 1.000,50 dólares.").is_empty());
    }

    #[test]
    fn empty_output_is_a_failure() {
        let case = case("Hello there", "");
        let issues = run(&case, "  ");
        assert!(issues
            .iter()
            .any(|issue| issue.category == IssueCategory::TranslationFailure));
    }

    #[test]
    fn untranslated_long_text_is_a_failure() {
        let case = case("This sentence was never translated.", "");
        let issues = run(&case, "This sentence was never translated.");
        assert_eq!(categories(&issues), vec![IssueCategory::TranslationFailure]);
    }

    #[test]
    fn short_text_may_stay_unchanged() {
        let case = case("OK", "");
        assert!(run(&case, "OK").is_empty());
    }

    #[test]
    fn length_ratio_warnings() {
        let case = case("Please read the following instructions carefully.", "");
        let issues = run(&case, "Lea.");
        assert!(categories(&issues).contains(&IssueCategory::LengthRatio));
    }

    #[test]
    fn long_target_may_overflow() {
        let case = case("Save your progress now.", "");
        let issues = run(&case, "Guarde ahora todo su progreso actual.");
        assert_eq!(categories(&issues), vec![IssueCategory::LengthRatio]);
        assert!(issues[0].detail.contains("may overflow text box"));

        let issues = run(&case, "Guarde ahora todo su progreso actual en el curso completo.");
        assert_eq!(categories(&issues), vec![IssueCategory::LengthRatio]);
        assert!(issues[0].detail.starts_with("target much longer"));
    }

    #[test]
    fn invented_numbers_are_flagged() {
        let case = case("You have 5 attempts remaining.", "");
        let issues = run(&case, "Le quedan ⟦T0⟧ de 10 intentos.");
        assert_eq!(categories(&issues), vec![IssueCategory::NumericMismatch]);
        assert_eq!(issues[0].subject.as_deref(), Some("10"));
        assert!(issues[0].detail.contains("does not appear in the source"));
    }

    #[test]
    fn invented_numbers_without_source_numbers() {
        let case = case("Finish the final quiz.", "");
        let issues = run(&case, "Termine el cuestionario 2.");
        assert_eq!(categories(&issues), vec![IssueCategory::NumericMismatch]);

        let restoration = case.protected.restore("u1", "Termine el cuestionario 2.");
        let options = ValidatorOptions {
            check_extra_numbers: false,
            ..Default::default()
        };
        let issues = Validator::new(options).validate(&ValidationInput {
            unit_id: "u1",
            protected: &case.protected,
            model_output: "Termine el cuestionario 2.",
            restoration: &restoration,
            glossary: &case.glossary,
            matches: &case.matches,
        });
        assert!(issues.is_empty());
    }

    #[test]
    fn count_mismatches_yield_one_issue_per_token() {
        let case = case("Click <b>Continue</b> to proceed.", "");
        let issues = run(&case, "Haga ⟦T0⟧clic ⟦T0⟧Continuar para seguir.");
        assert_eq!(
            categories(&issues),
            vec![IssueCategory::DuplicateTag, IssueCategory::MissingTag]
        );
    }

    #[test]
    fn punctuation_warning() {
        let case = case("Are you ready to begin?", "");
        let issues = run(&case, "Está listo para comenzar");
        assert_eq!(categories(&issues), vec![IssueCategory::Punctuation]);
    }

    #[test]
    fn cjk_punctuation_is_accepted() {
        let case = case("Are you ready to begin?", "");
        assert!(run(&case, "始める準備はできていますか？").is_empty());
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let case = case("You have 5 attempts remaining.", "");
        let restoration = case.protected.restore("u1", "Le quedan cinco intentos");
        let options = ValidatorOptions {
            check_numbers: false,
            check_punctuation: false,
            ..Default::default()
        };
        let issues = Validator::new(options).validate(&ValidationInput {
            unit_id: "u1",
            protected: &case.protected,
            model_output: "Le quedan cinco intentos",
            restoration: &restoration,
            glossary: &case.glossary,
            matches: &case.matches,
        });
        assert!(issues.is_empty());
    }
}
