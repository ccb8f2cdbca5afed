//! End-to-end runs through the orchestrator with in-process providers.
//!
//! Each test drives units through extraction, tokenization, the provider,
//! restoration and QA, then inspects the run report.

use course_localizer_core::{
    CancellationFlag, DocumentSink, EchoProvider, EngineConfig, Glossary, IssueCategory,
    Orchestrator, OrchestratorError, ProviderError, ProviderResponse, RunContext, RunOutcome,
    ScriptedProvider, SinkError, TargetState, TranslationUnit, UnitStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.run.retry.base_delay_ms = 1;
    config.run.retry.max_delay_ms = 5;
    config
}

fn context_with(glossary: Glossary) -> RunContext {
    RunContext::new(Arc::new(fast_config()), Arc::new(glossary))
}

fn unit(id: &str, source: &str) -> TranslationUnit {
    TranslationUnit::new(id, source, "English", "Spanish")
}

/// Replies from a fixed table keyed by the protected text sent to the model.
fn table(entries: &[(&str, &str)]) -> ScriptedProvider {
    let replies: HashMap<String, String> = entries
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
    ScriptedProvider::new(move |request, _| {
        replies
            .get(&request.protected_text)
            .map(|reply| ProviderResponse::text(reply.clone()))
            .ok_or_else(|| ProviderError::fatal(format!("unexpected text {}", request.protected_text)))
    })
}

#[derive(Default)]
struct MemorySink {
    written: Vec<(String, String, TargetState)>,
}

impl DocumentSink for MemorySink {
    fn write_target(
        &mut self,
        unit_id: &str,
        target: &str,
        state: TargetState,
    ) -> Result<(), SinkError> {
        self.written
            .push((unit_id.to_string(), target.to_string(), state));
        Ok(())
    }
}

#[tokio::test]
async fn glossary_terms_are_requested_and_checked() {
    init_logging();
    let glossary = Glossary::from_pipe_lines("HR Department | Departamento de RRHH").unwrap();
    let provider = Arc::new(table(&[
        (
            "Contact the HR Department for details.",
            "Contacte al Departamento de RRHH para más detalles.",
        ),
        (
            "Ask the HR Department about leave.",
            "Pregunte a Recursos Humanos sobre las vacaciones.",
        ),
    ]));
    let orchestrator = Orchestrator::new(provider.clone(), context_with(glossary));

    let report = orchestrator
        .run(
            vec![
                unit("compliant", "Contact the HR Department for details."),
                unit("violating", "Ask the HR Department about leave."),
            ],
            CancellationFlag::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.count(UnitStatus::Validated), 2);
    assert_eq!(
        report
            .issues_for("compliant")
            .filter(|issue| issue.category == IssueCategory::GlossaryViolation)
            .count(),
        0
    );
    let violations: Vec<_> = report
        .issues_for("violating")
        .filter(|issue| issue.category == IssueCategory::GlossaryViolation)
        .collect();
    assert_eq!(violations.len(), 1);
    assert!(!violations[0].is_error());
}

#[tokio::test]
async fn dropped_closing_tag_is_a_single_missing_tag_error() {
    init_logging();
    let provider = table(&[(
        "Click ⟦T0⟧Continue⟦T1⟧ to proceed.",
        "Haga clic en ⟦T0⟧Continuar para seguir.",
    )]);
    let orchestrator = Orchestrator::new(Arc::new(provider), context_with(Glossary::default()));

    let report = orchestrator
        .run(
            vec![unit("u1", "Click <b>Continue</b> to proceed.")],
            CancellationFlag::new(),
        )
        .await
        .unwrap();

    let issues: Vec<_> = report.issues_for("u1").collect();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].category, IssueCategory::MissingTag);
    assert!(issues[0].is_error());
    let target = &report.unit("u1").unwrap().target;
    assert_eq!(target, "Haga clic en <b>Continuar para seguir.");
    assert!(!target.contains("</b>"));
}

#[tokio::test]
async fn spelled_out_number_is_a_numeric_warning() {
    init_logging();
    let provider = table(&[(
        "You have ⟦T0⟧ attempts remaining.",
        "Le quedan cinco intentos.",
    )]);
    let orchestrator = Orchestrator::new(Arc::new(provider), context_with(Glossary::default()));

    let report = orchestrator
        .run(
            vec![unit("u1", "You have 5 attempts remaining.")],
            CancellationFlag::new(),
        )
        .await
        .unwrap();

    let issues: Vec<_> = report.issues_for("u1").collect();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].category, IssueCategory::NumericMismatch);
    assert!(!issues[0].is_error());
    assert_eq!(report.unit("u1").unwrap().status, UnitStatus::Validated);
}

#[tokio::test]
async fn malformed_markup_never_reaches_the_provider() {
    init_logging();
    let provider = Arc::new(EchoProvider::new());
    let orchestrator = Orchestrator::new(provider.clone(), context_with(Glossary::default()));

    let report = orchestrator
        .run(
            vec![unit("u1", "Click <b>Continue to proceed.")],
            CancellationFlag::new(),
        )
        .await
        .unwrap();

    assert_eq!(provider.calls(), 0);
    let failed = report.unit("u1").unwrap();
    assert_eq!(failed.status, UnitStatus::Failed);
    assert!(failed.failure_reason.as_deref().unwrap().contains("never closed"));
    let issues: Vec<_> = report.issues_for("u1").collect();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].category, IssueCategory::MalformedMarkup);
}

#[tokio::test]
async fn identity_translation_restores_the_source() {
    init_logging();
    let sources = [
        "<g id=\"1\">Welcome</g>, %UserName%!",
        "Score: {score} of 100<x id=\"2\"/>",
        "Line one<br/>Line two",
    ];
    let units: Vec<TranslationUnit> = sources
        .iter()
        .enumerate()
        .map(|(index, source)| unit(&format!("u{index}"), source))
        .collect();
    let orchestrator = Orchestrator::new(Arc::new(EchoProvider::new()), context_with(Glossary::default()));

    let report = orchestrator.run(units, CancellationFlag::new()).await.unwrap();

    for (index, source) in sources.iter().enumerate() {
        let id = format!("u{index}");
        assert_eq!(report.unit(&id).unwrap().target, *source);
        assert!(report
            .issues_for(&id)
            .all(|issue| !issue.category.is_tag_integrity()));
    }
}

#[tokio::test]
async fn provider_reordering_is_kept() {
    init_logging();
    let provider = table(&[(
        "⟦T0⟧Save⟦T1⟧ the file ⟦T2⟧",
        "Guarde el archivo ⟦T2⟧ ⟦T0⟧ahora⟦T1⟧",
    )]);
    let orchestrator = Orchestrator::new(Arc::new(provider), context_with(Glossary::default()));

    let report = orchestrator
        .run(vec![unit("u1", "<b>Save</b> the file {name}")], CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(
        report.unit("u1").unwrap().target,
        "Guarde el archivo {name} <b>ahora</b>"
    );
    assert!(report.issues_for("u1").all(|issue| !issue.is_error()));
}

#[tokio::test]
async fn cancellation_leaves_undispatched_units_pending() {
    init_logging();
    let mut config = fast_config();
    config.run.max_in_flight = 1;
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    let provider = ScriptedProvider::new(move |request, _| {
        trigger.cancel();
        Ok(ProviderResponse::text(request.protected_text.clone()))
    });
    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        RunContext::new(Arc::new(config), Arc::new(Glossary::default())),
    );

    let units = vec![unit("u0", "One"), unit("u1", "Two"), unit("u2", "Three")];
    let report = orchestrator.run(units, cancel).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.unit("u0").unwrap().status, UnitStatus::Validated);
    assert_eq!(report.count(UnitStatus::Pending), 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.units.len(), 3);
}

#[tokio::test]
async fn fatal_provider_error_aborts_with_partial_report() {
    init_logging();
    let mut config = fast_config();
    config.run.max_in_flight = 1;
    let provider = Arc::new(ScriptedProvider::new(|request, _| {
        if request.protected_text == "Second" {
            Err(ProviderError::fatal("HTTP 401: invalid key"))
        } else {
            Ok(ProviderResponse::text(request.protected_text.clone()))
        }
    }));
    let orchestrator = Orchestrator::new(
        provider.clone(),
        RunContext::new(Arc::new(config), Arc::new(Glossary::default())),
    );

    let units = vec![
        unit("u0", "First"),
        unit("u1", "Second"),
        unit("u2", "Third"),
        unit("u3", "Fourth"),
    ];
    let error = orchestrator
        .run(units, CancellationFlag::new())
        .await
        .unwrap_err();

    match error {
        OrchestratorError::ProviderFatal { message, partial } => {
            assert!(message.contains("invalid key"));
            assert_eq!(partial.unit("u0").unwrap().status, UnitStatus::Validated);
            assert_eq!(partial.unit("u1").unwrap().status, UnitStatus::Failed);
            assert!(partial.count(UnitStatus::Pending) >= 1);
            assert_eq!(partial.units.len(), 4);
        }
        other => panic!("expected a fatal provider error, got {other}"),
    }
    assert!(provider.calls() <= 3);
}

#[tokio::test]
async fn empty_translation_fails_the_unit() {
    init_logging();
    let provider = ScriptedProvider::constant("   ");
    let orchestrator = Orchestrator::new(Arc::new(provider), context_with(Glossary::default()));

    let report = orchestrator
        .run(vec![unit("u1", "Hello there")], CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(report.unit("u1").unwrap().status, UnitStatus::Failed);
    assert!(report
        .issues_for("u1")
        .any(|issue| issue.category == IssueCategory::TranslationFailure));
}

#[tokio::test]
async fn transient_errors_recover_and_usage_is_billed() {
    init_logging();
    let provider = Arc::new(ScriptedProvider::new(|request, call| {
        if call == 0 {
            Err(ProviderError::Timeout {
                after: Duration::from_secs(60),
            })
        } else {
            Ok(ProviderResponse {
                text: format!("ES: {}", request.protected_text),
                usage: Some(course_localizer_core::TokenUsage {
                    prompt_tokens: 300,
                    completion_tokens: 20,
                }),
            })
        }
    }));
    let orchestrator = Orchestrator::new(provider.clone(), context_with(Glossary::default()));

    let report = orchestrator
        .run(vec![unit("u1", "Hello")], CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(report.units[0].attempts, 2);
    assert_eq!(report.cost.actual_tokens, Some(320));
    assert_eq!(report.unit("u1").unwrap().target, "ES: Hello");
}

#[tokio::test]
async fn qa_report_and_write_back_cover_the_run() {
    init_logging();
    let provider = table(&[("You have ⟦T0⟧ attempts remaining.", "Le quedan cinco intentos.")]);
    let orchestrator = Orchestrator::new(Arc::new(provider), context_with(Glossary::default()));

    let report = orchestrator
        .run(
            vec![
                unit("good", "You have 5 attempts remaining."),
                unit("bad", "Unclosed <g id=\"1\">tag"),
            ],
            CancellationFlag::new(),
        )
        .await
        .unwrap();

    let qa = report.qa_report();
    let summary = qa.summary();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.warnings, 1);

    let mut csv = Vec::new();
    qa.write_csv(&mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.contains("bad,malformed_markup,error"));
    assert!(csv.contains("good,numeric_mismatch,warning"));

    let mut sink = MemorySink::default();
    assert_eq!(report.write_back(&mut sink).unwrap(), 1);
    assert_eq!(sink.written[0].0, "good");
    assert_eq!(sink.written[0].2, TargetState::Translated);
}

#[tokio::test]
async fn preflight_estimates_without_calling_the_provider() {
    init_logging();
    let provider = Arc::new(EchoProvider::new());
    let glossary = Glossary::from_pipe_lines("HR Department | Departamento de RRHH").unwrap();
    let orchestrator = Orchestrator::new(provider.clone(), context_with(glossary));

    let report = orchestrator
        .preflight(&[
            unit("u1", "Contact the <b>HR Department</b>."),
            unit("u2", "Broken </b> markup"),
        ])
        .unwrap();

    assert_eq!(provider.calls(), 0);
    assert_eq!(report.units[0].protected_text, "Contact the ⟦T0⟧HR Department⟦T1⟧.");
    assert_eq!(report.units[0].glossary_hits, 1);
    assert_eq!(report.issues[0].unit_id, "u2");
    assert!(report.cost.estimated_input_tokens > 0);
}
