pub mod ai;
pub mod config;
pub mod cost;
pub mod glossary;
pub mod issue;
pub mod llm_guards;
pub mod orchestrator;
pub mod protector;
pub mod report;
pub mod request;
pub mod spans;
pub mod throttle;
pub mod unit;
pub mod validator;

pub use ai::{
    EchoProvider, OpenRouterProvider, ProviderError, ProviderResponse, RetryPolicy,
    ScriptedProvider, TokenUsage, TranslationProvider,
};
pub use config::{
    ConfigError, EngineConfig, PricingConfig, ProviderSettings, RetrySettings, RunSettings,
    ValidatorOptions,
};
pub use cost::{CostEstimate, CostModel};
pub use glossary::{Glossary, GlossaryEntry, GlossaryError, GlossaryMatch, GlossaryTarget};
pub use issue::{Issue, IssueCategory, Severity};
pub use orchestrator::{
    CancellationFlag, DocumentSink, NoopObserver, Orchestrator, OrchestratorError,
    PreflightReport, ProgressObserver, ProgressSnapshot, RunContext, RunOutcome, RunReport,
    SinkError, TargetState, UnitResult,
};
pub use protector::{
    ProtectError, ProtectedUnit, Protector, Restoration, SearchableSegment, TokenDelimiters,
    TokenMap,
};
pub use report::{IssueSummary, QaReport, QaReportRow, ReportError};
pub use request::{build_request, submit, RequestError, Tone, TranslationRequest};
pub use spans::{extract, FormatHint, MalformedMarkupError, ProtectedSpan, Span, SpanKind};
pub use throttle::RequestThrottle;
pub use unit::{StateError, TranslationUnit, UnitStatus};
pub use validator::{ValidationInput, Validator};
