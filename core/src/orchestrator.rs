use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::ai::TranslationProvider;
use crate::config::EngineConfig;
use crate::cost::{CostEstimate, CostModel};
use crate::glossary::Glossary;
use crate::issue::{Issue, IssueCategory};
use crate::llm_guards::TranslationConstraints;
use crate::protector::{ProtectError, Protector};
use crate::report::QaReport;
use crate::request::{build_request, submit, RequestError};
use crate::spans::extract;
use crate::throttle::RequestThrottle;
use crate::unit::{StateError, TranslationUnit, UnitStatus};
use crate::validator::{ValidationInput, Validator};

#[derive(Debug, Default)]
struct FlagState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<FlagState>>>,
}

impl FlagState {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Shared stop switch for a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<FlagState>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// A flag raised together with this one, which can also be raised on its own.
    pub fn child(&self) -> Self {
        let child = Self::new();
        self.0
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::downgrade(&child.0));
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        let notified = self.0.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Read-only inputs shared by every unit of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<EngineConfig>,
    pub glossary: Arc<Glossary>,
    pub constraints: TranslationConstraints,
}

impl RunContext {
    pub fn new(config: Arc<EngineConfig>, glossary: Arc<Glossary>) -> Self {
        Self {
            config,
            glossary,
            constraints: TranslationConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: TranslationConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total: usize,
    /// Units that reached `validated` or `failed`
    pub completed: usize,
    pub by_status: BTreeMap<UnitStatus, usize>,
}

impl ProgressSnapshot {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Target state handed to the document writer, after XLIFF `state`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Translated,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write target for unit {unit_id}: {message}")]
pub struct SinkError {
    pub unit_id: String,
    pub message: String,
}

/// Receives translated targets for the source container.
pub trait DocumentSink {
    fn write_target(
        &mut self,
        unit_id: &str,
        target: &str,
        state: TargetState,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitResult {
    pub unit: TranslationUnit,
    pub cost: Option<CostEstimate>,
    /// Provider calls made, retries included
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// In input order
    pub units: Vec<UnitResult>,
    pub issues: Vec<Issue>,
    pub cost: CostEstimate,
    /// Units never dispatched, left `pending`
    pub skipped: usize,
}

impl RunReport {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units
            .iter()
            .filter(|result| result.unit.status == status)
            .count()
    }

    pub fn unit(&self, unit_id: &str) -> Option<&TranslationUnit> {
        self.units
            .iter()
            .map(|result| &result.unit)
            .find(|unit| unit.id == unit_id)
    }

    pub fn issues_for<'a>(&'a self, unit_id: &'a str) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |issue| issue.unit_id == unit_id)
    }

    pub fn qa_report(&self) -> QaReport {
        let units: Vec<TranslationUnit> =
            self.units.iter().map(|result| result.unit.clone()).collect();
        QaReport::new(self.issues.clone(), &units)
    }

    /// Hands validated targets to `sink`; failed and skipped units are left out.
    pub fn write_back(&self, sink: &mut dyn DocumentSink) -> Result<usize, SinkError> {
        let mut written = 0usize;
        for result in &self.units {
            if result.unit.status == UnitStatus::Validated {
                sink.write_target(&result.unit.id, &result.unit.target, TargetState::Translated)?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("provider failed fatally, run aborted: {message}")]
    ProviderFatal {
        message: String,
        partial: Box<RunReport>,
    },
    #[error(transparent)]
    Setup(#[from] ProtectError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightUnit {
    pub unit_id: String,
    pub protected_text: String,
    pub token_count: usize,
    pub glossary_hits: usize,
    pub cost: CostEstimate,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub units: Vec<PreflightUnit>,
    /// Units that would fail before reaching the provider
    pub issues: Vec<Issue>,
    pub cost: CostEstimate,
}

struct RunState {
    total: usize,
    completed: usize,
    by_status: BTreeMap<UnitStatus, usize>,
    issues: Vec<Issue>,
    cost: CostEstimate,
    slots: Vec<Option<UnitResult>>,
    /// Last status published per input index
    statuses: Vec<UnitStatus>,
    fatal: Option<String>,
}

impl RunState {
    fn new(total: usize) -> Self {
        let mut by_status: BTreeMap<UnitStatus, usize> =
            UnitStatus::ALL.iter().map(|status| (*status, 0)).collect();
        by_status.insert(UnitStatus::Pending, total);
        Self {
            total,
            completed: 0,
            by_status,
            issues: Vec::new(),
            cost: CostEstimate::default(),
            slots: (0..total).map(|_| None).collect(),
            statuses: vec![UnitStatus::Pending; total],
            fatal: None,
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            by_status: self.by_status.clone(),
        }
    }

    fn moved(&mut self, index: usize, from: UnitStatus, to: UnitStatus) {
        if let Some(status) = self.statuses.get_mut(index) {
            *status = to;
        }
        if let Some(count) = self.by_status.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        *self.by_status.entry(to).or_insert(0) += 1;
        if to.is_terminal() {
            self.completed += 1;
        }
    }
}

/// Everything a unit task needs, shared across tasks.
struct Pipeline {
    provider: Arc<dyn TranslationProvider>,
    context: RunContext,
    protector: Protector,
    validator: Validator,
    cost_model: CostModel,
    state: Mutex<RunState>,
    observer: Arc<dyn ProgressObserver>,
    throttle: Option<RequestThrottle>,
    /// The caller's flag
    cancel: CancellationFlag,
    /// Child of `cancel`, also raised by a fatal provider error
    stop: CancellationFlag,
}

impl Pipeline {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(
        &self,
        index: usize,
        unit: &mut TranslationUnit,
        next: UnitStatus,
    ) -> Result<(), StateError> {
        let from = unit.status;
        unit.advance(next)?;
        let mut state = self.lock();
        state.moved(index, from, next);
        self.observer.on_progress(&state.snapshot());
        Ok(())
    }

    fn fail(&self, index: usize, unit: &mut TranslationUnit, issue: Issue) -> Result<(), StateError> {
        let from = unit.status;
        unit.fail(issue.detail.clone())?;
        let mut state = self.lock();
        state.issues.push(issue);
        state.moved(index, from, UnitStatus::Failed);
        self.observer.on_progress(&state.snapshot());
        Ok(())
    }

    fn finish(&self, index: usize, result: UnitResult) {
        let mut state = self.lock();
        if let Some(cost) = &result.cost {
            state.cost.add(cost);
        }
        if let Some(slot) = state.slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    fn stop_reason(&self) -> &'static str {
        if self.cancel.is_cancelled() {
            "run cancelled before the request completed"
        } else {
            "run aborted after a fatal provider error"
        }
    }

    /// Records a unit whose task died without reporting back.
    fn recover(&self, index: usize, mut unit: TranslationUnit, reason: &str) {
        let mut state = self.lock();
        if state.slots.get(index).map_or(true, Option::is_some) {
            return;
        }
        let from = state.statuses.get(index).copied().unwrap_or(UnitStatus::Pending);
        if let Err(error) = unit.fail(reason) {
            log::error!("unit {}: {}", unit.id, error);
        }
        if !from.is_terminal() {
            state.moved(index, from, UnitStatus::Failed);
            self.observer.on_progress(&state.snapshot());
        }
        state
            .issues
            .push(Issue::error(&unit.id, IssueCategory::TranslationFailure, reason));
        state.slots[index] = Some(UnitResult {
            unit,
            cost: None,
            attempts: 0,
        });
    }

    async fn process(&self, index: usize, mut unit: TranslationUnit) {
        let mut cost = None;
        let mut attempts = 0u32;
        if let Err(error) = self.drive(index, &mut unit, &mut cost, &mut attempts).await {
            log::error!("unit {}: {}", unit.id, error);
        }
        self.finish(
            index,
            UnitResult {
                unit,
                cost,
                attempts,
            },
        );
    }

    async fn drive(
        &self,
        index: usize,
        unit: &mut TranslationUnit,
        cost: &mut Option<CostEstimate>,
        attempts: &mut u32,
    ) -> Result<(), StateError> {
        let spans = match extract(&unit.source, unit.format) {
            Ok(spans) => spans,
            Err(error) => {
                let issue = Issue::error(&unit.id, IssueCategory::MalformedMarkup, error.to_string());
                return self.fail(index, unit, issue);
            }
        };
        let protected = match self.protector.protect(&spans) {
            Ok(protected) => protected,
            Err(error) => {
                let issue = Issue::error(&unit.id, IssueCategory::MalformedMarkup, error.to_string());
                return self.fail(index, unit, issue);
            }
        };
        self.transition(index, unit, UnitStatus::Protected)?;

        if self.stop.is_cancelled() {
            let issue = Issue::error(&unit.id, IssueCategory::TranslationFailure, self.stop_reason());
            return self.fail(index, unit, issue);
        }

        let glossary: &Glossary = &self.context.glossary;
        let matches = glossary.annotate(&protected);
        let request = build_request(
            unit,
            &protected,
            &matches,
            self.context.config.run.tone,
            &self.context.constraints,
        );
        let mut estimate = self.cost_model.estimate(&unit.source);

        let run = &self.context.config.run;
        let outcome = submit(
            &*self.provider,
            &request,
            run.retry.policy(),
            run.request_timeout(),
            self.throttle.as_ref(),
            &self.stop,
        )
        .await;

        let response = match outcome {
            Ok(outcome) => {
                *attempts = outcome.attempts;
                self.cost_model.apply_usage(&mut estimate, outcome.response.usage);
                *cost = Some(estimate);
                outcome.response
            }
            Err(error) => {
                *cost = Some(estimate);
                if let RequestError::Exhausted { attempts: made, .. } = &error {
                    *attempts = *made;
                }
                if let RequestError::Fatal(provider_error) = &error {
                    log::error!(
                        "unit {}: fatal provider error, stopping run: {}",
                        unit.id,
                        provider_error
                    );
                    {
                        let mut state = self.lock();
                        if state.fatal.is_none() {
                            state.fatal = Some(provider_error.to_string());
                        }
                    }
                    self.stop.cancel();
                }
                let detail = match error {
                    RequestError::Cancelled => self.stop_reason().to_string(),
                    other => other.to_string(),
                };
                let issue = Issue::error(&unit.id, IssueCategory::TranslationFailure, detail);
                return self.fail(index, unit, issue);
            }
        };
        self.transition(index, unit, UnitStatus::Translated)?;

        let restoration = protected.restore(&unit.id, &response.text);
        unit.target = restoration.text.clone();
        self.transition(index, unit, UnitStatus::Restored)?;

        let validator_input = ValidationInput {
            unit_id: &unit.id,
            protected: &protected,
            model_output: &response.text,
            restoration: &restoration,
            glossary,
            matches: &matches,
        };
        let issues = self.validator.validate(&validator_input);
        if !issues.is_empty() {
            log::debug!("unit {}: {} QA issue(s)", unit.id, issues.len());
            self.lock().issues.extend(issues);
        }
        self.transition(index, unit, UnitStatus::Validated)
    }
}

pub struct Orchestrator {
    provider: Arc<dyn TranslationProvider>,
    context: RunContext,
    observer: Arc<dyn ProgressObserver>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn TranslationProvider>, context: RunContext) -> Self {
        Self {
            provider,
            context,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    fn cost_model(&self) -> CostModel {
        let config = &self.context.config;
        CostModel::new(&config.pricing, &config.provider.model)
    }

    fn fill_languages(&self, unit: &mut TranslationUnit) {
        let run = &self.context.config.run;
        if unit.source_lang.trim().is_empty() {
            if let Some(lang) = &run.source_lang {
                unit.source_lang = lang.clone();
            }
        }
        if unit.target_lang.trim().is_empty() {
            if let Some(lang) = &run.target_lang {
                unit.target_lang = lang.clone();
            }
        }
    }

    pub async fn run(
        &self,
        units: Vec<TranslationUnit>,
        cancel: CancellationFlag,
    ) -> Result<RunReport, OrchestratorError> {
        let config = &self.context.config;
        let total = units.len();
        let run_id = Uuid::new_v4();
        let pipeline = Arc::new(Pipeline {
            provider: Arc::clone(&self.provider),
            context: self.context.clone(),
            protector: Protector::new(config.tokens.clone())?,
            validator: Validator::new(config.validator.clone()),
            cost_model: self.cost_model(),
            state: Mutex::new(RunState::new(total)),
            observer: Arc::clone(&self.observer),
            throttle: config.run.max_requests_per_minute.map(RequestThrottle::per_minute),
            stop: cancel.child(),
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(config.run.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut dispatched: Vec<Option<TranslationUnit>> = (0..total).map(|_| None).collect();

        log::info!(
            "run {}: starting {} unit(s), provider {}, {} in flight",
            run_id,
            total,
            self.provider.name(),
            config.run.max_in_flight
        );

        for (index, mut unit) in units.into_iter().enumerate() {
            let permit = if pipeline.stop.is_cancelled() {
                None
            } else {
                Arc::clone(&semaphore).acquire_owned().await.ok()
            };
            let Some(permit) = permit.filter(|_| !pipeline.stop.is_cancelled()) else {
                pipeline.finish(
                    index,
                    UnitResult {
                        unit,
                        cost: None,
                        attempts: 0,
                    },
                );
                continue;
            };

            self.fill_languages(&mut unit);
            dispatched[index] = Some(unit.clone());
            let pipeline = Arc::clone(&pipeline);
            tasks.spawn(async move {
                let _permit = permit;
                pipeline.process(index, unit).await;
            });
        }

        let mut task_failure: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                log::error!("unit task ended abnormally: {}", error);
                task_failure.get_or_insert_with(|| error.to_string());
            }
        }
        if let Some(error) = task_failure {
            let reason = format!("unit task ended abnormally: {error}");
            for (index, unit) in dispatched.into_iter().enumerate() {
                if let Some(unit) = unit {
                    pipeline.recover(index, unit, &reason);
                }
            }
        }

        let (report, fatal) = {
            let mut state = pipeline.lock();
            let slots = std::mem::take(&mut state.slots);
            let units: Vec<UnitResult> = slots.into_iter().flatten().collect();
            let skipped = units
                .iter()
                .filter(|result| result.unit.status == UnitStatus::Pending)
                .count();
            let outcome = if cancel.is_cancelled() {
                RunOutcome::Cancelled
            } else {
                RunOutcome::Completed
            };
            let report = RunReport {
                run_id,
                outcome,
                units,
                issues: std::mem::take(&mut state.issues),
                cost: state.cost,
                skipped,
            };
            (report, state.fatal.take())
        };

        log::info!(
            "run {} finished ({:?}): {} validated, {} failed, {} skipped, {} issue(s), ~${:.4}",
            report.run_id,
            report.outcome,
            report.count(UnitStatus::Validated),
            report.count(UnitStatus::Failed),
            report.skipped,
            report.issues.len(),
            report.cost.estimated_usd
        );

        match fatal {
            Some(message) => Err(OrchestratorError::ProviderFatal {
                message,
                partial: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    /// Extraction, tokenization and cost only; the provider is never called.
    pub fn preflight(&self, units: &[TranslationUnit]) -> Result<PreflightReport, OrchestratorError> {
        let config = &self.context.config;
        let protector = Protector::new(config.tokens.clone())?;
        let cost_model = self.cost_model();
        let mut report = PreflightReport::default();

        for unit in units {
            let protected = extract(&unit.source, unit.format)
                .map_err(|error| error.to_string())
                .and_then(|spans| protector.protect(&spans).map_err(|error| error.to_string()));
            match protected {
                Ok(protected) => {
                    let cost = cost_model.estimate(&unit.source);
                    report.cost.add(&cost);
                    report.units.push(PreflightUnit {
                        unit_id: unit.id.clone(),
                        protected_text: protected.masked_text().to_string(),
                        token_count: protected.token_map().len(),
                        glossary_hits: self.context.glossary.annotate(&protected).len(),
                        cost,
                    });
                }
                Err(detail) => report
                    .issues
                    .push(Issue::error(&unit.id, IssueCategory::MalformedMarkup, detail)),
            }
        }
        Ok(report)
    }
}
