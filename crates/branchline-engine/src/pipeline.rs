//! Generation retry pipeline
//!
//! Runs plan → account → write → reconcile for one page. Reconciliation
//! diagnostics trigger one fresh attempt with the diagnostics fed back to the
//! planner; a failing stage call aborts at once.

use crate::error::{PipelineError, ServiceError};
use crate::service::{
    AccountingContext, GenerationContext, PagePlan, PageService, PlanContext, ReconcileContext,
    Reconciliation, ReconciliationFailureReason, StateAccounting, WriterContext, WrittenPage,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on generation attempts per page
pub const MAX_GENERATION_ATTEMPTS: u32 = 2;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStage {
    /// Scene and state-intent planning
    Plan,
    /// State accounting for the plan
    Account,
    /// Prose writing
    Write,
    /// Intent reconciliation
    Reconcile,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plan => "plan",
            Self::Account => "account",
            Self::Write => "write",
            Self::Reconcile => "reconcile",
        })
    }
}

/// Stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Started,
    Completed,
}

/// Reported to a [`StageObserver`] at every stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvent {
    /// Stage crossing the boundary
    pub stage: GenerationStage,
    /// Whether the stage is starting or done
    pub phase: StagePhase,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Callback for stage progress
pub type StageObserver = Arc<dyn Fn(StageEvent) + Send + Sync>;

/// Retry pipeline options
#[derive(Clone)]
pub struct RetryOptions {
    /// Attempts allowed; clamped to `1..=MAX_GENERATION_ATTEMPTS`
    pub max_attempts: u32,
    /// Called at every stage boundary
    pub observer: Option<StageObserver>,
}

impl RetryOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With attempt limit
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With stage observer
    #[inline]
    #[must_use]
    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_GENERATION_ATTEMPTS,
            observer: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Time spent per stage, summed over attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageDurations {
    /// Planner time
    pub plan: Duration,
    /// State accountant time
    pub account: Duration,
    /// Writer time
    pub write: Duration,
    /// Reconciler time
    pub reconcile: Duration,
}

impl StageDurations {
    fn slot(&mut self, stage: GenerationStage) -> &mut Duration {
        match stage {
            GenerationStage::Plan => &mut self.plan,
            GenerationStage::Account => &mut self.account,
            GenerationStage::Write => &mut self.write,
            GenerationStage::Reconcile => &mut self.reconcile,
        }
    }

    /// Sum of all stages
    #[must_use]
    pub fn total(&self) -> Duration {
        self.plan + self.account + self.write + self.reconcile
    }
}

/// How the pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// An attempt reconciled cleanly
    Success,
    /// The final attempt still had diagnostics
    ReconciliationFailed,
}

/// Pipeline metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationMetrics {
    /// Time per stage across all attempts
    pub durations: StageDurations,
    /// Attempts started
    pub attempts: u32,
    /// More than one attempt ran
    pub retried: bool,
    /// Diagnostic count of each completed attempt
    pub issues_per_attempt: Vec<usize>,
    /// How the pipeline ended
    pub final_status: GenerationStatus,
}

impl GenerationMetrics {
    #[cfg(test)]
    pub(crate) fn finished(attempts: u32, final_status: GenerationStatus) -> Self {
        Self {
            durations: StageDurations::default(),
            attempts,
            retried: attempts > 1,
            issues_per_attempt: Vec::new(),
            final_status,
        }
    }
}

/// Pipeline output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledGeneration {
    /// Plan of the accepted attempt
    pub plan: PagePlan,
    /// Accounting of the accepted attempt
    pub accounting: StateAccounting,
    /// Accepted page
    pub page: WrittenPage,
    /// Clean reconciliation of the accepted page
    pub reconciliation: Reconciliation,
    pub metrics: GenerationMetrics,
}

/// Generate one page, retrying once on reconciliation diagnostics
///
/// # Errors
/// - `PipelineError::Stage` as soon as any stage call fails
/// - `PipelineError::ReconciliationFailed` if the final attempt still has
///   diagnostics
pub async fn generate_with_reconciliation_retry(
    service: &dyn PageService,
    generation: &GenerationContext,
    options: &RetryOptions,
) -> Result<ReconciledGeneration, PipelineError> {
    let max_attempts = options.max_attempts.clamp(1, MAX_GENERATION_ATTEMPTS);
    let observer = options.observer.as_ref();
    let mut durations = StageDurations::default();
    let mut issues_per_attempt = Vec::new();
    let mut attempt_reasons: Vec<Vec<ReconciliationFailureReason>> = Vec::new();
    let mut attempt = 1;

    loop {
        tracing::info!(attempt, max_attempts, "generation attempt started");

        let plan_context = PlanContext {
            generation: generation.clone(),
            attempt,
            failure_reasons: attempt_reasons.last().cloned().unwrap_or_default(),
        };
        let plan = run_stage(
            GenerationStage::Plan,
            attempt,
            observer,
            &mut durations,
            service.plan(&plan_context),
        )
        .await?;

        let accounting_context = AccountingContext {
            generation: generation.clone(),
            plan: plan.clone(),
        };
        let accounting = run_stage(
            GenerationStage::Account,
            attempt,
            observer,
            &mut durations,
            service.account(&accounting_context),
        )
        .await?;

        let writer_context = WriterContext {
            generation: generation.clone(),
            plan: plan.clone(),
            accounting: accounting.clone(),
        };
        let page = run_stage(
            GenerationStage::Write,
            attempt,
            observer,
            &mut durations,
            service.write(&writer_context),
        )
        .await?;

        let reconcile_context = ReconcileContext {
            generation: generation.clone(),
            plan: plan.clone(),
            accounting: accounting.clone(),
            page: page.clone(),
        };
        let reconciliation = run_stage(
            GenerationStage::Reconcile,
            attempt,
            observer,
            &mut durations,
            service.reconcile(&reconcile_context),
        )
        .await?;

        issues_per_attempt.push(reconciliation.diagnostics.len());
        let metrics = |final_status| GenerationMetrics {
            durations,
            attempts: attempt,
            retried: attempt > 1,
            issues_per_attempt: issues_per_attempt.clone(),
            final_status,
        };

        if reconciliation.diagnostics.is_empty() {
            let metrics = metrics(GenerationStatus::Success);
            let total_ms = u64::try_from(metrics.durations.total().as_millis()).unwrap_or(u64::MAX);
            tracing::info!(attempt, retried = metrics.retried, total_ms, "generation reconciled");
            return Ok(ReconciledGeneration {
                plan,
                accounting,
                page,
                reconciliation,
                metrics,
            });
        }

        attempt_reasons.push(reconciliation.diagnostics.iter().map(Into::into).collect());

        if attempt >= max_attempts {
            let metrics = metrics(GenerationStatus::ReconciliationFailed);
            tracing::error!(
                attempt,
                diagnostics = reconciliation.diagnostics.len(),
                "reconciliation failed on final attempt"
            );
            return Err(PipelineError::ReconciliationFailed {
                diagnostics: reconciliation.diagnostics,
                attempt_reasons,
                metrics: Box::new(metrics),
            });
        }

        tracing::warn!(
            attempt,
            diagnostics = reconciliation.diagnostics.len(),
            "reconciliation diagnostics, retrying with feedback"
        );
        for diagnostic in &reconciliation.diagnostics {
            tracing::debug!(
                code = %diagnostic.code,
                field = ?diagnostic.field,
                "{}",
                diagnostic.message
            );
        }
        attempt += 1;
    }
}

async fn run_stage<T, F>(
    stage: GenerationStage,
    attempt: u32,
    observer: Option<&StageObserver>,
    durations: &mut StageDurations,
    call: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    notify(observer, stage, StagePhase::Started, attempt);
    tracing::debug!(%stage, attempt, "stage started");

    let started = Instant::now();
    let result = call.await;
    *durations.slot(stage) += started.elapsed();

    match result {
        Ok(value) => {
            notify(observer, stage, StagePhase::Completed, attempt);
            tracing::debug!(%stage, attempt, "stage completed");
            Ok(value)
        }
        Err(source) => {
            tracing::error!(%stage, attempt, error = %source, "stage failed");
            Err(PipelineError::Stage {
                stage,
                attempt,
                source,
            })
        }
    }
}

fn notify(
    observer: Option<&StageObserver>,
    stage: GenerationStage,
    phase: StagePhase,
    attempt: u32,
) {
    if let Some(observer) = observer {
        observer(StageEvent {
            stage,
            phase,
            attempt,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{
        AgendaContext, EvaluationContext, PageEvaluation, ReconciliationDiagnostic,
    };
    use branchline_structure::{NpcAgenda, PageId, StoryId, StorySeed};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Rejects the first `failing_attempts` reconciliations
    #[derive(Debug, Default)]
    struct FlakyService {
        failing_attempts: u32,
        fail_write: bool,
        plans: AtomicU32,
        reconciles: AtomicU32,
        saw_feedback: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PageService for FlakyService {
        async fn plan(&self, context: &PlanContext) -> Result<PagePlan, ServiceError> {
            self.plans.fetch_add(1, Ordering::SeqCst);
            if !context.failure_reasons.is_empty() {
                self.saw_feedback.store(true, Ordering::SeqCst);
            }
            Ok(PagePlan {
                scene_intent: format!("attempt {}", context.attempt),
                ..PagePlan::default()
            })
        }

        async fn account(&self, _: &AccountingContext) -> Result<StateAccounting, ServiceError> {
            Ok(StateAccounting::default())
        }

        async fn write(&self, _: &WriterContext) -> Result<WrittenPage, ServiceError> {
            if self.fail_write {
                return Err(ServiceError::Fatal("writer down".into()));
            }
            Ok(WrittenPage {
                narrative_text: "The bell tolls.".into(),
                choices: vec!["run".into(), "hide".into()],
                state_changes: Vec::new(),
            })
        }

        async fn reconcile(&self, _: &ReconcileContext) -> Result<Reconciliation, ServiceError> {
            let n = self.reconciles.fetch_add(1, Ordering::SeqCst) + 1;
            let diagnostics = if n <= self.failing_attempts {
                vec![ReconciliationDiagnostic::new(
                    format!("unwritten_intent_{n}"),
                    "the key is never found",
                )]
            } else {
                Vec::new()
            };
            Ok(Reconciliation {
                diagnostics,
                reconciled_changes: Vec::new(),
            })
        }

        async fn evaluate(&self, _: &EvaluationContext) -> Result<PageEvaluation, ServiceError> {
            Ok(PageEvaluation::default())
        }

        async fn resolve_agendas(
            &self,
            _: &AgendaContext,
        ) -> Result<Vec<NpcAgenda>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn generation() -> GenerationContext {
        GenerationContext {
            story_id: StoryId::new(),
            page_id: PageId(1),
            parent_page_id: None,
            selected_choice: None,
            seed: StorySeed::new("a bell-ringer", "gothic"),
            active_beat: crate::service::ActiveBeatSnapshot::Unstructured,
            pacing_nudge: None,
            previous_narrative: None,
            npc_agendas: Vec::new(),
        }
    }

    #[tokio::test]
    async fn clean_first_attempt() {
        let service = FlakyService::default();
        let out = generate_with_reconciliation_retry(&service, &generation(), &RetryOptions::new())
            .await
            .unwrap();
        assert_eq!(out.metrics.attempts, 1);
        assert!(!out.metrics.retried);
        assert_eq!(out.metrics.final_status, GenerationStatus::Success);
        assert_eq!(out.metrics.issues_per_attempt, vec![0]);
    }

    #[tokio::test]
    async fn retries_once_with_feedback() {
        let service = FlakyService {
            failing_attempts: 1,
            ..FlakyService::default()
        };
        let out = generate_with_reconciliation_retry(&service, &generation(), &RetryOptions::new())
            .await
            .unwrap();
        assert_eq!(service.plans.load(Ordering::SeqCst), 2);
        assert!(service.saw_feedback.load(Ordering::SeqCst));
        assert!(out.metrics.retried);
        assert_eq!(out.metrics.issues_per_attempt, vec![1, 0]);
        assert_eq!(out.plan.scene_intent, "attempt 2");
    }

    #[tokio::test]
    async fn exhausted_attempts_fail() {
        let service = FlakyService {
            failing_attempts: 5,
            ..FlakyService::default()
        };
        let options = RetryOptions::new().with_max_attempts(9);
        let err = generate_with_reconciliation_retry(&service, &generation(), &options)
            .await
            .unwrap_err();
        match err {
            PipelineError::ReconciliationFailed {
                diagnostics,
                attempt_reasons,
                metrics,
            } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].code, "unwritten_intent_2");
                let codes: Vec<Vec<&str>> = attempt_reasons
                    .iter()
                    .map(|reasons| reasons.iter().map(|r| r.code.as_str()).collect())
                    .collect();
                assert_eq!(codes, vec![vec!["unwritten_intent_1"], vec!["unwritten_intent_2"]]);
                assert_eq!(metrics.attempts, MAX_GENERATION_ATTEMPTS);
                assert_eq!(metrics.final_status, GenerationStatus::ReconciliationFailed);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(service.plans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_budget() {
        let service = FlakyService {
            failing_attempts: 1,
            ..FlakyService::default()
        };
        let options = RetryOptions::new().with_max_attempts(0);
        let err = generate_with_reconciliation_retry(&service, &generation(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReconciliationFailed { .. }));
        assert_eq!(service.plans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stage_failure_aborts_without_retry() {
        let service = FlakyService {
            failing_attempts: 1,
            fail_write: true,
            ..FlakyService::default()
        };
        let err = generate_with_reconciliation_retry(&service, &generation(), &RetryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: GenerationStage::Write,
                attempt: 1,
                ..
            }
        ));
        assert_eq!(service.plans.load(Ordering::SeqCst), 1);
        assert_eq!(service.reconciles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn observer_sees_every_boundary() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let options =
            RetryOptions::new().with_observer(Arc::new(move |e| sink.lock().unwrap().push(e)));

        let service = FlakyService {
            failing_attempts: 1,
            ..FlakyService::default()
        };
        generate_with_reconciliation_retry(&service, &generation(), &options)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 16);
        assert_eq!(
            events[0],
            StageEvent {
                stage: GenerationStage::Plan,
                phase: StagePhase::Started,
                attempt: 1
            }
        );
        assert_eq!(
            events[15],
            StageEvent {
                stage: GenerationStage::Reconcile,
                phase: StagePhase::Completed,
                attempt: 2
            }
        );
    }
}
