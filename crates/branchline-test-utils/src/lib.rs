//! Testing utilities for the branchline workspace
//!
//! Outline fixtures, a manual clock, and scripted generation services.

use branchline_engine::{
    AccountingContext, AgendaContext, DeviationSignal, EvaluationContext, GenerationStage,
    PacingSignal, PageEvaluation, PagePlan, PageService, PlanContext, ReconcileContext,
    Reconciliation, ReconciliationDiagnostic, ServiceError, StateAccounting, StateIntent,
    StructureRewriteContext, StructureService, WriterContext, WrittenPage,
};
use branchline_structure::{
    create_story_structure, BeatRole, Clock, GeneratedAct, GeneratedBeat, NpcAgenda,
    PacingBudget, StorySeed, StoryStructure, StructureGenerationResult,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Three-act outline with `shape[a]` beats in act `a`
///
/// Descriptions read `"{tag} event {act}.{beat}"` (0-based) so outlines
/// built with different tags never collide.
pub fn outline_tagged(tag: &str, shape: [usize; 3]) -> StructureGenerationResult {
    StructureGenerationResult {
        overall_theme: format!("{tag} theme"),
        premise: format!("{tag} premise"),
        pacing_budget: PacingBudget::default(),
        acts: shape
            .iter()
            .enumerate()
            .map(|(a, &beats)| GeneratedAct {
                name: format!("{tag} act {a}"),
                objective: format!("{tag} objective {a}"),
                stakes: format!("{tag} stakes {a}"),
                entry_condition: format!("{tag} entry {a}"),
                beats: (0..beats)
                    .map(|b| {
                        GeneratedBeat::new(
                            format!("{tag} event {a}.{b}"),
                            format!("{tag} goal {a}.{b}"),
                            role_for(b, beats),
                        )
                        .with_name(format!("{tag} beat {a}.{b}"))
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Outline tagged `"planned"`
pub fn outline(shape: [usize; 3]) -> StructureGenerationResult {
    outline_tagged("planned", shape)
}

/// The classic 3 × 3 outline
pub fn three_act_outline() -> StructureGenerationResult {
    outline([3, 3, 3])
}

/// Factory-built structure for [`outline`]
pub fn structure(shape: [usize; 3]) -> StoryStructure {
    create_story_structure(&outline(shape)).unwrap()
}

/// Seed shared by every test story
pub fn seed() -> StorySeed {
    StorySeed::new("a disgraced cartographer", "gothic mystery")
        .with_worldbuilding("a drowned city of canals")
        .with_starting_situation("a stranger returns your stolen maps")
}

fn role_for(index: usize, beats: usize) -> BeatRole {
    match index {
        0 => BeatRole::Setup,
        i if i + 1 == beats => BeatRole::TurningPoint,
        _ => BeatRole::Escalation,
    }
}

/// Analyst verdict concluding the active beat
pub fn concluded(resolution: &str) -> PageEvaluation {
    PageEvaluation {
        beat_concluded: true,
        beat_resolution: resolution.to_string(),
        ..PageEvaluation::default()
    }
}

/// Analyst verdict flagging a deviation
pub fn deviated(reason: &str, invalidated: &[&str], summary: &str) -> PageEvaluation {
    PageEvaluation {
        deviation: DeviationSignal {
            detected: true,
            reason: reason.to_string(),
            invalidated_beat_ids: invalidated.iter().map(|id| (*id).to_string()).collect(),
            narrative_summary: summary.to_string(),
        },
        ..PageEvaluation::default()
    }
}

/// Analyst verdict reporting a pacing issue only
pub fn pacing_issue(reason: &str) -> PageEvaluation {
    PageEvaluation {
        pacing: PacingSignal {
            issue_detected: true,
            reason: reason.to_string(),
        },
        ..PageEvaluation::default()
    }
}

/// Reconciliation rejecting the page with one diagnostic per code
pub fn rejected(codes: &[&str]) -> Reconciliation {
    Reconciliation {
        diagnostics: codes
            .iter()
            .map(|code| {
                ReconciliationDiagnostic::new(*code, format!("{code} does not match the plan"))
                    .with_field("state_intents")
            })
            .collect(),
        reconciled_changes: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Clock stopped at `millis`
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Jump to `millis`, backwards if need be
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move forward by `millis`
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Scripted page service
// ---------------------------------------------------------------------------

/// Calls seen by a [`ScriptedPageService`]
#[derive(Debug, Clone, Default)]
pub struct PageCalls {
    /// Every planner context, in call order
    pub plans: Vec<PlanContext>,
    /// Number of accounting calls
    pub accounts: usize,
    /// Number of writer calls
    pub writes: usize,
    /// Number of reconciler calls
    pub reconciles: usize,
    /// Every analyst context, in call order
    pub evaluations: Vec<EvaluationContext>,
    /// Every agenda context, in call order
    pub agendas: Vec<AgendaContext>,
}

#[derive(Debug, Default)]
struct PageScript {
    reconciliations: VecDeque<Reconciliation>,
    evaluations: VecDeque<Result<PageEvaluation, ServiceError>>,
    agendas: VecDeque<Result<Vec<NpcAgenda>, ServiceError>>,
    failures: HashMap<GenerationStage, ServiceError>,
    write_delay: Option<Duration>,
}

/// Page service answering from queued responses
///
/// Empty queues fall back to a clean reconciliation, a no-progress
/// evaluation and unchanged agendas.
#[derive(Debug, Default)]
pub struct ScriptedPageService {
    script: Mutex<PageScript>,
    calls: Mutex<PageCalls>,
}

impl ScriptedPageService {
    /// Service with nothing queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reconciliation
    pub fn with_reconciliation(mut self, reconciliation: Reconciliation) -> Self {
        self.script.get_mut().reconciliations.push_back(reconciliation);
        self
    }

    /// Queue the next analyst verdict
    pub fn with_evaluation(mut self, evaluation: PageEvaluation) -> Self {
        self.script.get_mut().evaluations.push_back(Ok(evaluation));
        self
    }

    /// Queue an analyst failure
    pub fn with_evaluation_error(mut self, error: ServiceError) -> Self {
        self.script.get_mut().evaluations.push_back(Err(error));
        self
    }

    /// Queue the next agenda update
    pub fn with_agendas(mut self, agendas: Vec<NpcAgenda>) -> Self {
        self.script.get_mut().agendas.push_back(Ok(agendas));
        self
    }

    /// Queue an agenda resolver failure
    pub fn with_agenda_error(mut self, error: ServiceError) -> Self {
        self.script.get_mut().agendas.push_back(Err(error));
        self
    }

    /// Every call to `stage` fails with `error`
    pub fn failing_at(mut self, stage: GenerationStage, error: ServiceError) -> Self {
        self.script.get_mut().failures.insert(stage, error);
        self
    }

    /// Sleep for `delay` inside every write
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.script.get_mut().write_delay = Some(delay);
        self
    }

    /// Queue an evaluation after construction
    pub fn push_evaluation(&self, evaluation: PageEvaluation) {
        self.script.lock().evaluations.push_back(Ok(evaluation));
    }

    /// Snapshot of the calls seen so far
    pub fn calls(&self) -> PageCalls {
        self.calls.lock().clone()
    }

    fn check(&self, stage: GenerationStage) -> Result<(), ServiceError> {
        match self.script.lock().failures.get(&stage) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl PageService for ScriptedPageService {
    async fn plan(&self, context: &PlanContext) -> Result<PagePlan, ServiceError> {
        self.calls.lock().plans.push(context.clone());
        self.check(GenerationStage::Plan)?;
        Ok(PagePlan {
            scene_intent: format!(
                "scene for page {} (attempt {})",
                context.generation.page_id, context.attempt
            ),
            state_intents: vec![StateIntent {
                category: "inventory".to_string(),
                operation: "add".to_string(),
                text: "a brass key".to_string(),
            }],
            choice_intents: vec!["follow the stranger".to_string(), "burn the maps".to_string()],
        })
    }

    async fn account(&self, context: &AccountingContext) -> Result<StateAccounting, ServiceError> {
        self.calls.lock().accounts += 1;
        self.check(GenerationStage::Account)?;
        Ok(StateAccounting {
            intents: context.plan.state_intents.clone(),
        })
    }

    async fn write(&self, context: &WriterContext) -> Result<WrittenPage, ServiceError> {
        self.calls.lock().writes += 1;
        self.check(GenerationStage::Write)?;
        let delay = self.script.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(WrittenPage {
            narrative_text: format!(
                "Page {}: {}",
                context.generation.page_id,
                context.plan.scene_intent
            ),
            choices: context.plan.choice_intents.clone(),
            state_changes: context.accounting.intents.clone(),
        })
    }

    async fn reconcile(&self, context: &ReconcileContext) -> Result<Reconciliation, ServiceError> {
        self.calls.lock().reconciles += 1;
        self.check(GenerationStage::Reconcile)?;
        let scripted = self.script.lock().reconciliations.pop_front();
        Ok(scripted.unwrap_or_else(|| Reconciliation {
            diagnostics: Vec::new(),
            reconciled_changes: context.page.state_changes.clone(),
        }))
    }

    async fn evaluate(&self, context: &EvaluationContext) -> Result<PageEvaluation, ServiceError> {
        self.calls.lock().evaluations.push(context.clone());
        let scripted = self.script.lock().evaluations.pop_front();
        scripted.unwrap_or_else(|| Ok(PageEvaluation::default()))
    }

    async fn resolve_agendas(
        &self,
        context: &AgendaContext,
    ) -> Result<Vec<NpcAgenda>, ServiceError> {
        self.calls.lock().agendas.push(context.clone());
        let scripted = self.script.lock().agendas.pop_front();
        scripted.unwrap_or_else(|| Ok(context.current_agendas.clone()))
    }
}

// ---------------------------------------------------------------------------
// Scripted structure service
// ---------------------------------------------------------------------------

/// Structure service returning a fixed initial outline and queued rewrites
#[derive(Debug)]
pub struct ScriptedStructureService {
    initial: Result<StructureGenerationResult, ServiceError>,
    rewrites: Mutex<VecDeque<Result<StructureGenerationResult, ServiceError>>>,
    rewrite_contexts: Mutex<Vec<StructureRewriteContext>>,
    generate_calls: AtomicUsize,
}

impl ScriptedStructureService {
    /// Service returning `initial` for every story
    pub fn new(initial: StructureGenerationResult) -> Self {
        Self::with_initial(Ok(initial))
    }

    /// Service whose initial outline call always fails
    pub fn failing(error: ServiceError) -> Self {
        Self::with_initial(Err(error))
    }

    fn with_initial(initial: Result<StructureGenerationResult, ServiceError>) -> Self {
        Self {
            initial,
            rewrites: Mutex::new(VecDeque::new()),
            rewrite_contexts: Mutex::new(Vec::new()),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the next rewrite outline
    pub fn with_rewrite(mut self, outline: StructureGenerationResult) -> Self {
        self.rewrites.get_mut().push_back(Ok(outline));
        self
    }

    /// Queue a rewrite failure
    pub fn with_rewrite_error(mut self, error: ServiceError) -> Self {
        self.rewrites.get_mut().push_back(Err(error));
        self
    }

    /// Every rewrite context, in call order
    pub fn rewrite_contexts(&self) -> Vec<StructureRewriteContext> {
        self.rewrite_contexts.lock().clone()
    }

    /// Number of initial outline calls
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StructureService for ScriptedStructureService {
    async fn generate_structure(
        &self,
        _seed: &StorySeed,
    ) -> Result<StructureGenerationResult, ServiceError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.initial.clone()
    }

    async fn rewrite_structure(
        &self,
        context: &StructureRewriteContext,
    ) -> Result<StructureGenerationResult, ServiceError> {
        self.rewrite_contexts.lock().push(context.clone());
        let scripted = self.rewrites.lock().pop_front();
        scripted.unwrap_or_else(|| Err(ServiceError::Fatal("no rewrite scripted".to_string())))
    }
}
