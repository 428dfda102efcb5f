//! Generation service seams
//!
//! The narrative model sits behind two async traits. [`StructureService`]
//! produces and rewrites outlines; [`PageService`] runs the per-page stages.
//! Every context is a plain serializable value so implementations can ship
//! it to a remote model as-is.

use crate::error::ServiceError;
use branchline_structure::{
    current_beat, AccumulatedStructureState, BeatId, BeatRole, CompletedBeat, NpcAgenda,
    PacingBudget, PageId, StoryId, StorySeed, StoryStructure, StructureGenerationResult,
};
use serde::{Deserialize, Serialize};

/// Outline generation and rewriting
#[async_trait::async_trait]
pub trait StructureService: Send + Sync {
    /// Generate the initial outline for a story
    async fn generate_structure(
        &self,
        seed: &StorySeed,
    ) -> Result<StructureGenerationResult, ServiceError>;

    /// Regenerate the unconcluded part of an outline
    async fn rewrite_structure(
        &self,
        context: &StructureRewriteContext,
    ) -> Result<StructureGenerationResult, ServiceError>;
}

/// Per-page generation stages
#[async_trait::async_trait]
pub trait PageService: Send + Sync {
    /// Plan the page
    async fn plan(&self, context: &PlanContext) -> Result<PagePlan, ServiceError>;

    /// Declare the state changes the plan implies
    async fn account(&self, context: &AccountingContext) -> Result<StateAccounting, ServiceError>;

    /// Write the prose
    async fn write(&self, context: &WriterContext) -> Result<WrittenPage, ServiceError>;

    /// Check the written page against declared intents
    async fn reconcile(&self, context: &ReconcileContext) -> Result<Reconciliation, ServiceError>;

    /// Judge beat conclusion, deviation and pacing
    async fn evaluate(&self, context: &EvaluationContext) -> Result<PageEvaluation, ServiceError>;

    /// Update what each NPC is pursuing
    async fn resolve_agendas(
        &self,
        context: &AgendaContext,
    ) -> Result<Vec<NpcAgenda>, ServiceError>;
}

/// Where the branch stands in the structure, as shown to planner and writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActiveBeatSnapshot {
    /// Story has no structure
    Unstructured,
    /// A beat is being played
    InProgress {
        /// Act number as a string
        act_id: String,
        act_name: String,
        act_objective: String,
        beat_id: BeatId,
        beat_name: String,
        beat_objective: String,
        beat_role: BeatRole,
        /// Pages already spent on this beat
        pages_in_beat: u32,
    },
    /// Every beat is concluded
    StoryComplete,
}

impl ActiveBeatSnapshot {
    /// Snapshot for `state`
    ///
    /// Indices that do not resolve against `structure` yield `Unstructured`.
    #[must_use]
    pub fn capture(structure: Option<&StoryStructure>, state: &AccumulatedStructureState) -> Self {
        let Some(structure) = structure else {
            return Self::Unstructured;
        };
        if state.is_story_complete() {
            return Self::StoryComplete;
        }
        match (structure.acts.get(state.current_act_index), current_beat(structure, state)) {
            (Some(act), Ok(beat)) => Self::InProgress {
                act_id: act.id.clone(),
                act_name: act.name.clone(),
                act_objective: act.objective.clone(),
                beat_id: beat.id,
                beat_name: beat.name.clone(),
                beat_objective: beat.objective.clone(),
                beat_role: beat.role,
                pages_in_beat: state.pages_in_current_beat,
            },
            _ => Self::Unstructured,
        }
    }
}

/// Inputs shared by every stage of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Story being continued
    pub story_id: StoryId,
    /// Page being generated
    pub page_id: PageId,
    /// `None` for the opening page
    pub parent_page_id: Option<PageId>,
    /// Choice the reader took on the parent page
    pub selected_choice: Option<String>,
    /// Story premise and tone
    pub seed: StorySeed,
    /// Beat the page should play
    pub active_beat: ActiveBeatSnapshot,
    /// Advisory carried over from the parent page
    pub pacing_nudge: Option<String>,
    /// Parent page prose
    pub previous_narrative: Option<String>,
    /// Agendas as of the parent page
    pub npc_agendas: Vec<NpcAgenda>,
}

/// Why the previous attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFailureReason {
    /// Machine-readable diagnostic code
    pub code: String,
    /// Plan field the diagnostic points at
    pub field: Option<String>,
    /// Human-readable explanation
    pub message: String,
}

impl From<&ReconciliationDiagnostic> for ReconciliationFailureReason {
    fn from(diagnostic: &ReconciliationDiagnostic) -> Self {
        Self {
            code: diagnostic.code.clone(),
            field: diagnostic.field.clone(),
            message: diagnostic.message.clone(),
        }
    }
}

/// Planner input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    /// 1-based attempt number
    pub attempt: u32,
    /// Empty on the first attempt
    pub failure_reasons: Vec<ReconciliationFailureReason>,
}

/// One declared change to tracked story state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateIntent {
    /// e.g. `inventory`, `health`, `canon`
    pub category: String,
    /// e.g. `add`, `remove`
    pub operation: String,
    /// What changes, in prose
    pub text: String,
}

/// Planner output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePlan {
    /// What the scene should accomplish
    pub scene_intent: String,
    /// State changes the scene should make
    pub state_intents: Vec<StateIntent>,
    /// Choices to offer at the end of the page
    pub choice_intents: Vec<String>,
}

/// State accountant input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    /// Plan to account for
    pub plan: PagePlan,
}

/// State accountant output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAccounting {
    /// Declared changes the writer must realise
    pub intents: Vec<StateIntent>,
}

/// Writer input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    pub plan: PagePlan,
    pub accounting: StateAccounting,
}

/// Writer output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenPage {
    /// Page prose
    pub narrative_text: String,
    /// Choices offered to the reader
    pub choices: Vec<String>,
    /// Changes the prose actually makes
    pub state_changes: Vec<StateIntent>,
}

/// Reconciler input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    pub plan: PagePlan,
    pub accounting: StateAccounting,
    /// Page under review
    pub page: WrittenPage,
}

/// Mismatch between declared intents and the written page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationDiagnostic {
    /// Machine-readable code, e.g. `inventory_mismatch`
    pub code: String,
    /// Offending plan field
    #[serde(default)]
    pub field: Option<String>,
    /// Human-readable explanation
    pub message: String,
}

impl ReconciliationDiagnostic {
    /// Create new diagnostic
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            field: None,
            message: message.into(),
        }
    }

    /// With offending field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Reconciler output; empty diagnostics means the page is accepted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Problems found; empty when accepted
    pub diagnostics: Vec<ReconciliationDiagnostic>,
    /// State changes confirmed against the prose
    pub reconciled_changes: Vec<StateIntent>,
}

/// Analyst input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    /// Accepted page prose
    pub narrative_text: String,
    /// Structure of the branch's active version
    pub structure: StoryStructure,
    /// Parent page's structure state
    pub structure_state: AccumulatedStructureState,
}

/// Analyst's deviation verdict, as reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviationSignal {
    /// Narrative no longer fits the planned beats
    pub detected: bool,
    /// Why the remaining beats no longer fit
    pub reason: String,
    /// Raw ids; validated by `detect_deviation`
    pub invalidated_beat_ids: Vec<String>,
    /// What actually happened, for the rewrite
    pub narrative_summary: String,
}

/// Analyst's pacing verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSignal {
    /// Analyst thinks the story is dragging
    pub issue_detected: bool,
    /// Used verbatim as the pacing nudge
    pub reason: String,
}

/// Analyst output
///
/// `Default` is the fallback used when the analyst fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageEvaluation {
    /// Page concluded the active beat
    pub beat_concluded: bool,
    /// How the beat was resolved; required when concluded
    pub beat_resolution: String,
    pub deviation: DeviationSignal,
    pub pacing: PacingSignal,
}

/// Agenda resolver input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaContext {
    /// Shared page inputs
    pub generation: GenerationContext,
    /// Accepted page prose
    pub narrative_text: String,
    /// Agendas as of the parent page
    pub current_agendas: Vec<NpcAgenda>,
}

/// Rewrite input: what must be kept and why the rest is regenerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRewriteContext {
    pub story_id: StoryId,
    pub seed: StorySeed,
    /// Theme of the story's first structure; never rewritten
    pub original_theme: String,
    pub original_premise: String,
    /// Hard constraints, in beat order
    pub completed_beats: Vec<CompletedBeat>,
    /// What the narrative did instead
    pub narrative_summary: String,
    pub deviation_reason: String,
    /// Beats the narrative made impossible
    pub invalidated_beat_ids: Vec<BeatId>,
    /// 0-based position at the deviation; earlier acts are closed
    pub current_act_index: usize,
    pub current_beat_index: usize,
    pub pacing_budget: PacingBudget,
}
