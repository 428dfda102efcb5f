//! Page engine
//!
//! The façade a host application drives:
//! - Starts structured stories
//! - Generates one page per call, continuing a parent page's branch
//! - Applies beat progression, deviation rewrites and pacing in one step
//!
//! Nothing is committed until the whole cycle succeeds; the returned
//! [`PageOutcome`] carries the new story record and page for the caller to
//! persist.

use crate::config::EngineConfig;
use crate::deviation::{
    detect_deviation, handle_deviation_if_detected, DeviationInfo, DeviationInput,
};
use crate::error::EngineError;
use crate::pipeline::{
    generate_with_reconciliation_retry, GenerationMetrics, RetryOptions, StageObserver,
};
use crate::rewriter::StructureRewriter;
use crate::service::{
    ActiveBeatSnapshot, AgendaContext, EvaluationContext, GenerationContext, PageEvaluation,
    PageService, StructureService,
};
use branchline_structure::{
    apply_structure_progression, assess_pacing, create_initial_structure_state,
    create_initial_version, create_story_structure, realign_state_after_rewrite,
    resolve_active_structure_version, validate_generation_preconditions, AccumulatedStructureState,
    NpcAgenda, Page, PageId, Story, StorySeed, VersionIdGenerator, VersionedStoryStructure,
};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// What to generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Id for the new page, assigned by the caller
    pub page_id: PageId,
    /// Choice taken on the parent page
    pub selected_choice: Option<String>,
}

impl PageRequest {
    /// Create new request
    #[inline]
    #[must_use]
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            selected_choice: None,
        }
    }

    /// With selected choice
    #[inline]
    #[must_use]
    pub fn with_choice(mut self, choice: impl Into<String>) -> Self {
        self.selected_choice = Some(choice.into());
        self
    }
}

/// Structure movement caused by the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressionReport {
    /// Page moved the story into a new act
    pub act_advanced: bool,
    /// Page concluded a beat and activated the next
    pub beat_advanced: bool,
    /// Page concluded the final beat
    pub is_complete: bool,
}

/// Result of one page generation
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    /// Story record; differs from the input only after a rewrite
    pub story: Story,
    /// New page, ready to persist
    pub page: Page,
    /// Version the page is tagged with
    pub active_version: Option<VersionedStoryStructure>,
    pub progression: ProgressionReport,
    /// Set when the page triggered a rewrite
    pub deviation: Option<DeviationInfo>,
    pub metrics: GenerationMetrics,
}

/// Page generation engine
#[derive(Clone)]
pub struct PageEngine {
    config: EngineConfig,
    structures: Arc<dyn StructureService>,
    pages: Arc<dyn PageService>,
    rewriter: StructureRewriter,
    version_ids: Arc<VersionIdGenerator>,
    observer: Option<StageObserver>,
}

impl PageEngine {
    /// Create new engine
    #[must_use]
    pub fn new(
        config: EngineConfig,
        structures: Arc<dyn StructureService>,
        pages: Arc<dyn PageService>,
    ) -> Self {
        Self {
            config,
            rewriter: StructureRewriter::new(Arc::clone(&structures)),
            structures,
            pages,
            version_ids: Arc::new(VersionIdGenerator::new()),
            observer: None,
        }
    }

    /// With a shared version id generator
    #[inline]
    #[must_use]
    pub fn with_version_ids(mut self, version_ids: Arc<VersionIdGenerator>) -> Self {
        self.version_ids = version_ids;
        self
    }

    /// With stage observer
    #[inline]
    #[must_use]
    pub fn with_stage_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a structured story
    ///
    /// # Errors
    /// - `EngineError::Service` if outline generation fails
    /// - `EngineError::Structure` if the outline violates the structure shape
    pub async fn start_story(
        &self,
        title: impl Into<String>,
        seed: StorySeed,
    ) -> Result<Story, EngineError> {
        let mut story = Story::new(title, seed);
        let span = tracing::info_span!("start_story", story_id = %story.id);

        async {
            let outline = self.structures.generate_structure(&story.seed).await?;
            let structure = create_story_structure(&outline).map_err(|e| {
                tracing::error!(error = %e, "generated outline rejected");
                e
            })?;
            let version = create_initial_version(&self.version_ids, structure.clone());
            tracing::info!(
                version = %version.id,
                beats = structure.total_beats(),
                "story structure created"
            );

            story.structure = Some(structure);
            Ok::<_, EngineError>(story.with_structure_version(version)?)
        }
        .instrument(span)
        .await
    }

    /// Generate the page following `parent` (or the opening page)
    ///
    /// # Errors
    /// - `EngineError::Timeout` if `page_timeout_secs` elapses
    /// - `EngineError::Version` on failed preconditions or, in strict mode,
    ///   unresolved parent versions
    /// - `EngineError::Pipeline` on stage or reconciliation failure
    /// - `EngineError::Deviation` if a required rewrite fails
    /// - `EngineError::Progression` on a progression contract violation
    pub async fn generate_page(
        &self,
        story: &Story,
        parent: Option<&Page>,
        request: PageRequest,
    ) -> Result<PageOutcome, EngineError> {
        let span = tracing::info_span!(
            "generate_page",
            story_id = %story.id,
            page_id = %request.page_id,
        );
        let cycle = self.run_page(story, parent, request).instrument(span);

        match self.config.page_timeout() {
            Some(limit) => tokio::time::timeout(limit, cycle).await.map_err(|_| {
                tracing::error!(secs = limit.as_secs(), "page generation timed out");
                EngineError::Timeout {
                    duration_secs: limit.as_secs(),
                }
            })?,
            None => cycle.await,
        }
    }

    async fn run_page(
        &self,
        story: &Story,
        parent: Option<&Page>,
        request: PageRequest,
    ) -> Result<PageOutcome, EngineError> {
        validate_generation_preconditions(story, parent)?;

        let resolved =
            resolve_active_structure_version(story, parent, self.config.resolution_mode())?;
        let mut parent_state = parent.map(|p| p.structure_state.clone()).unwrap_or_default();
        let active_version = match resolved {
            Some(resolved) => {
                if resolved.source.is_fallback() {
                    let requested = parent
                        .and_then(|p| p.structure_version_id)
                        .map(|id| id.to_string());
                    tracing::warn!(
                        ?requested,
                        fallback = %resolved.version.id,
                        "parent structure version not found, using latest"
                    );
                    parent_state =
                        realign_state_after_rewrite(&resolved.version.structure, &parent_state);
                } else if parent.is_none() {
                    parent_state = create_initial_structure_state(&resolved.version.structure);
                }
                Some(resolved.version.clone())
            }
            None => None,
        };
        tracing::debug!(
            version = ?active_version.as_ref().map(|v| v.id.to_string()),
            "structure version resolved"
        );

        let generation = GenerationContext {
            story_id: story.id,
            page_id: request.page_id,
            parent_page_id: parent.map(|p| p.id),
            selected_choice: request.selected_choice,
            seed: story.seed.clone(),
            active_beat: ActiveBeatSnapshot::capture(
                active_version.as_ref().map(|v| &v.structure),
                &parent_state,
            ),
            pacing_nudge: parent_state.pacing_nudge.clone(),
            previous_narrative: parent.map(|p| p.narrative_text.clone()),
            npc_agendas: parent.map(|p| p.npc_agendas.clone()).unwrap_or_default(),
        };

        let options = RetryOptions {
            max_attempts: self.config.generation_attempts(),
            observer: self.observer.clone(),
        };
        let generated =
            generate_with_reconciliation_retry(self.pages.as_ref(), &generation, &options).await?;
        let narrative_text = generated.page.narrative_text.clone();

        let mut story = story.clone();
        let mut progression = ProgressionReport::default();
        let mut deviation = None;
        let mut structure_state = AccumulatedStructureState::default();
        let mut active_version = active_version;

        if let Some(version) = active_version.take() {
            let evaluation = self
                .evaluate(&generation, &narrative_text, &version, &parent_state)
                .await;

            let detection =
                detect_deviation(&evaluation.deviation, &version.structure, &parent_state);
            for warning in &detection.warnings {
                tracing::warn!(%warning, "deviation signal");
            }
            let handled = handle_deviation_if_detected(
                DeviationInput {
                    deviation: &detection.result,
                    story: &story,
                    active_version: Some(&version),
                    structure_state: &parent_state,
                    page_id: request.page_id,
                },
                &self.rewriter,
                &self.version_ids,
            )
            .await?;
            story = handled.story;
            deviation = handled.deviation_info;
            active_version = handled.active_version;
            structure_state = handled.structure_state;

            // Progression runs on the version the page ends on. After a
            // rewrite that is the realigned state of the new structure.
            let (beat_concluded, resolution) = conclusion(&evaluation, &structure_state);
            if let Some(current) = &active_version {
                let step = apply_structure_progression(
                    &current.structure,
                    &structure_state,
                    beat_concluded,
                    resolution,
                )?;
                progression = ProgressionReport {
                    act_advanced: step.act_advanced,
                    beat_advanced: step.beat_advanced,
                    is_complete: step.is_complete,
                };
                if step.is_complete {
                    tracing::info!("final beat concluded");
                } else if step.beat_advanced {
                    tracing::info!(
                        act_advanced = step.act_advanced,
                        beat = ?step.updated_state.active_beat_id().map(|id| id.to_string()),
                        "beat advanced"
                    );
                }
                structure_state = step.updated_state;

                if deviation.is_none() && !beat_concluded {
                    let analyst = evaluation
                        .pacing
                        .issue_detected
                        .then_some(evaluation.pacing.reason.as_str());
                    structure_state.pacing_nudge = assess_pacing(
                        &current.structure,
                        &structure_state,
                        analyst,
                        self.config.pacing.nudge_after_pages,
                    );
                    if let Some(nudge) = &structure_state.pacing_nudge {
                        tracing::debug!(nudge = %nudge, "pacing nudge set");
                    }
                }
            }
        }

        let npc_agendas = self
            .resolve_agendas(&generation, &narrative_text, parent)
            .await;

        let page = Page {
            id: request.page_id,
            parent_page_id: parent.map(|p| p.id),
            narrative_text,
            choices: generated.page.choices,
            structure_version_id: active_version.as_ref().map(|v| v.id),
            structure_state,
            npc_agendas,
        };
        tracing::info!(
            attempts = generated.metrics.attempts,
            rewritten = deviation.is_some(),
            "page generated"
        );

        Ok(PageOutcome {
            story,
            page,
            active_version,
            progression,
            deviation,
            metrics: generated.metrics,
        })
    }

    async fn evaluate(
        &self,
        generation: &GenerationContext,
        narrative_text: &str,
        version: &VersionedStoryStructure,
        state: &AccumulatedStructureState,
    ) -> PageEvaluation {
        let context = EvaluationContext {
            generation: generation.clone(),
            narrative_text: narrative_text.to_string(),
            structure: version.structure.clone(),
            structure_state: state.clone(),
        };
        match self.pages.evaluate(&context).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::warn!(error = %e, "evaluation failed, assuming no progress");
                PageEvaluation::default()
            }
        }
    }

    async fn resolve_agendas(
        &self,
        generation: &GenerationContext,
        narrative_text: &str,
        parent: Option<&Page>,
    ) -> Vec<NpcAgenda> {
        let current = parent.map(|p| p.npc_agendas.clone()).unwrap_or_default();
        let context = AgendaContext {
            generation: generation.clone(),
            narrative_text: narrative_text.to_string(),
            current_agendas: current.clone(),
        };
        match self.pages.resolve_agendas(&context).await {
            Ok(agendas) => agendas,
            Err(e) => {
                tracing::warn!(error = %e, "agenda resolution failed, keeping parent agendas");
                current
            }
        }
    }
}

impl fmt::Debug for PageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEngine")
            .field("config", &self.config)
            .field("version_ids", &self.version_ids)
            .finish_non_exhaustive()
    }
}

/// Whether the analyst's verdict can conclude the active beat
///
/// A terminal state has nothing left to conclude and a blank resolution
/// cannot be recorded; both are treated as no progress.
fn conclusion<'a>(
    evaluation: &'a PageEvaluation,
    state: &AccumulatedStructureState,
) -> (bool, &'a str) {
    if !evaluation.beat_concluded {
        return (false, "");
    }
    if state.is_story_complete() {
        tracing::debug!("beat conclusion reported after the story completed");
        return (false, "");
    }
    let resolution = evaluation.beat_resolution.trim();
    if resolution.is_empty() {
        tracing::warn!("beat conclusion reported without a resolution, ignoring");
        return (false, "");
    }
    (true, resolution)
}
