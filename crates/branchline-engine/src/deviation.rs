//! Deviation detection and handling
//!
//! The analyst may report that the narrative has left the planned path. A
//! validated [`DeviationResult`] drives a structure rewrite, which becomes a
//! new version whose predecessor is the branch's active version.

use crate::error::DeviationError;
use crate::rewriter::StructureRewriter;
use crate::service::{DeviationSignal, StructureRewriteContext};
use branchline_structure::{
    create_rewritten_version, extract_completed_beats, realign_state_after_rewrite,
    AccumulatedStructureState, BeatId, CompletedBeat, PageId, Story, StoryStructure,
    VersionIdGenerator, VersionedStoryStructure,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated deviation payload
///
/// Always invalidates at least one beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatDeviation {
    reason: String,
    invalidated_beat_ids: Vec<BeatId>,
    narrative_summary: String,
}

impl BeatDeviation {
    /// Create new deviation
    ///
    /// # Errors
    /// `DeviationError::EmptyInvalidatedBeats` if `invalidated_beat_ids` is empty
    pub fn new(
        reason: impl Into<String>,
        invalidated_beat_ids: Vec<BeatId>,
        narrative_summary: impl Into<String>,
    ) -> Result<Self, DeviationError> {
        if invalidated_beat_ids.is_empty() {
            return Err(DeviationError::EmptyInvalidatedBeats);
        }
        Ok(Self {
            reason: reason.into(),
            invalidated_beat_ids,
            narrative_summary: narrative_summary.into(),
        })
    }

    /// Why the plan no longer holds
    #[inline]
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Beats the narrative made impossible
    #[inline]
    #[must_use]
    pub fn invalidated_beat_ids(&self) -> &[BeatId] {
        &self.invalidated_beat_ids
    }

    /// What actually happened
    #[inline]
    #[must_use]
    pub fn narrative_summary(&self) -> &str {
        &self.narrative_summary
    }
}

/// Outcome of deviation detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviationResult {
    NoDeviation,
    Deviation(BeatDeviation),
}

impl DeviationResult {
    /// Deviation payload, if any
    #[inline]
    #[must_use]
    pub fn as_deviation(&self) -> Option<&BeatDeviation> {
        match self {
            Self::Deviation(d) => Some(d),
            Self::NoDeviation => None,
        }
    }
}

/// Invalidated id dropped during detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviationWarning {
    /// Not of the form `<act>.<beat>`
    InvalidBeatId(String),
    /// Not present in the structure
    UnknownBeat(BeatId),
    /// Already concluded; concluded work cannot be invalidated
    ConcludedBeat(BeatId),
    /// Deviation flagged with nothing left to invalidate
    NothingInvalidated,
}

impl fmt::Display for DeviationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBeatId(raw) => write!(f, "invalid beat id {raw:?}"),
            Self::UnknownBeat(id) => write!(f, "beat {id} is not in the structure"),
            Self::ConcludedBeat(id) => write!(f, "beat {id} is already concluded"),
            Self::NothingInvalidated => {
                f.write_str("deviation flagged without invalidatable beats")
            }
        }
    }
}

/// Detection result plus dropped ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviationDetection {
    /// Validated deviation, or `NoDeviation`
    pub result: DeviationResult,
    /// Ids dropped from the signal, and why
    pub warnings: Vec<DeviationWarning>,
}

/// Validate the analyst's deviation signal against the branch's structure
///
/// Unknown, malformed and concluded ids are dropped and reported; duplicates
/// collapse. A flagged deviation left with no ids is `NoDeviation`.
#[must_use]
pub fn detect_deviation(
    signal: &DeviationSignal,
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
) -> DeviationDetection {
    let mut warnings = Vec::new();
    if !signal.detected {
        return DeviationDetection {
            result: DeviationResult::NoDeviation,
            warnings,
        };
    }

    let mut invalidated: Vec<BeatId> = Vec::new();
    for raw in &signal.invalidated_beat_ids {
        let Ok(id) = raw.trim().parse::<BeatId>() else {
            warnings.push(DeviationWarning::InvalidBeatId(raw.clone()));
            continue;
        };
        if structure.beat(id).is_none() {
            warnings.push(DeviationWarning::UnknownBeat(id));
        } else if state.is_concluded(id) {
            warnings.push(DeviationWarning::ConcludedBeat(id));
        } else {
            invalidated.push(id);
        }
    }
    invalidated.sort_unstable();
    invalidated.dedup();

    let built = BeatDeviation::new(
        signal.reason.trim(),
        invalidated,
        signal.narrative_summary.trim(),
    );
    let result = match built {
        Ok(deviation) => DeviationResult::Deviation(deviation),
        Err(_) => {
            warnings.push(DeviationWarning::NothingInvalidated);
            DeviationResult::NoDeviation
        }
    };
    DeviationDetection { result, warnings }
}

/// Summary of a handled deviation, reported with the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationInfo {
    /// Always true when reported
    pub detected: bool,
    /// Analyst's reason, trimmed
    pub reason: String,
    /// Validated invalidated beats
    pub invalidated_beat_count: usize,
}

/// Build what the structure service needs for a rewrite
#[must_use]
pub fn build_rewrite_context(
    story: &Story,
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
    deviation: &BeatDeviation,
    completed_beats: Vec<CompletedBeat>,
) -> StructureRewriteContext {
    let original = story.structure.as_ref().unwrap_or(structure);
    StructureRewriteContext {
        story_id: story.id,
        seed: story.seed.clone(),
        original_theme: original.overall_theme.clone(),
        original_premise: original.premise.clone(),
        completed_beats,
        narrative_summary: deviation.narrative_summary().to_string(),
        deviation_reason: deviation.reason().to_string(),
        invalidated_beat_ids: deviation.invalidated_beat_ids().to_vec(),
        current_act_index: state.current_act_index,
        current_beat_index: state.current_beat_index,
        pacing_budget: structure.pacing_budget,
    }
}

/// Inputs to [`handle_deviation_if_detected`]
#[derive(Debug, Clone, Copy)]
pub struct DeviationInput<'a> {
    pub deviation: &'a DeviationResult,
    pub story: &'a Story,
    /// Version the branch is on
    pub active_version: Option<&'a VersionedStoryStructure>,
    /// Parent page's state; concluded beats here are preserved
    pub structure_state: &'a AccumulatedStructureState,
    /// Page that triggered the rewrite
    pub page_id: PageId,
}

/// What the page continues with after deviation handling
#[derive(Debug, Clone, PartialEq)]
pub struct DeviationOutcome {
    /// Story with the new version appended after a rewrite
    pub story: Story,
    pub active_version: Option<VersionedStoryStructure>,
    /// Realigned after a rewrite, the input state otherwise
    pub structure_state: AccumulatedStructureState,
    /// `None` when nothing was handled
    pub deviation_info: Option<DeviationInfo>,
}

/// Rewrite the structure if the input carries an actionable deviation
///
/// Actionable means: the story has a structure, the branch has an active
/// version and the result is a deviation. Anything else passes the inputs
/// through unchanged.
///
/// # Errors
/// - `DeviationError::Rewrite` if the rewrite fails
/// - `DeviationError::Version` if the new version cannot be recorded
pub async fn handle_deviation_if_detected(
    input: DeviationInput<'_>,
    rewriter: &StructureRewriter,
    version_ids: &VersionIdGenerator,
) -> Result<DeviationOutcome, DeviationError> {
    let passthrough = || DeviationOutcome {
        story: input.story.clone(),
        active_version: input.active_version.cloned(),
        structure_state: input.structure_state.clone(),
        deviation_info: None,
    };

    let (Some(active), Some(deviation)) =
        (input.active_version, input.deviation.as_deviation())
    else {
        return Ok(passthrough());
    };
    if !input.story.has_structure() {
        return Ok(passthrough());
    }

    tracing::info!(
        version = %active.id,
        reason = deviation.reason(),
        invalidated = ?deviation.invalidated_beat_ids(),
        "deviation detected"
    );

    let state = input.structure_state;
    let extraction = extract_completed_beats(&active.structure, state);
    for warning in &extraction.warnings {
        tracing::warn!(%warning, "completed beat extraction");
    }

    let context = build_rewrite_context(
        input.story,
        &active.structure,
        state,
        deviation,
        extraction.beats,
    );
    let outcome = rewriter.rewrite(&context, &active.structure, state).await?;

    let version = create_rewritten_version(
        version_ids,
        active,
        outcome.structure,
        outcome.preserved_beat_ids,
        deviation.reason(),
        input.page_id,
    );
    let story = input.story.with_structure_version(version.clone())?;
    let structure_state = realign_state_after_rewrite(&version.structure, state);

    tracing::info!(
        previous = %active.id,
        version = %version.id,
        preserved = version.preserved_beat_ids.len(),
        "structure rewritten"
    );

    Ok(DeviationOutcome {
        story,
        active_version: Some(version),
        structure_state,
        deviation_info: Some(DeviationInfo {
            detected: true,
            reason: deviation.reason().to_string(),
            invalidated_beat_count: deviation.invalidated_beat_ids().len(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchline_structure::{
        advance_structure_state, create_initial_structure_state, ActDraft, BeatDraft, BeatRole,
        PacingBudget,
    };
    use pretty_assertions::assert_eq;

    fn structure() -> StoryStructure {
        let acts = (1..=3)
            .map(|a| ActDraft {
                name: format!("Act {a}"),
                objective: "o".to_string(),
                stakes: "s".to_string(),
                entry_condition: "e".to_string(),
                beats: (1..=2)
                    .map(|b| {
                        BeatDraft::new(
                            format!("b{a}.{b}"),
                            format!("d{a}.{b}"),
                            "o",
                            BeatRole::Escalation,
                        )
                    })
                    .collect(),
            })
            .collect();
        StoryStructure::assemble("t", "p", PacingBudget::default(), acts).unwrap()
    }

    fn signal(ids: &[&str]) -> DeviationSignal {
        DeviationSignal {
            detected: true,
            reason: " the bridge collapsed ".to_string(),
            invalidated_beat_ids: ids.iter().map(|s| (*s).to_string()).collect(),
            narrative_summary: "the party is stranded".to_string(),
        }
    }

    fn id(raw: &str) -> BeatId {
        raw.parse().unwrap()
    }

    #[test]
    fn empty_deviation_cannot_be_built() {
        assert_eq!(
            BeatDeviation::new("r", Vec::new(), "s"),
            Err(DeviationError::EmptyInvalidatedBeats)
        );
    }

    #[test]
    fn unflagged_signal_is_no_deviation() {
        let s = structure();
        let state = create_initial_structure_state(&s);
        let detection = detect_deviation(&DeviationSignal::default(), &s, &state);
        assert_eq!(detection.result, DeviationResult::NoDeviation);
        assert!(detection.warnings.is_empty());
    }

    #[test]
    fn drops_bad_ids_with_warnings() {
        let s = structure();
        let state = create_initial_structure_state(&s);
        let state = advance_structure_state(&s, &state, "crossed").unwrap().updated_state;

        let raw = signal(&["1.1", "2.2", "9.1", "two", "2.2", "1.2"]);
        let detection = detect_deviation(&raw, &s, &state);
        let deviation = detection.result.as_deviation().unwrap();
        assert_eq!(deviation.invalidated_beat_ids(), &[id("1.2"), id("2.2")]);
        assert_eq!(deviation.reason(), "the bridge collapsed");
        assert_eq!(
            detection.warnings,
            vec![
                DeviationWarning::ConcludedBeat(id("1.1")),
                DeviationWarning::UnknownBeat(id("9.1")),
                DeviationWarning::InvalidBeatId("two".to_string()),
            ]
        );
    }

    #[test]
    fn only_concluded_ids_is_no_deviation() {
        let s = structure();
        let state = create_initial_structure_state(&s);
        let state = advance_structure_state(&s, &state, "crossed").unwrap().updated_state;

        let detection = detect_deviation(&signal(&["1.1"]), &s, &state);
        assert_eq!(detection.result, DeviationResult::NoDeviation);
        assert_eq!(
            detection.warnings,
            vec![DeviationWarning::ConcludedBeat(id("1.1")), DeviationWarning::NothingInvalidated]
        );
    }

    #[test]
    fn rewrite_context_carries_constraints() {
        let s = structure();
        let state = create_initial_structure_state(&s);
        let state = advance_structure_state(&s, &state, "crossed").unwrap().updated_state;
        let mut story = Story::new("t", branchline_structure::StorySeed::new("c", "tone"));
        story.structure = Some(s.clone());

        let deviation = BeatDeviation::new("r", vec![id("2.1")], "summary").unwrap();
        let completed = extract_completed_beats(&s, &state).beats;
        let context = build_rewrite_context(&story, &s, &state, &deviation, completed);

        assert_eq!(context.original_theme, "t");
        assert_eq!(context.completed_beats.len(), 1);
        assert_eq!(context.completed_beats[0].resolution, "crossed");
        assert_eq!(context.current_beat_index, 1);
        assert_eq!(context.invalidated_beat_ids, vec![id("2.1")]);
    }
}
