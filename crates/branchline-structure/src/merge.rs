//! Preserved-beat extraction and structure merge
//!
//! A rewrite regenerates only unconcluded structure. Concluded beats are
//! extracted from the current version, handed to the generator as hard
//! constraints, and merged back verbatim ahead of the regenerated beats.

use crate::error::StructureError;
use crate::factory::{validate_outline, StructureGenerationResult};
use crate::progression::AccumulatedStructureState;
use crate::types::{BeatDraft, BeatId, BeatRole, EscalationType, StoryStructure, ACT_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Concluded beat carried into a rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedBeat {
    /// Beat id in the version it was concluded in
    pub id: BeatId,
    /// Short label
    pub name: String,
    /// What happened
    pub description: String,
    /// What the beat had to accomplish
    pub objective: String,
    /// Dramatic role
    pub role: BeatRole,
    /// How it was resolved
    pub resolution: String,
    /// Escalation flavour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_type: Option<EscalationType>,
    /// Suggested angles of approach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approach_vectors: Vec<String>,
}

impl CompletedBeat {
    fn to_draft(&self) -> BeatDraft {
        BeatDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            objective: self.objective.clone(),
            role: self.role,
            escalation_type: self.escalation_type,
            approach_vectors: self.approach_vectors.clone(),
        }
    }
}

/// Inconsistency found while extracting concluded beats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionWarning {
    /// Progression references a beat the structure lacks
    UnknownBeat(BeatId),
    /// Beat is concluded but has no resolution text
    MissingResolution(BeatId),
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBeat(id) => write!(f, "concluded beat {id} not found in structure"),
            Self::MissingResolution(id) => write!(f, "concluded beat {id} has no resolution"),
        }
    }
}

/// Concluded beats plus anything odd found on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedBeatExtraction {
    /// Concluded beats in beat order
    pub beats: Vec<CompletedBeat>,
    /// Inconsistencies; extraction still succeeds
    pub warnings: Vec<ExtractionWarning>,
}

/// Collect every concluded beat of `state` from `structure`, in beat order
#[must_use]
pub fn extract_completed_beats(
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
) -> CompletedBeatExtraction {
    let mut extraction = CompletedBeatExtraction::default();

    for id in state.concluded_beat_ids() {
        let Some(beat) = structure.beat(id) else {
            extraction.warnings.push(ExtractionWarning::UnknownBeat(id));
            continue;
        };
        let resolution = state
            .beat_progressions
            .get(&id)
            .and_then(|p| p.resolution.clone());
        if resolution.is_none() {
            extraction.warnings.push(ExtractionWarning::MissingResolution(id));
        }
        extraction.beats.push(CompletedBeat {
            id,
            name: beat.name.clone(),
            description: beat.description.clone(),
            objective: beat.objective.clone(),
            role: beat.role,
            resolution: resolution.unwrap_or_default(),
            escalation_type: beat.escalation_type,
            approach_vectors: beat.approach_vectors.clone(),
        });
    }

    extraction
}

/// Merge preserved beats with a regenerated outline
///
/// Per act: preserved beats first in original order, then regenerated beats
/// whose `(description, objective)` has not been placed yet. Acts before
/// `current_act_index` are closed and keep only their preserved beats, so the
/// story position never moves back into an earlier act. Beats are renumbered
/// contiguously. The theme is always `original_theme`.
///
/// # Errors
/// - `StructureError::ActCount` / `BeatCount` / `EmptyField` for a malformed
///   regenerated outline
/// - `StructureError::PreservedBeatOutOfRange` for a preserved beat past act 3
/// - `StructureError::EmptyAct` if an act ends up with no beats
pub fn merge_preserved_with_regenerated(
    preserved: &[CompletedBeat],
    regenerated: &StructureGenerationResult,
    original_theme: &str,
    current_act_index: usize,
) -> Result<StoryStructure, StructureError> {
    validate_outline(regenerated, 0)?;
    if let Some(stray) = preserved
        .iter()
        .find(|b| b.id.act_number() as usize > ACT_COUNT)
    {
        return Err(StructureError::PreservedBeatOutOfRange(stray.id));
    }

    let mut placed: HashSet<(String, String)> = preserved
        .iter()
        .map(|b| (b.description.clone(), b.objective.clone()))
        .collect();

    let acts = regenerated
        .acts
        .iter()
        .enumerate()
        .map(|(act_index, generated)| {
            let mut kept: Vec<&CompletedBeat> = preserved
                .iter()
                .filter(|b| b.id.indices().0 == act_index)
                .collect();
            kept.sort_by_key(|b| b.id);

            let mut beats: Vec<BeatDraft> = kept.iter().map(|b| b.to_draft()).collect();
            let open = act_index >= current_act_index;
            for beat in generated.beats.iter().filter(|_| open) {
                let draft = beat.to_draft();
                if placed.insert((draft.description.clone(), draft.objective.clone())) {
                    beats.push(draft);
                }
            }
            generated.to_draft_with(beats)
        })
        .collect();

    StoryStructure::assemble(
        original_theme,
        regenerated.premise.trim(),
        regenerated.pacing_budget,
        acts,
    )
}

/// Whether every concluded beat survived a rewrite unchanged
///
/// False if any concluded beat is missing from either structure or differs
/// in name, description, objective or role.
#[must_use]
pub fn validate_preserved_beats(
    original: &StoryStructure,
    rewritten: &StoryStructure,
    state: &AccumulatedStructureState,
) -> bool {
    state.concluded_beat_ids().into_iter().all(|id| {
        match (original.beat(id), rewritten.beat(id)) {
            (Some(before), Some(after)) => {
                before.name == after.name
                    && before.description == after.description
                    && before.objective == after.objective
                    && before.role == after.role
            }
            _ => false,
        }
    })
}
