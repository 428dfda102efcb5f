//! Structure factory
//!
//! Converts a raw generated outline into the canonical act/beat tree.

use crate::error::StructureError;
use crate::types::{
    ActDraft, BeatDraft, BeatRole, EscalationType, PacingBudget, StoryStructure, ACT_COUNT,
    MAX_BEATS_PER_ACT, MIN_BEATS_PER_ACT,
};
use serde::{Deserialize, Serialize};

/// Words kept when a beat name has to be derived from its description
const DERIVED_NAME_WORDS: usize = 6;

/// Outline returned by the structure generation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureGenerationResult {
    /// Thematic premise
    pub overall_theme: String,
    /// One-line premise
    pub premise: String,
    /// Pacing budget
    #[serde(default)]
    pub pacing_budget: PacingBudget,
    /// Acts in order
    pub acts: Vec<GeneratedAct>,
}

/// Generated act
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAct {
    /// Act title
    pub name: String,
    /// What the act drives toward
    pub objective: String,
    /// What is at risk
    pub stakes: String,
    /// Condition that opens the act
    pub entry_condition: String,
    /// Beats in order
    pub beats: Vec<GeneratedBeat>,
}

/// Generated beat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedBeat {
    /// Short label; derived from the description when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What happens
    pub description: String,
    /// What the beat must accomplish
    pub objective: String,
    /// Dramatic role
    pub role: BeatRole,
    /// Escalation flavour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_type: Option<EscalationType>,
    /// Suggested angles of approach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approach_vectors: Vec<String>,
}

impl GeneratedBeat {
    /// Create new generated beat
    #[inline]
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        objective: impl Into<String>,
        role: BeatRole,
    ) -> Self {
        Self {
            name: None,
            description: description.into(),
            objective: objective.into(),
            role,
            escalation_type: None,
            approach_vectors: Vec::new(),
        }
    }

    /// With explicit name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn to_draft(&self) -> BeatDraft {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| derive_beat_name(&self.description), str::to_string);
        BeatDraft {
            name,
            description: self.description.trim().to_string(),
            objective: self.objective.trim().to_string(),
            role: self.role,
            escalation_type: self.escalation_type,
            approach_vectors: self.approach_vectors.clone(),
        }
    }
}

impl GeneratedAct {
    pub(crate) fn to_draft_with(&self, beats: Vec<BeatDraft>) -> ActDraft {
        ActDraft {
            name: self.name.trim().to_string(),
            objective: self.objective.trim().to_string(),
            stakes: self.stakes.trim().to_string(),
            entry_condition: self.entry_condition.trim().to_string(),
            beats,
        }
    }
}

/// Build the canonical structure from a generated outline
///
/// # Errors
/// - `StructureError::ActCount` unless there are exactly three acts
/// - `StructureError::BeatCount` unless every act has 2–4 beats
/// - `StructureError::EmptyField` for a blank theme, act name, act objective,
///   beat description or beat objective
pub fn create_story_structure(
    result: &StructureGenerationResult,
) -> Result<StoryStructure, StructureError> {
    validate_outline(result, MIN_BEATS_PER_ACT)?;
    require("overall_theme", &result.overall_theme, || "structure".to_string())?;

    let acts = result
        .acts
        .iter()
        .map(|act| act.to_draft_with(act.beats.iter().map(GeneratedBeat::to_draft).collect()))
        .collect();

    StoryStructure::assemble(
        result.overall_theme.trim(),
        result.premise.trim(),
        result.pacing_budget,
        acts,
    )
}

/// Shape checks shared by generated and rewritten outlines
///
/// Rewritten outlines only cover unconcluded work, so their per-act minimum
/// is supplied by the caller. Their theme is discarded and not checked here.
pub(crate) fn validate_outline(
    result: &StructureGenerationResult,
    min_beats: usize,
) -> Result<(), StructureError> {
    if result.acts.len() != ACT_COUNT {
        return Err(StructureError::ActCount {
            expected: ACT_COUNT,
            found: result.acts.len(),
        });
    }

    for (a, act) in result.acts.iter().enumerate() {
        let act_number = a + 1;
        if !(min_beats..=MAX_BEATS_PER_ACT).contains(&act.beats.len()) {
            return Err(StructureError::BeatCount {
                act: act_number,
                min: min_beats,
                max: MAX_BEATS_PER_ACT,
                found: act.beats.len(),
            });
        }
        require("name", &act.name, || format!("act {act_number}"))?;
        require("objective", &act.objective, || format!("act {act_number}"))?;

        for (b, beat) in act.beats.iter().enumerate() {
            let location = || format!("beat {act_number}.{}", b + 1);
            require("description", &beat.description, location)?;
            require("objective", &beat.objective, location)?;
        }
    }
    Ok(())
}

fn require(
    field: &'static str,
    value: &str,
    location: impl Fn() -> String,
) -> Result<(), StructureError> {
    if value.trim().is_empty() {
        return Err(StructureError::EmptyField {
            field,
            location: location(),
        });
    }
    Ok(())
}

fn derive_beat_name(description: &str) -> String {
    let words: Vec<&str> = description.split_whitespace().take(DERIVED_NAME_WORDS).collect();
    words
        .join(" ")
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}
