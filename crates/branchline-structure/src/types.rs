//! Core structure types
//!
//! Defines the canonical act/beat tree:
//! - Beat identifiers (`<act>.<beat>`, 1-based)
//! - Beat roles and escalation metadata
//! - Acts, beats and the full story structure

use crate::error::StructureError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Acts in every generated structure
pub const ACT_COUNT: usize = 3;
/// Fewest beats a generated act may have
pub const MIN_BEATS_PER_ACT: usize = 2;
/// Most beats a generated act may have
pub const MAX_BEATS_PER_ACT: usize = 4;

static BEAT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)$").expect("beat id pattern compiles"));

/// Hierarchical beat identifier
///
/// Ordered by act number, then beat number, which is reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatId {
    act: u32,
    beat: u32,
}

impl BeatId {
    /// Build from 0-based act and beat indices
    #[inline]
    #[must_use]
    pub fn from_indices(act_index: usize, beat_index: usize) -> Self {
        Self {
            act: u32::try_from(act_index + 1).unwrap_or(u32::MAX),
            beat: u32::try_from(beat_index + 1).unwrap_or(u32::MAX),
        }
    }

    /// 1-based act number
    #[inline]
    #[must_use]
    pub fn act_number(&self) -> u32 {
        self.act
    }

    /// 1-based beat number within the act
    #[inline]
    #[must_use]
    pub fn beat_number(&self) -> u32 {
        self.beat
    }

    /// 0-based `(act_index, beat_index)`
    #[inline]
    #[must_use]
    pub fn indices(&self) -> (usize, usize) {
        ((self.act - 1) as usize, (self.beat - 1) as usize)
    }
}

impl fmt::Display for BeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.act, self.beat)
    }
}

impl FromStr for BeatId {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StructureError::InvalidBeatId(s.to_string());
        let caps = BEAT_ID_PATTERN.captures(s).ok_or_else(invalid)?;
        let act: u32 = caps[1].parse().map_err(|_| invalid())?;
        let beat: u32 = caps[2].parse().map_err(|_| invalid())?;
        if act == 0 || beat == 0 {
            return Err(invalid());
        }
        Ok(Self { act, beat })
    }
}

impl Serialize for BeatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BeatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a beat id into 0-based `(act_index, beat_index)`
///
/// # Errors
/// `StructureError::InvalidBeatId` unless the id is `<n>.<m>` with both ≥ 1
pub fn parse_beat_indices(beat_id: &str) -> Result<(usize, usize), StructureError> {
    beat_id.parse::<BeatId>().map(|id| id.indices())
}

/// Dramatic function of a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatRole {
    /// Establishes the situation
    Setup,
    /// Raises pressure
    Escalation,
    /// Changes the direction of the story
    TurningPoint,
    /// Pays off an act or the story
    Resolution,
}

/// How an escalation beat raises pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Danger grows
    ThreatEscalation,
    /// New information changes the picture
    RevelationShift,
    /// Success turns into setback
    ReversalOfFortune,
    /// Loyalties shift
    BetrayalOrAlliance,
    /// Something relied on is taken away
    ResourceOrCapabilityLoss,
    /// Progress demands a moral price
    MoralCompromise,
    /// Time or environment closes in
    TemporalOrEnvironmentalPressure,
    /// Problems compound each other
    ComplicationCascade,
    /// The protagonist must prove a skill
    CompetenceDemand,
}

/// Pacing budget for the whole story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingBudget {
    /// Fewest pages the story should take
    pub target_pages_min: u32,
    /// Most pages the story should take
    pub target_pages_max: u32,
}

impl Default for PacingBudget {
    fn default() -> Self {
        Self {
            target_pages_min: 15,
            target_pages_max: 40,
        }
    }
}

/// Smallest planned narrative unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    /// Stable hierarchical id
    pub id: BeatId,
    /// Short label
    pub name: String,
    /// What happens
    pub description: String,
    /// What the beat must accomplish
    pub objective: String,
    /// Dramatic role
    pub role: BeatRole,
    /// Escalation flavour, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_type: Option<EscalationType>,
    /// Suggested angles of approach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approach_vectors: Vec<String>,
}

/// Ordered group of beats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Act {
    /// 1-based act number as a string
    pub id: String,
    /// Act title
    pub name: String,
    /// What the act drives toward
    pub objective: String,
    /// What is at risk
    pub stakes: String,
    /// Condition that opens the act
    pub entry_condition: String,
    /// Beats in order
    pub beats: Vec<Beat>,
}

/// Canonical act/beat tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryStructure {
    /// Acts in order
    pub acts: Vec<Act>,
    /// Thematic premise, invariant across rewrites
    pub overall_theme: String,
    /// One-line premise
    pub premise: String,
    /// Pacing budget
    pub pacing_budget: PacingBudget,
}

/// Beat content before ids are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatDraft {
    /// Short label
    pub name: String,
    /// What happens
    pub description: String,
    /// What the beat must accomplish
    pub objective: String,
    /// Dramatic role
    pub role: BeatRole,
    /// Escalation flavour
    pub escalation_type: Option<EscalationType>,
    /// Suggested angles of approach
    pub approach_vectors: Vec<String>,
}

impl BeatDraft {
    /// Create new draft
    #[inline]
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        objective: impl Into<String>,
        role: BeatRole,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            objective: objective.into(),
            role,
            escalation_type: None,
            approach_vectors: Vec::new(),
        }
    }

    fn into_beat(self, id: BeatId) -> Beat {
        Beat {
            id,
            name: self.name,
            description: self.description,
            objective: self.objective,
            role: self.role,
            escalation_type: self.escalation_type,
            approach_vectors: self.approach_vectors,
        }
    }
}

impl From<&Beat> for BeatDraft {
    fn from(beat: &Beat) -> Self {
        Self {
            name: beat.name.clone(),
            description: beat.description.clone(),
            objective: beat.objective.clone(),
            role: beat.role,
            escalation_type: beat.escalation_type,
            approach_vectors: beat.approach_vectors.clone(),
        }
    }
}

/// Act content before ids are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActDraft {
    /// Act title
    pub name: String,
    /// What the act drives toward
    pub objective: String,
    /// What is at risk
    pub stakes: String,
    /// Condition that opens the act
    pub entry_condition: String,
    /// Beats in order
    pub beats: Vec<BeatDraft>,
}

impl StoryStructure {
    /// Assemble a structure, numbering acts and beats contiguously from 1
    ///
    /// # Errors
    /// `StructureError::EmptyAct` if any act has no beats
    pub fn assemble(
        overall_theme: impl Into<String>,
        premise: impl Into<String>,
        pacing_budget: PacingBudget,
        acts: Vec<ActDraft>,
    ) -> Result<Self, StructureError> {
        let acts = acts
            .into_iter()
            .enumerate()
            .map(|(act_index, draft)| {
                if draft.beats.is_empty() {
                    return Err(StructureError::EmptyAct { act: act_index + 1 });
                }
                let beats = draft
                    .beats
                    .into_iter()
                    .enumerate()
                    .map(|(beat_index, beat)| {
                        beat.into_beat(BeatId::from_indices(act_index, beat_index))
                    })
                    .collect();
                Ok(Act {
                    id: (act_index + 1).to_string(),
                    name: draft.name,
                    objective: draft.objective,
                    stakes: draft.stakes,
                    entry_condition: draft.entry_condition,
                    beats,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            acts,
            overall_theme: overall_theme.into(),
            premise: premise.into(),
            pacing_budget,
        })
    }

    /// Total beats across all acts
    #[inline]
    #[must_use]
    pub fn total_beats(&self) -> usize {
        self.acts.iter().map(|a| a.beats.len()).sum()
    }

    /// All beats in reading order
    pub fn beats(&self) -> impl Iterator<Item = &Beat> {
        self.acts.iter().flat_map(|a| a.beats.iter())
    }

    /// Look up a beat by id
    #[must_use]
    pub fn beat(&self, id: BeatId) -> Option<&Beat> {
        let (act_index, beat_index) = id.indices();
        get_beat(self, act_index, beat_index)
    }
}

/// Beat at 0-based `(act_index, beat_index)`, if present
#[inline]
#[must_use]
pub fn get_beat(structure: &StoryStructure, act_index: usize, beat_index: usize) -> Option<&Beat> {
    structure.acts.get(act_index)?.beats.get(beat_index)
}
