//! Beat progression state machine
//!
//! Tracks which beat of which act is active for one branch of the story.
//! Every transition returns a new [`AccumulatedStructureState`]; the parent
//! snapshot is never touched, so sibling branches computed from the same
//! parent cannot interfere. Progressions live in an [`im::OrdMap`] so those
//! snapshots share storage.

use crate::error::ProgressionError;
use crate::types::{Beat, BeatId, StoryStructure};
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Lifecycle of a beat: pending → active → concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatStatus {
    /// Not yet reached
    Pending,
    /// Currently being played
    Active,
    /// Finished, with a recorded resolution
    Concluded,
}

/// Status of one beat in a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatProgression {
    /// Lifecycle status
    pub status: BeatStatus,
    /// How the beat was resolved; set once, when concluded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl BeatProgression {
    /// Active progression
    #[inline]
    #[must_use]
    pub fn active() -> Self {
        Self {
            status: BeatStatus::Active,
            resolution: None,
        }
    }

    /// Concluded progression with its resolution
    #[inline]
    #[must_use]
    pub fn concluded(resolution: impl Into<String>) -> Self {
        Self {
            status: BeatStatus::Concluded,
            resolution: Some(resolution.into()),
        }
    }
}

/// Per-branch structure progress snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedStructureState {
    /// Index of the current act in the active structure version
    pub current_act_index: usize,
    /// Index of the current beat within the current act
    pub current_beat_index: usize,
    /// Beat id → status; beats absent from the map are pending
    pub beat_progressions: OrdMap<BeatId, BeatProgression>,
    /// Pages generated since the current beat became active
    pub pages_in_current_beat: u32,
    /// Advisory pacing note for the next page
    pub pacing_nudge: Option<String>,
}

impl AccumulatedStructureState {
    /// Status of a beat, pending when unrecorded
    #[must_use]
    pub fn status_of(&self, id: BeatId) -> BeatStatus {
        self.beat_progressions
            .get(&id)
            .map_or(BeatStatus::Pending, |p| p.status)
    }

    /// Whether a beat is concluded
    #[inline]
    #[must_use]
    pub fn is_concluded(&self, id: BeatId) -> bool {
        self.status_of(id) == BeatStatus::Concluded
    }

    /// The single active beat, if any
    #[must_use]
    pub fn active_beat_id(&self) -> Option<BeatId> {
        self.beat_progressions
            .iter()
            .find(|(_, p)| p.status == BeatStatus::Active)
            .map(|(id, _)| *id)
    }

    /// Concluded beat ids in beat order
    #[must_use]
    pub fn concluded_beat_ids(&self) -> Vec<BeatId> {
        self.beat_progressions
            .iter()
            .filter(|(_, p)| p.status == BeatStatus::Concluded)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Terminal state: beats were played and none is active
    #[must_use]
    pub fn is_story_complete(&self) -> bool {
        !self.beat_progressions.is_empty() && self.active_beat_id().is_none()
    }
}

/// Result of a progression step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureProgression {
    /// New snapshot for the child page
    pub updated_state: AccumulatedStructureState,
    /// Moved into a new act
    pub act_advanced: bool,
    /// Moved to a new beat
    pub beat_advanced: bool,
    /// This step concluded the final beat
    pub is_complete: bool,
}

/// Initial state: first beat of the first act active
#[must_use]
pub fn create_initial_structure_state(structure: &StoryStructure) -> AccumulatedStructureState {
    let mut beat_progressions = OrdMap::new();
    if let Some(first) = structure.beats().next() {
        beat_progressions.insert(first.id, BeatProgression::active());
    }
    AccumulatedStructureState {
        beat_progressions,
        ..AccumulatedStructureState::default()
    }
}

/// Conclude the active beat and activate the next one
///
/// # Errors
/// - `ProgressionError::EmptyResolution` if `resolution` is blank
/// - `ProgressionError::ActIndexOutOfRange` / `BeatIndexOutOfRange` if the
///   state does not belong to `structure`
/// - `ProgressionError::BeatAlreadyConcluded` if the current or next beat is
///   already concluded
pub fn advance_structure_state(
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
    resolution: &str,
) -> Result<StructureProgression, ProgressionError> {
    let resolution = resolution.trim();
    if resolution.is_empty() {
        return Err(ProgressionError::EmptyResolution);
    }

    let current = current_beat(structure, state)?;
    if state.is_concluded(current.id) {
        return Err(ProgressionError::BeatAlreadyConcluded(current.id));
    }

    let mut beat_progressions = state.beat_progressions.clone();
    beat_progressions.insert(current.id, BeatProgression::concluded(resolution));

    let Some((act_index, beat_index, next)) =
        next_beat(structure, state.current_act_index, state.current_beat_index)
    else {
        return Ok(StructureProgression {
            updated_state: AccumulatedStructureState {
                beat_progressions,
                ..state.clone()
            },
            act_advanced: false,
            beat_advanced: false,
            is_complete: true,
        });
    };

    if state.is_concluded(next.id) {
        return Err(ProgressionError::BeatAlreadyConcluded(next.id));
    }
    beat_progressions.insert(next.id, BeatProgression::active());

    Ok(StructureProgression {
        updated_state: AccumulatedStructureState {
            current_act_index: act_index,
            current_beat_index: beat_index,
            beat_progressions,
            pages_in_current_beat: 0,
            pacing_nudge: None,
        },
        act_advanced: act_index != state.current_act_index,
        beat_advanced: true,
        is_complete: false,
    })
}

/// Apply the analyst's verdict for one page
///
/// An unconcluded beat only bumps `pages_in_current_beat`; every other field
/// is copied from the parent. `is_complete` reports whether this step
/// finished the story, so it is `false` on that path.
///
/// # Errors
/// Same as [`advance_structure_state`] when `beat_concluded` is true
pub fn apply_structure_progression(
    structure: &StoryStructure,
    parent_state: &AccumulatedStructureState,
    beat_concluded: bool,
    resolution: &str,
) -> Result<StructureProgression, ProgressionError> {
    if beat_concluded {
        return advance_structure_state(structure, parent_state, resolution);
    }

    Ok(StructureProgression {
        updated_state: AccumulatedStructureState {
            pages_in_current_beat: parent_state.pages_in_current_beat.saturating_add(1),
            ..parent_state.clone()
        },
        act_advanced: false,
        beat_advanced: false,
        is_complete: false,
    })
}

/// Re-point a state at a rewritten structure
///
/// Concluded progressions are kept; everything else is dropped and the first
/// unconcluded beat in reading order becomes active. When every beat is
/// concluded the state is terminal and points at the last beat.
#[must_use]
pub fn realign_state_after_rewrite(
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
) -> AccumulatedStructureState {
    let mut beat_progressions: OrdMap<BeatId, BeatProgression> = state
        .beat_progressions
        .iter()
        .filter(|(id, p)| p.status == BeatStatus::Concluded && structure.beat(**id).is_some())
        .map(|(id, p)| (*id, p.clone()))
        .collect();

    let next = structure
        .beats()
        .find(|b| !beat_progressions.contains_key(&b.id))
        .or_else(|| structure.beats().last());

    let (current_act_index, current_beat_index) = match next {
        Some(beat) => {
            if !beat_progressions.contains_key(&beat.id) {
                beat_progressions.insert(beat.id, BeatProgression::active());
            }
            beat.id.indices()
        }
        None => (0, 0),
    };

    AccumulatedStructureState {
        current_act_index,
        current_beat_index,
        beat_progressions,
        pages_in_current_beat: 0,
        pacing_nudge: None,
    }
}

/// Beat the state's indices point at
///
/// # Errors
/// Index out of range for `structure`
pub fn current_beat<'a>(
    structure: &'a StoryStructure,
    state: &AccumulatedStructureState,
) -> Result<&'a Beat, ProgressionError> {
    let act = structure
        .acts
        .get(state.current_act_index)
        .ok_or(ProgressionError::ActIndexOutOfRange {
            index: state.current_act_index,
            act_count: structure.acts.len(),
        })?;
    act.beats
        .get(state.current_beat_index)
        .ok_or(ProgressionError::BeatIndexOutOfRange {
            act_index: state.current_act_index,
            index: state.current_beat_index,
            beat_count: act.beats.len(),
        })
}

fn next_beat(
    structure: &StoryStructure,
    act_index: usize,
    beat_index: usize,
) -> Option<(usize, usize, &Beat)> {
    if let Some(beat) = structure.acts.get(act_index)?.beats.get(beat_index + 1) {
        return Some((act_index, beat_index + 1, beat));
    }
    structure
        .acts
        .iter()
        .enumerate()
        .skip(act_index + 1)
        .find_map(|(i, act)| act.beats.first().map(|beat| (i, 0, beat)))
}
