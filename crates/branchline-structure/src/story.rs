//! Story and page records
//!
//! The records the version ledger is attached to. Persistence of these
//! records is the caller's concern; this crate only defines their shape.

use crate::ledger::VersionLedger;
use crate::progression::AccumulatedStructureState;
use crate::types::StoryStructure;
use crate::version::StructureVersionId;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique story identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoryId(pub Ulid);

impl StoryId {
    /// Generate new story ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page number within a story, assigned by the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs the story was started from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySeed {
    /// Protagonist concept
    pub character_concept: String,
    /// World and setting
    pub worldbuilding: String,
    /// Tone and genre
    pub tone: String,
    /// Optional opening situation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_situation: Option<String>,
}

impl StorySeed {
    /// Create new seed
    #[inline]
    #[must_use]
    pub fn new(character_concept: impl Into<String>, tone: impl Into<String>) -> Self {
        Self {
            character_concept: character_concept.into(),
            tone: tone.into(),
            ..Self::default()
        }
    }

    /// With worldbuilding
    #[inline]
    #[must_use]
    pub fn with_worldbuilding(mut self, worldbuilding: impl Into<String>) -> Self {
        self.worldbuilding = worldbuilding.into();
        self
    }

    /// With starting situation
    #[inline]
    #[must_use]
    pub fn with_starting_situation(mut self, situation: impl Into<String>) -> Self {
        self.starting_situation = Some(situation.into());
        self
    }
}

/// What a non-player character is currently pursuing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcAgenda {
    /// Character name
    pub npc_name: String,
    /// Current goal
    pub current_goal: String,
}

/// Story record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Story identifier
    pub id: StoryId,
    /// Display title
    pub title: String,
    /// Starting inputs
    pub seed: StorySeed,
    /// Structure generated at story start, if the story is structured
    pub structure: Option<StoryStructure>,
    /// Append-only structure version lineage
    pub structure_versions: VersionLedger,
}

impl Story {
    /// Create an unstructured story
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>, seed: StorySeed) -> Self {
        Self {
            id: StoryId::new(),
            title: title.into(),
            seed,
            structure: None,
            structure_versions: VersionLedger::new(),
        }
    }

    /// Whether the story declares a structure
    #[inline]
    #[must_use]
    pub fn has_structure(&self) -> bool {
        self.structure.is_some()
    }
}

/// One generated page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Page identifier
    pub id: PageId,
    /// Page this one continues from; `None` for the opening page
    pub parent_page_id: Option<PageId>,
    /// Prose shown to the reader
    pub narrative_text: String,
    /// Choices offered at the end of the page
    pub choices: Vec<String>,
    /// Structure version active when the page was generated
    pub structure_version_id: Option<StructureVersionId>,
    /// Structure progress after this page
    pub structure_state: AccumulatedStructureState,
    /// NPC agendas after this page
    #[serde(default)]
    pub npc_agendas: Vec<NpcAgenda>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_id_generation() {
        assert_ne!(StoryId::new(), StoryId::new());
    }

    #[test]
    fn new_story_is_unstructured() {
        let story = Story::new("The Lighthouse", StorySeed::new("a keeper", "gothic"));
        assert!(!story.has_structure());
        assert!(story.structure_versions.is_empty());
    }

    #[test]
    fn seed_builder() {
        let seed = StorySeed::new("a courier", "noir")
            .with_worldbuilding("rain-soaked port")
            .with_starting_situation("a package that hums");
        assert_eq!(seed.tone, "noir");
        assert_eq!(seed.starting_situation.as_deref(), Some("a package that hums"));
    }
}
