//! Branchline Structure - story structure model
//!
//! The pure, synchronous core of the branchline engine:
//! - Builds the three-act beat tree from a generated outline
//! - Tracks per-branch beat progression as immutable snapshots
//! - Versions structures and resolves the version a page branch uses
//! - Merges concluded beats into regenerated outlines after a rewrite
//!
//! # Example
//!
//! ```rust,ignore
//! use branchline_structure::prelude::*;
//!
//! let structure = create_story_structure(&outline)?;
//! let state = create_initial_structure_state(&structure);
//! let progression = apply_structure_progression(&structure, &state, true, "the gate falls")?;
//! assert!(progression.beat_advanced);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod factory;
pub mod ledger;
pub mod merge;
pub mod pacing;
pub mod progression;
pub mod story;
pub mod types;
pub mod version;

pub use error::{ProgressionError, StructureError, VersionError};
pub use factory::{create_story_structure, GeneratedAct, GeneratedBeat, StructureGenerationResult};
pub use ledger::{
    resolve_active_structure_version, validate_generation_preconditions, ResolutionMode,
    ResolutionSource, ResolvedVersion, VersionLedger,
};
pub use merge::{
    extract_completed_beats, merge_preserved_with_regenerated, validate_preserved_beats,
    CompletedBeat, CompletedBeatExtraction, ExtractionWarning,
};
pub use pacing::{assess_pacing, beat_page_allowance};
pub use progression::{
    advance_structure_state, apply_structure_progression, create_initial_structure_state,
    current_beat, realign_state_after_rewrite, AccumulatedStructureState, BeatProgression,
    BeatStatus, StructureProgression,
};
pub use story::{NpcAgenda, Page, PageId, Story, StoryId, StorySeed};
pub use types::{
    get_beat, parse_beat_indices, Act, ActDraft, Beat, BeatDraft, BeatId, BeatRole,
    EscalationType, PacingBudget, StoryStructure, ACT_COUNT, MAX_BEATS_PER_ACT,
    MIN_BEATS_PER_ACT,
};
pub use version::{
    create_initial_version, create_rewritten_version, Clock, StructureVersionId, SystemClock,
    VersionIdGenerator, VersionedStoryStructure,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with story structures
    pub use crate::{
        advance_structure_state, apply_structure_progression, create_initial_structure_state,
        create_story_structure, resolve_active_structure_version, AccumulatedStructureState,
        BeatId, Page, PageId, ResolutionMode, Story, StorySeed, StoryStructure,
        StructureGenerationResult, VersionIdGenerator, VersionedStoryStructure,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
