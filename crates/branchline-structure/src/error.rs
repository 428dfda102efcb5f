//! Error types for the structure crate
//!
//! Every error here is a contract violation: a caller or upstream component
//! handed the structure layer a value it can never accept. None of them are
//! retryable.

use crate::story::{PageId, StoryId};
use crate::types::BeatId;
use crate::version::StructureVersionId;

/// Structure construction and parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    /// Wrong number of acts in a generated outline
    #[error("structure must have exactly {expected} acts, found {found}")]
    ActCount {
        /// Required act count
        expected: usize,
        /// Act count received
        found: usize,
    },

    /// Act with too few or too many beats
    #[error("act {act} must have {min}-{max} beats, found {found}")]
    BeatCount {
        /// 1-based act number
        act: usize,
        /// Minimum beats per act
        min: usize,
        /// Maximum beats per act
        max: usize,
        /// Beats received
        found: usize,
    },

    /// Required text field is blank
    #[error("{field} must not be empty ({location})")]
    EmptyField {
        /// Field name
        field: &'static str,
        /// Where the field was found
        location: String,
    },

    /// Beat id does not match `<act>.<beat>`
    #[error("invalid beat id: {0:?}")]
    InvalidBeatId(String),

    /// An act ended up with no beats
    #[error("act {act} has no beats")]
    EmptyAct {
        /// 1-based act number
        act: usize,
    },

    /// Preserved beat points at an act the structure does not have
    #[error("preserved beat {0} is outside the act range")]
    PreservedBeatOutOfRange(BeatId),
}

/// Beat progression contract violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressionError {
    /// Beat resolution text was empty after trimming
    #[error("beat resolution must not be empty")]
    EmptyResolution,

    /// Act index does not exist in the structure
    #[error("act index {index} out of range ({act_count} acts)")]
    ActIndexOutOfRange {
        /// Offending index
        index: usize,
        /// Acts in the structure
        act_count: usize,
    },

    /// Beat index does not exist in the act
    #[error("beat index {index} out of range for act index {act_index} ({beat_count} beats)")]
    BeatIndexOutOfRange {
        /// Act being inspected
        act_index: usize,
        /// Offending index
        index: usize,
        /// Beats in the act
        beat_count: usize,
    },

    /// Attempt to re-conclude or reactivate a concluded beat
    #[error("beat {0} is already concluded")]
    BeatAlreadyConcluded(BeatId),
}

/// Structure version and ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Story declares a structure but has no version of it
    #[error("story {story_id} has a structure but no structure versions")]
    StructureWithoutVersion {
        /// Story being validated
        story_id: StoryId,
    },

    /// Parent page carries no version id in a structured story
    #[error("parent page {page_id} has no structure version id")]
    MissingParentVersion {
        /// Parent page
        page_id: PageId,
    },

    /// Version id not present in the ledger
    #[error("structure version {0} not found")]
    VersionNotFound(StructureVersionId),

    /// Version id already present in the ledger
    #[error("structure version {0} already recorded")]
    DuplicateVersion(StructureVersionId),

    /// Predecessor of an appended version is not in the ledger
    #[error("structure version {version} references unknown predecessor {predecessor}")]
    UnknownPredecessor {
        /// Version being appended
        version: StructureVersionId,
        /// Missing predecessor
        predecessor: StructureVersionId,
    },

    /// Version id does not match `sv-<millis>-<hex>`
    #[error("invalid structure version id: {0:?}")]
    InvalidVersionId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_error_display() {
        let err = StructureError::ActCount {
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "structure must have exactly 3 acts, found 2");
    }

    #[test]
    fn progression_error_display() {
        let err = ProgressionError::BeatIndexOutOfRange {
            act_index: 1,
            index: 4,
            beat_count: 2,
        };
        assert!(err.to_string().contains("beat index 4"));
    }
}
