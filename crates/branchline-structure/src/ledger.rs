//! Structure version ledger
//!
//! Append-only lineage of structure versions for one story, plus the
//! resolution rule deciding which version a continuation page uses.

use crate::error::VersionError;
use crate::story::{Page, Story};
use crate::version::{StructureVersionId, VersionedStoryStructure};
use im::Vector;
use serde::{Deserialize, Serialize};

/// Append-only list of structure versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionLedger {
    versions: Vector<VersionedStoryStructure>,
}

impl VersionLedger {
    /// Empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded versions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether no version is recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Version by id
    #[must_use]
    pub fn get(&self, id: StructureVersionId) -> Option<&VersionedStoryStructure> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Most recently appended version
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&VersionedStoryStructure> {
        self.versions.back()
    }

    /// Versions in append order
    pub fn iter(&self) -> impl Iterator<Item = &VersionedStoryStructure> {
        self.versions.iter()
    }

    /// Ledger with `version` appended; `self` is left untouched
    ///
    /// # Errors
    /// - `VersionError::DuplicateVersion` if the id is already recorded
    /// - `VersionError::UnknownPredecessor` if the predecessor is not recorded
    pub fn appended(&self, version: VersionedStoryStructure) -> Result<Self, VersionError> {
        if self.get(version.id).is_some() {
            return Err(VersionError::DuplicateVersion(version.id));
        }
        if let Some(predecessor) = version.previous_version_id {
            if self.get(predecessor).is_none() {
                return Err(VersionError::UnknownPredecessor {
                    version: version.id,
                    predecessor,
                });
            }
        }
        let mut versions = self.versions.clone();
        versions.push_back(version);
        Ok(Self { versions })
    }

    /// Walk from `id` back to its root version
    ///
    /// # Errors
    /// `VersionError::VersionNotFound` if `id` or any ancestor is missing
    pub fn lineage(
        &self,
        id: StructureVersionId,
    ) -> Result<Vec<&VersionedStoryStructure>, VersionError> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let version = self
                .get(current)
                .ok_or(VersionError::VersionNotFound(current))?;
            chain.push(version);
            cursor = version.previous_version_id;
        }
        Ok(chain)
    }
}

/// How strictly a continuation resolves its structure version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Fall back to the latest version when the parent's id does not resolve
    #[default]
    Lenient,
    /// Treat an unresolved parent version id as fatal
    Strict,
}

/// Where a resolved version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Opening page: the story's latest version
    StoryRoot,
    /// Exact match on the parent page's recorded id
    ParentPage,
    /// Parent's id did not resolve; latest version substituted
    FallbackLatest {
        /// Id the parent page recorded
        requested: Option<StructureVersionId>,
    },
}

impl ResolutionSource {
    /// Whether the resolution indicates a consistency problem
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackLatest { .. })
    }
}

/// Structure version a page generation must use
#[derive(Debug, Clone, Copy)]
pub struct ResolvedVersion<'a> {
    /// The version
    pub version: &'a VersionedStoryStructure,
    /// How it was found
    pub source: ResolutionSource,
}

/// Check invariants that must hold before any generation begins
///
/// # Errors
/// - `VersionError::StructureWithoutVersion` if the story has a structure
///   but an empty ledger
/// - `VersionError::MissingParentVersion` if the story has a structure and
///   the parent page carries no version id
pub fn validate_generation_preconditions(
    story: &Story,
    parent_page: Option<&Page>,
) -> Result<(), VersionError> {
    if !story.has_structure() {
        return Ok(());
    }
    if story.structure_versions.is_empty() {
        return Err(VersionError::StructureWithoutVersion { story_id: story.id });
    }
    if let Some(parent) = parent_page {
        if parent.structure_version_id.is_none() {
            return Err(VersionError::MissingParentVersion { page_id: parent.id });
        }
    }
    Ok(())
}

/// Resolve the structure version for a page continuing `parent_page`
///
/// Returns `None` for an unstructured story. The opening page (no parent)
/// uses the latest version. A continuation uses the parent's own version;
/// if that id does not resolve, [`ResolutionMode::Lenient`] substitutes the
/// latest version and reports [`ResolutionSource::FallbackLatest`].
///
/// # Errors
/// - `VersionError::StructureWithoutVersion` if the story has a structure
///   but no versions
/// - in strict mode, `VersionError::MissingParentVersion` or
///   `VersionError::VersionNotFound` when the parent's id does not resolve
pub fn resolve_active_structure_version<'a>(
    story: &'a Story,
    parent_page: Option<&Page>,
    mode: ResolutionMode,
) -> Result<Option<ResolvedVersion<'a>>, VersionError> {
    let ledger = &story.structure_versions;
    if !story.has_structure() && ledger.is_empty() {
        return Ok(None);
    }
    let latest = ledger
        .latest()
        .ok_or(VersionError::StructureWithoutVersion { story_id: story.id })?;

    let Some(parent) = parent_page else {
        return Ok(Some(ResolvedVersion {
            version: latest,
            source: ResolutionSource::StoryRoot,
        }));
    };

    let requested = parent.structure_version_id;
    if let Some(version) = requested.and_then(|id| ledger.get(id)) {
        return Ok(Some(ResolvedVersion {
            version,
            source: ResolutionSource::ParentPage,
        }));
    }

    match (mode, requested) {
        (ResolutionMode::Strict, None) => {
            Err(VersionError::MissingParentVersion { page_id: parent.id })
        }
        (ResolutionMode::Strict, Some(id)) => Err(VersionError::VersionNotFound(id)),
        (ResolutionMode::Lenient, _) => Ok(Some(ResolvedVersion {
            version: latest,
            source: ResolutionSource::FallbackLatest { requested },
        })),
    }
}

impl Story {
    /// Story with `version` appended to its ledger
    ///
    /// # Errors
    /// Same as [`VersionLedger::appended`]
    pub fn with_structure_version(
        &self,
        version: VersionedStoryStructure,
    ) -> Result<Self, VersionError> {
        Ok(Self {
            structure_versions: self.structure_versions.appended(version)?,
            ..self.clone()
        })
    }

    /// Latest structure version
    #[inline]
    #[must_use]
    pub fn latest_structure_version(&self) -> Option<&VersionedStoryStructure> {
        self.structure_versions.latest()
    }
}
