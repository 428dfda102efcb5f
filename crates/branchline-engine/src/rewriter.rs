//! Structure rewriter
//!
//! Asks the structure service for a fresh outline of the unconcluded work
//! and merges it behind the preserved beats.

use crate::error::RewriteError;
use crate::service::{StructureRewriteContext, StructureService};
use branchline_structure::{
    merge_preserved_with_regenerated, validate_preserved_beats, AccumulatedStructureState, BeatId,
    StoryStructure,
};
use std::fmt;
use std::sync::Arc;

/// Merged structure ready to be versioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub structure: StoryStructure,
    /// Concluded beats carried over, in beat order
    pub preserved_beat_ids: Vec<BeatId>,
}

/// Regenerates future structure while keeping concluded beats
#[derive(Clone)]
pub struct StructureRewriter {
    service: Arc<dyn StructureService>,
}

impl StructureRewriter {
    /// Create new rewriter
    #[inline]
    #[must_use]
    pub fn new(service: Arc<dyn StructureService>) -> Self {
        Self { service }
    }

    /// Rewrite `original` for `context`
    ///
    /// # Errors
    /// - `RewriteError::Service` if the rewrite call fails
    /// - `RewriteError::Merge` if the regenerated outline cannot be merged
    /// - `RewriteError::PreservedBeatsAltered` if a concluded beat of `state`
    ///   did not survive unchanged
    pub async fn rewrite(
        &self,
        context: &StructureRewriteContext,
        original: &StoryStructure,
        state: &AccumulatedStructureState,
    ) -> Result<RewriteOutcome, RewriteError> {
        tracing::info!(
            preserved = context.completed_beats.len(),
            invalidated = context.invalidated_beat_ids.len(),
            "requesting structure rewrite"
        );
        let regenerated = self.service.rewrite_structure(context).await?;
        tracing::debug!(
            acts = regenerated.acts.len(),
            beats = regenerated.acts.iter().map(|a| a.beats.len()).sum::<usize>(),
            "rewrite outline received"
        );

        let structure = merge_preserved_with_regenerated(
            &context.completed_beats,
            &regenerated,
            &context.original_theme,
            context.current_act_index,
        )?;
        if !validate_preserved_beats(original, &structure, state) {
            tracing::error!("rewritten structure altered a concluded beat");
            return Err(RewriteError::PreservedBeatsAltered);
        }

        Ok(RewriteOutcome {
            structure,
            preserved_beat_ids: context.completed_beats.iter().map(|b| b.id).collect(),
        })
    }
}

impl fmt::Debug for StructureRewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureRewriter").finish_non_exhaustive()
    }
}
