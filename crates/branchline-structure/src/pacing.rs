//! Pacing assessment
//!
//! Decides when a beat has stalled long enough to warrant an advisory
//! `pacing_nudge` for the next page.

use crate::progression::{current_beat, AccumulatedStructureState};
use crate::types::StoryStructure;

/// Pages a single beat may take before it counts as stalled
///
/// Spreads `target_pages_max` across every beat, rounding up, never below 1.
#[must_use]
pub fn beat_page_allowance(structure: &StoryStructure) -> u32 {
    let beats = u32::try_from(structure.total_beats()).unwrap_or(u32::MAX).max(1);
    structure.pacing_budget.target_pages_max.div_ceil(beats).max(1)
}

/// Pacing nudge for a state whose active beat did not conclude
///
/// An analyst-supplied reason wins. Otherwise a nudge is produced once
/// `pages_in_current_beat` reaches `nudge_after_pages`, or the budget-derived
/// allowance when no override is set. Terminal or misaligned states get none.
#[must_use]
pub fn assess_pacing(
    structure: &StoryStructure,
    state: &AccumulatedStructureState,
    analyst_reason: Option<&str>,
    nudge_after_pages: Option<u32>,
) -> Option<String> {
    if state.is_story_complete() {
        return None;
    }
    let beat = current_beat(structure, state).ok()?;

    if let Some(reason) = analyst_reason.map(str::trim).filter(|r| !r.is_empty()) {
        return Some(reason.to_string());
    }

    let allowance = nudge_after_pages
        .unwrap_or_else(|| beat_page_allowance(structure))
        .max(1);
    (state.pages_in_current_beat >= allowance).then(|| {
        format!(
            "Beat {} \"{}\" has run for {} pages against an allowance of {}; move toward its objective: {}",
            beat.id, beat.name, state.pages_in_current_beat, allowance, beat.objective
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::{advance_structure_state, create_initial_structure_state};
    use crate::types::{ActDraft, BeatDraft, BeatRole, PacingBudget};

    fn structure(beats_per_act: usize, target_pages_max: u32) -> StoryStructure {
        let acts = (0..3)
            .map(|a| ActDraft {
                name: format!("Act {a}"),
                objective: "o".to_string(),
                stakes: "s".to_string(),
                entry_condition: "e".to_string(),
                beats: (0..beats_per_act)
                    .map(|b| {
                        BeatDraft::new(format!("b{b}"), "d", "reach the tower", BeatRole::Setup)
                    })
                    .collect(),
            })
            .collect();
        let budget = PacingBudget {
            target_pages_min: 1,
            target_pages_max,
        };
        StoryStructure::assemble("t", "p", budget, acts).unwrap()
    }

    #[test]
    fn allowance_rounds_up() {
        assert_eq!(beat_page_allowance(&structure(2, 40)), 7);
        assert_eq!(beat_page_allowance(&structure(2, 36)), 6);
        assert_eq!(beat_page_allowance(&structure(4, 1)), 1);
    }

    #[test]
    fn no_nudge_below_allowance() {
        let s = structure(2, 12);
        let mut state = create_initial_structure_state(&s);
        state.pages_in_current_beat = 1;
        assert_eq!(assess_pacing(&s, &state, None, None), None);
    }

    #[test]
    fn nudge_once_allowance_reached() {
        let s = structure(2, 12);
        let mut state = create_initial_structure_state(&s);
        state.pages_in_current_beat = 2;
        let nudge = assess_pacing(&s, &state, None, None).unwrap();
        assert!(nudge.contains("Beat 1.1"));
        assert!(nudge.contains("reach the tower"));
    }

    #[test]
    fn override_threshold_applies() {
        let s = structure(2, 120);
        let mut state = create_initial_structure_state(&s);
        state.pages_in_current_beat = 3;
        assert!(assess_pacing(&s, &state, None, None).is_none());
        assert!(assess_pacing(&s, &state, None, Some(3)).is_some());
    }

    #[test]
    fn analyst_reason_wins() {
        let s = structure(2, 120);
        let state = create_initial_structure_state(&s);
        assert_eq!(
            assess_pacing(&s, &state, Some(" the chase drags "), None).as_deref(),
            Some("the chase drags")
        );
        assert_eq!(assess_pacing(&s, &state, Some("   "), None), None);
    }

    #[test]
    fn complete_story_gets_no_nudge() {
        let s = structure(2, 12);
        let mut state = create_initial_structure_state(&s);
        for _ in 0..s.total_beats() {
            state = advance_structure_state(&s, &state, "done").unwrap().updated_state;
        }
        state.pages_in_current_beat = 50;
        assert_eq!(assess_pacing(&s, &state, Some("slow"), None), None);
    }
}
