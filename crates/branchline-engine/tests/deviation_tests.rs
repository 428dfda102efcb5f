//! Deviation handling through the page engine

use branchline_engine::{
    DeviationError, EngineConfig, EngineError, PageEngine, PageEvaluation, PageOutcome,
    PageRequest, ProgressionReport, RewriteError, ServiceError,
};
use branchline_structure::{BeatId, BeatStatus, PageId, Story, StructureError, VersionIdGenerator};
use branchline_test_utils::{
    concluded, deviated, outline, outline_tagged, seed, ManualClock, ScriptedPageService,
    ScriptedStructureService,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn id(raw: &str) -> BeatId {
    raw.parse().unwrap()
}

struct Harness {
    engine: PageEngine,
    structures: Arc<ScriptedStructureService>,
    pages: Arc<ScriptedPageService>,
}

fn harness(structures: ScriptedStructureService, pages: ScriptedPageService) -> Harness {
    let structures = Arc::new(structures);
    let pages = Arc::new(pages);
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let ids = Arc::new(VersionIdGenerator::with_clock(clock));
    let engine = PageEngine::new(EngineConfig::new(), structures.clone(), pages.clone())
        .with_version_ids(ids);
    Harness {
        engine,
        structures,
        pages,
    }
}

/// Plays three pages: 1.1 and 1.2 conclude, then the third page invalidates
/// 2.1 and 2.2 while 2.1 is active.
async fn play_to_deviation(h: &Harness) -> (Story, PageOutcome, PageOutcome) {
    let story = h.engine.start_story("Canals", seed()).await.unwrap();
    let first = h
        .engine
        .generate_page(&story, None, PageRequest::new(PageId(1)))
        .await
        .unwrap();
    let second = h
        .engine
        .generate_page(
            &first.story,
            Some(&first.page),
            PageRequest::new(PageId(2)).with_choice("follow"),
        )
        .await
        .unwrap();
    let third = h
        .engine
        .generate_page(
            &second.story,
            Some(&second.page),
            PageRequest::new(PageId(3)).with_choice("burn"),
        )
        .await
        .unwrap();
    (story, second, third)
}

fn deviation_pages() -> ScriptedPageService {
    ScriptedPageService::new()
        .with_evaluation(concluded("the stranger is unmasked"))
        .with_evaluation(concluded("the maps are recovered"))
        .with_evaluation(deviated(
            "the guild master was killed before the alliance could form",
            &["2.1", "2.2"],
            "the cartographer killed the guild master on the bridge",
        ))
}

#[tokio::test]
async fn rewrite_keeps_concluded_beats_and_links_versions() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite(outline_tagged("revised", [0, 3, 3])),
        deviation_pages(),
    );
    let (story, second, third) = play_to_deviation(&h).await;
    let initial = story.latest_structure_version().unwrap().clone();

    // second page left 2.1 active, third page's deviation rewrote act 2 onward
    assert_eq!(second.page.structure_state.active_beat_id(), Some(id("2.1")));
    assert!(second.progression.act_advanced);

    let info = third.deviation.clone().unwrap();
    assert!(info.detected);
    assert_eq!(info.invalidated_beat_count, 2);

    let version = third.active_version.clone().unwrap();
    assert_eq!(version.previous_version_id, Some(initial.id));
    assert_eq!(version.created_at_page_id, Some(PageId(3)));
    assert_eq!(version.preserved_beat_ids, vec![id("1.1"), id("1.2")]);
    assert_eq!(
        version.rewrite_reason.as_deref(),
        Some("the guild master was killed before the alliance could form")
    );
    assert!(version.id > initial.id);

    let rewritten = &version.structure;
    assert_eq!(rewritten.overall_theme, "planned theme");
    assert_eq!(rewritten.premise, "revised premise");
    assert_eq!(rewritten.acts[0].beats, initial.structure.acts[0].beats);
    assert_eq!(rewritten.acts[1].beats[0].description, "revised event 1.0");
    assert_eq!(rewritten.total_beats(), 8);

    assert_eq!(third.story.structure_versions.len(), 2);
    assert_eq!(third.story.latest_structure_version().unwrap().id, version.id);
    // the story's own structure stays the one it was started with
    assert_eq!(third.story.structure, story.structure);

    let state = &third.page.structure_state;
    assert_eq!(third.page.structure_version_id, Some(version.id));
    assert_eq!(state.concluded_beat_ids(), vec![id("1.1"), id("1.2")]);
    assert_eq!(state.active_beat_id(), Some(id("2.1")));
    assert_eq!((state.current_act_index, state.current_beat_index), (1, 0));
    // the deviating page is counted against the realigned beat
    assert_eq!(state.pages_in_current_beat, 1);
    assert_eq!(state.pacing_nudge, None);
    assert_eq!(third.progression, ProgressionReport::default());
    assert_eq!(
        state.beat_progressions[&id("1.2")].resolution.as_deref(),
        Some("the maps are recovered")
    );
}

#[tokio::test]
async fn same_page_conclusion_lands_on_rewritten_structure() {
    let verdict = PageEvaluation {
        beat_concluded: true,
        beat_resolution: "the stranger is unmasked".to_string(),
        ..deviated(
            "the stranger was the guild master all along",
            &["1.2", "2.1"],
            "the stranger revealed themselves on the bridge",
        )
    };
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite(outline_tagged("revised", [2, 3, 3])),
        ScriptedPageService::new().with_evaluation(verdict),
    );
    let story = h.engine.start_story("Canals", seed()).await.unwrap();

    let opening = h
        .engine
        .generate_page(&story, None, PageRequest::new(PageId(1)))
        .await
        .unwrap();

    // deviation is handled before progression, so nothing was concluded yet
    let contexts = h.structures.rewrite_contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].completed_beats.is_empty());
    assert_eq!(contexts[0].invalidated_beat_ids, vec![id("1.2"), id("2.1")]);

    let version = opening.active_version.clone().unwrap();
    assert!(version.preserved_beat_ids.is_empty());
    assert_eq!(version.created_at_page_id, Some(PageId(1)));
    assert_eq!(version.structure.acts[0].beats[0].description, "revised event 0.0");

    // the conclusion is then applied to the rewritten first beat
    assert!(opening.progression.beat_advanced);
    assert!(!opening.progression.act_advanced);
    let state = &opening.page.structure_state;
    assert_eq!(opening.page.structure_version_id, Some(version.id));
    assert_eq!(state.concluded_beat_ids(), vec![id("1.1")]);
    assert_eq!(
        state.beat_progressions[&id("1.1")].resolution.as_deref(),
        Some("the stranger is unmasked")
    );
    assert_eq!(state.active_beat_id(), Some(id("1.2")));
    assert_eq!(state.pages_in_current_beat, 0);
    assert_eq!(opening.story.structure_versions.len(), 2);
}

#[tokio::test]
async fn rewrite_context_carries_constraints() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite(outline_tagged("revised", [0, 3, 3])),
        deviation_pages(),
    );
    play_to_deviation(&h).await;

    let contexts = h.structures.rewrite_contexts();
    assert_eq!(contexts.len(), 1);
    let context = &contexts[0];
    assert_eq!(context.original_theme, "planned theme");
    assert_eq!(context.original_premise, "planned premise");
    assert_eq!(
        context.completed_beats.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![id("1.1"), id("1.2")]
    );
    assert_eq!(context.completed_beats[0].resolution, "the stranger is unmasked");
    assert_eq!(context.invalidated_beat_ids, vec![id("2.1"), id("2.2")]);
    assert_eq!(context.narrative_summary, "the cartographer killed the guild master on the bridge");
    assert_eq!((context.current_act_index, context.current_beat_index), (1, 0));
    assert_eq!(context.seed, seed());
}

#[tokio::test]
async fn sibling_branch_keeps_its_version() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite(outline_tagged("revised", [0, 3, 3])),
        deviation_pages(),
    );
    let (story, second, third) = play_to_deviation(&h).await;
    let initial_id = story.latest_structure_version().unwrap().id;

    // a sibling of page 3, continuing page 2 with the rewritten story record
    let sibling = h
        .engine
        .generate_page(
            &third.story,
            Some(&second.page),
            PageRequest::new(PageId(4)).with_choice("follow"),
        )
        .await
        .unwrap();

    assert!(sibling.deviation.is_none());
    assert_eq!(sibling.page.structure_version_id, Some(initial_id));
    assert_eq!(sibling.active_version.unwrap().structure, story.structure.unwrap());
    assert_eq!(sibling.page.structure_state.active_beat_id(), Some(id("2.1")));
    assert_eq!(sibling.page.structure_state.pages_in_current_beat, 1);
    assert_eq!(sibling.story.structure_versions.len(), 2);

    // and the rewritten branch continues on its own version
    let next = h
        .engine
        .generate_page(&third.story, Some(&third.page), PageRequest::new(PageId(5)))
        .await
        .unwrap();
    assert_eq!(next.page.structure_version_id, third.page.structure_version_id);
    let plan = h.pages.calls().plans.last().cloned().unwrap();
    assert_eq!(plan.generation.parent_page_id, Some(PageId(3)));
}

#[tokio::test]
async fn concluded_only_invalidation_is_ignored() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3])),
        ScriptedPageService::new()
            .with_evaluation(concluded("the stranger is unmasked"))
            .with_evaluation(deviated("nothing fits", &["1.1", "9.9", "garbage"], "")),
    );
    let story = h.engine.start_story("Canals", seed()).await.unwrap();
    let first = h
        .engine
        .generate_page(&story, None, PageRequest::new(PageId(1)))
        .await
        .unwrap();
    let second = h
        .engine
        .generate_page(&first.story, Some(&first.page), PageRequest::new(PageId(2)))
        .await
        .unwrap();

    assert!(second.deviation.is_none());
    assert!(h.structures.rewrite_contexts().is_empty());
    assert_eq!(second.story.structure_versions.len(), 1);
    assert_eq!(second.page.structure_state.status_of(id("1.2")), BeatStatus::Active);
}

#[tokio::test]
async fn deviation_in_unstructured_story_is_ignored() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3])),
        ScriptedPageService::new().with_evaluation(deviated("off the rails", &["1.1"], "")),
    );
    let story = Story::new("Freeform", seed());
    let outcome = h
        .engine
        .generate_page(&story, None, PageRequest::new(PageId(1)))
        .await
        .unwrap();

    assert!(outcome.deviation.is_none());
    assert!(outcome.active_version.is_none());
    assert!(h.pages.calls().evaluations.is_empty());
    assert!(h.structures.rewrite_contexts().is_empty());
}

#[tokio::test]
async fn rewrite_service_failure_fails_the_page() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite_error(ServiceError::Retryable("structure model busy".into())),
        deviation_pages(),
    );
    let story = h.engine.start_story("Canals", seed()).await.unwrap();
    let first = h.engine.generate_page(&story, None, PageRequest::new(PageId(1))).await.unwrap();
    let second = h
        .engine
        .generate_page(&first.story, Some(&first.page), PageRequest::new(PageId(2)))
        .await
        .unwrap();

    let err = h
        .engine
        .generate_page(&second.story, Some(&second.page), PageRequest::new(PageId(3)))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(
        err,
        EngineError::Deviation(DeviationError::Rewrite(RewriteError::Service(
            ServiceError::Retryable(_)
        )))
    ));
}

#[tokio::test]
async fn empty_merged_act_fails_the_page() {
    let h = harness(
        ScriptedStructureService::new(outline([2, 3, 3]))
            .with_rewrite(outline_tagged("revised", [0, 0, 3])),
        deviation_pages(),
    );
    let story = h.engine.start_story("Canals", seed()).await.unwrap();
    let first = h.engine.generate_page(&story, None, PageRequest::new(PageId(1))).await.unwrap();
    let second = h
        .engine
        .generate_page(&first.story, Some(&first.page), PageRequest::new(PageId(2)))
        .await
        .unwrap();

    let err = h
        .engine
        .generate_page(&second.story, Some(&second.page), PageRequest::new(PageId(3)))
        .await
        .unwrap_err();

    assert!(err.is_contract_violation());
    assert!(matches!(
        err,
        EngineError::Deviation(DeviationError::Rewrite(RewriteError::Merge(
            StructureError::EmptyAct { act: 2 }
        )))
    ));
}
