//! Branchline Engine - page generation orchestration
//!
//! Drives one page of a branching story through:
//! - Version resolution for the branch being continued
//! - The plan → account → write → reconcile retry pipeline
//! - Deviation detection and structure rewrites that keep concluded beats
//! - Beat progression and pacing nudges
//!
//! # Example
//!
//! ```rust,ignore
//! use branchline_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     structures: Arc<dyn StructureService>,
//! #     pages: Arc<dyn PageService>,
//! # ) -> Result<(), EngineError> {
//! let engine = PageEngine::new(EngineConfig::new(), structures, pages);
//! let story = engine.start_story("The Salt Road", StorySeed::new("a smuggler", "noir")).await?;
//!
//! let opening = engine.generate_page(&story, None, PageRequest::new(PageId(1))).await?;
//! let request = PageRequest::new(PageId(2)).with_choice("run");
//! let next = engine
//!     .generate_page(&opening.story, Some(&opening.page), request)
//!     .await?;
//! println!("rewritten: {}", next.deviation.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod deviation;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod rewriter;
pub mod service;

pub use config::{EngineConfig, LoggingConfig, PacingConfig};
pub use deviation::{
    build_rewrite_context, detect_deviation, handle_deviation_if_detected, BeatDeviation,
    DeviationDetection, DeviationInfo, DeviationInput, DeviationOutcome, DeviationResult,
    DeviationWarning,
};
pub use engine::{PageEngine, PageOutcome, PageRequest, ProgressionReport};
pub use error::{
    ConfigError, DeviationError, EngineError, LoggingError, PipelineError, RewriteError,
    ServiceError,
};
pub use logging::init_tracing;
pub use pipeline::{
    generate_with_reconciliation_retry, GenerationMetrics, GenerationStage, GenerationStatus,
    ReconciledGeneration, RetryOptions, StageDurations, StageEvent, StageObserver, StagePhase,
    MAX_GENERATION_ATTEMPTS,
};
pub use rewriter::{RewriteOutcome, StructureRewriter};
pub use service::{
    AccountingContext, ActiveBeatSnapshot, AgendaContext, DeviationSignal, EvaluationContext,
    GenerationContext, PacingSignal, PageEvaluation, PagePlan, PageService, PlanContext,
    ReconcileContext, Reconciliation, ReconciliationDiagnostic, ReconciliationFailureReason,
    StateAccounting, StateIntent, StructureRewriteContext, StructureService, WriterContext,
    WrittenPage,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the page engine
    pub use crate::{
        EngineConfig, EngineError, PageEngine, PageOutcome, PageRequest, PageService,
        StructureService,
    };
    pub use branchline_structure::{Page, PageId, Story, StorySeed};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
