//! Skill Mastery Diagnostics
//!
//! Converts ordered item responses into per-skill mastery, confidence and gaps:
//! - Skill Map - item to skill links plus calibrated knowledge-tracing parameters
//! - Mastery Estimator - Bayesian knowledge tracing with weighted evidence
//! - Gap Detector - threshold-based severity buckets with configured recommendations
//! - Confidence Aggregator - observation-weighted diagnostic confidence
//! - Engine - single-student orchestration and bounded-concurrency batches
//! - Persistence - optional cross-session mastery store

pub mod batch;
pub mod confidence;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod gaps;
pub mod persistence;
pub mod skill_map;
pub mod types;

pub use confidence::{aggregate, AggregateConfidence};
pub use engine::DiagnosticEngine;
pub use error::DiagnosticError;
pub use estimator::{skill_confidence, update, EstimationError, MasteryArena, SkillState};
pub use gaps::{classify, GapConfig, GapThresholds, RecommendationTable};
pub use persistence::{InMemoryMasteryStore, JsonFileMasteryStore, MasteryStore, StoreError};
pub use skill_map::{
    CatalogDocument, CatalogError, CatalogHandle, ItemSkillLink, SkillCatalog, SkillMap, SkillSpec,
    UnknownItemError,
};
pub use types::*;
