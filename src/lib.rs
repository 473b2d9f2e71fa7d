//! Skill mastery diagnostics for adaptive learning.
//!
//! Responses flow through the skill map, a Bayesian knowledge-tracing
//! estimator, the gap detector and the confidence aggregator; the
//! [`DiagnosticEngine`] sequences one student at a time and runs batches
//! with bounded concurrency.

pub mod config;
pub mod diagnostic;
pub mod logging;

pub use config::{EngineConfig, LogConfig};
pub use diagnostic::{
    DiagnosticEngine, DiagnosticError, DiagnosticRequest, DiagnosticResult, Gap, GapSeverity,
    Response, ResponseValue, SkillMastery,
};
