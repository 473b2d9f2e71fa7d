use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::diagnostic::confidence::aggregate;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::estimator::{ApplyOutcome, MasteryArena, Observation, SkillState};
use crate::diagnostic::gaps::classify;
use crate::diagnostic::persistence::MasteryStore;
use crate::diagnostic::skill_map::{
    CatalogError, CatalogHandle, ItemSkillLink, SkillCatalog, SkillMap,
};
use crate::diagnostic::types::{DiagnosticRequest, DiagnosticResult, DiagnosticWarning};

/// Runs diagnoses against the current catalog. Cheap to clone; clones share
/// the catalog slot and the optional store.
#[derive(Clone)]
pub struct DiagnosticEngine {
    config: Arc<EngineConfig>,
    catalog: Arc<CatalogHandle>,
    store: Option<Arc<dyn MasteryStore>>,
}

impl DiagnosticEngine {
    pub fn new(catalog: SkillCatalog, config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(CatalogHandle::new(catalog)),
            store: None,
        }
    }

    /// Loads the catalog named by `config.catalog_path`, or starts with an
    /// empty catalog when none is configured.
    pub fn from_config(config: EngineConfig) -> Result<Self, CatalogError> {
        let catalog = match config.catalog_path.as_deref() {
            Some(path) => SkillCatalog::from_path(path)?,
            None => {
                tracing::warn!("no catalog path configured, starting with an empty skill map");
                SkillCatalog::default()
            }
        };
        Ok(Self::new(catalog, config))
    }

    /// Enables cross-session mastery tracking.
    pub fn with_store(mut self, store: Arc<dyn MasteryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn catalog(&self) -> Arc<SkillCatalog> {
        self.catalog.snapshot()
    }

    /// Replaces the whole catalog. In-flight diagnoses finish on the catalog
    /// they started with.
    pub fn reload(&self, catalog: SkillCatalog) -> u64 {
        let skills = catalog.skill_map().skill_count();
        let items = catalog.skill_map().item_count();
        let version = self.catalog.replace(catalog);
        tracing::info!(version, skills, items, "skill catalog reloaded");
        version
    }

    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<u64, CatalogError> {
        let path = path.as_ref();
        match SkillCatalog::from_path(path) {
            Ok(catalog) => Ok(self.reload(catalog)),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "catalog reload rejected");
                Err(err)
            }
        }
    }

    pub async fn diagnose(
        &self,
        request: &DiagnosticRequest,
    ) -> Result<DiagnosticResult, DiagnosticError> {
        let diagnosis_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "diagnose",
            %diagnosis_id,
            student_id = %request.student_id,
            assessment_id = %request.assessment_id
        );
        self.run_diagnosis(diagnosis_id, request)
            .instrument(span)
            .await
    }

    async fn run_diagnosis(
        &self,
        diagnosis_id: Uuid,
        request: &DiagnosticRequest,
    ) -> Result<DiagnosticResult, DiagnosticError> {
        let started = Instant::now();
        let deadline = self
            .config
            .diagnosis_timeout
            .map(|limit| Deadline::new(started, limit));

        // The deadline covers validation, store loads and the fold. The save
        // runs after it so a timeout can never leave a partial write behind.
        let estimate = self.estimate(diagnosis_id, request, started, deadline);
        let outcome = match self.config.diagnosis_timeout {
            Some(limit) => tokio::time::timeout(limit, estimate)
                .await
                .unwrap_or(Err(DiagnosticError::TimedOut(limit))),
            None => estimate.await,
        };
        let (mut result, states) = match outcome {
            Ok(estimate) => estimate,
            Err(DiagnosticError::TimedOut(limit)) => {
                tracing::warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "diagnosis timed out, partial state discarded"
                );
                return Err(DiagnosticError::TimedOut(limit));
            }
            Err(err) => return Err(err),
        };

        if let Some(store) = &self.store {
            if !states.is_empty() {
                store.save_all(&request.student_id, &states).await?;
            }
        }

        result.processing_time = started.elapsed();
        tracing::info!(
            skills = result.mastery_vector.len(),
            gaps = result.gaps.len(),
            confidence = result.confidence_score,
            low_confidence = result.low_confidence,
            warnings = result.warnings.len(),
            elapsed_us = result.processing_time.as_micros() as u64,
            "diagnosis complete"
        );
        Ok(result)
    }

    /// Everything up to, but not including, persistence. Returns the result
    /// and the per-skill states to save.
    async fn estimate(
        &self,
        diagnosis_id: Uuid,
        request: &DiagnosticRequest,
        started: Instant,
        deadline: Option<Deadline>,
    ) -> Result<(DiagnosticResult, Vec<(String, SkillState)>), DiagnosticError> {
        let observations = validate_request(request)?;
        let catalog = self.catalog.snapshot();
        let mut warnings = Vec::new();

        if observations.is_empty() {
            tracing::info!("empty response set, returning low-confidence result");
            warnings.push(DiagnosticWarning::EmptyResponseSet);
            let result = DiagnosticResult {
                diagnosis_id,
                student_id: request.student_id.clone(),
                assessment_id: request.assessment_id.clone(),
                mastery_vector: Vec::new(),
                gaps: Vec::new(),
                confidence_score: 0.0,
                low_confidence: true,
                warnings,
                catalog_version: catalog.version(),
                processing_time: started.elapsed(),
            };
            return Ok((result, Vec::new()));
        }

        let skill_map = catalog.skill_map();
        let mut plan: Vec<(Observation, &[ItemSkillLink])> = Vec::with_capacity(observations.len());
        for observation in observations {
            let item_id = &request.responses[observation.position].item_id;
            match skill_map.resolve(item_id) {
                Ok(links) => plan.push((observation, links)),
                Err(err) => {
                    tracing::warn!(
                        item_id = %item_id,
                        position = observation.position,
                        error = %err,
                        "skipping response for unknown item"
                    );
                    warnings.push(DiagnosticWarning::UnknownItem {
                        item_id: item_id.clone(),
                        position: observation.position,
                    });
                }
            }
        }

        if plan.is_empty() {
            return Err(DiagnosticError::NoResolvableResponses {
                count: request.responses.len(),
            });
        }

        check_deadline(deadline)?;
        let mut arena = MasteryArena::new();
        if let Some(store) = &self.store {
            resume_from_store(store.as_ref(), skill_map, &request.student_id, &plan, &mut arena)
                .await?;
        }

        // Strictly sequential: the transition step does not commute.
        for (observation, links) in &plan {
            check_deadline(deadline)?;
            for link in links.iter() {
                let spec = skill_map.skill(&link.skill_id).ok_or_else(|| {
                    DiagnosticError::Internal(format!(
                        "item {} links unregistered skill {}",
                        link.item_id, link.skill_id
                    ))
                })?;

                match arena.apply(observation, link, spec)? {
                    ApplyOutcome::Applied { clamped: None } => {}
                    ApplyOutcome::Applied {
                        clamped: Some(value),
                    } => {
                        tracing::warn!(
                            skill_id = %spec.skill_id,
                            value,
                            "mastery probability clamped into [0, 1]"
                        );
                        warnings.push(DiagnosticWarning::ClampedProbability {
                            skill_id: spec.skill_id.clone(),
                            value,
                        });
                    }
                    ApplyOutcome::Stale => {
                        tracing::debug!(
                            skill_id = %spec.skill_id,
                            position = observation.position,
                            "response predates stored state, skipped"
                        );
                        warnings.push(DiagnosticWarning::StaleResponse {
                            item_id: link.item_id.clone(),
                            skill_id: spec.skill_id.clone(),
                            position: observation.position,
                        });
                    }
                }
            }
        }

        let mastery_vector = arena.snapshot();
        let gaps = classify(&mastery_vector, catalog.gaps());
        let confidence = aggregate(&mastery_vector);
        let low_confidence =
            confidence.flagged || confidence.score < self.config.low_confidence_threshold;

        let states: Vec<(String, SkillState)> = if self.store.is_some() {
            arena
                .iter()
                .map(|(skill_id, state)| (skill_id.to_string(), state.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let result = DiagnosticResult {
            diagnosis_id,
            student_id: request.student_id.clone(),
            assessment_id: request.assessment_id.clone(),
            mastery_vector,
            gaps,
            confidence_score: confidence.score,
            low_confidence,
            warnings,
            catalog_version: catalog.version(),
            processing_time: started.elapsed(),
        };
        Ok((result, states))
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn new(started: Instant, limit: Duration) -> Self {
        Self {
            at: started + limit,
            limit,
        }
    }
}

/// The fold has no await points of its own, so the async timeout alone cannot
/// interrupt it; the deadline is also checked between responses.
fn check_deadline(deadline: Option<Deadline>) -> Result<(), DiagnosticError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline.at => {
            Err(DiagnosticError::TimedOut(deadline.limit))
        }
        _ => Ok(()),
    }
}

/// Loads stored states for every skill the plan touches, seeding the arena in
/// first-touch order so the mastery vector order does not depend on the store.
async fn resume_from_store(
    store: &dyn MasteryStore,
    skill_map: &SkillMap,
    student_id: &str,
    plan: &[(Observation, &[ItemSkillLink])],
    arena: &mut MasteryArena,
) -> Result<(), DiagnosticError> {
    let mut seen = HashSet::new();
    let skill_ids: Vec<&str> = plan
        .iter()
        .flat_map(|(_, links)| links.iter())
        .map(|link| link.skill_id.as_str())
        .filter(|skill_id| seen.insert(*skill_id))
        .collect();

    let loaded = futures::future::try_join_all(
        skill_ids
            .iter()
            .map(|skill_id| store.load(student_id, skill_id)),
    )
    .await?;

    let mut resumed = 0usize;
    for (skill_id, state) in skill_ids.into_iter().zip(loaded) {
        match state {
            Some(state) => {
                arena.seed(skill_id, state)?;
                resumed += 1;
            }
            None => {
                if let Some(spec) = skill_map.skill(skill_id) {
                    arena.touch(spec);
                }
            }
        }
    }
    tracing::debug!(resumed, "resumed skill states from store");
    Ok(())
}

/// Checks every response and returns them in fold order: by timestamp, ties
/// kept in submission order.
fn validate_request(request: &DiagnosticRequest) -> Result<Vec<Observation>, DiagnosticError> {
    if request.student_id.trim().is_empty() {
        return Err(DiagnosticError::InvalidRequest(
            "student_id must not be empty".to_string(),
        ));
    }

    let mut observations = Vec::with_capacity(request.responses.len());
    for (position, response) in request.responses.iter().enumerate() {
        let invalid = |reason: String| DiagnosticError::InvalidResponse {
            position,
            item_id: response.item_id.clone(),
            reason,
        };

        if response.student_id != request.student_id {
            return Err(invalid(format!(
                "response belongs to student {}",
                response.student_id
            )));
        }
        if !response.time_spent.is_finite() || response.time_spent < 0.0 {
            return Err(invalid(format!(
                "time_spent must be a non-negative number, got {}",
                response.time_spent
            )));
        }
        let timestamp = response
            .parsed_timestamp()
            .map_err(|err| invalid(format!("malformed timestamp {:?}: {err}", response.timestamp)))?;

        observations.push(Observation {
            value: response.response_value,
            timestamp,
            position,
        });
    }

    observations.sort_by_key(|observation| observation.timestamp);
    Ok(observations)
}
