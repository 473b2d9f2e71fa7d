//! Bayesian Knowledge Tracing
//!
//! Two-state latent model per skill (mastered / not mastered):
//! - Evidence step: Bayes' rule with guess and slip probabilities
//! - Transition step: chance of learning between observations
//! - Link weight blends the full step, so weakly linked items move the belief
//!   proportionally less and add proportionally less observation count
//!
//! The update is not commutative; callers must fold responses in timestamp order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::skill_map::{ItemSkillLink, SkillSpec};
use super::types::{ResponseValue, SkillMastery};

/// Rounding slack tolerated (and reported) before a probability is rejected.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error(
        "degenerate evidence for skill {skill_id}: p={mastery}, guess={guess}, slip={slip}, correct={correct}"
    )]
    DegenerateEvidence {
        skill_id: String,
        mastery: f64,
        guess: f64,
        slip: f64,
        correct: bool,
    },
    #[error("non-finite mastery probability for skill {skill_id}")]
    NonFinite { skill_id: String },
    #[error("mastery probability {value} for skill {skill_id} left [0, 1]")]
    OutOfRange { skill_id: String, value: f64 },
    #[error("invalid stored state for skill {skill_id}: {reason}")]
    InvalidState { skill_id: String, reason: String },
}

/// Belief about one (student, skill) pair within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillState {
    pub mastery_probability: f64,
    /// Sum of link weights of the responses absorbed so far.
    pub observation_count: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SkillState {
    pub fn from_prior(spec: &SkillSpec) -> Self {
        Self {
            mastery_probability: spec.prior_mastery,
            observation_count: 0.0,
            last_updated: None,
        }
    }

    pub fn confidence(&self) -> f64 {
        skill_confidence(self.observation_count)
    }

    fn validate(&self, skill_id: &str) -> Result<(), EstimationError> {
        let p = self.mastery_probability;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(EstimationError::InvalidState {
                skill_id: skill_id.to_string(),
                reason: format!("mastery_probability = {p}"),
            });
        }
        let n = self.observation_count;
        if !n.is_finite() || n < 0.0 {
            return Err(EstimationError::InvalidState {
                skill_id: skill_id.to_string(),
                reason: format!("observation_count = {n}"),
            });
        }
        Ok(())
    }
}

/// Saturating confidence: 0 with no evidence, approaching 1 as evidence grows.
pub fn skill_confidence(observation_count: f64) -> f64 {
    if observation_count <= 0.0 || !observation_count.is_finite() {
        return 0.0;
    }
    1.0 - 1.0 / (1.0 + observation_count)
}

/// A validated response ready to fold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub value: ResponseValue,
    pub timestamp: DateTime<Utc>,
    /// Index of the response in the request as submitted.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub state: SkillState,
    /// Raw value when the result had to be pulled back into [0, 1].
    pub clamped: Option<f64>,
}

pub fn update(
    state: &SkillState,
    observation: &Observation,
    link: &ItemSkillLink,
    spec: &SkillSpec,
) -> Result<Update, EstimationError> {
    let weight = link.weight;
    if weight <= 0.0 {
        return Ok(Update {
            state: state.clone(),
            clamped: None,
        });
    }

    let p = state.mastery_probability;
    let guess = spec.guess_probability;
    let slip = spec.slip_probability;
    let correct = observation.value.is_correct();

    let (numerator, denominator) = if correct {
        let mastered = p * (1.0 - slip);
        (mastered, mastered + (1.0 - p) * guess)
    } else {
        let mastered = p * slip;
        (mastered, mastered + (1.0 - p) * (1.0 - guess))
    };

    if denominator <= 0.0 || !denominator.is_finite() {
        return Err(EstimationError::DegenerateEvidence {
            skill_id: spec.skill_id.clone(),
            mastery: p,
            guess,
            slip,
            correct,
        });
    }

    let posterior = numerator / denominator;
    let learned = posterior + (1.0 - posterior) * spec.transit_probability;
    let blended = p + weight * (learned - p);

    let (mastery_probability, clamped) = check_probability(&spec.skill_id, blended)?;

    Ok(Update {
        state: SkillState {
            mastery_probability,
            observation_count: state.observation_count + weight,
            last_updated: Some(observation.timestamp),
        },
        clamped,
    })
}

fn check_probability(skill_id: &str, value: f64) -> Result<(f64, Option<f64>), EstimationError> {
    if !value.is_finite() {
        return Err(EstimationError::NonFinite {
            skill_id: skill_id.to_string(),
        });
    }
    if value < -PROBABILITY_TOLERANCE || value > 1.0 + PROBABILITY_TOLERANCE {
        return Err(EstimationError::OutOfRange {
            skill_id: skill_id.to_string(),
            value,
        });
    }
    if (0.0..=1.0).contains(&value) {
        Ok((value, None))
    } else {
        Ok((value.clamp(0.0, 1.0), Some(value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOutcome {
    Applied { clamped: Option<f64> },
    /// The observation predates state resumed from a store and was skipped.
    Stale,
}

#[derive(Debug, Clone)]
struct ArenaEntry {
    state: SkillState,
    resumed_from: Option<DateTime<Utc>>,
}

/// Skill states for a single diagnosis, in first-touch order.
#[derive(Debug, Clone, Default)]
pub struct MasteryArena {
    order: Vec<String>,
    entries: HashMap<String, ArenaEntry>,
}

impl MasteryArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a skill from a previously saved state instead of its prior.
    pub fn seed(&mut self, skill_id: &str, state: SkillState) -> Result<(), EstimationError> {
        state.validate(skill_id)?;
        if !self.entries.contains_key(skill_id) {
            self.order.push(skill_id.to_string());
        }
        let resumed_from = state.last_updated;
        self.entries.insert(
            skill_id.to_string(),
            ArenaEntry {
                state,
                resumed_from,
            },
        );
        Ok(())
    }

    pub fn touch(&mut self, spec: &SkillSpec) -> &SkillState {
        if !self.entries.contains_key(&spec.skill_id) {
            self.order.push(spec.skill_id.clone());
        }
        &self
            .entries
            .entry(spec.skill_id.clone())
            .or_insert_with(|| ArenaEntry {
                state: SkillState::from_prior(spec),
                resumed_from: None,
            })
            .state
    }

    pub fn apply(
        &mut self,
        observation: &Observation,
        link: &ItemSkillLink,
        spec: &SkillSpec,
    ) -> Result<ApplyOutcome, EstimationError> {
        self.touch(spec);
        let Some(entry) = self.entries.get_mut(&spec.skill_id) else {
            return Err(EstimationError::InvalidState {
                skill_id: spec.skill_id.clone(),
                reason: "missing arena entry".to_string(),
            });
        };

        if let Some(resumed_from) = entry.resumed_from {
            if observation.timestamp <= resumed_from {
                return Ok(ApplyOutcome::Stale);
            }
        }

        let next = update(&entry.state, observation, link, spec)?;
        entry.state = next.state;
        Ok(ApplyOutcome::Applied {
            clamped: next.clamped,
        })
    }

    pub fn get(&self, skill_id: &str) -> Option<&SkillState> {
        self.entries.get(skill_id).map(|entry| &entry.state)
    }

    pub fn snapshot(&self) -> Vec<SkillMastery> {
        self.iter()
            .map(|(skill_id, state)| SkillMastery {
                skill_id: skill_id.to_string(),
                mastery_score: state.mastery_probability,
                confidence: state.confidence(),
                observation_count: state.observation_count,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SkillState)> + '_ {
        self.order.iter().filter_map(|skill_id| {
            self.entries
                .get(skill_id)
                .map(|entry| (skill_id.as_str(), &entry.state))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn algebra() -> SkillSpec {
        SkillSpec {
            skill_id: "math.algebra.basic".to_string(),
            guess_probability: 0.2,
            slip_probability: 0.1,
            transit_probability: 0.15,
            prior_mastery: 0.3,
        }
    }

    fn link(weight: f64) -> ItemSkillLink {
        ItemSkillLink {
            item_id: "q1".to_string(),
            skill_id: "math.algebra.basic".to_string(),
            weight,
        }
    }

    fn observation(correct: bool, minute: u32) -> Observation {
        Observation {
            value: ResponseValue::from(correct),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap(),
            position: minute as usize,
        }
    }

    #[test]
    fn correct_answer_matches_closed_form() {
        let spec = algebra();
        let state = SkillState::from_prior(&spec);
        let next = update(&state, &observation(true, 0), &link(1.0), &spec).unwrap();

        // posterior = 0.27 / 0.41, then transit 0.15
        let posterior = 0.27 / 0.41;
        let expected = posterior + (1.0 - posterior) * 0.15;
        assert!((next.state.mastery_probability - expected).abs() < 1e-12);
        assert_eq!(next.state.observation_count, 1.0);
        assert!(next.clamped.is_none());
    }

    #[test]
    fn incorrect_answer_lowers_belief() {
        let spec = algebra();
        let state = SkillState {
            mastery_probability: 0.8,
            observation_count: 2.0,
            last_updated: None,
        };
        let next = update(&state, &observation(false, 0), &link(1.0), &spec).unwrap();
        assert!(next.state.mastery_probability < 0.8);
    }

    #[test]
    fn weight_scales_evidence() {
        let spec = algebra();
        let state = SkillState::from_prior(&spec);
        let full = update(&state, &observation(true, 0), &link(1.0), &spec).unwrap();
        let half = update(&state, &observation(true, 0), &link(0.5), &spec).unwrap();

        assert_eq!(half.state.observation_count, 0.5);
        assert!(half.state.mastery_probability > 0.3);
        assert!(half.state.mastery_probability < full.state.mastery_probability);
    }

    #[test]
    fn zero_weight_is_inert() {
        let spec = algebra();
        let state = SkillState::from_prior(&spec);
        let next = update(&state, &observation(true, 0), &link(0.0), &spec).unwrap();
        assert_eq!(next.state, state);
    }

    #[test]
    fn degenerate_parameters_are_reported() {
        let mut spec = algebra();
        spec.slip_probability = 1.0;
        let state = SkillState {
            mastery_probability: 1.0,
            observation_count: 0.0,
            last_updated: None,
        };
        let err = update(&state, &observation(true, 0), &link(1.0), &spec).unwrap_err();
        assert!(matches!(err, EstimationError::DegenerateEvidence { .. }));
    }

    #[test]
    fn tolerance_clamps_and_reports() {
        let (value, clamped) = check_probability("s", 1.0 + 1e-12).unwrap();
        assert_eq!(value, 1.0);
        assert!(clamped.is_some());
        assert!(check_probability("s", 1.01).is_err());
        assert!(check_probability("s", f64::NAN).is_err());
    }

    #[test]
    fn confidence_saturates() {
        assert_eq!(skill_confidence(0.0), 0.0);
        assert_eq!(skill_confidence(1.0), 0.5);
        assert!(skill_confidence(100.0) > 0.99);
        assert!(skill_confidence(100.0) < 1.0);
    }

    #[test]
    fn arena_keeps_first_touch_order() {
        let mut geometry = algebra();
        geometry.skill_id = "math.geometry.area".to_string();

        let mut arena = MasteryArena::new();
        arena.touch(&geometry);
        arena.touch(&algebra());
        arena.touch(&geometry);

        let ids: Vec<_> = arena.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["math.geometry.area", "math.algebra.basic"]);
    }

    #[test]
    fn resumed_state_skips_replayed_observations() {
        let spec = algebra();
        let resumed = SkillState {
            mastery_probability: 0.6,
            observation_count: 3.0,
            last_updated: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()),
        };

        let mut arena = MasteryArena::new();
        arena.seed(&spec.skill_id, resumed).unwrap();

        let replay = arena.apply(&observation(true, 5), &link(1.0), &spec).unwrap();
        assert_eq!(replay, ApplyOutcome::Stale);

        let fresh = arena.apply(&observation(true, 6), &link(1.0), &spec).unwrap();
        assert!(matches!(fresh, ApplyOutcome::Applied { .. }));
        assert_eq!(arena.get(&spec.skill_id).unwrap().observation_count, 4.0);
    }

    #[test]
    fn seed_rejects_corrupt_state() {
        let mut arena = MasteryArena::new();
        let err = arena
            .seed(
                "math.algebra.basic",
                SkillState {
                    mastery_probability: 1.5,
                    observation_count: 1.0,
                    last_updated: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidState { .. }));
    }
}
