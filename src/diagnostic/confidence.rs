use serde::{Deserialize, Serialize};

use super::types::SkillMastery;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfidence {
    pub score: f64,
    /// Set when no skill carried any evidence; `score` is then 0 by
    /// definition rather than a measured value.
    pub flagged: bool,
}

/// Observation-weighted mean of per-skill confidence. Unobserved skills are
/// left out entirely.
pub fn aggregate(mastery_vector: &[SkillMastery]) -> AggregateConfidence {
    let (weighted, total) = mastery_vector
        .iter()
        .filter(|m| m.observation_count > 0.0)
        .fold((0.0, 0.0), |(weighted, total), m| {
            (
                weighted + m.confidence * m.observation_count,
                total + m.observation_count,
            )
        });

    if total <= 0.0 {
        return AggregateConfidence {
            score: 0.0,
            flagged: true,
        };
    }

    AggregateConfidence {
        score: (weighted / total).clamp(0.0, 1.0),
        flagged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mastery(skill_id: &str, confidence: f64, observation_count: f64) -> SkillMastery {
        SkillMastery {
            skill_id: skill_id.to_string(),
            mastery_score: 0.5,
            confidence,
            observation_count,
        }
    }

    #[test]
    fn empty_vector_is_flagged() {
        let result = aggregate(&[]);
        assert_eq!(result.score, 0.0);
        assert!(result.flagged);
    }

    #[test]
    fn weights_by_observation_count() {
        let result = aggregate(&[mastery("a", 0.5, 1.0), mastery("b", 0.75, 3.0)]);
        let expected = (0.5 * 1.0 + 0.75 * 3.0) / 4.0;
        assert!((result.score - expected).abs() < 1e-12);
        assert!(!result.flagged);
    }

    #[test]
    fn unobserved_skills_do_not_dilute() {
        let observed = aggregate(&[mastery("a", 0.8, 4.0)]);
        let with_unobserved = aggregate(&[mastery("a", 0.8, 4.0), mastery("b", 0.0, 0.0)]);
        assert_eq!(observed, with_unobserved);
    }

    #[test]
    fn only_unobserved_skills_is_flagged() {
        let result = aggregate(&[mastery("a", 0.0, 0.0)]);
        assert!(result.flagged);
        assert_eq!(result.score, 0.0);
    }
}
