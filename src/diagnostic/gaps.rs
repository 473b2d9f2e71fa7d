use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::skill_map::CatalogError;
use super::types::{Gap, GapSeverity, SkillMastery};

const FALLBACK_RECOMMENDATION: &str = "Review this skill";

/// Upper bounds (exclusive) of each severity bucket. A score equal to a bound
/// belongs to the next, less severe bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapThresholds {
    pub high_below: f64,
    pub medium_below: f64,
    /// Defaults to `medium_below`, leaving the low bucket empty.
    pub low_below: Option<f64>,
}

impl Default for GapThresholds {
    fn default() -> Self {
        Self {
            high_below: 0.4,
            medium_below: 0.7,
            low_below: None,
        }
    }
}

impl GapThresholds {
    pub fn low_bound(&self) -> f64 {
        self.low_below.unwrap_or(self.medium_below)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let bounds = [self.high_below, self.medium_below, self.low_bound()];
        if bounds.iter().any(|b| !b.is_finite() || !(0.0..=1.0).contains(b)) {
            return Err(CatalogError::InvalidThresholds(format!(
                "bounds must lie in [0, 1], got {bounds:?}"
            )));
        }
        if !(bounds[0] <= bounds[1] && bounds[1] <= bounds[2]) {
            return Err(CatalogError::InvalidThresholds(format!(
                "bounds must be non-decreasing (high <= medium <= low), got {bounds:?}"
            )));
        }
        Ok(())
    }

    pub fn severity_for(&self, mastery_score: f64) -> Option<GapSeverity> {
        if mastery_score < self.high_below {
            Some(GapSeverity::High)
        } else if mastery_score < self.medium_below {
            Some(GapSeverity::Medium)
        } else if mastery_score < self.low_bound() {
            Some(GapSeverity::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityText {
    pub low: Option<String>,
    pub medium: Option<String>,
    pub high: Option<String>,
}

impl SeverityText {
    pub fn get(&self, severity: GapSeverity) -> Option<&str> {
        match severity {
            GapSeverity::Low => self.low.as_deref(),
            GapSeverity::Medium => self.medium.as_deref(),
            GapSeverity::High => self.high.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationTable {
    pub by_skill: HashMap<String, SeverityText>,
    pub defaults: SeverityText,
}

impl Default for RecommendationTable {
    fn default() -> Self {
        Self {
            by_skill: HashMap::new(),
            defaults: SeverityText {
                low: Some("Brief review recommended".to_string()),
                medium: Some("Additional practice needed".to_string()),
                high: Some("Focus on fundamental concepts before advancing".to_string()),
            },
        }
    }
}

impl RecommendationTable {
    pub fn recommend(&self, skill_id: &str, severity: GapSeverity) -> &str {
        self.by_skill
            .get(skill_id)
            .and_then(|text| text.get(severity))
            .or_else(|| self.defaults.get(severity))
            .unwrap_or(FALLBACK_RECOMMENDATION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    pub thresholds: GapThresholds,
    pub recommendations: RecommendationTable,
}

/// One gap per skill below the no-gap bound, in mastery-vector order.
pub fn classify(mastery_vector: &[SkillMastery], config: &GapConfig) -> Vec<Gap> {
    mastery_vector
        .iter()
        .filter_map(|mastery| {
            let severity = config.thresholds.severity_for(mastery.mastery_score)?;
            Some(Gap {
                skill_id: mastery.skill_id.clone(),
                severity,
                recommendation: config
                    .recommendations
                    .recommend(&mastery.skill_id, severity)
                    .to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mastery(skill_id: &str, score: f64) -> SkillMastery {
        SkillMastery {
            skill_id: skill_id.to_string(),
            mastery_score: score,
            confidence: 0.5,
            observation_count: 1.0,
        }
    }

    #[test]
    fn boundaries_resolve_to_lower_severity() {
        let thresholds = GapThresholds::default();
        assert_eq!(thresholds.severity_for(0.39), Some(GapSeverity::High));
        assert_eq!(thresholds.severity_for(0.4), Some(GapSeverity::Medium));
        assert_eq!(thresholds.severity_for(0.69), Some(GapSeverity::Medium));
        assert_eq!(thresholds.severity_for(0.7), None);
    }

    #[test]
    fn low_band_is_empty_unless_configured() {
        let mut thresholds = GapThresholds::default();
        assert_eq!(thresholds.severity_for(0.75), None);

        thresholds.low_below = Some(0.85);
        assert_eq!(thresholds.severity_for(0.7), Some(GapSeverity::Low));
        assert_eq!(thresholds.severity_for(0.85), None);
    }

    #[test]
    fn preserves_input_order() {
        let vector = vec![
            mastery("a", 0.6),
            mastery("b", 0.9),
            mastery("c", 0.1),
        ];
        let gaps = classify(&vector, &GapConfig::default());

        let ids: Vec<_> = gaps.iter().map(|g| g.skill_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(gaps[0].severity, GapSeverity::Medium);
        assert_eq!(gaps[1].severity, GapSeverity::High);
    }

    #[test]
    fn skill_specific_recommendation_wins() {
        let mut config = GapConfig::default();
        config.recommendations.by_skill.insert(
            "geometry.area".to_string(),
            SeverityText {
                high: Some("Revisit area formulas with diagrams".to_string()),
                ..Default::default()
            },
        );

        let gaps = classify(
            &[mastery("geometry.area", 0.2), mastery("geometry.area.b", 0.2)],
            &config,
        );
        assert_eq!(gaps[0].recommendation, "Revisit area formulas with diagrams");
        assert_eq!(
            gaps[1].recommendation,
            "Focus on fundamental concepts before advancing"
        );

        // Medium falls through to the default table.
        assert_eq!(
            config.recommendations.recommend("geometry.area", GapSeverity::Medium),
            "Additional practice needed"
        );
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let thresholds = GapThresholds {
            high_below: 0.8,
            medium_below: 0.5,
            low_below: None,
        };
        assert!(thresholds.validate().is_err());
        assert!(GapThresholds::default().validate().is_ok());
    }
}
