//! Item to skill resolution and the versioned catalog that carries it.
//!
//! A [`SkillCatalog`] bundles the skill map with gap configuration. The
//! engine reads catalogs through a [`CatalogHandle`], which swaps the whole
//! catalog atomically; a diagnosis holds its own `Arc` snapshot for the
//! duration of the fold.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::gaps::GapConfig;

#[derive(Debug, Error)]
#[error("item {0} has no registered skill links")]
pub struct UnknownItemError(pub String);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid parameters for skill {skill_id}: {reason}")]
    InvalidSkill { skill_id: String, reason: String },
    #[error("duplicate skill: {0}")]
    DuplicateSkill(String),
    #[error("duplicate item: {0}")]
    DuplicateItem(String),
    #[error("item {item_id} links skill {skill_id} more than once")]
    DuplicateLink { item_id: String, skill_id: String },
    #[error("item {item_id} links undeclared skill {skill_id}")]
    UnknownSkillLink { item_id: String, skill_id: String },
    #[error("item {item_id} has invalid weight {weight} for skill {skill_id}")]
    InvalidWeight {
        item_id: String,
        skill_id: String,
        weight: f64,
    },
    #[error("invalid gap thresholds: {0}")]
    InvalidThresholds(String),
}

/// Calibrated knowledge-tracing parameters for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSpec {
    pub skill_id: String,
    /// P(correct | not mastered)
    pub guess_probability: f64,
    /// P(incorrect | mastered)
    pub slip_probability: f64,
    /// P(not mastered -> mastered) between observations
    pub transit_probability: f64,
    pub prior_mastery: f64,
}

impl SkillSpec {
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.skill_id.trim().is_empty() {
            return Err(CatalogError::InvalidSkill {
                skill_id: self.skill_id.clone(),
                reason: "empty skill id".to_string(),
            });
        }

        let params = [
            ("guess_probability", self.guess_probability),
            ("slip_probability", self.slip_probability),
            ("transit_probability", self.transit_probability),
            ("prior_mastery", self.prior_mastery),
        ];
        for (name, value) in params {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CatalogError::InvalidSkill {
                    skill_id: self.skill_id.clone(),
                    reason: format!("{name} = {value} is outside [0, 1]"),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSkillLink {
    pub item_id: String,
    pub skill_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEntry {
    pub skill_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEntry {
    pub item_id: String,
    pub links: Vec<LinkEntry>,
}

/// On-disk catalog format, as produced by the offline calibration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub skills: Vec<SkillSpec>,
    pub items: Vec<ItemEntry>,
    #[serde(default)]
    pub gaps: GapConfig,
}

#[derive(Debug, Clone, Default)]
pub struct SkillMap {
    skills: HashMap<String, SkillSpec>,
    items: HashMap<String, Vec<ItemSkillLink>>,
}

impl SkillMap {
    pub fn new(skills: Vec<SkillSpec>, links: Vec<ItemSkillLink>) -> Result<Self, CatalogError> {
        let mut skill_index = HashMap::with_capacity(skills.len());
        for spec in skills {
            spec.validate()?;
            if skill_index.contains_key(&spec.skill_id) {
                return Err(CatalogError::DuplicateSkill(spec.skill_id));
            }
            skill_index.insert(spec.skill_id.clone(), spec);
        }

        let mut items: HashMap<String, Vec<ItemSkillLink>> = HashMap::new();
        let mut seen = HashSet::new();
        for link in links {
            if !skill_index.contains_key(&link.skill_id) {
                return Err(CatalogError::UnknownSkillLink {
                    item_id: link.item_id,
                    skill_id: link.skill_id,
                });
            }
            // Zero is accepted: the link is recorded but carries no evidence.
            if !link.weight.is_finite() || !(0.0..=1.0).contains(&link.weight) {
                return Err(CatalogError::InvalidWeight {
                    item_id: link.item_id,
                    skill_id: link.skill_id,
                    weight: link.weight,
                });
            }
            if !seen.insert((link.item_id.clone(), link.skill_id.clone())) {
                return Err(CatalogError::DuplicateLink {
                    item_id: link.item_id,
                    skill_id: link.skill_id,
                });
            }
            items.entry(link.item_id.clone()).or_default().push(link);
        }

        Ok(Self {
            skills: skill_index,
            items,
        })
    }

    pub fn from_items(skills: Vec<SkillSpec>, items: Vec<ItemEntry>) -> Result<Self, CatalogError> {
        let mut item_ids = HashSet::with_capacity(items.len());
        let mut links = Vec::new();
        for entry in items {
            if !item_ids.insert(entry.item_id.clone()) {
                return Err(CatalogError::DuplicateItem(entry.item_id));
            }
            links.extend(entry.links.into_iter().map(|link| ItemSkillLink {
                item_id: entry.item_id.clone(),
                skill_id: link.skill_id,
                weight: link.weight,
            }));
        }
        Self::new(skills, links)
    }

    pub fn resolve(&self, item_id: &str) -> Result<&[ItemSkillLink], UnknownItemError> {
        match self.items.get(item_id) {
            Some(links) if !links.is_empty() => Ok(links.as_slice()),
            _ => Err(UnknownItemError(item_id.to_string())),
        }
    }

    pub fn skill(&self, skill_id: &str) -> Option<&SkillSpec> {
        self.skills.get(skill_id)
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    version: u64,
    skill_map: SkillMap,
    gaps: GapConfig,
}

impl SkillCatalog {
    pub fn new(skill_map: SkillMap, gaps: GapConfig) -> Result<Self, CatalogError> {
        gaps.thresholds.validate()?;
        Ok(Self {
            version: 0,
            skill_map,
            gaps,
        })
    }

    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let skill_map = SkillMap::from_items(document.skills, document.items)?;
        Self::new(skill_map, document.gaps)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Assigned by [`CatalogHandle`] on install; 0 for a detached catalog.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn skill_map(&self) -> &SkillMap {
        &self.skill_map
    }

    pub fn gaps(&self) -> &GapConfig {
        &self.gaps
    }
}

/// Process-wide catalog slot with whole-catalog replacement.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<SkillCatalog>>,
}

impl CatalogHandle {
    pub fn new(mut catalog: SkillCatalog) -> Self {
        catalog.version = 1;
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<SkillCatalog> {
        Arc::clone(&self.current.read())
    }

    /// Installs `catalog` and returns its version. Diagnoses already holding a
    /// snapshot keep folding against the previous catalog.
    pub fn replace(&self, mut catalog: SkillCatalog) -> u64 {
        let mut current = self.current.write();
        catalog.version = current.version + 1;
        let version = catalog.version;
        *current = Arc::new(catalog);
        version
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}
