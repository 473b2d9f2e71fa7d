use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseValue {
    Correct,
    Incorrect,
}

impl ResponseValue {
    pub fn is_correct(self) -> bool {
        matches!(self, ResponseValue::Correct)
    }
}

impl From<bool> for ResponseValue {
    fn from(correct: bool) -> Self {
        if correct {
            ResponseValue::Correct
        } else {
            ResponseValue::Incorrect
        }
    }
}

impl FromStr for ResponseValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "correct" | "true" | "1" => Ok(ResponseValue::Correct),
            "incorrect" | "false" | "0" => Ok(ResponseValue::Incorrect),
            other => Err(format!("unrecognized response value: {other}")),
        }
    }
}

/// One observed answer. `timestamp` is RFC 3339 as delivered by the platform
/// and is only trusted after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub student_id: String,
    pub item_id: String,
    pub response_value: ResponseValue,
    /// Seconds spent on the item.
    pub time_spent: f64,
    pub timestamp: String,
}

impl Response {
    pub fn new(
        student_id: impl Into<String>,
        item_id: impl Into<String>,
        response_value: ResponseValue,
        time_spent: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            item_id: item_id.into(),
            response_value,
            time_spent,
            timestamp: timestamp.to_rfc3339(),
        }
    }

    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(&self.timestamp).map(|ts| ts.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRequest {
    pub student_id: String,
    pub assessment_id: String,
    pub responses: Vec<Response>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMastery {
    pub skill_id: String,
    pub mastery_score: f64,
    pub confidence: f64,
    pub observation_count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Low,
    Medium,
    High,
}

impl GapSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapSeverity::Low => "low",
            GapSeverity::Medium => "medium",
            GapSeverity::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub skill_id: String,
    pub severity: GapSeverity,
    pub recommendation: String,
}

/// Recoverable anomalies recorded while diagnosing. `position` is the index
/// of the response in the request as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticWarning {
    UnknownItem {
        item_id: String,
        position: usize,
    },
    StaleResponse {
        item_id: String,
        skill_id: String,
        position: usize,
    },
    ClampedProbability {
        skill_id: String,
        value: f64,
    },
    EmptyResponseSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub diagnosis_id: Uuid,
    pub student_id: String,
    pub assessment_id: String,
    pub mastery_vector: Vec<SkillMastery>,
    pub gaps: Vec<Gap>,
    pub confidence_score: f64,
    pub low_confidence: bool,
    pub warnings: Vec<DiagnosticWarning>,
    pub catalog_version: u64,
    #[serde(rename = "processing_time_ms", with = "duration_ms")]
    pub processing_time: Duration,
}

// Integer milliseconds on the wire.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl DiagnosticResult {
    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time.as_millis() as u64
    }

    pub fn skill(&self, skill_id: &str) -> Option<&SkillMastery> {
        self.mastery_vector.iter().find(|m| m.skill_id == skill_id)
    }
}
