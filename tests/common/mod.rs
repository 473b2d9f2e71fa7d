#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};

use skill_diagnostic_engine::diagnostic::{
    GapConfig, ItemSkillLink, SkillCatalog, SkillMap, SkillSpec,
};
use skill_diagnostic_engine::{DiagnosticRequest, Response, ResponseValue};

pub const ALGEBRA: &str = "math.algebra.basic";
pub const GEOMETRY: &str = "math.geometry.area";
pub const FRACTIONS: &str = "math.fractions.compare";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 16, 8, 30, 0).unwrap()
}

pub fn spec(skill_id: &str, prior_mastery: f64) -> SkillSpec {
    SkillSpec {
        skill_id: skill_id.to_string(),
        guess_probability: 0.2,
        slip_probability: 0.1,
        transit_probability: 0.15,
        prior_mastery,
    }
}

pub fn link(item_id: &str, skill_id: &str, weight: f64) -> ItemSkillLink {
    ItemSkillLink {
        item_id: item_id.to_string(),
        skill_id: skill_id.to_string(),
        weight,
    }
}

/// alg-*: algebra only; geo-*: geometry only; mixed-1: algebra plus a
/// half-weight geometry link; probe-1: algebra plus an inert fractions link.
pub fn sample_catalog() -> SkillCatalog {
    let map = SkillMap::new(
        vec![
            spec(ALGEBRA, 0.3),
            spec(GEOMETRY, 0.5),
            spec(FRACTIONS, 0.4),
        ],
        vec![
            link("alg-1", ALGEBRA, 1.0),
            link("alg-2", ALGEBRA, 1.0),
            link("alg-3", ALGEBRA, 1.0),
            link("geo-1", GEOMETRY, 1.0),
            link("geo-2", GEOMETRY, 1.0),
            link("mixed-1", ALGEBRA, 1.0),
            link("mixed-1", GEOMETRY, 0.5),
            link("probe-1", ALGEBRA, 1.0),
            link("probe-1", FRACTIONS, 0.0),
        ],
    )
    .unwrap();
    SkillCatalog::new(map, GapConfig::default()).unwrap()
}

pub fn response_at(student_id: &str, item_id: &str, correct: bool, offset_secs: i64) -> Response {
    Response::new(
        student_id,
        item_id,
        ResponseValue::from(correct),
        20.0,
        base_time() + Duration::seconds(offset_secs),
    )
}

pub fn request(student_id: &str, responses: Vec<(&str, bool, i64)>) -> DiagnosticRequest {
    DiagnosticRequest {
        student_id: student_id.to_string(),
        assessment_id: "assessment-1".to_string(),
        responses: responses
            .into_iter()
            .map(|(item_id, correct, offset)| response_at(student_id, item_id, correct, offset))
            .collect(),
    }
}

pub fn malformed_request(student_id: &str) -> DiagnosticRequest {
    let mut req = request(student_id, vec![("alg-1", true, 0)]);
    req.responses[0].timestamp = "not-a-timestamp".to_string();
    req
}
