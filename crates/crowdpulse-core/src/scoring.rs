//! Panic score aggregation.
//!
//! Turns per-face model outputs (age, gender, fear-weighted emotion score,
//! detection confidence) into a per-face panic score and a group-level
//! panic score for one captured image. Everything here is pure and total:
//! callers substitute defaults for missing model outputs before scoring.

use crate::types::Gender;
use serde::{Deserialize, Serialize};

// --- Per-face weights (sum to 1.0) ---
const W_AGE: f64 = 0.4;
const W_FEAR: f64 = 0.4;
const W_GENDER: f64 = 0.2;

// --- Group weights (sum to 1.0) ---
const W_GROUP_FEAR: f64 = 0.45;
const W_GROUP_AGE: f64 = 0.35;
const W_GROUP_GENDER: f64 = 0.20;

/// Blend between the group-wide signal and the most alarming individual.
const GROUP_ALPHA: f64 = 0.6;
const GROUP_BETA: f64 = 0.4;

// --- Group-size factor ---
const GSF_NEUTRAL_SIZE: f64 = 3.0;
const GSF_DIVISOR: f64 = 6.0;
const GSF_MIN: f64 = 0.7;
const GSF_MAX: f64 = 1.5;

const MALE_RISK_WEIGHT: f64 = 0.8;
const FEMALE_RISK_WEIGHT: f64 = 1.0;

/// Vulnerability used when no age estimate is available.
const UNKNOWN_AGE_VULNERABILITY: f64 = 0.2;

/// Downward bias applied to age estimates before bucketing for display.
const AGE_DISPLAY_BIAS: i32 = 5;

const AGE_BUCKETS: [(i32, i32); 20] = [
    (1, 5), (6, 10), (11, 15), (16, 20), (21, 25), (26, 30), (31, 35),
    (36, 40), (41, 45), (46, 50), (51, 55), (56, 60), (61, 65), (66, 70),
    (71, 75), (76, 80), (81, 85), (86, 90), (91, 95), (96, 100),
];

const AGE_OVERFLOW_LABEL: &str = "100+";

/// Map an age estimate to a vulnerability weight in [0, 1].
///
/// | age   | weight |
/// |-------|--------|
/// | ≤ 11  | 1.0    |
/// | 12–17 | 0.6    |
/// | 18–64 | 0.2    |
/// | ≥ 65  | 0.9    |
/// | None  | 0.2    |
pub fn vulnerability_from_age(age: Option<i32>) -> f64 {
    match age {
        None => UNKNOWN_AGE_VULNERABILITY,
        Some(a) if a <= 11 => 1.0,
        Some(a) if a <= 17 => 0.6,
        Some(a) if a <= 64 => 0.2,
        Some(_) => 0.9,
    }
}

/// Display label for an age estimate: one of twenty 5-year buckets
/// (`"1-5"` … `"96-100"`) after a 5-year downward bias, or `"100+"`.
///
/// A biased age of 0 lands in the first bucket. A biased age of 100 or
/// more is reported as `"100+"`.
pub fn age_to_range(age: i32) -> String {
    let biased = age.saturating_sub(AGE_DISPLAY_BIAS).max(0);
    if biased >= 100 {
        return AGE_OVERFLOW_LABEL.to_string();
    }
    let biased = biased.max(1);
    AGE_BUCKETS
        .iter()
        .find(|(start, end)| (*start..=*end).contains(&biased))
        .map(|(start, end)| format!("{start}-{end}"))
        .unwrap_or_else(|| AGE_OVERFLOW_LABEL.to_string())
}

/// Gender risk weight: 0.8 for male, 1.0 for female.
pub fn gender_risk_weight(gender: Gender) -> f64 {
    match gender {
        Gender::Male => MALE_RISK_WEIGHT,
        Gender::Female => FEMALE_RISK_WEIGHT,
    }
}

/// Per-face panic score.
///
/// Returns `(raw, panic)` where `raw = 0.4*age_vuln + 0.4*fear + 0.2*gender_score`
/// and `panic = raw * conf * 100`. Inputs are expected in [0, 1]; the result
/// is not clamped.
pub fn compute_panic_score(age_vuln: f64, fear: f64, gender_score: f64, conf: f64) -> (f64, f64) {
    let raw = W_AGE * age_vuln + W_FEAR * fear + W_GENDER * gender_score;
    (raw, raw * conf * 100.0)
}

/// Group-size factor: `clamp(1 + (3 - n) / 6, 0.7, 1.5)`.
pub fn group_size_factor(group_size: usize) -> f64 {
    (1.0 + (GSF_NEUTRAL_SIZE - group_size as f64) / GSF_DIVISOR).clamp(GSF_MIN, GSF_MAX)
}

/// Derived per-face values that feed the group score.
///
/// Field names follow the JSON records exchanged with callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceScoreRecord {
    pub emo_fear: f64,
    pub age_vuln: f64,
    pub gender_score: f64,
    pub face_conf: f64,
    pub raw_score: f64,
}

impl FaceScoreRecord {
    /// Build a record from scoring inputs, computing `raw_score`.
    pub fn new(emo_fear: f64, age_vuln: f64, gender_score: f64, face_conf: f64) -> Self {
        let (raw_score, _) = compute_panic_score(age_vuln, emo_fear, gender_score, face_conf);
        Self { emo_fear, age_vuln, gender_score, face_conf, raw_score }
    }

    /// Panic score on the 0–100 scale for this face alone.
    pub fn panic_score(&self) -> f64 {
        self.raw_score * self.face_conf * 100.0
    }
}

/// Group panic score in [0, 100] for all faces of one image.
///
/// Empty input yields exactly 0.0.
pub fn compute_group_panic(faces: &[FaceScoreRecord]) -> f64 {
    if faces.is_empty() {
        return 0.0;
    }

    let mean_fear = mean_of(faces, |f| f.emo_fear);
    let mean_age_vuln = mean_of(faces, |f| f.age_vuln);
    let mean_gender = mean_of(faces, |f| f.gender_score);
    let mean_conf = mean_of(faces, |f| f.face_conf);
    let max_individual_raw = faces
        .iter()
        .map(|f| f.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    let g_raw = W_GROUP_FEAR * mean_fear + W_GROUP_AGE * mean_age_vuln + W_GROUP_GENDER * mean_gender;
    let gsf = group_size_factor(faces.len());
    let g_score_raw = g_raw * mean_conf * gsf;

    let blended = (GROUP_ALPHA * g_score_raw + GROUP_BETA * max_individual_raw).clamp(0.0, 1.0);
    tracing::trace!(
        faces = faces.len(),
        g_raw,
        gsf,
        max_individual_raw,
        blended,
        "group panic computed"
    );
    100.0 * blended
}

fn mean_of(faces: &[FaceScoreRecord], field: impl Fn(&FaceScoreRecord) -> f64) -> f64 {
    faces.iter().map(field).sum::<f64>() / faces.len() as f64
}
