//! Per-image analysis: faces → per-face reports → group panic score.

use crate::attributes::{AttributeError, FaceAnalyzer};
use crate::detector::DetectorError;
use crate::emotion::{EmotionClassifier, EmotionError, EmotionOutcome};
use crate::scoring::{
    age_to_range, compute_group_panic, compute_panic_score, gender_risk_weight,
    vulnerability_from_age, FaceScoreRecord,
};
use crate::types::{Gender, RawFace};
use base64::Engine;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Age assumed when the attribute model gives no estimate.
pub const DEFAULT_AGE: u32 = 25;
/// Confidence assumed when the detector reports no score.
pub const DEFAULT_CONFIDENCE: f32 = 1.0;

const CROP_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("could not read image {path}: {source}")]
    ImageRead {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("attribute model error: {0}")]
    Attribute(#[from] AttributeError),
    #[error("expression model error: {0}")]
    Emotion(#[from] EmotionError),
}

/// Options controlling what an analysis report carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Attach a base64 JPEG data URL of every face crop.
    pub include_crops: bool,
}

/// Group-level statistics for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Faces reported by the detector, including ones whose crop was empty.
    pub total_faces: usize,
    pub male_count: usize,
    pub female_count: usize,
    /// Group panic score in [0, 100].
    pub panic_score: f64,
}

/// Display-ready details for one scored face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonReport {
    /// Detector index of this face.
    pub id: usize,
    pub gender: Gender,
    pub age: u32,
    pub age_range: String,
    pub emotion_label: String,
    /// Reason the expression model gave no label, if it failed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub emotion_error: Option<String>,
    pub confidence: f64,
    pub fear_score: f64,
    pub vulnerability: f64,
    pub panic_score: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub crop_base64: Option<String>,
}

/// Full result of analysing one capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub group_stats: GroupStats,
    pub faces: Vec<PersonReport>,
}

impl ImageAnalysis {
    /// Count of faces per expression label (including `"N/A"`).
    pub fn emotion_summary(&self) -> std::collections::BTreeMap<String, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for face in &self.faces {
            *counts.entry(face.emotion_label.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Analyse one RGB capture.
///
/// Faces whose box does not overlap the image are skipped but still count
/// towards `total_faces`. Missing age and confidence values are replaced by
/// [`DEFAULT_AGE`] and [`DEFAULT_CONFIDENCE`]; an unavailable expression
/// scores as fear 0.0 with label `"N/A"`.
pub fn analyze_image(
    analyzer: &mut dyn FaceAnalyzer,
    classifier: &mut dyn EmotionClassifier,
    image: &RgbImage,
    options: &AnalysisOptions,
) -> Result<ImageAnalysis, AnalysisError> {
    let faces = analyzer.detect_faces(image)?;
    if faces.is_empty() {
        tracing::debug!("no faces detected");
        return Ok(ImageAnalysis::default());
    }

    let mut records = Vec::with_capacity(faces.len());
    let mut reports = Vec::with_capacity(faces.len());
    let mut male_count = 0;
    let mut female_count = 0;

    for (idx, face) in faces.iter().enumerate() {
        let Some(rect) = face.bbox.clip_to(image.width(), image.height()) else {
            tracing::debug!(face = idx, "face crop empty, skipping");
            continue;
        };
        let crop = image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();

        match face.gender {
            Gender::Male => male_count += 1,
            Gender::Female => female_count += 1,
        }

        let emotion = classifier.classify(&crop);
        let (record, report) = score_face(idx, face, &emotion);
        let crop_base64 = if options.include_crops {
            encode_crop(&crop)
        } else {
            None
        };

        records.push(record);
        reports.push(PersonReport { crop_base64, ..report });
    }

    let panic_score = compute_group_panic(&records);
    tracing::info!(
        total_faces = faces.len(),
        scored = records.len(),
        male_count,
        female_count,
        panic_score,
        "image analysed"
    );

    Ok(ImageAnalysis {
        group_stats: GroupStats {
            total_faces: faces.len(),
            male_count,
            female_count,
            panic_score,
        },
        faces: reports,
    })
}

/// Apply upstream defaults and score a single face.
fn score_face(id: usize, face: &RawFace, emotion: &EmotionOutcome) -> (FaceScoreRecord, PersonReport) {
    let age = face.age.unwrap_or(DEFAULT_AGE);
    let age_i = i32::try_from(age).unwrap_or(i32::MAX);
    let age_vuln = vulnerability_from_age(Some(age_i));
    let gender_score = gender_risk_weight(face.gender);
    let face_conf = face.det_score.unwrap_or(DEFAULT_CONFIDENCE) as f64;
    let fear = emotion.fear_score() as f64;

    let (raw_score, panic_score) = compute_panic_score(age_vuln, fear, gender_score, face_conf);

    let emotion_error = match emotion {
        EmotionOutcome::Unavailable { reason } => Some(reason.clone()),
        EmotionOutcome::Classified { .. } => None,
    };

    let record = FaceScoreRecord {
        emo_fear: fear,
        age_vuln,
        gender_score,
        face_conf,
        raw_score,
    };
    let report = PersonReport {
        id,
        gender: face.gender,
        age,
        age_range: age_to_range(age_i),
        emotion_label: emotion.label().to_string(),
        emotion_error,
        confidence: face_conf,
        fear_score: fear,
        vulnerability: age_vuln,
        panic_score,
        crop_base64: None,
    };
    (record, report)
}

fn encode_crop(crop: &RgbImage) -> Option<String> {
    let mut buf = Cursor::new(Vec::new());
    if let Err(e) = crop.write_to(&mut buf, ImageFormat::Jpeg) {
        tracing::warn!(error = %e, "failed to encode face crop");
        return None;
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(buf.into_inner());
    Some(format!("{CROP_DATA_URL_PREFIX}{encoded}"))
}
