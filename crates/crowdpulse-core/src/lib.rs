//! crowdpulse-core — Face analysis and panic scoring for field captures.
//!
//! SCRFD finds faces, an InsightFace genderage head estimates demographics,
//! a ViT expression model yields a fear-weighted score, and [`scoring`]
//! folds everything into per-face and group panic scores.

pub mod attributes;
pub mod context;
pub mod detector;
pub mod emotion;
pub mod pipeline;
pub mod scoring;
pub mod types;

pub use attributes::{FaceAnalyzer, GenderAgeEstimator, OnnxFaceAnalyzer};
pub use context::{default_model_dir, AnalysisContext, ModelCache, ModelPaths};
pub use detector::FaceDetector;
pub use emotion::{Emotion, EmotionClassifier, EmotionOutcome, VitEmotionClassifier};
pub use pipeline::{analyze_image, AnalysisError, AnalysisOptions, GroupStats, ImageAnalysis, PersonReport};
pub use scoring::{
    age_to_range, compute_group_panic, compute_panic_score, gender_risk_weight, group_size_factor,
    vulnerability_from_age, FaceScoreRecord,
};
pub use types::{BoundingBox, Gender, RawFace};
