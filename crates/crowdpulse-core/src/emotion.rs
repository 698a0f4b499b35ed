//! Facial expression classification via ONNX Runtime.
//!
//! Classifies a face crop into one of seven expressions with a ViT model
//! exported to ONNX, and derives a fear-weighted distress score from the
//! class probabilities.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// --- ViT image processor constants ---
const VIT_INPUT_SIZE: u32 = 224;
const VIT_MEAN: f32 = 0.5;
const VIT_STD: f32 = 0.5;

// --- Fear-weighted score coefficients ---
const FEAR_WEIGHT_SURPRISE: f32 = 0.5;
const FEAR_WEIGHT_ANGRY: f32 = 0.3;
const FEAR_WEIGHT_DISGUST: f32 = 0.2;

/// Label reported when no expression could be classified.
pub const UNAVAILABLE_LABEL: &str = "N/A";

/// The seven expression classes, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happy => "Happy",
            Emotion::Sad => "Sad",
            Emotion::Surprise => "Surprise",
            Emotion::Neutral => "Neutral",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of classifying one face crop.
///
/// `Unavailable` keeps the reason so callers can surface a diagnostic
/// instead of silently scoring a neutral face.
#[derive(Debug, Clone, PartialEq)]
pub enum EmotionOutcome {
    Classified { label: Emotion, fear_score: f32 },
    Unavailable { reason: String },
}

impl EmotionOutcome {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        EmotionOutcome::Unavailable { reason: reason.into() }
    }

    /// Expression label, or `"N/A"`.
    pub fn label(&self) -> &'static str {
        match self {
            EmotionOutcome::Classified { label, .. } => label.as_str(),
            EmotionOutcome::Unavailable { .. } => UNAVAILABLE_LABEL,
        }
    }

    /// Fear-weighted score in [0, 1], or 0.0 when unavailable.
    pub fn fear_score(&self) -> f32 {
        match self {
            EmotionOutcome::Classified { fear_score, .. } => *fear_score,
            EmotionOutcome::Unavailable { .. } => 0.0,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, EmotionOutcome::Classified { .. })
    }
}

/// `fear + 0.5*surprise + 0.3*angry + 0.2*disgust`, clamped to [0, 1].
pub fn fear_weighted_score(probs: &[f32; 7]) -> f32 {
    let p = |e: Emotion| probs[e as usize];
    (p(Emotion::Fear)
        + FEAR_WEIGHT_SURPRISE * p(Emotion::Surprise)
        + FEAR_WEIGHT_ANGRY * p(Emotion::Angry)
        + FEAR_WEIGHT_DISGUST * p(Emotion::Disgust))
    .clamp(0.0, 1.0)
}

/// Numerically stable softmax over the seven class logits.
fn softmax(logits: &[f32; 7]) -> [f32; 7] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out = [0.0f32; 7];
    let mut sum = 0.0f32;
    for (o, &l) in out.iter_mut().zip(logits.iter()) {
        *o = (l - max).exp();
        sum += *o;
    }
    if sum > 0.0 {
        for o in out.iter_mut() {
            *o /= sum;
        }
    }
    out
}

/// Turn class probabilities into an outcome (argmax label + fear score).
pub fn outcome_from_probs(probs: &[f32; 7]) -> EmotionOutcome {
    let idx = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(Emotion::Neutral as usize);

    match Emotion::from_index(idx) {
        Some(label) => EmotionOutcome::Classified {
            label,
            fear_score: fear_weighted_score(probs),
        },
        None => EmotionOutcome::unavailable(format!("class index {idx} out of range")),
    }
}

/// Strategy for classifying the expression on a face crop.
pub trait EmotionClassifier {
    fn classify(&mut self, face_crop: &RgbImage) -> EmotionOutcome;
}

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0} (export the expression model to ONNX and place it in models/)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ViT-based expression classifier.
pub struct VitEmotionClassifier {
    session: Session,
}

impl VitEmotionClassifier {
    /// Load the expression ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmotionError> {
        if !Path::new(model_path).exists() {
            return Err(EmotionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded expression model"
        );

        Ok(Self { session })
    }

    fn try_classify(&mut self, face_crop: &RgbImage) -> Result<EmotionOutcome, EmotionError> {
        let input = Self::preprocess(face_crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::InferenceFailed(format!("logits: {e}")))?;

        let logits: [f32; 7] = raw.get(..7).and_then(|s| s.try_into().ok()).ok_or_else(|| {
            EmotionError::InferenceFailed(format!("expected 7 logits, got {}", raw.len()))
        })?;

        Ok(outcome_from_probs(&softmax(&logits)))
    }

    /// Resize to 224×224 and normalise into a NCHW tensor in [-1, 1].
    fn preprocess(face_crop: &RgbImage) -> Array4<f32> {
        let size = VIT_INPUT_SIZE as usize;
        let resized = image::imageops::resize(face_crop, VIT_INPUT_SIZE, VIT_INPUT_SIZE, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (v - VIT_MEAN) / VIT_STD;
            }
        }
        tensor
    }
}

impl EmotionClassifier for VitEmotionClassifier {
    fn classify(&mut self, face_crop: &RgbImage) -> EmotionOutcome {
        if face_crop.width() == 0 || face_crop.height() == 0 {
            return EmotionOutcome::unavailable("empty face crop");
        }
        match self.try_classify(face_crop) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "expression classification failed");
                EmotionOutcome::unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(e: Emotion) -> [f32; 7] {
        let mut p = [0.0; 7];
        p[e as usize] = 1.0;
        p
    }

    #[test]
    fn test_class_order() {
        assert_eq!(Emotion::from_index(0), Some(Emotion::Angry));
        assert_eq!(Emotion::from_index(2), Some(Emotion::Fear));
        assert_eq!(Emotion::from_index(5), Some(Emotion::Surprise));
        assert_eq!(Emotion::from_index(6), Some(Emotion::Neutral));
        assert_eq!(Emotion::from_index(7), None);
    }

    #[test]
    fn test_fear_weighted_score_components() {
        assert!((fear_weighted_score(&one_hot(Emotion::Fear)) - 1.0).abs() < 1e-6);
        assert!((fear_weighted_score(&one_hot(Emotion::Surprise)) - 0.5).abs() < 1e-6);
        assert!((fear_weighted_score(&one_hot(Emotion::Angry)) - 0.3).abs() < 1e-6);
        assert!((fear_weighted_score(&one_hot(Emotion::Disgust)) - 0.2).abs() < 1e-6);
        assert_eq!(fear_weighted_score(&one_hot(Emotion::Happy)), 0.0);
        assert_eq!(fear_weighted_score(&one_hot(Emotion::Sad)), 0.0);
        assert_eq!(fear_weighted_score(&one_hot(Emotion::Neutral)), 0.0);
    }

    #[test]
    fn test_fear_weighted_score_mixed() {
        // angry, disgust, fear, happy, sad, surprise, neutral
        let probs = [0.1, 0.1, 0.4, 0.0, 0.0, 0.2, 0.2];
        let expected = 0.4 + 0.5 * 0.2 + 0.3 * 0.1 + 0.2 * 0.1;
        assert!((fear_weighted_score(&probs) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_fear_weighted_score_clamped() {
        let probs = [1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(fear_weighted_score(&probs), 1.0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 10.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[6] > 0.99);
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let probs = softmax(&[1000.0, 1000.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_outcome_from_probs_argmax() {
        let outcome = outcome_from_probs(&[0.05, 0.05, 0.6, 0.05, 0.05, 0.15, 0.05]);
        assert_eq!(outcome.label(), "Fear");
        let expected = 0.6 + 0.5 * 0.15 + 0.3 * 0.05 + 0.2 * 0.05;
        assert!((outcome.fear_score() - expected).abs() < 1e-6);
        assert!(outcome.is_available());
    }

    #[test]
    fn test_unavailable_defaults() {
        let outcome = EmotionOutcome::unavailable("no model");
        assert_eq!(outcome.label(), "N/A");
        assert_eq!(outcome.fear_score(), 0.0);
        assert!(!outcome.is_available());
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let crop = RgbImage::from_pixel(40, 60, image::Rgb([255, 0, 128]));
        let tensor = VitEmotionClassifier::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        assert!((tensor[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 10, 10]] + 1.0).abs() < 1e-6);
        assert!(tensor.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_load_missing_model() {
        let err = VitEmotionClassifier::load("/nonexistent/emotion_vit.onnx").err().unwrap();
        assert!(matches!(err, EmotionError::ModelNotFound(_)));
    }
}
