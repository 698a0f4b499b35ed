//! Gender and age estimation via ONNX Runtime.
//!
//! Uses the InsightFace `genderage` head on a square crop centred on each
//! detected face, and composes it with the SCRFD detector into a
//! [`FaceAnalyzer`].

use crate::detector::FaceDetector;
use crate::pipeline::AnalysisError;
use crate::types::{BoundingBox, Gender, RawFace};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GENDERAGE_INPUT_SIZE: usize = 96;
/// Crop side relative to the larger face box dimension.
const GENDERAGE_CROP_SCALE: f32 = 1.5;
const GENDERAGE_AGE_SCALE: f32 = 100.0;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("model file not found: {0} (download from insightface and place in models/)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Gender and age estimate for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenderAge {
    pub gender: Gender,
    pub age: u32,
}

/// Source of per-face detections with demographic attributes.
pub trait FaceAnalyzer {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<RawFace>, AnalysisError>;
}

/// InsightFace gender/age estimator.
pub struct GenderAgeEstimator {
    session: Session,
}

impl GenderAgeEstimator {
    /// Load the genderage ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, AttributeError> {
        if !Path::new(model_path).exists() {
            return Err(AttributeError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded genderage model"
        );

        Ok(Self { session })
    }

    /// Estimate gender and age for a face box in an RGB capture.
    pub fn estimate(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<GenderAge, AttributeError> {
        let input = preprocess(image, face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("genderage output: {e}")))?;

        decode_output(raw).ok_or_else(|| {
            AttributeError::InferenceFailed(format!("expected 3 genderage values, got {}", raw.len()))
        })
    }
}

/// Decode `[female_logit, male_logit, age / 100]`.
fn decode_output(raw: &[f32]) -> Option<GenderAge> {
    let [female, male, age] = raw.get(..3)? else {
        return None;
    };
    let gender = if male > female { Gender::Male } else { Gender::Female };
    let age = (age * GENDERAGE_AGE_SCALE).round().max(0.0) as u32;
    Some(GenderAge { gender, age })
}

/// Sample a 96×96 square crop centred on the face into a NCHW tensor.
///
/// The genderage head takes raw 0–255 RGB values. Pixels outside the capture
/// are zero.
fn preprocess(image: &RgbImage, face: &BoundingBox) -> Array4<f32> {
    let size = GENDERAGE_INPUT_SIZE;
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let side = face.width.max(face.height).max(1.0) * GENDERAGE_CROP_SCALE;
    let step = side / size as f32;
    let origin_x = cx - side / 2.0;
    let origin_y = cy - side / 2.0;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for v in 0..size {
        let sy = origin_y + (v as f32 + 0.5) * step - 0.5;
        for u in 0..size {
            let sx = origin_x + (u as f32 + 0.5) * step - 0.5;
            let rgb = sample_bilinear(image, sx, sy);
            for c in 0..3 {
                tensor[[0, c, v, u]] = rgb[c];
            }
        }
    }
    tensor
}

/// Bilinear sample with zero fill outside the image.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi < 0 || yi < 0 || xi >= w || yi >= h {
            return [0.0; 3];
        }
        let p = image.get_pixel(xi as u32, yi as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bot = bl[c] * (1.0 - fx) + br[c] * fx;
        top * (1.0 - fy) + bot * fy
    })
}

/// SCRFD detection followed by genderage estimation for every face.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    genderage: GenderAgeEstimator,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: FaceDetector, genderage: GenderAgeEstimator) -> Self {
        Self { detector, genderage }
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<RawFace>, AnalysisError> {
        let boxes = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            // A failed attribute estimate leaves age unknown; the pipeline
            // substitutes its default. Gender falls back to Female (weight 1.0).
            let (age, gender) = match self.genderage.estimate(image, &bbox) {
                Ok(ga) => (Some(ga.age), ga.gender),
                Err(e) => {
                    tracing::warn!(error = %e, "genderage estimation failed");
                    (None, Gender::Female)
                }
            };
            faces.push(RawFace {
                det_score: Some(bbox.confidence),
                bbox,
                age,
                gender,
            });
        }
        Ok(faces)
    }
}
