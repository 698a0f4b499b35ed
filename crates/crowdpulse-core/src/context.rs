//! Model handles for the analysis path.
//!
//! All ONNX sessions live in an [`AnalysisContext`] that the caller owns and
//! passes into each analysis. [`ModelCache`] gives an idempotent
//! `initialize()` for callers that load lazily.

use crate::attributes::{FaceAnalyzer, GenderAgeEstimator, OnnxFaceAnalyzer};
use crate::detector::FaceDetector;
use crate::emotion::{EmotionClassifier, VitEmotionClassifier};
use crate::pipeline::{analyze_image, AnalysisError, AnalysisOptions, ImageAnalysis};
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const GENDERAGE_MODEL_FILE: &str = "genderage.onnx";
pub const EMOTION_MODEL_FILE: &str = "emotion_vit.onnx";

/// Default directory holding the ONNX model files.
///
/// `$XDG_DATA_HOME/crowdpulse/models`, falling back to
/// `~/.local/share/crowdpulse/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("crowdpulse/models")
}

/// Locations of the three model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub genderage: PathBuf,
    pub emotion: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            genderage: dir.join(GENDERAGE_MODEL_FILE),
            emotion: dir.join(EMOTION_MODEL_FILE),
        }
    }
}

/// Loaded detector, attribute and expression models.
pub struct AnalysisContext {
    faces: Box<dyn FaceAnalyzer + Send>,
    emotions: Box<dyn EmotionClassifier + Send>,
}

impl AnalysisContext {
    pub fn new(faces: Box<dyn FaceAnalyzer + Send>, emotions: Box<dyn EmotionClassifier + Send>) -> Self {
        Self { faces, emotions }
    }

    /// Load every model. Fails on the first missing or unloadable file.
    pub fn load(paths: &ModelPaths) -> Result<Self, AnalysisError> {
        let detector = FaceDetector::load(&paths.detector.to_string_lossy())?;
        let genderage = GenderAgeEstimator::load(&paths.genderage.to_string_lossy())?;
        let emotions = VitEmotionClassifier::load(&paths.emotion.to_string_lossy())?;
        tracing::info!("analysis models loaded");

        Ok(Self::new(
            Box::new(OnnxFaceAnalyzer::new(detector, genderage)),
            Box::new(emotions),
        ))
    }

    /// Read an image file and analyse it.
    pub fn analyze_path(&mut self, path: &Path, options: &AnalysisOptions) -> Result<ImageAnalysis, AnalysisError> {
        let image = image::open(path)
            .map_err(|source| AnalysisError::ImageRead {
                path: path.display().to_string(),
                source,
            })?
            .to_rgb8();
        tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "capture decoded");

        self.analyze(&image, options)
    }

    /// Analyse an already decoded capture.
    pub fn analyze(&mut self, image: &RgbImage, options: &AnalysisOptions) -> Result<ImageAnalysis, AnalysisError> {
        analyze_image(&mut *self.faces, &mut *self.emotions, image, options)
    }
}

/// Caller-owned slot that loads an [`AnalysisContext`] at most once.
#[derive(Default)]
pub struct ModelCache {
    context: Option<AnalysisContext>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }

    /// Load the models if needed and return the context.
    ///
    /// Once loaded, later calls return the cached context and ignore `paths`.
    /// A failed load leaves the cache empty so the next call retries.
    pub fn initialize(&mut self, paths: &ModelPaths) -> Result<&mut AnalysisContext, AnalysisError> {
        let ctx = match self.context.take() {
            Some(ctx) => ctx,
            None => AnalysisContext::load(paths)?,
        };
        Ok(self.context.insert(ctx))
    }
}
