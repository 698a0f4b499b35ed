use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Pixel rectangle inside an image, already clipped to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Clip the box to a `width` × `height` image.
    ///
    /// Coordinates are truncated to integers first, then clamped to the
    /// image. Returns `None` when nothing of the box remains.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let x1 = (self.x as i64).clamp(0, width as i64);
        let y1 = (self.y as i64).clamp(0, height as i64);
        let x2 = ((self.x + self.width) as i64).clamp(0, width as i64);
        let y2 = ((self.y + self.height) as i64).clamp(0, height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// Binary gender classification reported by the attribute model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender '{other}' (expected male or female)")),
        }
    }
}

/// One face as reported by a [`FaceAnalyzer`](crate::attributes::FaceAnalyzer),
/// before upstream defaults are applied.
#[derive(Debug, Clone)]
pub struct RawFace {
    pub bbox: BoundingBox,
    /// Estimated age in years, if the attribute model produced one.
    pub age: Option<u32>,
    pub gender: Gender,
    /// Detector score, if the detector reported one.
    pub det_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_clip_inside() {
        let rect = bbox(10.5, 20.2, 30.0, 40.0).clip_to(100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 10, y: 20, width: 30, height: 40 });
    }

    #[test]
    fn test_clip_partially_outside() {
        let rect = bbox(-10.0, -5.0, 30.0, 20.0).clip_to(100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 0, y: 0, width: 20, height: 15 });

        let rect = bbox(90.0, 90.0, 30.0, 30.0).clip_to(100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 90, y: 90, width: 10, height: 10 });
    }

    #[test]
    fn test_clip_fully_outside() {
        assert!(bbox(150.0, 10.0, 20.0, 20.0).clip_to(100, 100).is_none());
        assert!(bbox(10.0, 10.0, 0.0, 20.0).clip_to(100, 100).is_none());
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("Male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!("f".parse::<Gender>().unwrap(), Gender::Female);
        assert!("other".parse::<Gender>().is_err());
    }
}
