use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;

/// Axis-aligned face box in image pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area of the box; degenerate (negative) extents count as zero.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One face found in a photo.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// How to pick a face when a photo contains more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceSelection {
    /// Largest box area; ties go to the leftmost, then topmost box.
    #[default]
    Largest,
    /// Reject photos with more than one face.
    Strict,
}

/// Choose the face to use from a detection result.
///
/// Zero faces is [`EmbedError::NoFaceDetected`]; more than one under
/// [`FaceSelection::Strict`] is [`EmbedError::AmbiguousFace`].
pub fn select_face(
    faces: Vec<DetectedFace>,
    policy: FaceSelection,
) -> Result<DetectedFace, EmbedError> {
    match (faces.len(), policy) {
        (0, _) => Err(EmbedError::NoFaceDetected),
        (1, _) => faces.into_iter().next().ok_or(EmbedError::NoFaceDetected),
        (count, FaceSelection::Strict) => Err(EmbedError::AmbiguousFace { count }),
        (_, FaceSelection::Largest) => faces
            .into_iter()
            .min_by(|a, b| compare_largest(&a.bbox, &b.bbox))
            .ok_or(EmbedError::NoFaceDetected),
    }
}

// Orders the preferred box first.
fn compare_largest(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.area()
        .total_cmp(&a.area())
        .then_with(|| a.x.total_cmp(&b.x))
        .then_with(|| a.y.total_cmp(&b.y))
}
