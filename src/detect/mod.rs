//! Person/face detection: result types, box geometry, primary model path
//! and the pixel-heuristic fallback.

pub mod geometry;
pub mod person;

use serde::{Deserialize, Serialize};

pub use geometry::{iou, non_max_suppression, Letterbox};
pub use person::{HeuristicScores, PersonDetector, PersonModel, PersonRuntime, RawDetection};

/// One detected region. Never persisted standalone; always owned by a
/// `DetectionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub label: String,
}

impl DetectionBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Primary,
    Fallback,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub count: usize,
    pub boxes: Vec<DetectionBox>,
    /// `max(box.confidence)` when boxes exist, else 0.
    pub confidence: f32,
    pub source: DetectionSource,
    pub processing_time_ms: u64,
    /// Error message when `source == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DetectionResult {
    /// Build from final boxes, keeping the `detected == (count > 0)` and
    /// `confidence == max(box.confidence)` invariants by construction.
    pub fn from_boxes(boxes: Vec<DetectionBox>, source: DetectionSource, elapsed_ms: u64) -> Self {
        let confidence = boxes
            .iter()
            .map(|b| b.confidence)
            .fold(0.0f32, f32::max)
            .clamp(0.0, 1.0);
        Self {
            detected: !boxes.is_empty(),
            count: boxes.len(),
            confidence,
            boxes,
            source,
            processing_time_ms: elapsed_ms,
            note: None,
        }
    }

    /// Terminal error result; stage errors never cross the orchestrator
    /// boundary as Rust errors.
    pub fn from_error(message: String, elapsed_ms: u64) -> Self {
        Self {
            detected: false,
            count: 0,
            boxes: Vec::new(),
            confidence: 0.0,
            source: DetectionSource::Error,
            processing_time_ms: elapsed_ms,
            note: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariants_hold_by_construction() {
        let boxes = vec![
            DetectionBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 20.0,
                confidence: 0.7,
                label: "person".into(),
            },
            DetectionBox {
                x: 5.0,
                y: 5.0,
                width: 10.0,
                height: 20.0,
                confidence: 0.9,
                label: "person".into(),
            },
        ];
        let r = DetectionResult::from_boxes(boxes, DetectionSource::Primary, 3);
        assert!(r.detected);
        assert_eq!(r.count, 2);
        assert!((r.confidence - 0.9).abs() < 1e-6);

        let empty = DetectionResult::from_boxes(Vec::new(), DetectionSource::Fallback, 1);
        assert!(!empty.detected);
        assert_eq!(empty.confidence, 0.0);
    }
}
