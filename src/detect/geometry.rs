//! Box geometry: IoU, non-maximum suppression and letterbox mapping.

use super::DetectionBox;

/// Intersection-over-Union of two top-left-form boxes. 0 when disjoint.
pub fn iou(a: &DetectionBox, b: &DetectionBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy NMS: sort by confidence descending, keep each unsuppressed box,
/// suppress every later box overlapping it above `iou_threshold`.
pub fn non_max_suppression(mut boxes: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; boxes.len()];
    let mut kept = Vec::with_capacity(boxes.len());
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
        kept.push(boxes[i].clone());
    }
    kept
}

/// Aspect-preserving resize into a square model input, black-padded and
/// centered. Keeps the scale and offsets so detections can be mapped back
/// to source-image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub input_size: u32,
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / src_width as f32)
            .min(input_size as f32 / src_height as f32);
        let pad_x = (input_size as f32 - src_width as f32 * scale) / 2.0;
        let pad_y = (input_size as f32 - src_height as f32 * scale) / 2.0;
        Self {
            scale,
            pad_x,
            pad_y,
            input_size,
        }
    }

    /// Map a model-space coordinate back into source-image space.
    #[inline]
    pub fn unmap_x(&self, x: f32) -> f32 {
        (x - self.pad_x) / self.scale
    }

    #[inline]
    pub fn unmap_y(&self, y: f32) -> f32 {
        (y - self.pad_y) / self.scale
    }

    /// Lengths scale without the pad offset.
    #[inline]
    pub fn unmap_len(&self, l: f32) -> f32 {
        l / self.scale
    }
}

/// Clip a top-left-form box to image bounds, dropping degenerate remains.
pub fn clip_to_bounds(b: DetectionBox, width: u32, height: u32) -> Option<DetectionBox> {
    let x = b.x.clamp(0.0, width as f32);
    let y = b.y.clamp(0.0, height as f32);
    let w = (b.x + b.width).clamp(0.0, width as f32) - x;
    let h = (b.y + b.height).clamp(0.0, height as f32) - y;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(DetectionBox {
        x,
        y,
        width: w,
        height: h,
        ..b
    })
}
