//! Person detection: primary model decode plus the pixel-heuristic
//! fallback used when no model is available.

use std::time::Instant;

use async_trait::async_trait;

use crate::config::Thresholds;
use crate::error::ScreenError;
use crate::media::PixelBuffer;
use crate::runtime::{DynLoader, ModelRuntime};

use super::geometry::{clip_to_bounds, non_max_suppression, Letterbox};
use super::{DetectionBox, DetectionResult, DetectionSource};

/// One raw row from the detection head, in model-input coordinates with
/// center-form geometry.
#[derive(Debug, Clone, Copy)]
pub struct RawDetection {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub objectness: f32,
    pub person_prob: f32,
}

impl RawDetection {
    /// Combined score the candidate threshold applies to.
    #[inline]
    pub fn score(&self) -> f32 {
        self.objectness * self.person_prob
    }
}

/// Capability boundary for the primary detector. Input is a normalized
/// CHW tensor of `3 * input_size^2` floats in `[0, 1]`.
#[async_trait]
pub trait PersonModel: Send + Sync {
    fn input_size(&self) -> u32;

    async fn infer(&self, chw: &[f32]) -> Result<Vec<RawDetection>, ScreenError>;
}

pub type PersonRuntime = ModelRuntime<DynLoader<Box<dyn PersonModel>>>;

/// Per-heuristic observations from the fallback path, exposed so the
/// weighting stays testable in isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScores {
    pub skin_ratio: f32,
    pub symmetry: f32,
    pub flesh_ratio: f32,
    pub edge_density: f32,
}

impl HeuristicScores {
    const W_SKIN: f32 = 0.3;
    const W_SYMMETRY: f32 = 0.3;
    const W_FLESH: f32 = 0.2;
    const W_EDGES: f32 = 0.2;

    /// Weighted vote: each heuristic contributes its full weight only when
    /// its observation lands in the human-plausible band.
    pub fn weighted(&self) -> f32 {
        let mut total = 0.0;
        if (0.02..=0.4).contains(&self.skin_ratio) {
            total += Self::W_SKIN;
        }
        if self.symmetry > 0.6 {
            total += Self::W_SYMMETRY;
        }
        if (0.05..=0.5).contains(&self.flesh_ratio) {
            total += Self::W_FLESH;
        }
        if self.edge_density > 0.3 {
            total += Self::W_EDGES;
        }
        total
    }
}

/// Person detector. Prefers the model runtime when one is configured and
/// loadable, degrades to pixel heuristics otherwise. Never returns a Rust
/// error: every outcome is a `DetectionResult`.
pub struct PersonDetector {
    runtime: Option<PersonRuntime>,
    thresholds: Thresholds,
}

impl PersonDetector {
    pub fn new(runtime: Option<PersonRuntime>, thresholds: Thresholds) -> Self {
        Self {
            runtime,
            thresholds,
        }
    }

    /// Heuristics-only detector.
    pub fn fallback_only(thresholds: Thresholds) -> Self {
        Self::new(None, thresholds)
    }

    pub async fn detect(&self, image: &PixelBuffer) -> DetectionResult {
        let start = Instant::now();

        if let Some(runtime) = &self.runtime {
            if let Some(model) = crate::runtime::boxed(runtime.get_or_load()).await {
                match self.detect_primary(model.as_ref().as_ref(), image).await {
                    Ok(boxes) => {
                        return DetectionResult::from_boxes(
                            boxes,
                            DetectionSource::Primary,
                            elapsed_ms(start),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "primary detection failed, using heuristic fallback");
                    }
                }
            }
        }

        match heuristic_detect(image) {
            Ok(boxes) => {
                DetectionResult::from_boxes(boxes, DetectionSource::Fallback, elapsed_ms(start))
            }
            Err(e) => DetectionResult::from_error(e.reasoning(), elapsed_ms(start)),
        }
    }

    async fn detect_primary(
        &self,
        model: &dyn PersonModel,
        image: &PixelBuffer,
    ) -> Result<Vec<DetectionBox>, ScreenError> {
        let input_size = model.input_size();
        let letterbox = Letterbox::fit(image.width(), image.height(), input_size);
        let tensor = letterbox_chw(image, &letterbox);
        let raw = model.infer(&tensor).await?;

        let mut candidates = Vec::new();
        for det in raw {
            if det.score() < self.thresholds.detection {
                continue;
            }
            // People are taller than wide; squat boxes are chairs, pets
            // and furniture.
            if det.h < det.w * 0.6 {
                continue;
            }
            let candidate = DetectionBox {
                x: letterbox.unmap_x(det.cx - det.w / 2.0),
                y: letterbox.unmap_y(det.cy - det.h / 2.0),
                width: letterbox.unmap_len(det.w),
                height: letterbox.unmap_len(det.h),
                confidence: det.score().clamp(0.0, 1.0),
                label: "person".to_string(),
            };
            if let Some(clipped) = clip_to_bounds(candidate, image.width(), image.height()) {
                candidates.push(clipped);
            }
        }
        Ok(non_max_suppression(candidates, self.thresholds.nms_iou))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Letterbox the image into a normalized CHW float tensor, black-padded.
fn letterbox_chw(image: &PixelBuffer, lb: &Letterbox) -> Vec<f32> {
    let size = lb.input_size as usize;
    let plane = size * size;
    let mut tensor = vec![0.0f32; 3 * plane];
    for ty in 0..size {
        for tx in 0..size {
            let sx = lb.unmap_x(tx as f32 + 0.5);
            let sy = lb.unmap_y(ty as f32 + 0.5);
            if sx < 0.0 || sy < 0.0 || sx >= image.width() as f32 || sy >= image.height() as f32 {
                continue;
            }
            let (r, g, b) = image.pixel(sx as u32, sy as u32);
            let idx = ty * size + tx;
            tensor[idx] = r as f32 / 255.0;
            tensor[plane + idx] = g as f32 / 255.0;
            tensor[2 * plane + idx] = b as f32 / 255.0;
        }
    }
    tensor
}

/// Minimum image side for the heuristics to say anything meaningful.
const MIN_HEURISTIC_SIDE: u32 = 8;

/// Model-free detection over raw pixels. Produces at most one synthetic
/// box covering the central half of the frame; confidence is capped well
/// below what the primary path can report.
pub fn heuristic_detect(image: &PixelBuffer) -> Result<Vec<DetectionBox>, ScreenError> {
    let scores = heuristic_scores(image)?;
    let weighted = scores.weighted();
    if weighted <= 0.5 {
        return Ok(Vec::new());
    }
    let w = image.width() as f32;
    let h = image.height() as f32;
    Ok(vec![DetectionBox {
        x: w * 0.25,
        y: h * 0.25,
        width: w * 0.5,
        height: h * 0.5,
        confidence: weighted.min(0.8),
        label: "person".to_string(),
    }])
}

pub fn heuristic_scores(image: &PixelBuffer) -> Result<HeuristicScores, ScreenError> {
    if image.width() < MIN_HEURISTIC_SIDE || image.height() < MIN_HEURISTIC_SIDE {
        return Err(ScreenError::InvalidInput(format!(
            "image {}x{} too small for heuristic detection",
            image.width(),
            image.height()
        )));
    }
    Ok(HeuristicScores {
        skin_ratio: sampled_ratio(image, is_skin_tone),
        symmetry: symmetry_score(image),
        flesh_ratio: sampled_ratio(image, is_flesh_tone),
        edge_density: edge_density(image),
    })
}

/// RGB skin test. Tuned for the common case; misses under strong color
/// casts, which the band check on the ratio absorbs.
fn is_skin_tone(r: u8, g: u8, b: u8) -> bool {
    let (rf, gf, bf) = (r as i32, g as i32, b as i32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    rf > 95 && gf > 40 && bf > 20 && max - min > 15 && (rf - gf).abs() > 15 && rf > gf && rf > bf
}

/// Broader flesh-tone membership across light, medium and deep tones.
fn is_flesh_tone(r: u8, g: u8, b: u8) -> bool {
    let (rf, gf, bf) = (r as i32, g as i32, b as i32);
    let light = rf > 180 && gf > 140 && bf > 110 && rf >= gf && gf >= bf;
    let medium = (120..=200).contains(&rf) && (70..=150).contains(&gf) && (50..=130).contains(&bf) && rf > gf && gf >= bf;
    let deep = (60..=130).contains(&rf) && (35..=100).contains(&gf) && (25..=90).contains(&bf) && rf >= gf && gf >= bf;
    light || medium || deep
}

/// Fraction of sampled pixels satisfying `pred`. Samples on a coarse grid
/// so large images stay cheap.
fn sampled_ratio(image: &PixelBuffer, pred: fn(u8, u8, u8) -> bool) -> f32 {
    let step_x = (image.width() / 64).max(1);
    let step_y = (image.height() / 64).max(1);
    let mut hits = 0u32;
    let mut total = 0u32;
    let mut y = 0;
    while y < image.height() {
        let mut x = 0;
        while x < image.width() {
            let (r, g, b) = image.pixel(x, y);
            if pred(r, g, b) {
                hits += 1;
            }
            total += 1;
            x += step_x;
        }
        y += step_y;
    }
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

const SYMMETRY_ROWS: u32 = 20;

/// Left/right brightness symmetry around the vertical center line, the
/// rough signature of a frontal face or torso.
fn symmetry_score(image: &PixelBuffer) -> f32 {
    let cx = image.width() as f32 / 2.0;
    let left_x = ((cx * 0.3) as u32).min(image.width() - 1);
    let right_x = ((cx * 1.7) as u32).min(image.width() - 1);
    let mut symmetric = 0u32;
    for i in 0..SYMMETRY_ROWS {
        let y = (image.height() as u64 * i as u64 / SYMMETRY_ROWS as u64) as u32;
        let y = y.min(image.height() - 1);
        let diff = (image.brightness(left_x, y) - image.brightness(right_x, y)).abs();
        if diff < 30.0 {
            symmetric += 1;
        }
    }
    symmetric as f32 / SYMMETRY_ROWS as f32
}

/// Fraction of sampled horizontal neighbours with a strong brightness
/// step. Flat backdrops score near zero; people and clutter score high.
fn edge_density(image: &PixelBuffer) -> f32 {
    let step_x = (image.width() / 64).max(1);
    let step_y = (image.height() / 64).max(1);
    let mut edges = 0u32;
    let mut total = 0u32;
    let mut y = 0;
    while y < image.height() {
        let mut x = 0;
        while x + step_x < image.width() {
            let delta = (image.brightness(x, y) - image.brightness(x + step_x, y)).abs();
            if delta > 30.0 {
                edges += 1;
            }
            total += 1;
            x += step_x;
        }
        y += step_y;
    }
    if total == 0 {
        0.0
    } else {
        edges as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image(side: u32, rgb: (u8, u8, u8)) -> PixelBuffer {
        let mut data = Vec::with_capacity(side as usize * side as usize * 3);
        for _ in 0..side * side {
            data.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        PixelBuffer::from_rgb8(side, side, data).unwrap()
    }

    /// Symmetric skin-toned blob on a dark backdrop. Trips the skin,
    /// symmetry and edge heuristics at once.
    fn portrait_like(side: u32) -> PixelBuffer {
        let mut data = Vec::with_capacity(side as usize * side as usize * 3);
        let lo = side / 4;
        let hi = side * 3 / 4;
        for y in 0..side {
            for x in 0..side {
                // Checker the skin region so only ~25% of pixels are
                // skin-toned, inside the [0.02, 0.4] band.
                if (lo..hi).contains(&x) && (lo..hi).contains(&y) && (x + y) % 4 == 0 {
                    data.extend_from_slice(&[200, 140, 110]);
                } else {
                    data.extend_from_slice(&[20, 20, 20]);
                }
            }
        }
        PixelBuffer::from_rgb8(side, side, data).unwrap()
    }

    struct FixedModel {
        rows: Vec<RawDetection>,
    }

    #[async_trait]
    impl PersonModel for FixedModel {
        fn input_size(&self) -> u32 {
            320
        }

        async fn infer(&self, _chw: &[f32]) -> Result<Vec<RawDetection>, ScreenError> {
            Ok(self.rows.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl PersonModel for FailingModel {
        fn input_size(&self) -> u32 {
            320
        }

        async fn infer(&self, _chw: &[f32]) -> Result<Vec<RawDetection>, ScreenError> {
            Err(ScreenError::Inference("session crashed".into()))
        }
    }

    fn runtime_with(rows: Vec<RawDetection>) -> PersonRuntime {
        ModelRuntime::new(DynLoader::ready("person-test", move || {
            Box::new(FixedModel { rows: rows.clone() }) as Box<dyn PersonModel>
        }))
    }

    fn raw(cx: f32, cy: f32, w: f32, h: f32, obj: f32, prob: f32) -> RawDetection {
        RawDetection {
            cx,
            cy,
            w,
            h,
            objectness: obj,
            person_prob: prob,
        }
    }

    #[tokio::test]
    async fn primary_path_thresholds_and_aspect_filters() {
        let rows = vec![
            // score 0.81, tall: kept
            raw(160.0, 160.0, 40.0, 100.0, 0.9, 0.9),
            // score 0.09: below threshold
            raw(100.0, 100.0, 40.0, 100.0, 0.3, 0.3),
            // strong score but squat (h < 0.6 w): rejected
            raw(200.0, 200.0, 100.0, 30.0, 0.9, 0.9),
        ];
        let detector = PersonDetector::new(Some(runtime_with(rows)), Thresholds::default());
        let image = flat_image(320, (128, 128, 128));
        let result = detector.detect(&image).await;
        assert_eq!(result.source, DetectionSource::Primary);
        assert_eq!(result.count, 1);
        assert!(result.detected);
        assert!((result.confidence - 0.81).abs() < 1e-4);
    }

    #[tokio::test]
    async fn primary_path_deduplicates_with_nms() {
        let rows = vec![
            raw(160.0, 160.0, 40.0, 100.0, 0.9, 0.9),
            raw(162.0, 161.0, 40.0, 100.0, 0.8, 0.9),
        ];
        let detector = PersonDetector::new(Some(runtime_with(rows)), Thresholds::default());
        let result = detector.detect(&flat_image(320, (128, 128, 128))).await;
        assert_eq!(result.count, 1);
        assert!((result.confidence - 0.81).abs() < 1e-4);
    }

    #[tokio::test]
    async fn primary_boxes_unmap_to_source_coordinates() {
        // 640x480 into 320: scale 0.5, pad_y 40. A centered model box maps
        // back to the center of the source frame.
        let rows = vec![raw(160.0, 160.0, 40.0, 100.0, 0.9, 0.9)];
        let detector = PersonDetector::new(Some(runtime_with(rows)), Thresholds::default());
        let mut data = Vec::new();
        for _ in 0..640 * 480 {
            data.extend_from_slice(&[128, 128, 128]);
        }
        let image = PixelBuffer::from_rgb8(640, 480, data).unwrap();
        let result = detector.detect(&image).await;
        assert_eq!(result.count, 1);
        let b = &result.boxes[0];
        assert!((b.x - (160.0 - 20.0) / 0.5).abs() < 1e-3);
        assert!((b.y - (160.0 - 50.0 - 40.0) / 0.5).abs() < 1e-3);
        assert!((b.width - 80.0).abs() < 1e-3);
        assert!((b.height - 200.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn inference_error_falls_back_to_heuristics() {
        let runtime: PersonRuntime = ModelRuntime::new(DynLoader::ready("failing", || {
            Box::new(FailingModel) as Box<dyn PersonModel>
        }));
        let detector = PersonDetector::new(Some(runtime), Thresholds::default());
        let result = detector.detect(&portrait_like(64)).await;
        assert_eq!(result.source, DetectionSource::Fallback);
    }

    #[tokio::test]
    async fn unloadable_model_uses_fallback() {
        let runtime: PersonRuntime =
            ModelRuntime::new(DynLoader::unavailable("person", "weights missing"));
        let detector = PersonDetector::new(Some(runtime), Thresholds::default());
        let result = detector.detect(&portrait_like(64)).await;
        assert_eq!(result.source, DetectionSource::Fallback);
        assert!(result.confidence <= 0.8);
    }

    #[tokio::test]
    async fn flat_frame_yields_no_fallback_detection() {
        let detector = PersonDetector::fallback_only(Thresholds::default());
        let result = detector.detect(&flat_image(64, (128, 128, 128))).await;
        assert_eq!(result.source, DetectionSource::Fallback);
        assert!(!result.detected);
        assert_eq!(result.count, 0);
    }

    #[tokio::test]
    async fn portrait_like_frame_trips_fallback() {
        let detector = PersonDetector::fallback_only(Thresholds::default());
        let image = portrait_like(64);
        let result = detector.detect(&image).await;
        assert_eq!(result.source, DetectionSource::Fallback);
        assert!(result.detected);
        assert_eq!(result.count, 1);
        assert!(result.confidence > 0.5 && result.confidence <= 0.8);
        // Central synthetic box.
        let b = &result.boxes[0];
        assert!((b.x - 16.0).abs() < 1e-3);
        assert!((b.width - 32.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn tiny_image_yields_error_result() {
        let detector = PersonDetector::fallback_only(Thresholds::default());
        let result = detector.detect(&flat_image(4, (128, 128, 128))).await;
        assert_eq!(result.source, DetectionSource::Error);
        assert!(!result.detected);
        assert!(result.note.is_some());
    }

    #[test]
    fn weighted_vote_bands() {
        let all_in = HeuristicScores {
            skin_ratio: 0.2,
            symmetry: 0.8,
            flesh_ratio: 0.3,
            edge_density: 0.4,
        };
        assert!((all_in.weighted() - 1.0).abs() < 1e-6);

        // Too much skin reads as a close-up of a wall, not a person.
        let skin_heavy = HeuristicScores {
            skin_ratio: 0.9,
            symmetry: 0.8,
            flesh_ratio: 0.9,
            edge_density: 0.1,
        };
        assert!((skin_heavy.weighted() - 0.3).abs() < 1e-6);
    }
}
