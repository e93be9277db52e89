//! Explicit-image classification.
//!
//! The primary path scores an image into named categories and applies
//! independently tunable thresholds. When no model is available the
//! classifier fails open with a fixed low-confidence "allow" so content
//! the system cannot evaluate is never silently blocked.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::error::ScreenError;
use crate::media::PixelBuffer;
use crate::runtime::{DynLoader, ModelRuntime};

/// Per-category probabilities from the classifier head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub porn: f32,
    pub explicit: f32,
    pub suggestive: f32,
    pub safe: f32,
}

#[async_trait]
pub trait NsfwModel: Send + Sync {
    async fn classify(&self, image: &PixelBuffer) -> Result<CategoryScores, ScreenError>;
}

pub type NsfwRuntime = ModelRuntime<DynLoader<Box<dyn NsfwModel>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierSource {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitImageResult {
    pub is_explicit: bool,
    pub confidence: f32,
    pub category_scores: CategoryScores,
    pub reasoning: String,
    pub source: ClassifierSource,
    pub processing_time_ms: u64,
}

/// Fixed fail-open verdict used whenever the model cannot answer.
const FALLBACK_CONFIDENCE: f32 = 0.3;

pub struct ExplicitImageClassifier {
    runtime: Option<NsfwRuntime>,
    thresholds: Thresholds,
}

impl ExplicitImageClassifier {
    pub fn new(runtime: Option<NsfwRuntime>, thresholds: Thresholds) -> Self {
        Self {
            runtime,
            thresholds,
        }
    }

    pub fn fallback_only(thresholds: Thresholds) -> Self {
        Self::new(None, thresholds)
    }

    pub async fn classify(&self, image: &PixelBuffer) -> ExplicitImageResult {
        let start = Instant::now();

        if let Some(runtime) = &self.runtime {
            if let Some(model) = crate::runtime::boxed(runtime.get_or_load()).await {
                match model.classify(image).await {
                    Ok(scores) => return self.decide(scores, start),
                    Err(e) => {
                        tracing::warn!(error = %e, "image classification failed, allowing by default");
                        return fallback_result(&e.to_string(), start);
                    }
                }
            }
        }
        fallback_result("model not available", start)
    }

    fn decide(&self, scores: CategoryScores, start: Instant) -> ExplicitImageResult {
        let t = &self.thresholds;
        let is_explicit = scores.porn > t.nsfw_porn
            || scores.explicit > t.nsfw_explicit
            || scores.suggestive > t.nsfw_suggestive;
        let confidence = if is_explicit {
            scores.porn.max(scores.explicit).max(scores.suggestive)
        } else {
            scores.safe
        }
        .clamp(0.0, 1.0);
        ExplicitImageResult {
            is_explicit,
            confidence,
            category_scores: scores,
            reasoning: self.reasoning(&scores, is_explicit),
            source: ClassifierSource::Primary,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn reasoning(&self, scores: &CategoryScores, is_explicit: bool) -> String {
        if !is_explicit {
            return format!("Safe content ({}% confidence)", pct(scores.safe));
        }
        let t = &self.thresholds;
        let mut reasons = Vec::new();
        if scores.porn > t.nsfw_porn {
            reasons.push(format!("pornographic content ({}%)", pct(scores.porn)));
        }
        if scores.explicit > t.nsfw_explicit {
            reasons.push(format!("explicit nudity ({}%)", pct(scores.explicit)));
        }
        if scores.suggestive > t.nsfw_suggestive {
            reasons.push(format!("suggestive content ({}%)", pct(scores.suggestive)));
        }
        format!("Blocked due to: {}", reasons.join(", "))
    }
}

fn pct(v: f32) -> u32 {
    (v * 100.0).round() as u32
}

fn fallback_result(reason: &str, start: Instant) -> ExplicitImageResult {
    ExplicitImageResult {
        is_explicit: false,
        confidence: FALLBACK_CONFIDENCE,
        category_scores: CategoryScores {
            safe: 1.0,
            ..CategoryScores::default()
        },
        reasoning: format!("Model unavailable ({reason}) - content allowed by default"),
        source: ClassifierSource::Fallback,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }
}
