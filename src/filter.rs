//! Decision-fusion orchestrator.
//!
//! Sequences the screening stages per configuration, stops at the first
//! stage that forces rejection, and folds everything into one immutable
//! `FilterDecision` with human-readable reasoning. Stage services are
//! injected at construction; a missing service behaves like a disabled
//! stage.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScreenerConfig;
use crate::detect::{DetectionResult, PersonDetector};
use crate::error::ScreenError;
use crate::media::{EvidenceInput, PixelBuffer};
use crate::nsfw::{ExplicitImageClassifier, ExplicitImageResult};
use crate::ocr::{ExtractedText, TextExtractor};
use crate::textfilter::{ExplicitTextClassifier, ExplicitTextResult};

pub const STAGE_DETECTION: &str = "detection";
pub const STAGE_IMAGE_CLASSIFICATION: &str = "image_classification";
pub const STAGE_TEXT_EXTRACTION: &str = "text_extraction";
pub const STAGE_TEXT_CLASSIFICATION: &str = "text_classification";

/// Typed result of one executed stage. Stages that were skipped have no
/// entry at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Detection(DetectionResult),
    ImageClassification(ExplicitImageResult),
    TextExtraction(ExtractedText),
    TextClassification(Vec<ExplicitTextResult>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub approved: bool,
    pub reasoning: String,
    pub per_stage: BTreeMap<String, StageOutcome>,
    pub processing_time_ms: u64,
    pub manual_override: bool,
    /// Reasoning of the decision an override replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FilterDecision {
    fn finish(
        approved: bool,
        reasoning: String,
        per_stage: BTreeMap<String, StageOutcome>,
        start: Instant,
    ) -> Self {
        Self {
            approved,
            reasoning,
            per_stage,
            processing_time_ms: start.elapsed().as_millis() as u64,
            manual_override: false,
            original_reasoning: None,
            timestamp: Utc::now(),
        }
    }
}

/// Running counters, exposed as a cloneable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub images_processed: u64,
    pub images_approved: u64,
    pub images_rejected: u64,
    pub texts_processed: u64,
    pub texts_approved: u64,
    pub texts_rejected: u64,
    pub manual_overrides: u64,
}

/// Combined verdict over an image plus its accompanying messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDecision {
    pub approved: bool,
    pub reasoning: String,
    pub components: BTreeMap<String, FilterDecision>,
    pub timestamp: DateTime<Utc>,
}

pub struct EvidenceFilter {
    config: ScreenerConfig,
    detector: Option<Arc<PersonDetector>>,
    image_classifier: Option<Arc<ExplicitImageClassifier>>,
    extractor: Option<Arc<TextExtractor>>,
    text_classifier: Option<Arc<ExplicitTextClassifier>>,
    stats: RwLock<FilterStats>,
}

impl EvidenceFilter {
    pub fn new(config: ScreenerConfig) -> Self {
        Self {
            config,
            detector: None,
            image_classifier: None,
            extractor: None,
            text_classifier: None,
            stats: RwLock::new(FilterStats::default()),
        }
    }

    /// Filter wired with every fallback-path service and no extractor.
    /// The demo binary and model-free deployments use this.
    pub fn fallback_only(config: ScreenerConfig) -> Self {
        let thresholds = config.thresholds.clone();
        Self::new(config)
            .with_detector(Arc::new(PersonDetector::fallback_only(thresholds.clone())))
            .with_image_classifier(Arc::new(ExplicitImageClassifier::fallback_only(
                thresholds.clone(),
            )))
            .with_text_classifier(Arc::new(ExplicitTextClassifier::fallback_only(&thresholds)))
    }

    pub fn with_detector(mut self, detector: Arc<PersonDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_image_classifier(mut self, classifier: Arc<ExplicitImageClassifier>) -> Self {
        self.image_classifier = Some(classifier);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_text_classifier(mut self, classifier: Arc<ExplicitTextClassifier>) -> Self {
        self.text_classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    pub fn stats(&self) -> FilterStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Screen one unit of evidence, whatever its kind.
    pub async fn filter_evidence(&self, input: &EvidenceInput) -> FilterDecision {
        match input {
            EvidenceInput::Image(image) => self.filter_image(image).await,
            EvidenceInput::Texts(texts) => self.filter_texts(texts).await,
        }
    }

    pub async fn filter_image(&self, image: &PixelBuffer) -> FilterDecision {
        let start = Instant::now();
        let mut per_stage = BTreeMap::new();

        if self.config.enable_face_detection {
            if let Some(detector) = &self.detector {
                let detection = detector.detect(image).await;
                let count = detection.count;
                per_stage.insert(STAGE_DETECTION.to_string(), StageOutcome::Detection(detection));
                if self.config.require_human_presence && count == 0 {
                    return self.record_image(FilterDecision::finish(
                        false,
                        "No human faces detected".to_string(),
                        per_stage,
                        start,
                    ));
                }
            }
        }

        if self.config.enable_nsfw_filter {
            if let Some(classifier) = &self.image_classifier {
                let verdict = classifier.classify(image).await;
                let explicit = verdict.is_explicit;
                let reasoning = verdict.reasoning.clone();
                per_stage.insert(
                    STAGE_IMAGE_CLASSIFICATION.to_string(),
                    StageOutcome::ImageClassification(verdict),
                );
                if explicit {
                    return self.record_image(FilterDecision::finish(
                        false,
                        format!("Image contains NSFW content: {reasoning}"),
                        per_stage,
                        start,
                    ));
                }
            }
        }

        if self.config.enable_ocr && self.config.enable_text_filter {
            if let (Some(extractor), Some(text_classifier)) =
                (&self.extractor, &self.text_classifier)
            {
                match extractor.extract(image).await {
                    Ok(extracted) if !extracted.text.trim().is_empty() => {
                        let text = extracted.text.clone();
                        per_stage.insert(
                            STAGE_TEXT_EXTRACTION.to_string(),
                            StageOutcome::TextExtraction(extracted),
                        );
                        let verdict = text_classifier.classify(&text).await;
                        let explicit = verdict.is_explicit;
                        let confidence = verdict.confidence;
                        per_stage.insert(
                            STAGE_TEXT_CLASSIFICATION.to_string(),
                            StageOutcome::TextClassification(vec![verdict]),
                        );
                        if explicit {
                            return self.record_image(FilterDecision::finish(
                                false,
                                format!(
                                    "Image contains explicit text (confidence: {}%)",
                                    (confidence * 100.0).round() as u32
                                ),
                                per_stage,
                                start,
                            ));
                        }
                    }
                    Ok(extracted) => {
                        per_stage.insert(
                            STAGE_TEXT_EXTRACTION.to_string(),
                            StageOutcome::TextExtraction(extracted),
                        );
                    }
                    // A failed or timed-out extraction reads as "no text";
                    // it never blocks the image on its own.
                    Err(e) => {
                        tracing::warn!(error = %e, "text extraction failed, skipping text screening");
                    }
                }
            }
        }

        self.record_image(FilterDecision::finish(
            true,
            "Image passed all filters (visual content and extracted text)".to_string(),
            per_stage,
            start,
        ))
    }

    pub async fn filter_texts(&self, texts: &[String]) -> FilterDecision {
        let start = Instant::now();
        let mut per_stage = BTreeMap::new();

        let enabled = self.config.enable_text_filter;
        let Some(classifier) = self.text_classifier.as_ref().filter(|_| enabled) else {
            return self.record_text(FilterDecision::finish(
                true,
                "Text filtering disabled".to_string(),
                per_stage,
                start,
            ));
        };

        let valid: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
        if valid.is_empty() {
            return self.record_text(FilterDecision::finish(
                false,
                "No valid text content".to_string(),
                per_stage,
                start,
            ));
        }

        let mut verdicts = Vec::with_capacity(valid.len());
        for text in &valid {
            verdicts.push(classifier.classify(text.as_str()).await);
        }
        let explicit_count = verdicts.iter().filter(|v| v.is_explicit).count();
        let total = valid.len();
        per_stage.insert(
            STAGE_TEXT_CLASSIFICATION.to_string(),
            StageOutcome::TextClassification(verdicts),
        );

        let decision = if explicit_count > 0 {
            FilterDecision::finish(
                false,
                format!("{explicit_count} explicit text(s) detected"),
                per_stage,
                start,
            )
        } else {
            FilterDecision::finish(
                true,
                format!("All {total} text(s) passed filters"),
                per_stage,
                start,
            )
        };
        self.record_text(decision)
    }

    /// Screen an image and its accompanying messages as one package; the
    /// package fails if any present component fails.
    pub async fn filter_package(
        &self,
        photo: Option<&PixelBuffer>,
        messages: &[String],
    ) -> PackageDecision {
        let mut components = BTreeMap::new();
        if let Some(photo) = photo {
            components.insert("photo".to_string(), self.filter_image(photo).await);
        }
        if !messages.is_empty() {
            components.insert("messages".to_string(), self.filter_texts(messages).await);
        }

        let photo_ok = components.get("photo").map_or(true, |d| d.approved);
        let messages_ok = components.get("messages").map_or(true, |d| d.approved);
        let approved = photo_ok && messages_ok;
        let reasoning = if approved {
            "Evidence package approved".to_string()
        } else {
            let mut reasons = Vec::new();
            if !photo_ok {
                reasons.push("Photo rejected");
            }
            if !messages_ok {
                reasons.push("Messages rejected");
            }
            reasons.join("; ")
        };
        PackageDecision {
            approved,
            reasoning,
            components,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a rejected (or approved) decision into a manually approved
    /// one, retaining the original reasoning.
    pub fn apply_override(
        &self,
        original: &FilterDecision,
        reason: &str,
    ) -> Result<FilterDecision, ScreenError> {
        if !self.config.allow_manual_override {
            return Err(ScreenError::OverrideDisabled);
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.manual_overrides += 1;
        }
        Ok(FilterDecision {
            approved: true,
            reasoning: format!("Manual override: {reason}"),
            per_stage: original.per_stage.clone(),
            processing_time_ms: original.processing_time_ms,
            manual_override: true,
            original_reasoning: Some(original.reasoning.clone()),
            timestamp: Utc::now(),
        })
    }

    fn record_image(&self, decision: FilterDecision) -> FilterDecision {
        if let Ok(mut stats) = self.stats.write() {
            stats.images_processed += 1;
            if decision.approved {
                stats.images_approved += 1;
            } else {
                stats.images_rejected += 1;
            }
        }
        tracing::debug!(
            approved = decision.approved,
            reasoning = %decision.reasoning,
            "image screened"
        );
        decision
    }

    fn record_text(&self, decision: FilterDecision) -> FilterDecision {
        if let Ok(mut stats) = self.stats.write() {
            stats.texts_processed += 1;
            if decision.approved {
                stats.texts_approved += 1;
            } else {
                stats.texts_rejected += 1;
            }
        }
        tracing::debug!(
            approved = decision.approved,
            reasoning = %decision.reasoning,
            "text batch screened"
        );
        decision
    }
}
