//! End-to-end screening scenarios against the public API.

use std::sync::Arc;

use async_trait::async_trait;
use evidence_screener::config::{ScreenerConfig, Thresholds};
use evidence_screener::detect::{PersonDetector, PersonModel, RawDetection};
use evidence_screener::nsfw::{CategoryScores, ExplicitImageClassifier, NsfwModel};
use evidence_screener::runtime::{DynLoader, ModelRuntime};
use evidence_screener::{EvidenceFilter, PixelBuffer, ScreenError};

struct OnePerson;

#[async_trait]
impl PersonModel for OnePerson {
    fn input_size(&self) -> u32 {
        320
    }

    async fn infer(&self, _chw: &[f32]) -> Result<Vec<RawDetection>, ScreenError> {
        Ok(vec![RawDetection {
            cx: 160.0,
            cy: 160.0,
            w: 60.0,
            h: 140.0,
            objectness: 0.95,
            person_prob: 0.95,
        }])
    }
}

struct FixedNsfw(CategoryScores);

#[async_trait]
impl NsfwModel for FixedNsfw {
    async fn classify(&self, _image: &PixelBuffer) -> Result<CategoryScores, ScreenError> {
        Ok(self.0)
    }
}

fn image() -> PixelBuffer {
    PixelBuffer::from_rgb8(64, 64, vec![128; 64 * 64 * 3]).unwrap()
}

fn filter_with(scores: CategoryScores, require_human: bool) -> EvidenceFilter {
    let config = ScreenerConfig {
        require_human_presence: require_human,
        ..ScreenerConfig::default()
    };
    let detector = ModelRuntime::new(DynLoader::ready("person", || {
        Box::new(OnePerson) as Box<dyn PersonModel>
    }));
    let nsfw = ModelRuntime::new(DynLoader::ready("nsfw", move || {
        Box::new(FixedNsfw(scores)) as Box<dyn NsfwModel>
    }));
    EvidenceFilter::new(config)
        .with_detector(Arc::new(PersonDetector::new(
            Some(detector),
            Thresholds::default(),
        )))
        .with_image_classifier(Arc::new(ExplicitImageClassifier::new(
            Some(nsfw),
            Thresholds::default(),
        )))
}

#[tokio::test]
async fn detected_person_with_low_porn_score_is_approved() {
    let filter = filter_with(
        CategoryScores {
            porn: 0.1,
            explicit: 0.1,
            suggestive: 0.1,
            safe: 0.9,
        },
        true,
    );
    let decision = filter.filter_image(&image()).await;
    assert!(decision.approved);
}

#[tokio::test]
async fn explicit_image_is_rejected_after_detection() {
    let filter = filter_with(
        CategoryScores {
            porn: 0.9,
            explicit: 0.1,
            suggestive: 0.1,
            safe: 0.05,
        },
        true,
    );
    let decision = filter.filter_image(&image()).await;
    assert!(!decision.approved);
    assert!(decision.per_stage.contains_key("detection"));
    assert!(decision.per_stage.contains_key("image_classification"));
}

#[tokio::test]
async fn all_reported_confidences_are_in_unit_range() {
    let filter = filter_with(
        CategoryScores {
            porn: 0.9,
            explicit: 0.8,
            suggestive: 0.9,
            safe: 0.01,
        },
        false,
    );
    let decision = filter.filter_image(&image()).await;
    for outcome in decision.per_stage.values() {
        match outcome {
            evidence_screener::filter::StageOutcome::Detection(d) => {
                assert!((0.0..=1.0).contains(&d.confidence));
                for b in &d.boxes {
                    assert!((0.0..=1.0).contains(&b.confidence));
                }
            }
            evidence_screener::filter::StageOutcome::ImageClassification(c) => {
                assert!((0.0..=1.0).contains(&c.confidence));
            }
            evidence_screener::filter::StageOutcome::TextClassification(results) => {
                for r in results {
                    assert!((0.0..=1.0).contains(&r.confidence));
                }
            }
            evidence_screener::filter::StageOutcome::TextExtraction(t) => {
                assert!((0.0..=1.0).contains(&t.confidence));
            }
        }
    }
}

#[tokio::test]
async fn fallback_pipeline_never_exceeds_fallback_confidence_cap() {
    // No models anywhere: both image stages run their heuristic/fail-open
    // paths, which are capped at 0.8.
    let filter = EvidenceFilter::fallback_only(ScreenerConfig::default());
    let decision = filter.filter_image(&image()).await;
    for outcome in decision.per_stage.values() {
        match outcome {
            evidence_screener::filter::StageOutcome::Detection(d) => {
                assert!(d.confidence <= 0.8);
            }
            evidence_screener::filter::StageOutcome::ImageClassification(c) => {
                assert!(c.confidence <= 0.8);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn text_scenarios_from_real_conversations() {
    let filter = EvidenceFilter::fallback_only(ScreenerConfig::default());

    let clean = filter.filter_texts(&["I love you so much".to_string()]).await;
    assert!(clean.approved);

    let explicit = filter
        .filter_texts(&["let's have fuck tonight, send nude pic".to_string()])
        .await;
    assert!(!explicit.approved);
}

#[tokio::test]
async fn package_verdict_combines_components() {
    let filter = EvidenceFilter::fallback_only(ScreenerConfig::default());
    let messages = vec!["send nude pics now".to_string()];
    let package = filter.filter_package(Some(&image()), &messages).await;
    assert!(!package.approved);
    assert_eq!(package.reasoning, "Messages rejected");
    // The photo itself passed the fallback pipeline.
    assert!(package.components["photo"].approved);
}
