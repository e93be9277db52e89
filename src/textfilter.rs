//! Explicit-text classification.
//!
//! The deterministic keyword/pattern pass always runs; a learned model,
//! when available, runs alongside it and the two verdicts are fused.
//! Verdicts are cached by a hash of the normalized text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::cache::{EvidenceCache, TieredCache, DEFAULT_TTL};
use crate::config::Thresholds;
use crate::error::ScreenError;
use crate::media::text_hash;
use crate::runtime::{DynLoader, ModelRuntime};

/// Safe/explicit signal pair from a learned text model, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextSignal {
    pub safe: f32,
    pub explicit: f32,
}

#[async_trait]
pub trait TextModel: Send + Sync {
    async fn score(&self, text: &str) -> Result<TextSignal, ScreenError>;
}

pub type TextRuntime = ModelRuntime<DynLoader<Box<dyn TextModel>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Model,
    KeywordFallback,
    Fused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitTextResult {
    pub is_explicit: bool,
    pub confidence: f32,
    pub method: ClassificationMethod,
    /// Truncated to [`MAX_MATCHED_TERMS`]; the full match set is never
    /// exposed.
    pub matched_terms: Vec<String>,
}

/// Privacy cap on reported matched terms.
pub const MAX_MATCHED_TERMS: usize = 5;

const TEXT_CACHE_CAPACITY: usize = 500;

static EXPLICIT_TERMS: Lazy<Vec<String>> = Lazy::new(|| {
    serde_json::from_str(include_str!("explicit_terms.json"))
        .unwrap_or_else(|e| panic!("embedded explicit_terms.json is invalid: {e}"))
});

/// Solicitation/arousal phrasings that keyword matching alone misses.
/// Each pattern counts double against the keyword score.
static EXPLICIT_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)let'?s\s+have\s+(sex|fuck)", "solicitation"),
        (r"(?i)\bsend\s+(me\s+)?(a\s+)?(nudes?|naked|sexy)\b", "solicitation"),
        (r"(?i)\bwanna\s+(fuck|have\s+sex|hook\s*up)\b", "solicitation"),
        (r"(?i)\b(i'?m|i\s+am|so|feeling)\s+horny\b", "arousal"),
        (r"(?i)\bturn(s|ed|ing)?\s+me\s+on\b", "arousal"),
    ]
    .into_iter()
    .map(|(p, label)| {
        (
            Regex::new(p).unwrap_or_else(|e| panic!("invalid explicit pattern {p:?}: {e}")),
            label,
        )
    })
    .collect()
});

/// Deterministic keyword/pattern verdict, computed for every input.
#[derive(Debug, Clone)]
pub struct KeywordScore {
    pub matches: u32,
    pub ratio: f32,
    pub is_explicit: bool,
    pub confidence: f32,
    pub matched_terms: Vec<String>,
}

pub fn keyword_score(text: &str) -> KeywordScore {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let word_count = words.len().max(1);

    let mut keyword_hits = 0u32;
    let mut matched_terms: Vec<String> = Vec::new();
    for word in &words {
        let clean: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if clean.is_empty() {
            continue;
        }
        for term in EXPLICIT_TERMS.iter() {
            if clean.contains(term.as_str()) {
                keyword_hits += 1;
                if !matched_terms.contains(term) {
                    matched_terms.push(term.clone());
                }
                break;
            }
        }
    }

    let mut pattern_hits = 0u32;
    for (pattern, label) in EXPLICIT_PATTERNS.iter() {
        if pattern.is_match(&lower) {
            pattern_hits += 1;
            let label = label.to_string();
            if !matched_terms.contains(&label) {
                matched_terms.push(label);
            }
        }
    }

    let matches = keyword_hits + 2 * pattern_hits;
    let ratio = matches as f32 / word_count as f32;
    let is_explicit = matches > 0 && (ratio > 0.1 || matches >= 2);
    let confidence = if is_explicit {
        (ratio * 2.0 + matches as f32 * 0.3).min(1.0)
    } else {
        (0.5 - ratio).max(0.1)
    };
    matched_terms.truncate(MAX_MATCHED_TERMS);
    KeywordScore {
        matches,
        ratio,
        is_explicit,
        confidence,
        matched_terms,
    }
}

pub struct ExplicitTextClassifier {
    runtime: Option<TextRuntime>,
    model_threshold: f32,
    cache: TieredCache,
}

impl ExplicitTextClassifier {
    pub fn new(runtime: Option<TextRuntime>, thresholds: &Thresholds) -> Self {
        Self {
            runtime,
            model_threshold: thresholds.text_model_explicit,
            cache: TieredCache::memory_only(TEXT_CACHE_CAPACITY),
        }
    }

    pub fn fallback_only(thresholds: &Thresholds) -> Self {
        Self::new(None, thresholds)
    }

    /// Back the verdict cache with a persistent collaborator so results
    /// survive restarts.
    pub fn with_persistent_cache(mut self, persistent: Arc<dyn EvidenceCache>) -> Self {
        self.cache = TieredCache::new(TEXT_CACHE_CAPACITY, Some(persistent));
        self
    }

    pub async fn classify(&self, text: &str) -> ExplicitTextResult {
        if text.trim().is_empty() {
            return ExplicitTextResult {
                is_explicit: false,
                confidence: 0.9,
                method: ClassificationMethod::KeywordFallback,
                matched_terms: Vec::new(),
            };
        }

        let key = text_hash(text);
        if let Some(json) = self.cache.get(&key).await {
            if let Ok(cached) = serde_json::from_str::<ExplicitTextResult>(&json) {
                return cached;
            }
        }

        let result = self.classify_uncached(text).await;
        if let Ok(json) = serde_json::to_string(&result) {
            self.cache.put(&key, json, DEFAULT_TTL).await;
        }
        result
    }

    async fn classify_uncached(&self, text: &str) -> ExplicitTextResult {
        let kw = keyword_score(text);

        let signal = match &self.runtime {
            Some(runtime) => match crate::runtime::boxed(runtime.get_or_load()).await {
                Some(model) => match model.score(text).await {
                    Ok(signal) => Some(signal),
                    Err(e) => {
                        tracing::warn!(error = %e, "text model failed, keyword verdict only");
                        None
                    }
                },
                None => None,
            },
            None => None,
        };

        match signal {
            None => ExplicitTextResult {
                is_explicit: kw.is_explicit,
                confidence: kw.confidence,
                method: ClassificationMethod::KeywordFallback,
                matched_terms: kw.matched_terms,
            },
            Some(signal) => {
                if kw.is_explicit {
                    // The deterministic pass flagged it; the model can only
                    // raise confidence, never overrule.
                    ExplicitTextResult {
                        is_explicit: true,
                        confidence: kw.confidence.max(signal.explicit).clamp(0.0, 1.0),
                        method: ClassificationMethod::Fused,
                        matched_terms: kw.matched_terms,
                    }
                } else if signal.explicit > self.model_threshold {
                    ExplicitTextResult {
                        is_explicit: true,
                        confidence: signal.explicit.clamp(0.0, 1.0),
                        method: ClassificationMethod::Model,
                        matched_terms: kw.matched_terms,
                    }
                } else {
                    ExplicitTextResult {
                        is_explicit: false,
                        confidence: signal.safe.clamp(0.0, 1.0),
                        method: ClassificationMethod::Model,
                        matched_terms: Vec::new(),
                    }
                }
            }
        }
    }
}
