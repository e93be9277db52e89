//! Screener configuration.
//!
//! Loaded from a TOML file (path overridable via `SCREENER_CONFIG_PATH`),
//! every field defaulting so an empty file is a valid config. Consumed once
//! at orchestrator/scanner construction; there is no hot reload here —
//! moderation toggles changing mid-scan would make sessions unrepeatable.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const ENV_CONFIG_PATH: &str = "SCREENER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/screener.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScreenerConfig {
    pub enable_nsfw_filter: bool,
    pub enable_face_detection: bool,
    pub enable_text_filter: bool,
    pub enable_ocr: bool,
    pub require_human_presence: bool,
    pub allow_manual_override: bool,
    pub thresholds: Thresholds,
    /// Files processed concurrently per batch.
    pub batch_size: usize,
    /// 0 disables periodic background re-scanning.
    pub scan_interval_ms: u64,
    pub worker_pool_size: usize,
    pub ocr_timeout_ms: u64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            enable_nsfw_filter: true,
            enable_face_detection: true,
            enable_text_filter: true,
            enable_ocr: true,
            require_human_presence: false,
            allow_manual_override: true,
            thresholds: Thresholds::default(),
            batch_size: 4,
            scan_interval_ms: 0,
            worker_pool_size: 2,
            ocr_timeout_ms: 30_000,
        }
    }
}

/// Independently tunable confidence thresholds, mirroring the decision
/// rules in the detector and classifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Minimum `objectness * class_prob` for a person candidate.
    pub detection: f32,
    /// Boxes overlapping above this IoU are duplicates.
    pub nms_iou: f32,
    pub nsfw_porn: f32,
    pub nsfw_explicit: f32,
    pub nsfw_suggestive: f32,
    /// Explicit signal a text model must exceed on its own.
    pub text_model_explicit: f32,
    /// Cosine similarity required to report an identity match.
    pub identity_similarity: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            detection: 0.4,
            nms_iou: 0.5,
            nsfw_porn: 0.6,
            nsfw_explicit: 0.5,
            nsfw_suggestive: 0.7,
            text_model_explicit: 0.7,
            identity_similarity: 0.6,
        }
    }
}

impl ScreenerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing screener config")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading screener config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using `$SCREENER_CONFIG_PATH`, then `config/screener.toml`,
    /// then built-in defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return Self::from_path(Path::new(&p));
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::from_path(default);
        }
        Ok(Self::default())
    }

    pub fn ocr_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ocr_timeout_ms)
    }
}
