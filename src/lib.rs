// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod nsfw;
pub mod ocr;
pub mod runtime;
pub mod textfilter;

// Detection: result types, geometry, primary decode and heuristics
pub mod detect;

// Orchestration & background scanning
pub mod filter;
pub mod scanner;

// ---- Re-exports for stable public API ----
pub use crate::cache::{EvidenceCache, MemoryCache, TieredCache};
pub use crate::config::{ScreenerConfig, Thresholds};
pub use crate::detect::{DetectionBox, DetectionResult, DetectionSource, PersonDetector};
pub use crate::error::ScreenError;
pub use crate::filter::{EvidenceFilter, FilterDecision, FilterStats, PackageDecision};
pub use crate::identity::{IdentityMatch, IdentityMatcher};
pub use crate::media::{EvidenceInput, PixelBuffer};
pub use crate::nsfw::{ExplicitImageClassifier, ExplicitImageResult};
pub use crate::ocr::{ExtractedText, OcrEngine, TextExtractor};
pub use crate::runtime::{ModelRuntime, ModelStatus};
pub use crate::scanner::{
    DecisionSink, EvidenceScanner, FileSource, ScanSession, ScanStatus, SourceFile,
};
pub use crate::textfilter::{ExplicitTextClassifier, ExplicitTextResult};
