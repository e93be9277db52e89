//! Error taxonomy for the screening pipeline.
//!
//! Propagation policy: model and classification failures are recovered
//! locally into typed stage results so one bad file never aborts a batch.
//! Only input-validation and override-policy errors surface to callers.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    /// A model could not be loaded; the owning service stays in fallback
    /// mode until `load()` is invoked again explicitly.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// Inference raised inside a stage; converted into an `Error`-sourced
    /// result at the stage boundary, never rethrown past it.
    #[error("inference failed: {0}")]
    Inference(String),

    /// A text-extraction job exceeded its deadline. Treated as a failed
    /// extraction: empty text, zero confidence, no partial result.
    #[error("text extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed input (undecodable blob, mismatched embedding dimensions).
    /// Thrown immediately; callers must handle.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cache collaborators may fail; the operation proceeds as a miss.
    #[error("cache error: {0}")]
    Cache(String),

    /// A manual override was attempted while the feature is disabled.
    #[error("manual overrides are disabled")]
    OverrideDisabled,
}

impl ScreenError {
    /// Short human-readable reasoning string for rejected results.
    pub fn reasoning(&self) -> String {
        format!("Error: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_is_prefixed() {
        let e = ScreenError::InvalidInput("not an image".into());
        assert_eq!(e.reasoning(), "Error: invalid input: not an image");
    }
}
