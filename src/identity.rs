//! Identity matching over normalized face embeddings.
//!
//! The matcher owns the embedding store; vectors are L2-normalized on
//! registration so matching reduces to a dot product.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::ScreenError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub id: String,
    pub similarity: f32,
}

pub struct IdentityMatcher {
    threshold: f32,
    store: RwLock<HashMap<String, Vec<f32>>>,
}

impl IdentityMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Normalize and store an embedding, overwriting any prior vector
    /// registered for `id`.
    pub fn register_identity(&self, id: &str, vector: &[f32]) -> Result<(), ScreenError> {
        let normalized = l2_normalize(vector)?;
        let Ok(mut store) = self.store.write() else {
            return Err(ScreenError::Cache("embedding store lock poisoned".into()));
        };
        store.insert(id.to_string(), normalized);
        Ok(())
    }

    pub fn registered_count(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Identities whose cosine similarity with the probe exceeds the
    /// threshold, best match first.
    pub fn match_probe(&self, probe: &[f32]) -> Result<Vec<IdentityMatch>, ScreenError> {
        let probe = l2_normalize(probe)?;
        let Ok(store) = self.store.read() else {
            return Err(ScreenError::Cache("embedding store lock poisoned".into()));
        };
        let mut matches = Vec::new();
        for (id, stored) in store.iter() {
            if stored.len() != probe.len() {
                return Err(ScreenError::InvalidInput(format!(
                    "embedding dimension mismatch: probe has {}, '{}' has {}",
                    probe.len(),
                    id,
                    stored.len()
                )));
            }
            let similarity = dot(&probe, stored);
            if similarity > self.threshold {
                matches.push(IdentityMatch {
                    id: id.clone(),
                    similarity,
                });
            }
        }
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_normalize(vector: &[f32]) -> Result<Vec<f32>, ScreenError> {
    if vector.is_empty() {
        return Err(ScreenError::InvalidInput("empty embedding vector".into()));
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(ScreenError::InvalidInput(
            "embedding vector has zero or non-finite norm".into(),
        ));
    }
    Ok(vector.iter().map(|v| v / norm).collect())
}
