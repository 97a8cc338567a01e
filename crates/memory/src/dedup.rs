//! Exact and semantic duplicate detection.

use std::sync::Arc;

use beebo_common::Result;
use serde::Serialize;
use tracing::debug;

use crate::store::{EmbeddedRow, MemoryStore};
use crate::types::Memory;

/// Cosine similarity of two vectors.
///
/// `None` when the vectors differ in length, are empty, or either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// The `{id, text}` pair reported back when an insert collides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExistingMemory {
    pub id: String,
    pub text: String,
}

impl From<&Memory> for ExistingMemory {
    fn from(memory: &Memory) -> Self {
        Self {
            id: memory.id.clone(),
            text: memory.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub existing: ExistingMemory,
    pub similarity: f32,
}

/// Find the stored row most similar to `embedding`.
///
/// Rows whose vectors are incomparable (different dimension, zero norm) are skipped.
pub fn best_match<'a>(candidates: &'a [EmbeddedRow], embedding: &[f32]) -> Option<(&'a EmbeddedRow, f32)> {
    candidates
        .iter()
        .filter_map(|row| cosine_similarity(embedding, &row.embedding).map(|sim| (row, sim)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

pub struct DuplicateDetector {
    store: Arc<MemoryStore>,
    threshold: f32,
}

impl DuplicateDetector {
    pub fn new(store: Arc<MemoryStore>, threshold: f32) -> Self {
        Self { store, threshold }
    }

    /// Strictly greater than the threshold; equal is not a duplicate.
    pub fn is_semantic_match(&self, similarity: f32) -> bool {
        similarity > self.threshold
    }

    pub async fn find_exact(&self, text_norm: &str) -> Result<Option<Memory>> {
        self.store.get_by_norm(text_norm).await
    }

    /// Linear scan over every stored embedding.
    pub async fn find_semantic(&self, embedding: &[f32]) -> Result<Option<SemanticMatch>> {
        let candidates = self.store.list_all_embedded().await?;
        let Some((row, similarity)) = best_match(&candidates, embedding) else {
            return Ok(None);
        };

        debug!(
            candidate = %row.id,
            similarity,
            threshold = self.threshold,
            scanned = candidates.len(),
            "Closest stored embedding"
        );

        if !self.is_semantic_match(similarity) {
            return Ok(None);
        }

        Ok(Some(SemanticMatch {
            existing: ExistingMemory {
                id: row.id.clone(),
                text: row.text.clone(),
            },
            similarity,
        }))
    }
}
