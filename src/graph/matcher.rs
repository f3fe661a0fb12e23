//! Identity predicates for object resolution.
//!
//! The spatial index asks an [`ObjectMatcher`] whether a freshly observed
//! object is the same physical entity as one it already holds. The matcher is
//! chosen once, when the index is built.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ObjectNode;

/// Decides whether two object observations refer to the same physical entity.
pub trait ObjectMatcher: Send + Sync + Debug {
    /// Whether `candidate` is the same entity as the already-known `known`.
    fn is_same_entity(&self, known: &ObjectNode, candidate: &ObjectNode) -> bool;

    /// Short name used in logs and `info` output.
    fn name(&self) -> &'static str;
}

/// Ground-truth mode: two observations match when their names are equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroundTruthMatcher;

impl ObjectMatcher for GroundTruthMatcher {
    fn is_same_entity(&self, known: &ObjectNode, candidate: &ObjectNode) -> bool {
        known.name == candidate.name
    }

    fn name(&self) -> &'static str {
        "ground_truth"
    }
}

/// Perception mode: same `object_class` and visual embeddings whose cosine
/// similarity reaches `threshold`.
///
/// Observations without an embedding never match.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingMatcher {
    pub threshold: f32,
}

impl EmbeddingMatcher {
    pub const DEFAULT_THRESHOLD: f32 = 0.9;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EmbeddingMatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl ObjectMatcher for EmbeddingMatcher {
    fn is_same_entity(&self, known: &ObjectNode, candidate: &ObjectNode) -> bool {
        if known.object_class != candidate.object_class {
            return false;
        }
        match (&known.visual_embedding, &candidate.visual_embedding) {
            (Some(a), Some(b)) => {
                cosine_similarity(a, b).is_some_and(|sim| sim >= self.threshold)
            }
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// `None` when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Matcher selection as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherMode {
    #[default]
    GroundTruth,
    Embedding,
}

impl MatcherMode {
    /// Build the matcher for this mode.
    pub fn build(self, embedding_threshold: f32) -> Arc<dyn ObjectMatcher> {
        match self {
            Self::GroundTruth => Arc::new(GroundTruthMatcher),
            Self::Embedding => Arc::new(EmbeddingMatcher::new(embedding_threshold)),
        }
    }
}
