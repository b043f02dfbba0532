//! Episodic memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which record gives way when a memory store is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the oldest record.
    #[default]
    Oldest,
    /// Evict the lowest-importance non-milestone record, oldest first on ties.
    /// When every record is a milestone, the oldest goes.
    Priority,
}

/// Input to `record`: what happened, before the store stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub text: String,
    pub importance: u8,
    pub milestone: bool,
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            importance: 5,
            milestone: false,
            embedding: None,
        }
    }

    /// Importance on a 0..=10 scale.
    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance.min(10);
        self
    }

    pub fn milestone(mut self) -> Self {
        self.milestone = true;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Stored, immutable memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Monotonic per store; larger is newer.
    pub id: u64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub importance: u8,
    #[serde(default)]
    pub milestone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Everything needed to rebuild a store, embeddings included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub dimension: usize,
    pub next_id: u64,
    pub records: Vec<MemoryRecord>,
}
