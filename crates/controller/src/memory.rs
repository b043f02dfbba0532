//! Agent-side memory: episodic store plus a short log of recent actions.

use std::collections::VecDeque;
use std::sync::Arc;

use crew_core::{EmbeddingModel, MemoryConfig, MemoryEntry, MemorySnapshot, Result};
use crew_store::{episodic::restore_or_corrupt, EpisodicMemoryStore};

/// Importance given to routine successes.
pub const ROUTINE: u8 = 3;
/// Importance given to failures worth remembering.
pub const NOTABLE: u8 = 7;

pub struct AgentMemory {
    episodic: EpisodicMemoryStore,
    embedder: Arc<dyn EmbeddingModel>,
    recent: VecDeque<String>,
    recent_capacity: usize,
}

impl AgentMemory {
    pub fn new(config: &MemoryConfig, embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            episodic: EpisodicMemoryStore::new(config.capacity, config.eviction, embedder.dimension()),
            embedder,
            recent: VecDeque::new(),
            recent_capacity: config.recent_actions.max(1),
        }
    }

    pub fn restore(
        agent: &str,
        config: &MemoryConfig,
        embedder: Arc<dyn EmbeddingModel>,
        snapshot: MemorySnapshot,
        recent_actions: Vec<String>,
    ) -> Result<Self> {
        let mut episodic = restore_or_corrupt(agent, snapshot, config.capacity, config.eviction)?;
        if episodic.dimension() != embedder.dimension() {
            tracing::warn!(
                agent = %agent,
                stored = episodic.dimension(),
                model = embedder.dimension(),
                records = episodic.len(),
                "Re-embedding restored memory for the configured model"
            );
            episodic.reembed(embedder.dimension(), |text| embedder.embed(text));
        }
        let mut memory = Self {
            episodic,
            embedder,
            recent: VecDeque::new(),
            recent_capacity: config.recent_actions.max(1),
        };
        for action in recent_actions {
            memory.log_action(action);
        }
        Ok(memory)
    }

    /// Embed and record an experience. Returns the record id.
    pub fn remember(&mut self, text: impl Into<String>, importance: u8) -> u64 {
        let text = text.into();
        let embedding = self.embedder.embed(&text);
        self.episodic.record(
            MemoryEntry::new(text)
                .with_importance(importance)
                .with_embedding(embedding),
        )
    }

    /// Record an experience that the priority policy never evicts first.
    pub fn remember_milestone(&mut self, text: impl Into<String>) -> u64 {
        let text = text.into();
        let embedding = self.embedder.embed(&text);
        self.episodic.record(
            MemoryEntry::new(text)
                .with_importance(10)
                .milestone()
                .with_embedding(embedding),
        )
    }

    /// Append to the bounded recent-action log.
    pub fn log_action(&mut self, action: impl Into<String>) {
        if self.recent.len() >= self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(action.into());
    }

    /// Texts of the `k` memories most similar to `query`.
    pub fn relevant(&self, query: &str, k: usize) -> Vec<String> {
        if self.episodic.is_empty() || k == 0 {
            return Vec::new();
        }
        let embedding = self.embedder.embed(query);
        self.episodic
            .search(&embedding, k)
            .into_iter()
            .map(|hit| hit.record.text)
            .collect()
    }

    /// Oldest first.
    pub fn recent_actions(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    pub fn episodic(&self) -> &EpisodicMemoryStore {
        &self.episodic
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        self.episodic.snapshot()
    }
}
