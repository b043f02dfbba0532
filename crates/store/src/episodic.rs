//! Per-agent episodic memory with cosine-similarity search.
//!
//! Records are appended in id order, which doubles as recency order. The
//! store is owned by exactly one agent and is mutated through `&mut self`
//! only, so it carries no locks.

use chrono::Utc;
use crew_core::{
    EvictionPolicy, MemoryEntry, MemoryRecord, MemorySnapshot, Result, ScoredMemory,
};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Bounded, append-only memory log.
#[derive(Debug, Clone)]
pub struct EpisodicMemoryStore {
    capacity: usize,
    policy: EvictionPolicy,
    dimension: usize,
    next_id: u64,
    records: VecDeque<MemoryRecord>,
}

impl EpisodicMemoryStore {
    /// Create an empty store. A capacity of zero is treated as one.
    pub fn new(capacity: usize, policy: EvictionPolicy, dimension: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            dimension,
            next_id: 1,
            records: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append a record, evicting first if the store is full. Returns the new id.
    pub fn record(&mut self, entry: MemoryEntry) -> u64 {
        while self.records.len() >= self.capacity {
            match self.evict_one() {
                Some(evicted) => {
                    tracing::debug!(
                        id = evicted.id,
                        policy = ?self.policy,
                        "Evicted episodic memory"
                    );
                    crew_governance::track_memory_eviction();
                }
                None => break,
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(MemoryRecord {
            id,
            text: entry.text,
            timestamp: Utc::now(),
            importance: entry.importance.min(10),
            milestone: entry.milestone,
            embedding: entry.embedding,
        });
        id
    }

    /// Remove the victim chosen by the configured policy.
    fn evict_one(&mut self) -> Option<MemoryRecord> {
        let idx = match self.policy {
            EvictionPolicy::Oldest => 0,
            EvictionPolicy::Priority => self.priority_victim()?,
        };
        self.records.remove(idx)
    }

    /// Lowest importance among non-milestones, oldest on ties. Falls back to
    /// the oldest record when everything is a milestone.
    fn priority_victim(&self) -> Option<usize> {
        if self.records.is_empty() {
            return None;
        }
        let candidate = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.milestone)
            // min_by_key keeps the first minimum, i.e. the oldest.
            .min_by_key(|(_, r)| r.importance)
            .map(|(i, _)| i);
        Some(candidate.unwrap_or(0))
    }

    /// The `k` most similar records, best first.
    ///
    /// Returns exactly `min(k, len)` hits. Records without an embedding, or
    /// with a different dimension, score 0. Equal scores put the newer record
    /// first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredMemory> {
        let mut scored: Vec<(f32, &MemoryRecord)> = self
            .records
            .iter()
            .map(|record| {
                let score = record
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query, e))
                    .unwrap_or(0.0);
                // -0.0 + 0.0 is 0.0, so signed zeros tie under total_cmp.
                (score + 0.0, record)
            })
            .collect();

        scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
            Ordering::Equal => b.1.id.cmp(&a.1.id),
            other => other,
        });

        scored
            .into_iter()
            .take(k)
            .map(|(score, record)| ScoredMemory {
                record: record.clone(),
                score,
            })
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<&MemoryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.records.iter()
    }

    /// Recompute every embedding from the record text under a new dimension.
    pub fn reembed(&mut self, dimension: usize, mut embed: impl FnMut(&str) -> Vec<f32>) {
        self.dimension = dimension;
        for record in self.records.iter_mut() {
            record.embedding = Some(embed(&record.text));
        }
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            dimension: self.dimension,
            next_id: self.next_id,
            records: self.records.iter().cloned().collect(),
        }
    }

    /// Rebuild a store from a snapshot, embeddings included.
    ///
    /// Records must have strictly increasing ids below `next_id`. A snapshot
    /// larger than `capacity` is trimmed with the configured policy.
    pub fn restore(
        snapshot: MemorySnapshot,
        capacity: usize,
        policy: EvictionPolicy,
    ) -> std::result::Result<Self, String> {
        let mut last = 0u64;
        for record in &snapshot.records {
            if record.id <= last {
                return Err(format!("memory record ids out of order at {}", record.id));
            }
            if record.id >= snapshot.next_id {
                return Err(format!(
                    "memory record id {} is not below next_id {}",
                    record.id, snapshot.next_id
                ));
            }
            last = record.id;
        }

        let mut store = Self {
            capacity: capacity.max(1),
            policy,
            dimension: snapshot.dimension,
            next_id: snapshot.next_id.max(1),
            records: snapshot.records.into(),
        };
        while store.records.len() > store.capacity {
            if store.evict_one().is_none() {
                break;
            }
        }
        Ok(store)
    }
}

/// Cosine similarity between two vectors.
///
/// 0.0 for mismatched lengths, zero magnitude, or a non-finite result.
pub fn cosine_similarity(v1: &[f32], v2: &[f32]) -> f32 {
    if v1.len() != v2.len() || v1.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = v1.iter().zip(v2.iter()).map(|(a, b)| a * b).sum();
    let magnitude1: f32 = v1.iter().map(|a| a * a).sum::<f32>().sqrt();
    let magnitude2: f32 = v2.iter().map(|a| a * a).sum::<f32>().sqrt();

    if magnitude1 == 0.0 || magnitude2 == 0.0 {
        return 0.0;
    }

    let score = dot_product / (magnitude1 * magnitude2);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Convenience used by callers that must surface a restore failure as a
/// crate error.
pub fn restore_or_corrupt(
    agent: &str,
    snapshot: MemorySnapshot,
    capacity: usize,
    policy: EvictionPolicy,
) -> Result<EpisodicMemoryStore> {
    EpisodicMemoryStore::restore(snapshot, capacity, policy)
        .map_err(|reason| crew_core::Error::corrupt_snapshot(agent, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, embedding: Vec<f32>) -> MemoryEntry {
        MemoryEntry::new(text).with_embedding(embedding)
    }

    #[test]
    fn test_vector_search() {
        let mut store = EpisodicMemoryStore::new(10, EvictionPolicy::Oldest, 3);
        store.record(entry("Apple", vec![1.0, 0.0, 0.0]));
        store.record(entry("Banana", vec![0.0, 1.0, 0.0]));

        // Search close to Apple
        let results = store.search(&[0.9, 0.1, 0.0], 1);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.text, "Apple");
    }

    #[test]
    fn test_search_size_is_min_of_k_and_len() {
        let mut store = EpisodicMemoryStore::new(10, EvictionPolicy::Oldest, 2);
        store.record(entry("a", vec![1.0, 0.0]));
        store.record(MemoryEntry::new("no embedding"));
        store.record(entry("wrong dimension", vec![1.0, 0.0, 0.0]));

        assert_eq!(store.search(&[1.0, 0.0], 10).len(), 3);
        assert_eq!(store.search(&[1.0, 0.0], 2).len(), 2);
        assert!(store.search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_search_order_is_non_increasing_with_recency_ties() {
        let mut store = EpisodicMemoryStore::new(10, EvictionPolicy::Oldest, 2);
        let old = store.record(entry("old twin", vec![0.0, 1.0]));
        store.record(entry("east", vec![1.0, 0.0]));
        let new = store.record(entry("new twin", vec![0.0, 2.0]));
        store.record(entry("opposite", vec![-1.0, 0.0]));

        let results = store.search(&[0.6, 0.8], 4);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let twins: Vec<u64> = results
            .iter()
            .filter(|r| r.record.text.contains("twin"))
            .map(|r| r.record.id)
            .collect();
        assert_eq!(twins, vec![new, old]);
        assert_eq!(results.last().unwrap().record.text, "opposite");
    }

    #[test]
    fn test_negative_zero_score_ties_with_zero() {
        let mut store = EpisodicMemoryStore::new(10, EvictionPolicy::Oldest, 2);
        let old = store.record(MemoryEntry::new("unembedded"));
        let new = store.record(entry("orthogonal", vec![-0.0, -1.0]));

        let results = store.search(&[1.0, 0.0], 2);
        let ids: Vec<u64> = results.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![new, old]);
        assert!(results.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn test_oldest_policy_evicts_oldest() {
        let mut store = EpisodicMemoryStore::new(2, EvictionPolicy::Oldest, 2);
        store.record(MemoryEntry::new("one").with_importance(10));
        store.record(MemoryEntry::new("two"));
        store.record(MemoryEntry::new("three"));

        let texts: Vec<&str> = store.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn test_priority_policy_protects_milestones_and_importance() {
        let mut store = EpisodicMemoryStore::new(3, EvictionPolicy::Priority, 2);
        store.record(MemoryEntry::new("milestone").with_importance(0).milestone());
        store.record(MemoryEntry::new("low a").with_importance(2));
        store.record(MemoryEntry::new("high").with_importance(9));
        store.record(MemoryEntry::new("low b").with_importance(2));

        let texts: Vec<&str> = store.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["milestone", "high", "low b"]);
    }

    #[test]
    fn test_priority_policy_all_milestones_evicts_oldest() {
        let mut store = EpisodicMemoryStore::new(2, EvictionPolicy::Priority, 2);
        store.record(MemoryEntry::new("first").milestone());
        store.record(MemoryEntry::new("second").milestone());
        store.record(MemoryEntry::new("third").milestone());

        let texts: Vec<&str> = store.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn test_snapshot_restores_search() {
        let mut store = EpisodicMemoryStore::new(5, EvictionPolicy::Oldest, 2);
        store.record(entry("north", vec![0.0, 1.0]));
        store.record(entry("east", vec![1.0, 0.0]));

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let snapshot: MemorySnapshot = serde_json::from_str(&json).unwrap();
        let mut restored = EpisodicMemoryStore::restore(snapshot, 5, EvictionPolicy::Oldest).unwrap();

        assert_eq!(restored.snapshot(), store.snapshot());
        assert_eq!(
            restored.search(&[0.1, 0.9], 2),
            store.search(&[0.1, 0.9], 2)
        );
        // ids keep increasing after restore
        assert_eq!(restored.record(MemoryEntry::new("next")), 3);
    }

    #[test]
    fn test_restore_rejects_bad_ids() {
        let mut store = EpisodicMemoryStore::new(5, EvictionPolicy::Oldest, 2);
        store.record(MemoryEntry::new("a"));
        store.record(MemoryEntry::new("b"));
        let mut snapshot = store.snapshot();
        snapshot.records.swap(0, 1);

        assert!(EpisodicMemoryStore::restore(snapshot, 5, EvictionPolicy::Oldest).is_err());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
