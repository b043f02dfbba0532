//! Persistence and embedding traits.

use async_trait::async_trait;

use crate::error::Result;

/// Durable per-agent snapshot storage.
///
/// Stores opaque encoded documents keyed by agent name; version handling
/// belongs to the codec, not the store.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, name: &str, document: &str) -> Result<()>;

    async fn load(&self, name: &str) -> Result<Option<String>>;

    /// Names with a stored snapshot, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Returns whether anything was deleted.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Text → vector model used for episodic memory search.
pub trait EmbeddingModel: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    fn name(&self) -> &str {
        "embedding"
    }
}
