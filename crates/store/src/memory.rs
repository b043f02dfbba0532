//! In-memory snapshot store implementation using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;

use crew_core::{traits::SnapshotStore, Result};

/// Snapshot store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    documents: DashMap<String, String>,
}

impl InMemorySnapshotStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    /// Get the number of stored snapshots.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Insert a raw document, bypassing the codec. Useful for seeding
    /// damaged or foreign snapshots.
    pub fn insert_raw(&self, name: &str, document: impl Into<String>) {
        self.documents.insert(name.to_string(), document.into());
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, name: &str, document: &str) -> Result<()> {
        self.documents.insert(name.to_string(), document.to_string());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<String>> {
        Ok(self.documents.get(name).map(|d| d.value().clone()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.documents.remove(name).is_some())
    }
}
