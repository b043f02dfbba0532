#![deny(unused)]
//! Storage for Crewmaster.
//!
//! This crate provides the per-agent episodic memory store, a deterministic
//! local embedding model, the versioned snapshot codec, and the snapshot
//! stores (file-backed and in-memory) used to survive restarts.

pub mod embedding;
pub mod episodic;
pub mod file_store;
pub mod memory;
pub mod snapshot;

pub use embedding::HashEmbedding;
pub use episodic::{cosine_similarity, EpisodicMemoryStore};
pub use file_store::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use snapshot::{DecodedSnapshot, SnapshotCodec};
