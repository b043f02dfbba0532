//! Persisted agent layout.

use serde::{Deserialize, Serialize};

use super::{AgentId, AgentState, MemorySnapshot, Position, Task};

/// Version written by this build. Loaders branch on it.
pub const SNAPSHOT_VERSION: u64 = 1;

/// Durable form of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub version: u64,
    pub agent_id: AgentId,
    pub name: String,
    pub group: String,
    pub position: Position,
    pub state: AgentState,
    pub goal: Option<String>,
    /// Pending work in execution order. An in-flight task is listed first
    /// and restarts from the beginning on restore.
    pub queue: Vec<Task>,
    #[serde(default)]
    pub recent_actions: Vec<String>,
    #[serde(default)]
    pub last_failure: Option<String>,
    pub memory: MemorySnapshot,
}

/// Pre-versioning layout: only the goal and the recent action log survived.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacySnapshot {
    #[serde(default, alias = "CurrentGoal")]
    pub current_goal: Option<String>,
    #[serde(default, alias = "RecentActions")]
    pub recent_actions: Vec<String>,
}
