//! Error types for Crewmaster.
//!
//! Variants are grouped by failure class. Every message is written to be
//! shown to an operator as-is.

use thiserror::Error;

use crate::types::AgentState;

/// Result type alias using Crewmaster's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Crewmaster.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Admission rejections (guards refused the command, nothing changed)
    // =========================================================================
    #[error("An agent named '{0}' already exists")]
    DuplicateName(String),

    #[error("Agent '{agent}' is busy ({state}) and cannot accept commands")]
    Busy { agent: String, state: AgentState },

    #[error("Invalid spawn request: {0}")]
    InvalidSpawn(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("No agent named '{0}'")]
    AgentNotFound(String),

    #[error("Role change rejected: {0}")]
    RoleRejected(String),

    // =========================================================================
    // Planning and task failures
    // =========================================================================
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Task error: {0}")]
    Task(String),

    // =========================================================================
    // Data integrity (persisted state)
    // =========================================================================
    #[error("Snapshot for '{agent}' has unsupported version {version}")]
    UnsupportedSnapshotVersion { agent: String, version: u64 },

    #[error("Snapshot for '{agent}' is corrupt: {reason}")]
    CorruptSnapshot { agent: String, reason: String },

    #[error("Registry desync: {0}")]
    RegistryDesync(String),

    // =========================================================================
    // Resource exhaustion
    // =========================================================================
    #[error("Population is at capacity ({limit} agents)")]
    CapacityExceeded { limit: usize },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a duplicate name rejection.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    /// Create an invalid spawn rejection.
    pub fn invalid_spawn(msg: impl Into<String>) -> Self {
        Self::InvalidSpawn(msg.into())
    }

    /// Create an invalid command rejection.
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// Create an agent-not-found rejection.
    pub fn agent_not_found(name: impl Into<String>) -> Self {
        Self::AgentNotFound(name.into())
    }

    /// Create a role change rejection.
    pub fn role_rejected(msg: impl Into<String>) -> Self {
        Self::RoleRejected(msg.into())
    }

    /// Create a task error.
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Create an unknown action error.
    pub fn unknown_action(id: impl Into<String>) -> Self {
        Self::UnknownAction(id.into())
    }

    /// Create a corrupt snapshot error.
    pub fn corrupt_snapshot(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for guard rejections that left all state untouched.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName(_)
                | Self::Busy { .. }
                | Self::InvalidSpawn(_)
                | Self::InvalidCommand(_)
                | Self::AgentNotFound(_)
                | Self::RoleRejected(_)
                | Self::CapacityExceeded { .. }
        )
    }

    /// True for failures caused by persisted data that cannot be trusted.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedSnapshotVersion { .. }
                | Self::CorruptSnapshot { .. }
                | Self::RegistryDesync(_)
        )
    }
}

/// Normalized failure of an external planning call.
///
/// Provider-specific error shapes are folded into one of these three.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("planner returned an unusable response: {0}")]
    Malformed(String),

    #[error("planner transport error: {0}")]
    Transport(String),

    #[error("planning was cancelled")]
    Cancelled,
}

impl PlanningError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Transport(_) => "transport",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_displayable() {
        let err = Error::UnsupportedSnapshotVersion {
            agent: "Ada".into(),
            version: 7,
        };
        assert_eq!(err.to_string(), "Snapshot for 'Ada' has unsupported version 7");
        assert!(err.is_data_integrity());

        let busy = Error::Busy {
            agent: "Bo".into(),
            state: AgentState::Planning,
        };
        assert!(busy.to_string().contains("PLANNING"));
        assert!(busy.is_admission());
    }

    #[test]
    fn test_planning_error_wraps() {
        let err: Error = PlanningError::Transport("connection reset".into()).into();
        assert_eq!(
            err.to_string(),
            "Planning failed: planner transport error: connection reset"
        );
        assert!(!err.is_admission());
    }
}
