//! Agent identity, lifecycle state, position and role.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable internal identifier, independent of the agent's name.
///
/// Ordering is used for deterministic lead election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl AgentState {
    /// Admission gate for new goals.
    pub fn can_accept_commands(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed)
    }

    /// Whether `target` is reachable from `self` in one guarded step.
    pub fn can_transition_to(self, target: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, target),
            (Idle, Planning)
                | (Planning, Executing)
                | (Planning, Idle)
                | (Planning, Failed)
                | (Executing, Failed)
                | (Executing, Completed)
                | (Completed, Idle)
                | (Failed, Idle)
        )
    }

    /// PLANNING or EXECUTING: work is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Planning | Self::Executing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block position in the host world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(&self, other: &Position) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Role assigned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Coordinates its group; at most one per group.
    Lead,
    Worker,
    Specialist,
    /// Works alone: never leads, never receives distributed work.
    Solo,
}

impl AgentRole {
    /// Can receive tasks split off a lead's plan.
    pub fn takes_assignments(self) -> bool {
        matches!(self, Self::Worker | Self::Specialist)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lead => "lead",
            Self::Worker => "worker",
            Self::Specialist => "specialist",
            Self::Solo => "solo",
        };
        f.write_str(s)
    }
}

/// Read-only view of an agent for command callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub name: String,
    pub state: AgentState,
    pub goal: Option<String>,
    pub queued_tasks: usize,
    pub role: Option<AgentRole>,
    pub position: Position,
    pub last_failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AgentState; 5] = [
        AgentState::Idle,
        AgentState::Planning,
        AgentState::Executing,
        AgentState::Completed,
        AgentState::Failed,
    ];

    #[test]
    fn test_accepts_commands_only_when_not_busy() {
        for state in ALL {
            assert_eq!(state.can_accept_commands(), !state.is_active(), "{state}");
        }
    }

    #[test]
    fn test_transition_table() {
        let allowed = [
            (AgentState::Idle, AgentState::Planning),
            (AgentState::Planning, AgentState::Executing),
            (AgentState::Planning, AgentState::Idle),
            (AgentState::Planning, AgentState::Failed),
            (AgentState::Executing, AgentState::Failed),
            (AgentState::Executing, AgentState::Completed),
            (AgentState::Completed, AgentState::Idle),
            (AgentState::Failed, AgentState::Idle),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&AgentState::Executing).unwrap();
        assert_eq!(json, "\"EXECUTING\"");
    }
}
