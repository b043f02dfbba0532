//! Planning inputs and outputs.

use serde::{Deserialize, Serialize};

use super::{AgentId, Position, Task};

/// Goal description plus the ordered tasks produced for it.
///
/// Immutable once built; consumed by the PLANNING → EXECUTING step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningResult {
    goal: String,
    reasoning: String,
    tasks: Vec<Task>,
}

impl PlanningResult {
    pub fn new(goal: impl Into<String>, reasoning: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            goal: goal.into(),
            reasoning: reasoning.into(),
            tasks,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

/// What the planner is told about the requesting agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub name: String,
    pub position: Position,
    /// Action ids the executor can dispatch.
    pub available_actions: Vec<String>,
    /// Most relevant past experiences, best first.
    pub memories: Vec<String>,
    pub recent_actions: Vec<String>,
}
