use crate::types::{AgentId, Task};

/// Splits a lead's fresh plan across its group.
pub trait TaskDelegator: Send + Sync {
    /// Hand some of `tasks` to other agents and return what `lead` keeps.
    fn delegate(&self, lead: AgentId, tasks: Vec<Task>) -> Vec<Task>;
}

/// Keeps every task with the planning agent.
pub struct KeepAllDelegator;

impl TaskDelegator for KeepAllDelegator {
    fn delegate(&self, _lead: AgentId, tasks: Vec<Task>) -> Vec<Task> {
        tasks
    }
}
