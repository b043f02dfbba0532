//! Action traits.

use std::sync::Arc;

use crate::error::Result;
use crate::traits::WorldInterface;
use crate::types::{ActionResult, AgentId, Position, Task};

/// What an action may know about the agent running it.
#[derive(Clone)]
pub struct ActionContext {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub position: Position,
    pub world: Arc<dyn WorldInterface>,
}

/// A running task. Driven one step per tick by the executor.
pub trait Action: Send {
    fn start(&mut self);

    /// Advance one step. `Some` once the action has finished.
    fn tick(&mut self) -> Option<ActionResult>;

    fn cancel(&mut self);

    fn description(&self) -> String;
}

/// Builds actions for one action id.
pub trait ActionFactory: Send + Sync {
    fn id(&self) -> &str;

    /// One-line usage shown to the planner.
    fn usage(&self) -> &str {
        ""
    }

    /// Fails when the task's parameters are unusable.
    fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>>;
}
