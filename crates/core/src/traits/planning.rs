use async_trait::async_trait;

use crate::error::PlanningError;
use crate::types::{AgentContext, PlanningResult};

/// External planning service: goal text in, ordered task list out.
///
/// Implementations normalize provider failures into [`PlanningError`].
#[async_trait]
pub trait PlanningService: Send + Sync {
    async fn plan(
        &self,
        goal: &str,
        context: &AgentContext,
    ) -> std::result::Result<PlanningResult, PlanningError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "planner"
    }
}
