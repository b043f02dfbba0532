//! Planning service backed by a language model.

use async_trait::async_trait;
use std::sync::Arc;

use crew_core::{AgentContext, LlmClient, PlanningError, PlanningResult, PlanningService};

use crate::parser::parse_plan_response;

/// Prompts an [`LlmClient`] for a JSON task list and parses the reply.
///
/// Client errors become [`PlanningError::Transport`]; unusable replies
/// become [`PlanningError::Malformed`].
pub struct LlmPlanningService {
    llm: Arc<dyn LlmClient>,
}

impl LlmPlanningService {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl PlanningService for LlmPlanningService {
    async fn plan(
        &self,
        goal: &str,
        context: &AgentContext,
    ) -> Result<PlanningResult, PlanningError> {
        let prompt = build_prompt(goal, context);
        let response = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| PlanningError::Transport(e.to_string()))?;
        tracing::debug!(
            agent = %context.name,
            finish_reason = %response.finish_reason,
            chars = response.content.len(),
            "Planner responded"
        );
        parse_plan_response(goal, &response.content)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// Render the planning prompt for one agent.
pub fn build_prompt(goal: &str, context: &AgentContext) -> String {
    let mut prompt = format!(
        "You are {}, a worker standing at {}.\n\
         Break the goal into a short ordered list of tasks.\n\n\
         Available actions:\n",
        context.name, context.position
    );
    for action in &context.available_actions {
        prompt.push_str("- ");
        prompt.push_str(action);
        prompt.push('\n');
    }

    if !context.memories.is_empty() {
        prompt.push_str("\nRelevant memories:\n");
        for memory in &context.memories {
            prompt.push_str("- ");
            prompt.push_str(memory);
            prompt.push('\n');
        }
    }
    if !context.recent_actions.is_empty() {
        prompt.push_str("\nRecent actions:\n");
        for action in &context.recent_actions {
            prompt.push_str("- ");
            prompt.push_str(action);
            prompt.push('\n');
        }
    }

    prompt.push_str(&format!(
        "\nGoal: {}\n\n\
         Reply with JSON only:\n\
         {{\"reasoning\": \"...\", \"plan\": \"...\", \"tasks\": [{{\"action\": \"...\", \"parameters\": {{}}}}]}}\n",
        goal
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::mocks::MockLlm;
    use crew_core::{AgentId, Position};

    fn context() -> AgentContext {
        AgentContext {
            agent_id: AgentId::new(),
            name: "Ada".into(),
            position: Position::new(1, 2, 3),
            available_actions: vec!["gather: collect a resource".into()],
            memories: vec!["Completed gather 4 iron".into()],
            recent_actions: vec![],
        }
    }

    #[test]
    fn test_prompt_mentions_context() {
        let prompt = build_prompt("gather 10 iron", &context());
        assert!(prompt.contains("You are Ada"));
        assert!(prompt.contains("(1, 2, 3)"));
        assert!(prompt.contains("- gather: collect a resource"));
        assert!(prompt.contains("Completed gather 4 iron"));
        assert!(!prompt.contains("Recent actions"));
        assert!(prompt.contains("Goal: gather 10 iron"));
    }

    #[tokio::test]
    async fn test_llm_plan_parsed() {
        let llm = Arc::new(MockLlm::constant(
            r#"{"plan": "mine", "tasks": [{"action": "gather", "parameters": {"resource": "iron"}}]}"#,
        ));
        let service = LlmPlanningService::new(llm.clone());
        let plan = service.plan("gather iron", &context()).await.unwrap();
        assert_eq!(plan.tasks()[0].action, "gather");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_error_normalization() {
        let failing = LlmPlanningService::new(Arc::new(MockLlm::failing("503 from provider")));
        assert!(matches!(
            failing.plan("x", &context()).await,
            Err(PlanningError::Transport(msg)) if msg.contains("503")
        ));

        let garbage = LlmPlanningService::new(Arc::new(MockLlm::constant("I cannot help")));
        assert!(matches!(
            garbage.plan("x", &context()).await,
            Err(PlanningError::Malformed(_))
        ));
    }
}
