//! Offline stand-ins for the language model and the host world, so the
//! binary runs without either.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crew_core::{
    AgentId, LlmClient, LlmResponse, MutationStatus, MutationTicket, Position, Result,
    WorldInterface, WorldRequest,
};
use serde_json::{json, Value};

/// Lowest and highest block an agent may stand on.
const MIN_Y: i32 = -64;
const MAX_Y: i32 = 320;

// =============================================================================
// Keyword planner
// =============================================================================

/// Answers planning prompts by matching keywords in the goal line.
pub struct KeywordLlm;

impl KeywordLlm {
    fn goal_of(prompt: &str) -> &str {
        prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("Goal: "))
            .unwrap_or("")
    }

    fn quantity(words: &[&str]) -> u64 {
        words
            .iter()
            .find_map(|w| w.parse::<u64>().ok())
            .unwrap_or(1)
    }

    /// First word after `marker` that is not a number or filler.
    fn noun_after(words: &[&str], marker: &str) -> Option<String> {
        let at = words.iter().position(|w| *w == marker)?;
        words[at + 1..]
            .iter()
            .find(|w| w.parse::<u64>().is_err() && !matches!(**w, "a" | "an" | "the" | "some" | "units" | "of"))
            .map(|w| w.to_string())
    }

    fn plan_for(goal: &str) -> Value {
        let lowered = goal.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        let mut tasks = Vec::new();

        for verb in ["gather", "collect", "mine"] {
            if let Some(resource) = Self::noun_after(&words, verb) {
                tasks.push(json!({
                    "action": "gather",
                    "parameters": { "resource": resource, "quantity": Self::quantity(&words) }
                }));
                break;
            }
        }
        if let Some(structure) = Self::noun_after(&words, "build") {
            tasks.push(json!({ "action": "build", "parameters": { "structure": structure } }));
        }
        if words.contains(&"light") || words.contains(&"torch") {
            tasks.push(json!({
                "action": "place",
                "parameters": { "block": "torch", "x": 0, "y": 65, "z": 0 }
            }));
        }
        if words.contains(&"explore") {
            tasks.push(json!({ "action": "move_to", "parameters": { "x": 32, "y": 64, "z": -16 } }));
        }

        json!({
            "reasoning": format!("matched {} task(s) from the goal wording", tasks.len()),
            "plan": goal,
            "tasks": tasks,
        })
    }
}

#[async_trait]
impl LlmClient for KeywordLlm {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        let plan = Self::plan_for(Self::goal_of(prompt));
        Ok(LlmResponse::stop(format!("```json\n{}\n```", plan)))
    }
}

// =============================================================================
// Simulated world
// =============================================================================

struct PendingMutation {
    polls_left: u32,
    outcome: MutationStatus,
}

#[derive(Default)]
struct WorldState {
    next_ticket: u64,
    pending: HashMap<u64, PendingMutation>,
}

/// In-process world: every mutation succeeds after a delay that grows
/// with the amount of work.
#[derive(Default)]
pub struct SimulatedWorld {
    state: Mutex<WorldState>,
}

impl SimulatedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cost(request: &WorldRequest) -> u32 {
        match request {
            WorldRequest::Gather { quantity, .. } => 2 + quantity / 2,
            WorldRequest::Build { .. } => 8,
            WorldRequest::Place { .. } => 1,
            WorldRequest::MoveTo { target } => {
                let distance = (target.distance_squared(&Position::default()) as f64).sqrt();
                1 + (distance / 4.0) as u32
            }
        }
    }

    fn describe(request: &WorldRequest) -> String {
        match request {
            WorldRequest::Gather { resource, quantity, .. } => {
                format!("gathered {} {}", quantity, resource)
            }
            WorldRequest::Build { structure, at } => format!("built {} at {}", structure, at),
            WorldRequest::Place { block, at } => format!("placed {} at {}", block, at),
            WorldRequest::MoveTo { target } => format!("arrived at {}", target),
        }
    }
}

impl WorldInterface for SimulatedWorld {
    fn is_valid_spawn(&self, position: Position) -> bool {
        (MIN_Y..=MAX_Y).contains(&position.y)
    }

    fn submit(&self, agent: AgentId, request: WorldRequest) -> MutationTicket {
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        tracing::debug!(agent = %agent, ticket, kind = request.label(), "World mutation queued");
        state.pending.insert(
            ticket,
            PendingMutation {
                polls_left: Self::cost(&request),
                outcome: MutationStatus::Succeeded(Self::describe(&request)),
            },
        );
        MutationTicket(ticket)
    }

    fn poll(&self, ticket: MutationTicket) -> MutationStatus {
        let mut state = self.lock();
        let Some(pending) = state.pending.get_mut(&ticket.0) else {
            return MutationStatus::Failed(format!("unknown ticket {}", ticket.0));
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return MutationStatus::Pending;
        }
        state
            .pending
            .remove(&ticket.0)
            .map(|p| p.outcome)
            .unwrap_or(MutationStatus::Pending)
    }

    fn cancel(&self, ticket: MutationTicket) {
        self.lock().pending.remove(&ticket.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_plan() {
        let prompt = "You are Ada.\n\nGoal: gather 10 units of iron and build a furnace\n\nReply with JSON only";
        let response = KeywordLlm.complete(prompt).await.unwrap();
        let plan = crew_controller::parse_plan_response("g", &response.content).unwrap();
        let actions: Vec<&str> = plan.tasks().iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["gather", "build"]);
        assert_eq!(plan.tasks()[0].get_str("resource"), Some("iron"));
        assert_eq!(plan.tasks()[0].get_i64("quantity"), Some(10));
    }

    #[tokio::test]
    async fn test_unmatched_goal_yields_empty_plan() {
        let response = KeywordLlm.complete("Goal: ponder the sky").await.unwrap();
        let plan = crew_controller::parse_plan_response("g", &response.content).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_simulated_world_latency() {
        let world = SimulatedWorld::new();
        let ticket = world.submit(
            AgentId::new(),
            WorldRequest::Place {
                block: "torch".into(),
                at: Position::new(0, 65, 0),
            },
        );
        assert_eq!(world.poll(ticket), MutationStatus::Pending);
        assert!(matches!(world.poll(ticket), MutationStatus::Succeeded(_)));
        assert!(!world.is_valid_spawn(Position::new(0, -100, 0)));
    }
}
