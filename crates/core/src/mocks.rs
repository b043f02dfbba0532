//! Mock implementations of core traits for testing.
//!
//! These stand in for the external collaborators (language model, planning
//! service, host world) in unit and integration tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::{
    error::PlanningError,
    traits::{LlmClient, LlmResponse, PlanningService, WorldInterface},
    types::{
        AgentContext, AgentId, MutationStatus, MutationTicket, PlanningResult, Position, Task,
        WorldRequest,
    },
    Error, Result,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Mock LLM Client
// =============================================================================

/// Scripted mock LLM that returns predefined responses, cycling through them.
pub struct MockLlm {
    responses: Vec<String>,
    call_count: AtomicUsize,
    fail_with: Option<String>,
}

impl MockLlm {
    /// Create a new mock LLM with a queue of responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// Create a mock that always returns the same response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a mock whose every call fails at the transport level.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: Vec::new(),
            call_count: AtomicUsize::new(0),
            fail_with: Some(message.to_string()),
        }
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _prompt: &str) -> Result<LlmResponse> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(Error::internal(message.clone()));
        }
        let content = match self.responses.len() {
            0 => String::new(),
            n => self.responses[count % n].clone(),
        };
        Ok(LlmResponse::stop(content))
    }
}

// =============================================================================
// Scripted Planning Service
// =============================================================================

/// Planning service replaying scripted outcomes in order, cycling at the end.
///
/// A gated planner parks every call until the returned [`Notify`] is
/// signalled, which keeps a request in flight for as long as a test needs.
pub struct ScriptedPlanner {
    script: Vec<std::result::Result<Vec<Task>, PlanningError>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<std::result::Result<Vec<Task>, PlanningError>>) -> Self {
        Self {
            script,
            gate: None,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Always plan the same tasks.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self::new(vec![Ok(tasks)])
    }

    /// Hold every call until the returned gate is notified once per call.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion (returned a value to their caller).
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanningService for ScriptedPlanner {
    async fn plan(
        &self,
        goal: &str,
        _context: &AgentContext,
    ) -> std::result::Result<PlanningResult, PlanningError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let outcome = match self.script.len() {
            0 => Ok(Vec::new()),
            len => self.script[n % len].clone(),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome.map(|tasks| PlanningResult::new(goal, "scripted", tasks))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// Mock World
// =============================================================================

struct PendingMutation {
    label: &'static str,
    polls_left: u32,
}

#[derive(Default)]
struct MockWorldState {
    next_ticket: u64,
    pending: HashMap<u64, PendingMutation>,
    submitted: Vec<(AgentId, WorldRequest)>,
    cancelled: Vec<MutationTicket>,
    failing: HashSet<String>,
    forbidden: HashSet<Position>,
    dead: HashSet<AgentId>,
}

/// In-memory world: every mutation succeeds after a fixed number of polls
/// unless its kind was marked as failing.
#[derive(Default)]
pub struct MockWorld {
    state: Mutex<MockWorldState>,
    latency: u32,
}

impl MockWorld {
    /// Mutations complete on their first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations report `Pending` for `polls` polls before finishing.
    pub fn with_latency(polls: u32) -> Self {
        Self {
            state: Mutex::default(),
            latency: polls,
        }
    }

    /// Make every mutation of kind `label` (e.g. "gather") fail.
    pub fn fail_action(&self, label: &str) {
        lock(&self.state).failing.insert(label.to_string());
    }

    pub fn forbid_spawn(&self, position: Position) {
        lock(&self.state).forbidden.insert(position);
    }

    /// Simulate the host entity disappearing.
    pub fn kill(&self, agent: AgentId) {
        lock(&self.state).dead.insert(agent);
    }

    pub fn submitted(&self) -> Vec<(AgentId, WorldRequest)> {
        lock(&self.state).submitted.clone()
    }

    pub fn submitted_count(&self) -> usize {
        lock(&self.state).submitted.len()
    }

    pub fn cancelled_count(&self) -> usize {
        lock(&self.state).cancelled.len()
    }
}

impl WorldInterface for MockWorld {
    fn is_valid_spawn(&self, position: Position) -> bool {
        !lock(&self.state).forbidden.contains(&position)
    }

    fn submit(&self, agent: AgentId, request: WorldRequest) -> MutationTicket {
        let mut state = lock(&self.state);
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.pending.insert(
            ticket,
            PendingMutation {
                label: request.label(),
                polls_left: self.latency,
            },
        );
        state.submitted.push((agent, request));
        MutationTicket(ticket)
    }

    fn poll(&self, ticket: MutationTicket) -> MutationStatus {
        let mut state = lock(&self.state);
        let Some(pending) = state.pending.get_mut(&ticket.0) else {
            return MutationStatus::Failed(format!("unknown ticket {}", ticket.0));
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return MutationStatus::Pending;
        }
        let label = pending.label;
        state.pending.remove(&ticket.0);
        if state.failing.contains(label) {
            MutationStatus::Failed(format!("{} was blocked", label))
        } else {
            MutationStatus::Succeeded(format!("{} done", label))
        }
    }

    fn cancel(&self, ticket: MutationTicket) {
        let mut state = lock(&self.state);
        if state.pending.remove(&ticket.0).is_some() {
            state.cancelled.push(ticket);
        }
    }

    fn is_alive(&self, agent: AgentId) -> bool {
        !lock(&self.state).dead.contains(&agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_world_latency_and_failure() {
        let world = MockWorld::with_latency(1);
        world.fail_action("place");
        let agent = AgentId::new();

        let gather = world.submit(
            agent,
            WorldRequest::Gather {
                resource: "iron".into(),
                quantity: 2,
                near: Position::default(),
            },
        );
        assert_eq!(world.poll(gather), MutationStatus::Pending);
        assert!(matches!(world.poll(gather), MutationStatus::Succeeded(_)));

        let place = world.submit(
            agent,
            WorldRequest::Place {
                block: "stone".into(),
                at: Position::new(1, 2, 3),
            },
        );
        assert_eq!(world.poll(place), MutationStatus::Pending);
        assert!(matches!(world.poll(place), MutationStatus::Failed(_)));
        assert_eq!(world.submitted_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_planner_cycles() {
        let planner = ScriptedPlanner::new(vec![
            Ok(vec![Task::new("wait")]),
            Err(PlanningError::Transport("offline".into())),
        ]);
        let ctx = AgentContext {
            agent_id: AgentId::new(),
            name: "Ada".into(),
            position: Position::default(),
            available_actions: vec![],
            memories: vec![],
            recent_actions: vec![],
        };

        let first = planner.plan("rest", &ctx).await.unwrap();
        assert_eq!(first.tasks().len(), 1);
        assert_eq!(first.goal(), "rest");
        assert!(planner.plan("rest", &ctx).await.is_err());
        assert!(planner.plan("rest", &ctx).await.is_ok());
        assert_eq!(planner.call_count(), 3);
    }
}
