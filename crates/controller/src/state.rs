//! Per-agent lifecycle state machine.
//!
//! Guarded transitions follow [`AgentState::can_transition_to`]. A rejected
//! transition leaves the state untouched and returns `false`; callers treat
//! that as ordinary control flow. Accepted transitions are logged, counted
//! and queued as [`StateTransitionEvent`]s for the runtime to forward.

use chrono::Utc;
use crew_core::{AgentId, AgentState, StateTransitionEvent};

pub struct AgentStateMachine {
    agent_id: AgentId,
    agent_name: String,
    state: AgentState,
    outbox: Vec<StateTransitionEvent>,
}

impl AgentStateMachine {
    pub fn new(agent_id: AgentId, agent_name: impl Into<String>) -> Self {
        Self::restored(agent_id, agent_name, AgentState::Idle)
    }

    /// Resume in `state` without emitting an event.
    pub fn restored(agent_id: AgentId, agent_name: impl Into<String>, state: AgentState) -> Self {
        Self {
            agent_id,
            agent_name: agent_name.into(),
            state,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn can_accept_commands(&self) -> bool {
        self.state.can_accept_commands()
    }

    /// Move to `target` if the table allows it.
    pub fn transition(&mut self, target: AgentState, reason: &str) -> bool {
        let from = self.state;
        if !from.can_transition_to(target) {
            tracing::debug!(
                agent = %self.agent_name,
                from = %from,
                to = %target,
                reason = %reason,
                "Rejected state transition"
            );
            return false;
        }
        self.apply(target, reason);
        true
    }

    /// Unguarded reset to IDLE used by stop. No event when already idle.
    pub fn force_reset(&mut self, reason: &str) {
        if self.state != AgentState::Idle {
            self.apply(AgentState::Idle, reason);
        }
    }

    fn apply(&mut self, to: AgentState, reason: &str) {
        let from = self.state;
        self.state = to;
        tracing::info!(
            agent = %self.agent_name,
            from = %from,
            to = %to,
            reason = %reason,
            "State transition"
        );
        crew_governance::track_transition(from, to);
        self.outbox.push(StateTransitionEvent {
            agent_id: self.agent_id,
            agent_name: self.agent_name.clone(),
            from,
            to,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Take the events accumulated since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<StateTransitionEvent> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> AgentStateMachine {
        AgentStateMachine::new(AgentId::new(), "Ada")
    }

    #[test]
    fn test_happy_path_emits_events() {
        let mut sm = machine();
        assert!(sm.transition(AgentState::Planning, "goal"));
        assert!(sm.transition(AgentState::Executing, "plan ready"));
        assert!(sm.transition(AgentState::Completed, "queue drained"));
        assert!(sm.transition(AgentState::Idle, "done"));

        let events = sm.drain_events();
        let path: Vec<(AgentState, AgentState)> = events.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(
            path,
            vec![
                (AgentState::Idle, AgentState::Planning),
                (AgentState::Planning, AgentState::Executing),
                (AgentState::Executing, AgentState::Completed),
                (AgentState::Completed, AgentState::Idle),
            ]
        );
        assert_eq!(events[1].reason, "plan ready");
        assert!(sm.drain_events().is_empty());
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut sm = machine();
        assert!(!sm.transition(AgentState::Executing, "skip planning"));
        assert_eq!(sm.state(), AgentState::Idle);
        assert!(sm.drain_events().is_empty());

        sm.transition(AgentState::Planning, "goal");
        assert!(!sm.can_accept_commands());
        assert!(!sm.transition(AgentState::Planning, "second goal"));
        assert_eq!(sm.state(), AgentState::Planning);
    }

    #[test]
    fn test_force_reset_from_any_state() {
        for path in [
            vec![AgentState::Planning],
            vec![AgentState::Planning, AgentState::Executing],
            vec![AgentState::Planning, AgentState::Failed],
            vec![AgentState::Planning, AgentState::Executing, AgentState::Completed],
        ] {
            let mut sm = machine();
            for step in path {
                assert!(sm.transition(step, "setup"));
            }
            sm.drain_events();
            sm.force_reset("stop");
            assert_eq!(sm.state(), AgentState::Idle);
            assert_eq!(sm.drain_events().len(), 1);
        }

        let mut idle = machine();
        idle.force_reset("stop");
        assert!(idle.drain_events().is_empty());
    }
}
