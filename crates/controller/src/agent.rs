//! The agent aggregate: one state machine, one executor, one memory.
//!
//! An agent is only ever driven by the runtime's tick loop or by a command
//! routed through the runtime; other agents reach it through messages.

use std::sync::Arc;

use crew_core::{
    ActionContext, ActionResult, AgentContext, AgentId, AgentMessage, AgentRole, AgentState,
    AgentStatus, EmbeddingModel, Error, MemoryConfig, MessageKind, PlanningError,
    PlanningResult, Position, Result, StateTransitionEvent, Task, TaskDelegator,
    WorldInterface,
};
use crew_skills::ActionRegistry;
use serde_json::json;

use crate::executor::{ExecutorStep, TaskExecutor};
use crate::memory::{AgentMemory, NOTABLE, ROUTINE};
use crate::planning::{PendingPlan, PlanPoll, PlanningPipeline};
use crate::state::AgentStateMachine;

/// Memories handed to the planner with each request.
const PLANNING_MEMORIES: usize = 5;

/// Shared collaborators every agent is built with.
#[derive(Clone)]
pub struct AgentDeps {
    pub pipeline: Arc<PlanningPipeline>,
    pub actions: Arc<ActionRegistry>,
    pub world: Arc<dyn WorldInterface>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub delegator: Arc<dyn TaskDelegator>,
    pub memory: MemoryConfig,
}

pub struct Agent {
    pub(crate) id: AgentId,
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) position: Position,
    pub(crate) sm: AgentStateMachine,
    pub(crate) goal: Option<String>,
    pub(crate) executor: TaskExecutor,
    pub(crate) memory: AgentMemory,
    pub(crate) pending_plan: Option<PendingPlan>,
    pub(crate) registered: bool,
    pub(crate) last_failure: Option<String>,
    /// Last tick this agent observed.
    pub(crate) clock: u64,
    /// Tick of the most recent state change.
    pub(crate) state_since: u64,
    pub(crate) deps: AgentDeps,
}

impl Agent {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        group: impl Into<String>,
        position: Position,
        deps: AgentDeps,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            sm: AgentStateMachine::new(id, name.clone()),
            name,
            group: group.into(),
            position,
            goal: None,
            executor: TaskExecutor::new(deps.actions.clone()),
            memory: AgentMemory::new(&deps.memory, deps.embedder.clone()),
            pending_plan: None,
            registered: false,
            last_failure: None,
            clock: 0,
            state_since: 0,
            deps,
        }
    }

    /// Start the agent's clock at `tick` instead of zero.
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.clock = tick;
        self.state_since = tick;
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn state(&self) -> AgentState {
        self.sm.state()
    }

    pub fn can_accept_commands(&self) -> bool {
        self.sm.can_accept_commands()
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Running task first, then the queue.
    pub fn pending_tasks(&self) -> Vec<Task> {
        self.executor.pending_tasks()
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.executor.current_task()
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    pub fn is_planning_in_flight(&self) -> bool {
        self.pending_plan.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn clear_registration(&mut self) {
        self.registered = false;
    }

    /// Ticks spent in the current state as of `now`.
    pub fn ticks_in_state(&self, now: u64) -> u64 {
        now.saturating_sub(self.state_since)
    }

    pub fn status(&self, role: Option<AgentRole>) -> AgentStatus {
        AgentStatus {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            goal: self.goal.clone(),
            queued_tasks: self.executor.pending_tasks().len(),
            role,
            position: self.position,
            last_failure: self.last_failure.clone(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<StateTransitionEvent> {
        self.sm.drain_events()
    }

    fn transition(&mut self, target: AgentState, reason: &str) -> bool {
        let moved = self.sm.transition(target, reason);
        if moved {
            self.state_since = self.clock;
        }
        moved
    }

    /// COMPLETED or FAILED back to IDLE; clears the goal.
    fn settle_to_idle(&mut self, reason: &str) {
        if matches!(self.state(), AgentState::Completed | AgentState::Failed)
            && self.transition(AgentState::Idle, reason)
        {
            self.goal = None;
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Accept a goal and start planning it.
    ///
    /// Rejected with no state change while planning or executing.
    pub fn submit_goal(&mut self, goal: &str) -> Result<()> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(Error::invalid_command("goal text is empty"));
        }
        if !self.can_accept_commands() {
            return Err(Error::Busy {
                agent: self.name.clone(),
                state: self.state(),
            });
        }

        self.settle_to_idle("new goal accepted");
        let context = self.planning_context(goal);
        if !self.transition(AgentState::Planning, &format!("planning goal '{}'", goal)) {
            return Err(Error::internal(format!(
                "'{}' could not enter PLANNING from {}",
                self.name,
                self.state()
            )));
        }
        self.goal = Some(goal.to_string());
        self.last_failure = None;
        self.memory.log_action(format!("accepted goal: {}", goal));
        self.pending_plan = Some(self.deps.pipeline.submit(goal, context));
        Ok(())
    }

    /// Cancel planning and the running task, clear the queue and the goal,
    /// and reset to IDLE from any state.
    ///
    /// Returns failure reports for delegated tasks that were abandoned.
    pub fn stop(&mut self, reason: &str) -> Vec<AgentMessage> {
        if let Some(pending) = self.pending_plan.take() {
            pending.cancel();
            tracing::info!(agent = %self.name, goal = %pending.goal(), "Cancelled in-flight planning");
        }

        let abandoned = self.executor.pending_tasks();
        if let Some(task) = self.executor.stop() {
            tracing::info!(agent = %self.name, task = %task.describe(), "Cancelled running task");
        }
        let reports = abandoned
            .iter()
            .filter_map(|task| self.report_to_assigner(task, false, reason))
            .collect();

        self.goal = None;
        let before = self.state();
        self.sm.force_reset(reason);
        if before != AgentState::Idle {
            self.state_since = self.clock;
        }
        reports
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance one tick. `inbox` holds messages delivered since the last
    /// tick; the return value holds messages to route.
    pub fn tick(&mut self, tick: u64, inbox: Vec<AgentMessage>) -> Vec<AgentMessage> {
        self.clock = tick;
        let mut outgoing = Vec::new();
        let settled = self.state();

        // Planning results land only here, at the start of a tick.
        self.poll_planning();

        for message in inbox {
            self.handle_message(message, &mut outgoing);
        }

        match self.state() {
            AgentState::Completed if settled == AgentState::Completed => {
                self.settle_to_idle("queue drained; ready for the next goal");
            }
            AgentState::Failed if settled == AgentState::Failed => {
                self.settle_to_idle("failure recorded; ready for the next goal");
            }
            AgentState::Executing => self.step_executor(&mut outgoing),
            _ => {}
        }
        outgoing
    }

    fn poll_planning(&mut self) {
        let Some(pending) = self.pending_plan.as_mut() else {
            return;
        };
        let outcome = match pending.try_take() {
            PlanPoll::Pending => return,
            PlanPoll::Ready(outcome) => outcome,
        };
        self.pending_plan = None;

        if self.state() != AgentState::Planning {
            tracing::debug!(agent = %self.name, state = %self.state(), "Ignoring planning result outside PLANNING");
            return;
        }
        let goal = self.goal.clone().unwrap_or_default();

        match outcome {
            Ok(plan) if plan.is_empty() => {
                crew_governance::track_planning("empty");
                self.memory
                    .remember(format!("Found nothing to do for '{}'", goal), ROUTINE);
                self.goal = None;
                self.transition(AgentState::Idle, "planner returned no tasks");
            }
            Ok(plan) => {
                crew_governance::track_planning("ok");
                self.apply_plan(&goal, plan);
            }
            Err(PlanningError::Cancelled) => {
                crew_governance::track_planning("cancelled");
                self.goal = None;
                self.transition(AgentState::Idle, "planning cancelled");
            }
            Err(PlanningError::Malformed(detail)) => {
                crew_governance::track_planning("malformed");
                let reason = format!("no usable plan for '{}': {}", goal, detail);
                tracing::warn!(agent = %self.name, reason = %reason, "Planner response unusable");
                self.memory.remember(reason.clone(), NOTABLE);
                self.last_failure = Some(reason.clone());
                self.goal = None;
                self.transition(AgentState::Idle, &reason);
            }
            Err(PlanningError::Transport(detail)) => {
                crew_governance::track_planning("transport");
                let reason = format!("planning '{}' failed: {}", goal, detail);
                tracing::warn!(agent = %self.name, reason = %reason, "Planning service error");
                self.memory.remember(reason.clone(), NOTABLE);
                self.last_failure = Some(reason.clone());
                self.transition(AgentState::Failed, &reason);
            }
        }
    }

    fn apply_plan(&mut self, goal: &str, plan: PlanningResult) {
        let planned = plan.tasks().len();
        tracing::info!(agent = %self.name, goal = %goal, tasks = planned, "Plan ready");
        self.memory.remember(
            format!("Planned {} tasks for '{}': {}", planned, goal, plan.reasoning()),
            ROUTINE,
        );

        let kept = self.deps.delegator.delegate(self.id, plan.into_tasks());
        if kept.is_empty() {
            self.memory
                .log_action(format!("delegated all {} tasks of '{}'", planned, goal));
            self.goal = None;
            self.transition(
                AgentState::Idle,
                &format!("delegated all {} tasks to the group", planned),
            );
            return;
        }

        let reason = if kept.len() == planned {
            format!("plan ready with {} tasks", planned)
        } else {
            format!("plan ready; kept {} of {} tasks", kept.len(), planned)
        };
        self.executor.load_plan(kept);
        self.transition(AgentState::Executing, &reason);
    }

    fn step_executor(&mut self, outgoing: &mut Vec<AgentMessage>) {
        let ctx = self.action_context();
        match self.executor.tick(&ctx) {
            ExecutorStep::Running => {}
            ExecutorStep::Drained => self.complete_goal(),
            ExecutorStep::Finished { task, result } => {
                self.record_outcome(&task, &result);
                outgoing.extend(self.report_to_assigner(&task, result.success, &result.message));

                if !result.success && result.requires_replanning {
                    let abandoned = self.executor.pending_tasks();
                    self.executor.stop();
                    outgoing.extend(abandoned.iter().filter_map(|t| {
                        self.report_to_assigner(t, false, "abandoned after an earlier task failed")
                    }));
                    let reason = format!("{} failed: {}", task.describe(), result.message);
                    self.last_failure = Some(reason.clone());
                    self.transition(AgentState::Failed, &reason);
                } else if self.executor.is_idle() {
                    self.complete_goal();
                }
            }
        }
    }

    fn complete_goal(&mut self) {
        let goal = self.goal.clone().unwrap_or_else(|| "assigned work".to_string());
        self.memory.remember_milestone(format!("Completed '{}'", goal));
        self.transition(AgentState::Completed, "all tasks finished");
    }

    fn record_outcome(&mut self, task: &Task, result: &ActionResult) {
        let described = task.describe();
        if result.success {
            if task.action == "move_to" {
                if let (Some(x), Some(y), Some(z)) =
                    (task.get_i64("x"), task.get_i64("y"), task.get_i64("z"))
                {
                    if let (Ok(x), Ok(y), Ok(z)) = (i32::try_from(x), i32::try_from(y), i32::try_from(z)) {
                        self.position = Position::new(x, y, z);
                    }
                }
            }
            tracing::debug!(agent = %self.name, task = %described, "Task completed");
            self.memory
                .remember(format!("Completed {}: {}", described, result.message), ROUTINE);
            self.memory.log_action(format!("done: {}", described));
        } else {
            tracing::warn!(
                agent = %self.name,
                task = %described,
                replan = result.requires_replanning,
                message = %result.message,
                "Task failed"
            );
            self.memory
                .remember(format!("Failed {}: {}", described, result.message), NOTABLE);
            self.memory.log_action(format!("failed: {}", described));
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn handle_message(&mut self, message: AgentMessage, outgoing: &mut Vec<AgentMessage>) {
        match message.kind {
            MessageKind::TaskAssignment => self.accept_assignment(message, outgoing),
            MessageKind::StatusQuery => {
                let status = self.status(None);
                outgoing.push(
                    AgentMessage::to_agent(
                        MessageKind::StatusReport,
                        &self.name,
                        &message.sender,
                        format!("{} is {}", self.name, status.state),
                    )
                    .with_payload(serde_json::to_value(&status).unwrap_or_default()),
                );
            }
            MessageKind::HumanCommand => {
                if let Err(e) = self.submit_goal(&message.content) {
                    tracing::warn!(agent = %self.name, error = %e, "Rejected command from bus");
                }
            }
            MessageKind::TaskComplete | MessageKind::TaskFailed => {
                self.memory.remember(
                    format!("{} reported: {}", message.sender, message.content),
                    ROUTINE,
                );
            }
            kind => {
                tracing::debug!(agent = %self.name, from = %message.sender, kind = ?kind, "Message received");
            }
        }
    }

    fn accept_assignment(&mut self, message: AgentMessage, outgoing: &mut Vec<AgentMessage>) {
        let task: Task = match serde_json::from_value(message.payload.clone()) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(agent = %self.name, from = %message.sender, error = %e, "Unreadable task assignment");
                return;
            }
        };

        match self.state() {
            AgentState::Executing => {
                tracing::debug!(agent = %self.name, task = %task.describe(), "Queued assigned task");
                self.executor.enqueue(task);
            }
            AgentState::Planning => {
                outgoing.extend(self.report_to_assigner(&task, false, "busy planning"));
            }
            _ => {
                self.settle_to_idle("accepted an assignment");
                let label = format!("assignment from {}: {}", message.sender, task.describe());
                if self.transition(AgentState::Planning, &label) {
                    self.executor.load_plan(vec![task]);
                    self.goal = Some(label);
                    self.transition(AgentState::Executing, "assignment needs no planning");
                }
            }
        }
    }

    /// TaskComplete/TaskFailed for a task that came from another agent.
    fn report_to_assigner(&self, task: &Task, success: bool, detail: &str) -> Option<AgentMessage> {
        let origin = task.origin.as_ref()?;
        let kind = if success {
            MessageKind::TaskComplete
        } else {
            MessageKind::TaskFailed
        };
        Some(
            AgentMessage::to_agent(
                kind,
                &self.name,
                &origin.assigned_by,
                format!("{}: {}", task.describe(), detail),
            )
            .with_payload(json!({ "task": task, "detail": detail })),
        )
    }

    // =========================================================================
    // Context
    // =========================================================================

    pub(crate) fn planning_context(&self, goal: &str) -> AgentContext {
        AgentContext {
            agent_id: self.id,
            name: self.name.clone(),
            position: self.position,
            available_actions: self.deps.actions.describe(),
            memories: self.memory.relevant(goal, PLANNING_MEMORIES),
            recent_actions: self.memory.recent_actions(),
        }
    }

    fn action_context(&self) -> ActionContext {
        ActionContext {
            agent_id: self.id,
            agent_name: self.name.clone(),
            position: self.position,
            world: self.deps.world.clone(),
        }
    }
}
