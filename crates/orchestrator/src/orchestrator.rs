//! Roles, groups and plan distribution.
//!
//! The orchestrator keeps id-keyed registrations: it knows each agent's
//! name, group, role and last observed lifecycle state, never the agent
//! object itself. Leads hand out work through [`TaskDelegator`]; the
//! resulting assignments are queued here and sent by the runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crew_core::{
    AgentId, AgentMessage, AgentRole, AgentState, Error, EventEnvelope, EventSeverity, EventSink,
    EventType, MessageKind, Result, RoleChangePayload, StateTransitionEvent, Task,
    TaskDelegator, TaskOrigin,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: AgentId,
    pub name: String,
    pub group: String,
    pub role: AgentRole,
    pub state: AgentState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task: Task,
    pub worker: String,
    pub attempt: u32,
    pub status: AssignmentStatus,
}

/// Progress of one plan split across a group.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanExecution {
    pub plan_id: Uuid,
    pub lead: String,
    pub group: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Indexed like the original plan.
    pub assignments: Vec<Assignment>,
}

impl PlanExecution {
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

#[derive(Default)]
struct State {
    registrations: BTreeMap<AgentId, Registration>,
    names: HashMap<String, AgentId>,
    /// group -> lead
    leads: HashMap<String, AgentId>,
    plans: HashMap<Uuid, PlanExecution>,
    outbox: Vec<AgentMessage>,
}

impl State {
    fn by_name(&self, name: &str) -> Option<&Registration> {
        self.names.get(name).and_then(|id| self.registrations.get(id))
    }

    /// Members that can take assigned work right now, lowest id first.
    fn idle_workers(&self, group: &str, except: &[&str]) -> Vec<String> {
        self.registrations
            .values()
            .filter(|r| r.group == group)
            .filter(|r| r.role.takes_assignments())
            .filter(|r| r.state.can_accept_commands())
            .filter(|r| !except.contains(&r.name.as_str()))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Lowest id among non-solo members of `group`, skipping `except`.
    fn successor(&self, group: &str, except: Option<AgentId>) -> Option<AgentId> {
        self.registrations
            .values()
            .filter(|r| r.group == group && r.role != AgentRole::Solo)
            .map(|r| r.id)
            .find(|id| Some(*id) != except)
    }
}

pub struct Orchestrator {
    state: Mutex<State>,
    max_retries: u32,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(max_retries: u32, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_retries,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_role(&self, state: &mut State, id: AgentId, to: AgentRole, reason: &str) {
        let Some(reg) = state.registrations.get_mut(&id) else {
            return;
        };
        let from = reg.role;
        if from == to {
            return;
        }
        reg.role = to;
        let (name, group) = (reg.name.clone(), reg.group.clone());
        if to == AgentRole::Lead {
            state.leads.insert(group.clone(), id);
        } else if state.leads.get(&group) == Some(&id) {
            state.leads.remove(&group);
        }
        self.role_changed(&name, &group, Some(from), to, reason);
    }

    fn role_changed(
        &self,
        name: &str,
        group: &str,
        from: Option<AgentRole>,
        to: AgentRole,
        reason: &str,
    ) {
        tracing::info!(agent = %name, group = %group, from = ?from, to = %to, reason = %reason, "Role assigned");
        let payload = RoleChangePayload {
            agent: name.to_string(),
            group: group.to_string(),
            from,
            to,
            reason: reason.to_string(),
        };
        self.events.emit(
            EventEnvelope::new(
                EventType::RoleChanged,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
            .with_agent(name)
            .with_actor("orchestrator"),
        );
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register `name` in `group`. Registering again returns the existing
    /// role unchanged. A second lead proposal in a group becomes a worker.
    pub fn register_agent(
        &self,
        id: AgentId,
        name: &str,
        group: &str,
        proposed: AgentRole,
    ) -> AgentRole {
        let mut state = self.lock();
        if let Some(existing) = state.by_name(name) {
            return existing.role;
        }

        let role = match proposed {
            AgentRole::Lead if state.leads.contains_key(group) => AgentRole::Worker,
            role => role,
        };
        state.names.insert(name.to_string(), id);
        state.registrations.insert(
            id,
            Registration {
                id,
                name: name.to_string(),
                group: group.to_string(),
                role,
                state: AgentState::Idle,
            },
        );
        if role == AgentRole::Lead {
            state.leads.insert(group.to_string(), id);
        }
        drop(state);

        self.role_changed(name, group, None, role, "registered");
        role
    }

    /// Drop the registration for `name`. Unregistering an unknown name is a
    /// no-op. A departing lead is replaced on the next sweep; its pending
    /// assignments as a worker are reassigned now.
    pub fn unregister_agent(&self, name: &str) -> Option<Registration> {
        let mut state = self.lock();
        let id = state.names.remove(name)?;
        let reg = state.registrations.remove(&id)?;
        if state.leads.get(&reg.group) == Some(&id) {
            state.leads.remove(&reg.group);
            tracing::info!(agent = %name, group = %reg.group, "Lead left; successor will be elected on the next sweep");
        }

        let orphaned: Vec<(Uuid, usize)> = state
            .plans
            .values()
            .flat_map(|plan| {
                plan.assignments
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.worker == name && a.status == AssignmentStatus::Pending)
                    .map(move |(i, _)| (plan.plan_id, i))
            })
            .collect();
        for (plan_id, index) in orphaned {
            self.assignment_failed(&mut state, plan_id, index, "worker left the group");
        }

        tracing::info!(agent = %name, group = %reg.group, "Agent unregistered");
        Some(reg)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().names.contains_key(name)
    }

    pub fn registration(&self, name: &str) -> Option<Registration> {
        self.lock().by_name(name).cloned()
    }

    /// Every registration in id order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.lock().registrations.values().cloned().collect()
    }

    pub fn role_of(&self, name: &str) -> Option<AgentRole> {
        self.lock().by_name(name).map(|r| r.role)
    }

    pub fn lead_of(&self, group: &str) -> Option<String> {
        let state = self.lock();
        let id = state.leads.get(group)?;
        state.registrations.get(id).map(|r| r.name.clone())
    }

    pub fn idle_workers(&self, group: &str) -> Vec<String> {
        self.lock().idle_workers(group, &[])
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Promote or demote `name`.
    ///
    /// Promoting to lead demotes the sitting lead to worker. Demoting the
    /// lead hands the role to the next eligible member immediately, and is
    /// rejected when there is none.
    pub fn request_role(&self, name: &str, role: AgentRole) -> Result<AgentRole> {
        let mut state = self.lock();
        let reg = state
            .by_name(name)
            .cloned()
            .ok_or_else(|| Error::agent_not_found(name))?;
        if reg.role == role {
            return Ok(role);
        }

        if role == AgentRole::Lead {
            if let Some(previous) = state.leads.get(&reg.group).copied() {
                self.set_role(&mut state, previous, AgentRole::Worker, &format!("{} promoted", name));
            }
            self.set_role(&mut state, reg.id, AgentRole::Lead, "promotion requested");
            return Ok(role);
        }

        if reg.role == AgentRole::Lead {
            let successor = state.successor(&reg.group, Some(reg.id)).ok_or_else(|| {
                Error::role_rejected(format!(
                    "'{}' is the only member of '{}' able to lead",
                    name, reg.group
                ))
            })?;
            self.set_role(&mut state, reg.id, role, "demotion requested");
            self.set_role(&mut state, successor, AgentRole::Lead, &format!("{} stepped down", name));
            return Ok(role);
        }

        self.set_role(&mut state, reg.id, role, "role change requested");
        Ok(role)
    }

    /// Elect a lead for every group that has none: the lowest agent id
    /// among non-solo members. Returns `(group, new lead)` pairs.
    pub fn sweep_elections(&self) -> Vec<(String, String)> {
        let mut state = self.lock();
        let mut groups: Vec<String> = state
            .registrations
            .values()
            .map(|r| r.group.clone())
            .collect();
        groups.sort();
        groups.dedup();

        let mut elected = Vec::new();
        for group in groups {
            let lead_alive = state
                .leads
                .get(&group)
                .is_some_and(|id| state.registrations.contains_key(id));
            if lead_alive {
                continue;
            }
            state.leads.remove(&group);
            if let Some(id) = state.successor(&group, None) {
                self.set_role(&mut state, id, AgentRole::Lead, "elected");
                if let Some(reg) = state.registrations.get(&id) {
                    elected.push((group.clone(), reg.name.clone()));
                }
            }
        }
        elected
    }

    // =========================================================================
    // Observation and routing
    // =========================================================================

    pub fn observe_transition(&self, event: &StateTransitionEvent) {
        self.update_state(event.agent_id, event.to);
    }

    /// Record `state` for an agent whose transitions were not observed.
    pub fn update_state(&self, id: AgentId, state: AgentState) {
        if let Some(reg) = self.lock().registrations.get_mut(&id) {
            reg.state = state;
        }
    }

    /// Inspect a message on its way to the bus. Task reports update the
    /// plan they belong to.
    pub fn route(&self, message: &AgentMessage) {
        let success = match message.kind {
            MessageKind::TaskComplete => true,
            MessageKind::TaskFailed => false,
            _ => return,
        };
        let Ok(task) = serde_json::from_value::<Task>(message.payload["task"].clone()) else {
            return;
        };
        let Some(origin) = task.origin.clone() else {
            return;
        };

        let event_type = if success {
            EventType::TaskCompleted
        } else {
            EventType::TaskFailed
        };
        self.events.emit(
            EventEnvelope::new(event_type, message.payload.clone())
                .with_agent(&message.sender)
                .with_actor("orchestrator"),
        );

        let mut state = self.lock();
        let current = state
            .plans
            .get(&origin.plan_id)
            .and_then(|plan| plan.assignments.get(origin.index))
            .map(|a| (a.attempt, a.status, a.worker.clone()));
        // Stale reports from earlier attempts are ignored.
        match current {
            Some((attempt, AssignmentStatus::Pending, worker))
                if attempt == origin.attempt && worker == message.sender => {}
            _ => return,
        }

        if success {
            if let Some(plan) = state.plans.get_mut(&origin.plan_id) {
                plan.assignments[origin.index].status = AssignmentStatus::Completed;
                plan.completed += 1;
            }
            self.finish_if_done(&mut state, origin.plan_id);
        } else {
            let detail = message.payload["detail"].as_str().unwrap_or("task failed").to_string();
            self.assignment_failed(&mut state, origin.plan_id, origin.index, &detail);
        }
    }

    /// Retry a failed assignment on another idle worker (or the lead), or
    /// give up once retries are spent.
    fn assignment_failed(&self, state: &mut State, plan_id: Uuid, index: usize, detail: &str) {
        let Some(plan) = state.plans.get(&plan_id) else {
            return;
        };
        let Some(assignment) = plan.assignments.get(index) else {
            return;
        };
        let (lead, group) = (plan.lead.clone(), plan.group.clone());
        let failed_worker = assignment.worker.clone();
        let attempt = assignment.attempt + 1;

        if attempt <= self.max_retries {
            let lead_alive = state.names.contains_key(&lead);
            let next = state
                .idle_workers(&group, &[failed_worker.as_str(), lead.as_str()])
                .into_iter()
                .next()
                .or_else(|| lead_alive.then(|| lead.clone()));
            if let Some(worker) = next {
                let task = assignment.task.clone().with_origin(TaskOrigin {
                    assigned_by: lead.clone(),
                    plan_id,
                    index,
                    attempt,
                });
                tracing::info!(
                    plan = %plan_id,
                    index,
                    attempt,
                    from = %failed_worker,
                    to = %worker,
                    reason = %detail,
                    "Reassigning failed task"
                );
                state.outbox.push(assignment_message(&lead, &worker, &task));
                if let Some(plan) = state.plans.get_mut(&plan_id) {
                    plan.assignments[index] = Assignment {
                        task,
                        worker,
                        attempt,
                        status: AssignmentStatus::Pending,
                    };
                }
                return;
            }
        }

        tracing::warn!(plan = %plan_id, index, worker = %failed_worker, reason = %detail, "Task failed permanently");
        if let Some(plan) = state.plans.get_mut(&plan_id) {
            plan.assignments[index].status = AssignmentStatus::Failed;
            plan.failed += 1;
        }
        self.finish_if_done(state, plan_id);
    }

    fn finish_if_done(&self, state: &mut State, plan_id: Uuid) {
        if !state.plans.get(&plan_id).is_some_and(PlanExecution::is_finished) {
            return;
        }
        let Some(plan) = state.plans.remove(&plan_id) else {
            return;
        };
        tracing::info!(
            plan = %plan_id,
            lead = %plan.lead,
            completed = plan.completed,
            failed = plan.failed,
            "Distributed plan finished"
        );
        let severity = if plan.failed > 0 {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        self.events.emit(
            EventEnvelope::new(
                EventType::PlanFinished,
                json!({
                    "plan_id": plan.plan_id,
                    "group": plan.group,
                    "total": plan.total,
                    "completed": plan.completed,
                    "failed": plan.failed,
                }),
            )
            .with_agent(&plan.lead)
            .with_actor("orchestrator")
            .with_severity(severity),
        );
    }

    /// Active distributed plan, if it has not finished yet.
    pub fn plan_execution(&self, plan_id: Uuid) -> Option<PlanExecution> {
        self.lock().plans.get(&plan_id).cloned()
    }

    pub fn active_plans(&self) -> Vec<PlanExecution> {
        self.lock().plans.values().cloned().collect()
    }

    /// Assignment messages produced since the last call.
    pub fn take_outbox(&self) -> Vec<AgentMessage> {
        std::mem::take(&mut self.lock().outbox)
    }
}

fn assignment_message(lead: &str, worker: &str, task: &Task) -> AgentMessage {
    AgentMessage::to_agent(MessageKind::TaskAssignment, lead, worker, task.describe())
        .with_payload(serde_json::to_value(task).unwrap_or_default())
}

impl TaskDelegator for Orchestrator {
    /// Split a lead's plan round-robin across idle workers of its group.
    /// Non-leads, and leads without idle workers, keep every task.
    fn delegate(&self, lead: AgentId, tasks: Vec<Task>) -> Vec<Task> {
        let mut state = self.lock();
        let Some(reg) = state.registrations.get(&lead).cloned() else {
            return tasks;
        };
        if reg.role != AgentRole::Lead || tasks.is_empty() {
            return tasks;
        }
        let workers = state.idle_workers(&reg.group, &[reg.name.as_str()]);
        if workers.is_empty() {
            return tasks;
        }

        let plan_id = Uuid::new_v4();
        let mut assignments = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let worker = workers[index % workers.len()].clone();
            let task = task.with_origin(TaskOrigin {
                assigned_by: reg.name.clone(),
                plan_id,
                index,
                attempt: 0,
            });
            state.outbox.push(assignment_message(&reg.name, &worker, &task));
            assignments.push(Assignment {
                task,
                worker,
                attempt: 0,
                status: AssignmentStatus::Pending,
            });
        }

        tracing::info!(
            lead = %reg.name,
            group = %reg.group,
            plan = %plan_id,
            tasks = assignments.len(),
            workers = workers.len(),
            "Plan distributed"
        );
        state.plans.insert(
            plan_id,
            PlanExecution {
                plan_id,
                lead: reg.name,
                group: reg.group,
                total: assignments.len(),
                completed: 0,
                failed: 0,
                assignments,
            },
        );
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::RecordingEventSink;

    fn orchestrator() -> (Orchestrator, RecordingEventSink) {
        let sink = RecordingEventSink::new();
        (Orchestrator::new(2, Arc::new(sink.clone())), sink)
    }

    /// Ids ascending in creation order.
    fn ids(n: usize) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = (0..n).map(|_| AgentId::new()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_register_is_idempotent() {
        let (orch, sink) = orchestrator();
        let id = AgentId::new();
        assert_eq!(orch.register_agent(id, "Ada", "crew", AgentRole::Lead), AgentRole::Lead);
        assert_eq!(orch.register_agent(id, "Ada", "crew", AgentRole::Worker), AgentRole::Lead);
        assert_eq!(sink.count(&EventType::RoleChanged), 1);
    }

    #[test]
    fn test_single_lead_per_group() {
        let (orch, _) = orchestrator();
        let ids = ids(3);
        orch.register_agent(ids[0], "Ada", "crew", AgentRole::Lead);
        assert_eq!(orch.register_agent(ids[1], "Bo", "crew", AgentRole::Lead), AgentRole::Worker);
        assert_eq!(orch.register_agent(ids[2], "Cy", "other", AgentRole::Lead), AgentRole::Lead);
        assert_eq!(orch.lead_of("crew").as_deref(), Some("Ada"));
    }

    #[test]
    fn test_unregister_twice_same_as_once() {
        let (orch, _) = orchestrator();
        orch.register_agent(AgentId::new(), "Ada", "crew", AgentRole::Worker);
        assert!(orch.unregister_agent("Ada").is_some());
        let after_once = orch.registrations();
        assert!(orch.unregister_agent("Ada").is_none());
        assert_eq!(orch.registrations(), after_once);
    }

    #[test]
    fn test_successor_elected_on_sweep() {
        let (orch, _) = orchestrator();
        let ids = ids(3);
        orch.register_agent(ids[0], "Ada", "crew", AgentRole::Lead);
        orch.register_agent(ids[2], "Cy", "crew", AgentRole::Worker);
        orch.register_agent(ids[1], "Bo", "crew", AgentRole::Worker);

        orch.unregister_agent("Ada");
        assert_eq!(orch.lead_of("crew"), None);

        let elected = orch.sweep_elections();
        assert_eq!(elected, vec![("crew".to_string(), "Bo".to_string())]);
        assert_eq!(orch.role_of("Bo"), Some(AgentRole::Lead));
        assert!(orch.sweep_elections().is_empty());
    }

    #[test]
    fn test_solo_never_elected() {
        let (orch, _) = orchestrator();
        orch.register_agent(AgentId::new(), "Ada", "crew", AgentRole::Solo);
        assert!(orch.sweep_elections().is_empty());
        assert_eq!(orch.lead_of("crew"), None);
    }

    #[test]
    fn test_promotion_and_demotion() {
        let (orch, _) = orchestrator();
        let ids = ids(2);
        orch.register_agent(ids[0], "Ada", "crew", AgentRole::Lead);
        orch.register_agent(ids[1], "Bo", "crew", AgentRole::Worker);

        orch.request_role("Bo", AgentRole::Lead).unwrap();
        assert_eq!(orch.role_of("Ada"), Some(AgentRole::Worker));
        assert_eq!(orch.lead_of("crew").as_deref(), Some("Bo"));

        orch.request_role("Bo", AgentRole::Worker).unwrap();
        assert_eq!(orch.lead_of("crew").as_deref(), Some("Ada"));

        assert!(matches!(
            orch.request_role("Nobody", AgentRole::Lead),
            Err(Error::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_lone_lead_cannot_step_down() {
        let (orch, _) = orchestrator();
        orch.register_agent(AgentId::new(), "Ada", "crew", AgentRole::Lead);
        assert!(matches!(
            orch.request_role("Ada", AgentRole::Worker),
            Err(Error::RoleRejected(_))
        ));
        assert_eq!(orch.role_of("Ada"), Some(AgentRole::Lead));
    }

    #[test]
    fn test_delegate_round_robin() {
        let (orch, _) = orchestrator();
        let ids = ids(3);
        orch.register_agent(ids[0], "Lead", "crew", AgentRole::Lead);
        orch.register_agent(ids[1], "Bo", "crew", AgentRole::Worker);
        orch.register_agent(ids[2], "Cy", "crew", AgentRole::Worker);

        let tasks = vec![Task::new("wait"), Task::new("wait"), Task::new("wait")];
        let kept = orch.delegate(ids[0], tasks);
        assert!(kept.is_empty());

        let recipients: Vec<_> = orch
            .take_outbox()
            .into_iter()
            .map(|m| m.recipient)
            .collect();
        assert_eq!(
            recipients,
            vec![
                crew_core::Recipient::Agent("Bo".into()),
                crew_core::Recipient::Agent("Cy".into()),
                crew_core::Recipient::Agent("Bo".into()),
            ]
        );
        assert_eq!(orch.active_plans()[0].total, 3);

        // Workers keep their own plans.
        assert_eq!(orch.delegate(ids[1], vec![Task::new("wait")]).len(), 1);
    }

    #[test]
    fn test_failed_assignment_reassigned_then_finished() {
        let (orch, sink) = orchestrator();
        let ids = ids(3);
        orch.register_agent(ids[0], "Lead", "crew", AgentRole::Lead);
        orch.register_agent(ids[1], "Bo", "crew", AgentRole::Worker);
        orch.register_agent(ids[2], "Cy", "crew", AgentRole::Worker);
        orch.delegate(ids[0], vec![Task::new("gather")]);
        let first = orch.take_outbox().remove(0);
        let task: Task = serde_json::from_value(first.payload).unwrap();

        let report = |worker: &str, kind, task: &Task| {
            AgentMessage::to_agent(kind, worker, "Lead", "report")
                .with_payload(json!({ "task": task, "detail": "blocked" }))
        };
        orch.route(&report("Bo", MessageKind::TaskFailed, &task));

        let retry = orch.take_outbox().remove(0);
        assert_eq!(retry.recipient, crew_core::Recipient::Agent("Cy".into()));
        let retried: Task = serde_json::from_value(retry.payload).unwrap();
        assert_eq!(retried.origin.as_ref().map(|o| o.attempt), Some(1));

        // A stale report from the first attempt changes nothing.
        orch.route(&report("Bo", MessageKind::TaskComplete, &task));
        assert_eq!(orch.active_plans().len(), 1);

        orch.route(&report("Cy", MessageKind::TaskComplete, &retried));
        assert!(orch.active_plans().is_empty());
        assert_eq!(sink.count(&EventType::PlanFinished), 1);
    }
}
