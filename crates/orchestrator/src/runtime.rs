//! The crew runtime: population, commands, the tick loop and persistence.
//!
//! Every agent is stepped from [`CrewRuntime::tick`], one after another in
//! id order. Commands arriving from other threads lock the one agent they
//! target; spawn and remove go through the registry's atomic operations.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crew_controller::{Agent, AgentDeps, PlanningPipeline};
use crew_core::{
    AgentId, AgentMessage, AgentRole, AgentState, AgentStatus, AppConfig, EmbeddingModel, Error,
    EventEnvelope, EventSeverity, EventSink, EventType, NoOpEventSink, PlanningService, Position,
    Result, SnapshotStore, WorldInterface,
};
use crew_skills::ActionRegistry;
use crew_store::{DecodedSnapshot, HashEmbedding, InMemorySnapshotStore, SnapshotCodec};
use serde_json::json;

use crate::bus::{CommunicationBus, DeliveryReport};
use crate::orchestrator::Orchestrator;
use crate::registry::AgentRegistry;

const MAX_NAME_LEN: usize = 32;

/// Outcome of [`CrewRuntime::load_all`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    pub restored: Vec<String>,
    /// `(name, reason)` for every snapshot that was refused.
    pub rejected: Vec<(String, String)>,
}

pub struct RuntimeBuilder {
    config: AppConfig,
    planner: Option<Arc<dyn PlanningService>>,
    world: Option<Arc<dyn WorldInterface>>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    store: Option<Arc<dyn SnapshotStore>>,
    events: Option<Arc<dyn EventSink>>,
    actions: Option<Arc<ActionRegistry>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            planner: None,
            world: None,
            embedder: None,
            store: None,
            events: None,
            actions: None,
        }
    }

    /// Set the planning service. Required.
    pub fn with_planner(mut self, planner: Arc<dyn PlanningService>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Set the world boundary. Required.
    pub fn with_world(mut self, world: Arc<dyn WorldInterface>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_action_registry(mut self, actions: Arc<ActionRegistry>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Build the runtime. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<CrewRuntime> {
        let planner = self
            .planner
            .ok_or_else(|| Error::config("a planning service is required"))?;
        let world = self
            .world
            .ok_or_else(|| Error::config("a world interface is required"))?;
        let config = self.config;

        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedding::new(config.memory.embedding_dimension)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(NoOpEventSink));
        let actions = self
            .actions
            .unwrap_or_else(|| Arc::new(ActionRegistry::with_builtins()));
        let pipeline = Arc::new(PlanningPipeline::new(
            planner,
            config.planning.max_concurrent,
        )?);

        tracing::info!(
            max_agents = config.runtime.max_agents,
            planning_permits = config.planning.max_concurrent,
            actions = actions.len(),
            embedder = embedder.name(),
            "Crew runtime ready"
        );

        Ok(CrewRuntime {
            registry: AgentRegistry::new(config.runtime.max_agents),
            bus: CommunicationBus::new(&config.bus, events.clone()),
            orchestrator: Arc::new(Orchestrator::new(
                config.orchestrator.max_task_retries,
                events.clone(),
            )),
            codec: SnapshotCodec::new(config.persistence.allow_legacy_snapshots),
            pipeline,
            actions,
            world,
            embedder,
            store,
            events,
            proposed_roles: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            config,
        })
    }
}

pub struct CrewRuntime {
    pub(crate) config: AppConfig,
    pub(crate) registry: AgentRegistry,
    pub(crate) bus: CommunicationBus,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pipeline: Arc<PlanningPipeline>,
    actions: Arc<ActionRegistry>,
    pub(crate) world: Arc<dyn WorldInterface>,
    embedder: Arc<dyn EmbeddingModel>,
    store: Arc<dyn SnapshotStore>,
    codec: SnapshotCodec,
    pub(crate) events: Arc<dyn EventSink>,
    /// Roles requested at spawn, applied when the agent first registers.
    pub(crate) proposed_roles: Mutex<HashMap<AgentId, AgentRole>>,
    clock: AtomicU64,
}

pub(crate) fn lock_agent(handle: &Mutex<Agent>) -> MutexGuard<'_, Agent> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_spawn(format!(
            "name '{}' must be 1-{} letters, digits, '-' or '_'",
            name, MAX_NAME_LEN
        )))
    }
}

impl CrewRuntime {
    pub fn builder(config: AppConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    fn deps(&self) -> AgentDeps {
        AgentDeps {
            pipeline: self.pipeline.clone(),
            actions: self.actions.clone(),
            world: self.world.clone(),
            embedder: self.embedder.clone(),
            delegator: self.orchestrator.clone(),
            memory: self.config.memory.clone(),
        }
    }

    fn handle(&self, name: &str) -> Result<Arc<Mutex<Agent>>> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::agent_not_found(name))
    }

    pub fn current_tick(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn population(&self) -> usize {
        self.registry.len()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &CommunicationBus {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    // =========================================================================
    // Spawn / remove
    // =========================================================================

    /// Spawn a worker in the default group.
    pub fn spawn(&self, name: &str, position: Position) -> Result<AgentId> {
        let group = self.config.runtime.default_group.clone();
        self.spawn_in(name, position, &group, AgentRole::Worker)
    }

    /// Spawn `name` in `group`, proposing `role` for its first registration.
    pub fn spawn_in(
        &self,
        name: &str,
        position: Position,
        group: &str,
        role: AgentRole,
    ) -> Result<AgentId> {
        let admitted = validate_name(name)
            .and_then(|_| {
                if self.world.is_valid_spawn(position) {
                    Ok(())
                } else {
                    Err(Error::invalid_spawn(format!(
                        "{} is not a valid spawn position",
                        position
                    )))
                }
            })
            .and_then(|_| {
                let id = AgentId::new();
                self.registry.try_insert(id, name, || {
                    let agent = Agent::new(id, name, group, position, self.deps())
                        .starting_at(self.current_tick());
                    // Visible before the agent is, so a concurrent tick
                    // registers it with the requested role.
                    self.proposed_lock().insert(id, role);
                    Ok(agent)
                })?;
                Ok(id)
            });

        let id = match admitted {
            Ok(id) => id,
            Err(e) => {
                tracing::info!(agent = %name, reason = %e, "Spawn rejected");
                return Err(e);
            }
        };

        tracing::info!(agent = %name, id = %id, group = %group, position = %position, "Agent spawned");
        self.events.emit(
            EventEnvelope::new(
                EventType::AgentSpawned,
                json!({ "id": id, "group": group, "position": position, "role": role }),
            )
            .with_agent(name)
            .with_actor("runtime"),
        );
        Ok(id)
    }

    pub(crate) fn proposed_lock(&self) -> MutexGuard<'_, HashMap<AgentId, AgentRole>> {
        self.proposed_roles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop `name`, then release it from the registry, the orchestrator and
    /// the bus.
    pub fn remove(&self, name: &str) -> Result<()> {
        let (id, handle) = self
            .registry
            .remove(name)
            .ok_or_else(|| Error::agent_not_found(name))?;
        self.retire(id, name, &handle, "removal requested");
        crew_governance::track_agent_removed("removed");
        self.events.emit(
            EventEnvelope::new(EventType::AgentRemoved, json!({ "id": id }))
                .with_agent(name)
                .with_actor("runtime"),
        );
        tracing::info!(agent = %name, "Agent removed");
        Ok(())
    }

    /// Stop sequence plus unregistration for an agent already taken out of
    /// the registry.
    pub(crate) fn retire(&self, id: AgentId, name: &str, handle: &Mutex<Agent>, reason: &str) {
        let reports = {
            let mut agent = lock_agent(handle);
            let reports = agent.stop(reason);
            self.flush_events(&mut agent);
            agent.clear_registration();
            reports
        };
        self.orchestrator.unregister_agent(name);
        self.bus.unregister(name);
        self.proposed_lock().remove(&id);
        for message in reports {
            self.send(message);
        }
        self.send_assignments();
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Hand `goal` to `name`. Rejected while the agent is planning or
    /// executing.
    pub fn submit_goal(&self, name: &str, goal: &str) -> Result<()> {
        let handle = self.handle(name)?;
        let mut agent = lock_agent(&handle);
        let outcome = agent.submit_goal(goal);
        self.flush_events(&mut agent);
        if let Err(e) = &outcome {
            tracing::info!(agent = %name, reason = %e, "Goal rejected");
        }
        outcome
    }

    /// Cancel whatever `name` is doing and reset it to IDLE.
    pub fn stop(&self, name: &str) -> Result<()> {
        let handle = self.handle(name)?;
        let reports = {
            let mut agent = lock_agent(&handle);
            let reports = agent.stop("stop requested");
            self.flush_events(&mut agent);
            reports
        };
        for message in reports {
            self.send(message);
        }
        Ok(())
    }

    /// Ask the orchestrator to change `name`'s role.
    ///
    /// Before the agent's first tick the request replaces its proposed role.
    pub fn request_role(&self, name: &str, role: AgentRole) -> Result<AgentRole> {
        let id = self
            .registry
            .id_of(name)
            .ok_or_else(|| Error::agent_not_found(name))?;
        if !self.orchestrator.is_registered(name) {
            self.proposed_lock().insert(id, role);
            return Ok(role);
        }
        self.orchestrator.request_role(name, role)
    }

    /// Route a message through the orchestrator and onto the bus.
    pub fn send(&self, message: AgentMessage) -> DeliveryReport {
        self.orchestrator.route(&message);
        self.bus.send(message)
    }

    fn send_assignments(&self) {
        for message in self.orchestrator.take_outbox() {
            self.send(message);
        }
    }

    pub fn status(&self, name: &str) -> Result<AgentStatus> {
        let handle = self.handle(name)?;
        let role = self.orchestrator.role_of(name);
        let status = lock_agent(&handle).status(role);
        Ok(status)
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance every agent by one tick, then sweep when due. Returns the
    /// tick number.
    pub fn tick(&self) -> u64 {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let mut faulted = Vec::new();

        for (id, name, handle) in self.registry.entries() {
            let outgoing = {
                let Ok(mut agent) = handle.lock() else {
                    // Poisoned agents are collected by the sweep.
                    continue;
                };
                if !agent.is_registered() {
                    let proposed = self
                        .proposed_lock()
                        .remove(&id)
                        .unwrap_or(AgentRole::Worker);
                    let group = agent.group().to_string();
                    self.orchestrator.register_agent(id, &name, &group, proposed);
                    self.orchestrator.update_state(id, agent.state());
                    self.bus.register(&name, &group);
                    agent.mark_registered();
                }

                let inbox = self.bus.drain(&name);
                let stepped = catch_unwind(AssertUnwindSafe(|| agent.tick(tick, inbox)));
                self.flush_events(&mut agent);
                match stepped {
                    Ok(outgoing) => outgoing,
                    Err(_) => {
                        tracing::error!(agent = %name, tick, "Agent tick panicked");
                        faulted.push((id, name.clone()));
                        Vec::new()
                    }
                }
            };
            for message in outgoing {
                self.send(message);
            }
            self.send_assignments();
        }

        for (id, name) in faulted {
            self.quarantine(id, &name, crate::liveness::RemovalCause::Faulted);
        }

        let interval = self.config.runtime.sweep_interval_ticks.max(1);
        if tick % interval == 0 {
            self.sweep();
        }
        tick
    }

    /// Forward an agent's accumulated transitions to the orchestrator and
    /// the event sink.
    pub(crate) fn flush_events(&self, agent: &mut Agent) {
        for event in agent.drain_events() {
            self.orchestrator.observe_transition(&event);
            if event.from == AgentState::Planning && event.to == AgentState::Failed {
                self.events.emit(
                    EventEnvelope::new(EventType::PlanningFailed, json!({ "reason": event.reason }))
                        .with_agent(&event.agent_name)
                        .with_actor("runtime")
                        .with_severity(EventSeverity::Warning),
                );
            }
            self.events.emit(event.to_envelope());
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Snapshot every live agent into the store. Returns the saved names.
    pub async fn save_all(&self) -> Result<Vec<String>> {
        let mut documents = Vec::new();
        for (_, name, handle) in self.registry.entries() {
            let snapshot = match handle.lock() {
                Ok(agent) => agent.snapshot(),
                Err(_) => {
                    tracing::warn!(agent = %name, "Skipping snapshot of a poisoned agent");
                    continue;
                }
            };
            documents.push((name, self.codec.encode(&snapshot)?));
        }

        let mut saved = Vec::with_capacity(documents.len());
        for (name, document) in documents {
            self.store.save(&name, &document).await?;
            saved.push(name);
        }
        tracing::info!(count = saved.len(), "Snapshots saved");
        Ok(saved)
    }

    /// Restore every stored agent that is not already live.
    ///
    /// A bad or unreadable snapshot rejects only that agent; the rest of the
    /// batch still loads. Only a failure to list the store is returned.
    pub async fn load_all(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for name in self.store.list().await? {
            if self.registry.contains(&name) {
                continue;
            }
            let outcome = match self.store.load(&name).await {
                Ok(Some(document)) => self.restore_one(&name, &document),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.restored.push(name),
                Err(e) => {
                    tracing::warn!(agent = %name, reason = %e, "Snapshot rejected");
                    self.events.emit(
                        EventEnvelope::new(
                            EventType::SnapshotRejected,
                            json!({ "reason": e.to_string() }),
                        )
                        .with_agent(&name)
                        .with_actor("runtime")
                        .with_severity(EventSeverity::Error),
                    );
                    report.rejected.push((name, e.to_string()));
                }
            }
        }
        tracing::info!(
            restored = report.restored.len(),
            rejected = report.rejected.len(),
            "Snapshots loaded"
        );
        Ok(report)
    }

    fn restore_one(&self, name: &str, document: &str) -> Result<()> {
        let now = self.current_tick();
        match self.codec.decode(name, document)? {
            DecodedSnapshot::Current(snapshot) => {
                let id = snapshot.agent_id;
                self.registry.try_insert(id, name, || {
                    Agent::restore(*snapshot, self.deps(), now)
                })?;
            }
            DecodedSnapshot::Legacy(legacy) => {
                let id = AgentId::new();
                let group = self.config.runtime.default_group.clone();
                self.registry.try_insert(id, name, || {
                    Agent::from_legacy(id, name, &group, Position::default(), legacy, self.deps(), now)
                })?;
                self.events.emit(
                    EventEnvelope::new(EventType::LegacySnapshotLoaded, json!({ "id": id }))
                        .with_agent(name)
                        .with_actor("runtime")
                        .with_severity(EventSeverity::Warning),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("Ada").is_ok());
        assert!(validate_name("worker_2-b").is_ok());
        let long = "x".repeat(33);
        for bad in ["", "has space", "émile", long.as_str()] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidSpawn(_))), "{bad:?}");
        }
    }
}
