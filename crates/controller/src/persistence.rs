//! Agent snapshot and restore.

use crew_core::{
    AgentId, AgentSnapshot, AgentState, Error, LegacySnapshot, MemorySnapshot, Position, Result,
    SNAPSHOT_VERSION,
};

use crate::agent::{Agent, AgentDeps};
use crate::memory::{AgentMemory, NOTABLE};
use crate::state::AgentStateMachine;

impl Agent {
    /// Capture everything needed to resume this agent.
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            version: SNAPSHOT_VERSION,
            agent_id: self.id,
            name: self.name.clone(),
            group: self.group.clone(),
            position: self.position,
            state: self.state(),
            goal: self.goal.clone(),
            queue: self.executor.pending_tasks(),
            recent_actions: self.memory.recent_actions(),
            last_failure: self.last_failure.clone(),
            memory: self.memory.snapshot(),
        }
    }

    /// Rebuild an agent from a current-version snapshot.
    ///
    /// A PLANNING agent asks the planner again; an EXECUTING agent restarts
    /// its first queued task. `now` is the runtime tick the agent resumes at.
    pub fn restore(snapshot: AgentSnapshot, deps: AgentDeps, now: u64) -> Result<Agent> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::UnsupportedSnapshotVersion {
                agent: snapshot.name,
                version: snapshot.version,
            });
        }
        if snapshot.state == AgentState::Planning && snapshot.goal.is_none() {
            return Err(Error::corrupt_snapshot(
                &snapshot.name,
                "PLANNING without a goal",
            ));
        }

        let memory = AgentMemory::restore(
            &snapshot.name,
            &deps.memory,
            deps.embedder.clone(),
            snapshot.memory,
            snapshot.recent_actions,
        )?;

        let mut agent = Agent::new(
            snapshot.agent_id,
            snapshot.name.clone(),
            snapshot.group,
            snapshot.position,
            deps,
        );
        agent.memory = memory;
        agent.goal = snapshot.goal;
        agent.last_failure = snapshot.last_failure;
        agent.clock = now;
        agent.state_since = now;
        agent.sm = AgentStateMachine::restored(agent.id, snapshot.name, snapshot.state);

        match snapshot.state {
            AgentState::Planning => {
                let goal = agent.goal.clone().unwrap_or_default();
                let context = agent.planning_context(&goal);
                agent.pending_plan = Some(agent.deps.pipeline.submit(&goal, context));
            }
            AgentState::Executing => agent.executor.load_plan(snapshot.queue),
            _ => {}
        }

        tracing::info!(
            agent = %agent.name,
            state = %agent.state(),
            queued = agent.executor.pending_tasks().len(),
            memories = agent.memory.episodic().len(),
            "Agent restored"
        );
        Ok(agent)
    }

    /// Rebuild an IDLE agent from a pre-versioning document.
    ///
    /// Only the recent action log survives; an unfinished goal is kept as a
    /// memory rather than resumed.
    pub fn from_legacy(
        id: AgentId,
        name: &str,
        group: &str,
        position: Position,
        legacy: LegacySnapshot,
        deps: AgentDeps,
        now: u64,
    ) -> Result<Agent> {
        let dimension = deps.embedder.dimension();
        let memory = AgentMemory::restore(
            name,
            &deps.memory,
            deps.embedder.clone(),
            MemorySnapshot {
                dimension,
                next_id: 1,
                records: Vec::new(),
            },
            legacy.recent_actions,
        )?;

        let mut agent = Agent::new(id, name, group, position, deps);
        agent.memory = memory;
        agent.clock = now;
        agent.state_since = now;
        if let Some(goal) = legacy.current_goal.filter(|g| !g.trim().is_empty()) {
            agent
                .memory
                .remember(format!("Unfinished goal before upgrade: {}", goal), NOTABLE);
        }
        tracing::warn!(agent = %name, "Agent restored from a legacy snapshot");
        Ok(agent)
    }
}
