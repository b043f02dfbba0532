//! Liveness sweep.
//!
//! Runs every `sweep_interval_ticks`. An agent that is dead in the world,
//! has a poisoned lock, or has sat in PLANNING or EXECUTING longer than
//! `stuck_timeout_ticks` is stopped and removed from the registry, the
//! orchestrator and the bus in the same pass. Registrations left behind
//! without a live agent are dropped, then leaderless groups elect a lead.

use std::collections::HashSet;

use crew_core::{AgentId, EventEnvelope, EventSeverity, EventType};
use serde_json::json;

use crate::runtime::CrewRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// The host world no longer has the entity.
    Dead,
    /// Active for longer than the stuck timeout.
    Stuck,
    /// The agent's lock was poisoned by a panic elsewhere.
    Poisoned,
    /// The agent panicked during its own tick.
    Faulted,
}

impl RemovalCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dead => "dead",
            Self::Stuck => "stuck",
            Self::Poisoned => "poisoned",
            Self::Faulted => "faulted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<(String, RemovalCause)>,
    /// Orchestrator or bus registrations that had no live agent.
    pub dangling: Vec<String>,
    /// `(group, new lead)`
    pub elected: Vec<(String, String)>,
}

impl CrewRuntime {
    pub fn sweep(&self) -> SweepReport {
        let now = self.current_tick();
        let stuck_after = self.config.runtime.stuck_timeout_ticks;
        let mut report = SweepReport::default();

        for (id, name, handle) in self.registry.entries() {
            let cause = match handle.lock() {
                Err(_) => Some(RemovalCause::Poisoned),
                Ok(agent) => {
                    if !self.world.is_alive(id) {
                        Some(RemovalCause::Dead)
                    } else if agent.state().is_active() && agent.ticks_in_state(now) > stuck_after {
                        Some(RemovalCause::Stuck)
                    } else {
                        None
                    }
                }
            };
            if let Some(cause) = cause {
                if self.quarantine(id, &name, cause) {
                    report.removed.push((name, cause));
                }
            }
        }

        let live: HashSet<String> = self.registry.names().into_iter().collect();
        for registration in self.orchestrator.registrations() {
            if !live.contains(&registration.name) {
                self.orchestrator.unregister_agent(&registration.name);
                report.dangling.push(registration.name);
            }
        }
        for name in self.bus.registered() {
            if !live.contains(&name) {
                self.bus.unregister(&name);
                if !report.dangling.contains(&name) {
                    report.dangling.push(name);
                }
            }
        }
        for name in &report.dangling {
            tracing::warn!(agent = %name, "Dropped dangling registration");
        }

        if let Err(e) = self.registry.check_consistency() {
            tracing::error!(error = %e, "Registry indexes disagree");
        }

        report.elected = self.orchestrator.sweep_elections();
        tracing::debug!(
            tick = now,
            removed = report.removed.len(),
            dangling = report.dangling.len(),
            elected = report.elected.len(),
            "Liveness sweep finished"
        );
        report
    }

    /// Stop and fully unregister one agent. False when it was already gone.
    pub(crate) fn quarantine(&self, id: AgentId, name: &str, cause: RemovalCause) -> bool {
        let Some((_, handle)) = self.registry.remove_id(id) else {
            return false;
        };
        self.retire(id, name, &handle, &format!("quarantined: {}", cause.as_str()));

        tracing::warn!(agent = %name, cause = cause.as_str(), "Agent quarantined");
        crew_governance::track_agent_removed(cause.as_str());
        self.events.emit(
            EventEnvelope::new(
                EventType::AgentQuarantined,
                json!({ "id": id, "cause": cause.as_str() }),
            )
            .with_agent(name)
            .with_actor("liveness")
            .with_severity(EventSeverity::Warning),
        );
        true
    }
}
