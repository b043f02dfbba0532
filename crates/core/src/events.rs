use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentId, AgentRole, AgentState};

/// Structured Event Envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: String,
    /// Agent the event is about, if any
    pub agent: Option<String>,
    /// Component that raised the event ('runtime', 'bus', 'orchestrator', ...)
    pub actor: String,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Event type category
    pub event_type: EventType,
    /// Event severity level
    pub severity: EventSeverity,
    /// Structured payload (event-specific data)
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent: None,
            actor: "system".to_string(),
            timestamp: Utc::now(),
            event_type,
            severity: EventSeverity::Info,
            payload,
        }
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Agent lifecycle state changed
    StateTransition,
    /// Agent admitted into the population
    AgentSpawned,
    /// Agent released after the stop sequence
    AgentRemoved,
    /// Agent removed by the liveness sweep
    AgentQuarantined,
    /// Message could not be delivered
    MessageDropped,
    /// Orchestrator changed an agent's role
    RoleChanged,
    /// Planning service call failed
    PlanningFailed,
    /// Task finished successfully
    TaskCompleted,
    /// Task finished unsuccessfully
    TaskFailed,
    /// Every task of a distributed plan reported back
    PlanFinished,
    /// Snapshot refused on load
    SnapshotRejected,
    /// Unversioned snapshot accepted through the legacy path
    LegacySnapshotLoaded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

// Helper structs for common payloads

/// Emitted on every accepted state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionEvent {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl StateTransitionEvent {
    pub fn to_envelope(&self) -> EventEnvelope {
        let severity = if self.to == AgentState::Failed {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        EventEnvelope::new(
            EventType::StateTransition,
            serde_json::to_value(self).unwrap_or_default(),
        )
        .with_agent(&self.agent_name)
        .with_actor("state_machine")
        .with_severity(severity)
    }
}

#[derive(Serialize, Deserialize)]
pub struct RoleChangePayload {
    pub agent: String,
    pub group: String,
    pub from: Option<AgentRole>,
    pub to: AgentRole,
    pub reason: String,
}

#[derive(Serialize, Deserialize)]
pub struct MessageDroppedPayload {
    pub message_id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub reason: String,
}
