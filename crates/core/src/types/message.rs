//! Inter-agent messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    TaskAssignment,
    TaskProgress,
    TaskComplete,
    TaskFailed,
    HelpRequest,
    StatusQuery,
    StatusReport,
    Coordination,
    Broadcast,
    HumanCommand,
    PlanAnnouncement,
}

/// Delivery priority. Higher drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 1,
    Normal = 5,
    High = 10,
    Urgent = 20,
    Critical = 50,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Recipient {
    Agent(String),
    /// Every member of the group except the sender.
    Group(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: Recipient,
    pub priority: Priority,
    pub content: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: Recipient,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            recipient,
            priority: Priority::Normal,
            content: content.into(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn to_agent(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(kind, sender, Recipient::Agent(recipient.into()), content)
    }

    pub fn to_group(
        kind: MessageKind,
        sender: impl Into<String>,
        group: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(kind, sender, Recipient::Group(group.into()), content)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
