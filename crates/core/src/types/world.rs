//! World-mutation requests and their status.

use serde::{Deserialize, Serialize};

use super::Position;

/// Discrete request handed to the host world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldRequest {
    Gather {
        resource: String,
        quantity: u32,
        near: Position,
    },
    Build {
        structure: String,
        at: Position,
    },
    Place {
        block: String,
        at: Position,
    },
    MoveTo {
        target: Position,
    },
}

impl WorldRequest {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gather { .. } => "gather",
            Self::Build { .. } => "build",
            Self::Place { .. } => "place",
            Self::MoveTo { .. } => "move_to",
        }
    }
}

/// Handle for a submitted mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationTicket(pub u64);

/// Polled each tick until it leaves `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Succeeded(String),
    Failed(String),
}
