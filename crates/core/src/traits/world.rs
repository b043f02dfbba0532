use crate::types::{AgentId, MutationStatus, MutationTicket, Position, WorldRequest};

/// Host world boundary.
///
/// All calls are non-blocking; multi-tick mutations are polled until they
/// leave [`MutationStatus::Pending`].
pub trait WorldInterface: Send + Sync {
    /// Whether a new agent may appear at `position`.
    fn is_valid_spawn(&self, position: Position) -> bool;

    /// Start a mutation on behalf of `agent`.
    fn submit(&self, agent: AgentId, request: WorldRequest) -> MutationTicket;

    fn poll(&self, ticket: MutationTicket) -> MutationStatus;

    /// Abandon a pending mutation. Unknown tickets are ignored.
    fn cancel(&self, ticket: MutationTicket);

    /// False once the host entity backing `agent` is gone.
    fn is_alive(&self, _agent: AgentId) -> bool {
        true
    }
}
