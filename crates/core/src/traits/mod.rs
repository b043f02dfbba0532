//! Core traits for Crewmaster.
//!
//! Traits sit at the seams between the execution core and its collaborators:
//! - `planning`: asynchronous planning service and the LLM client behind it
//! - `world`: world-mutation boundary and spawn validation
//! - `skills`: tick-driven actions and their factories
//! - `store`: snapshot persistence and embedding models
//! - `coordination`: plan delegation from a lead to its group
//! - `events`: structured event sinks

pub mod coordination;
pub mod events;
pub mod llm;
pub mod planning;
pub mod skills;
pub mod store;
pub mod world;

pub use coordination::*;
pub use events::*;
pub use llm::*;
pub use planning::*;
pub use skills::*;
pub use store::*;
pub use world::*;
