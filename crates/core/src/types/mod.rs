//! Core types for Crewmaster.

mod agent;
mod memory;
mod message;
mod plan;
mod snapshot;
mod task;
mod world;

pub use agent::*;
pub use memory::*;
pub use message::*;
pub use plan::*;
pub use snapshot::*;
pub use task::*;
pub use world::*;
