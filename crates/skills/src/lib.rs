#![deny(unused)]
//! Actions for Crewmaster agents.
//!
//! This crate provides:
//! - The action registry mapping action ids to factories
//! - Built-in world actions (gather, build, place, move_to) and `wait`

pub mod builtin;
pub mod registry;

pub use builtin::{
    builtin_factories, BuildFactory, GatherFactory, MoveToFactory, PlaceFactory, WaitAction,
    WaitFactory, WorldAction,
};
pub use registry::ActionRegistry;
