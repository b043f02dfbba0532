#![deny(unused)]
//! Core types, traits, and error definitions for Crewmaster.
//!
//! This crate provides the building blocks shared by every layer of the
//! agent runtime: lifecycle states, tasks, plans, messages, memory records,
//! snapshots, and the trait seams to the planner, the world and storage.

pub mod config;
pub mod error;
pub mod events;
pub mod mocks;
pub mod traits;
pub mod types;

pub use crate::config::*;
pub use error::{Error, PlanningError, Result};
pub use events::*;
pub use traits::*;
pub use types::*;
