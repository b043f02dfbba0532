#![deny(unused)]
//! Population-level coordination for Crewmaster.
//!
//! This crate provides the process-wide agent registry, the communication
//! bus, the orchestrator that assigns roles and distributes plans, and the
//! [`CrewRuntime`] that drives the tick loop, the liveness sweep and
//! snapshot persistence.

pub mod bus;
pub mod liveness;
pub mod orchestrator;
pub mod registry;
pub mod runtime;

pub use bus::{BusStats, CommunicationBus, DeliveryReport, DropReason};
pub use liveness::{RemovalCause, SweepReport};
pub use orchestrator::{Assignment, AssignmentStatus, Orchestrator, PlanExecution, Registration};
pub use registry::{AgentHandle, AgentRegistry};
pub use runtime::{CrewRuntime, LoadReport, RuntimeBuilder};
