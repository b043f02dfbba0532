#![deny(unused)]
//! Per-agent control for Crewmaster.
//!
//! This crate provides the lifecycle state machine, the asynchronous
//! planning pipeline and its LLM-backed planner, the task executor, agent
//! memory, and the [`Agent`] aggregate that ties them together.

pub mod agent;
pub mod executor;
pub mod memory;
pub mod parser;
pub mod persistence;
pub mod planner;
pub mod planning;
pub mod state;

pub use agent::{Agent, AgentDeps};
pub use executor::{ExecutorStep, TaskExecutor};
pub use memory::AgentMemory;
pub use parser::parse_plan_response;
pub use planner::LlmPlanningService;
pub use planning::{PendingPlan, PlanPoll, PlanningPipeline};
pub use state::AgentStateMachine;
