#![deny(unused)]
//! Observability for Crewmaster.
//!
//! This crate provides:
//! - Structured logging setup (plain or JSON)
//! - Prometheus metrics recorder and runtime counters

pub mod metrics;
pub mod tracing_layer;

pub use metrics::{
    setup_metrics_recorder, track_agent_removed, track_memory_eviction, track_message_dropped,
    track_planning, track_population, track_transition,
};
pub use tracing_layer::configure_tracing;
