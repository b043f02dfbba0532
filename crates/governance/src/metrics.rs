//! Metrics implementation using Prometheus.
//!
//! Every helper is a no-op until a recorder is installed, so library code
//! can call them unconditionally.

use crew_core::{AgentState, Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| Error::config(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count an accepted lifecycle transition.
pub fn track_transition(from: AgentState, to: AgentState) {
    metrics::counter!(
        "crew_state_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Count a message the bus could not deliver.
pub fn track_message_dropped(reason: &'static str) {
    metrics::counter!("crew_messages_dropped_total", "reason" => reason).increment(1);
}

/// Count a finished planning request by outcome ("ok", "empty", "malformed", ...).
pub fn track_planning(outcome: &'static str) {
    metrics::counter!("crew_planning_requests_total", "outcome" => outcome).increment(1);
}

pub fn track_memory_eviction() {
    metrics::counter!("crew_memory_evictions_total").increment(1);
}

pub fn track_agent_removed(reason: &'static str) {
    metrics::counter!("crew_agents_removed_total", "reason" => reason).increment(1);
}

pub fn track_population(size: usize) {
    metrics::gauge!("crew_population").set(size as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        track_transition(AgentState::Idle, AgentState::Planning);
        track_message_dropped("unroutable");
        track_planning("ok");
        track_memory_eviction();
        track_agent_removed("stuck");
        track_population(3);
    }
}
