#![deny(unused)]
//! Crewmaster - a tick-driven crew of autonomous agents.
//!
//! Runs a small demo crew against the in-process world: three agents are
//! spawned (or restored from the snapshot directory), handed goals, ticked
//! until they settle, and saved again on exit.

mod demo;

use std::sync::Arc;
use std::time::Duration;

use crew_controller::LlmPlanningService;
use crew_core::{AgentRole, AgentState, AppConfig, BroadcastEventSink, Position};
use crew_orchestrator::CrewRuntime;
use crew_store::FileSnapshotStore;
use tokio::sync::broadcast::error::RecvError;

use crate::demo::{KeywordLlm, SimulatedWorld};

/// Twenty ticks per second.
const TICK_INTERVAL: Duration = Duration::from_millis(50);
const MAX_TICKS: u64 = 2_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    crew_governance::configure_tracing(config.telemetry.json_logs)?;
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Could not load configuration; using defaults");
    }
    tracing::info!("Starting Crewmaster v{}", env!("CARGO_PKG_VERSION"));

    let metrics = if config.telemetry.metrics {
        Some(crew_governance::setup_metrics_recorder()?)
    } else {
        None
    };

    // =========================================================================
    // Events
    // =========================================================================
    let events = Arc::new(BroadcastEventSink::new(1024));
    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        loop {
            match subscriber.recv().await {
                Ok(event) => tracing::debug!(
                    event = %serde_json::to_string(&event).unwrap_or_default(),
                    "Event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // =========================================================================
    // Runtime
    // =========================================================================
    let store = Arc::new(FileSnapshotStore::new(&config.persistence.snapshot_dir));
    let runtime = CrewRuntime::builder(config.clone())
        .with_planner(Arc::new(LlmPlanningService::new(Arc::new(KeywordLlm))))
        .with_world(Arc::new(SimulatedWorld::new()))
        .with_snapshot_store(store)
        .with_event_sink(events)
        .build()?;

    let loaded = runtime.load_all().await?;
    for (name, reason) in &loaded.rejected {
        tracing::warn!(agent = %name, reason = %reason, "Snapshot not restored");
    }

    let crew = [
        ("Ada", Position::new(0, 64, 0), AgentRole::Lead, "gather 10 units of iron and build a furnace"),
        ("Bo", Position::new(4, 64, 2), AgentRole::Worker, "collect 6 coal and light the camp with a torch"),
        ("Cy", Position::new(-3, 64, 5), AgentRole::Worker, "explore the ridge"),
    ];
    let group = config.runtime.default_group.clone();
    for (name, position, role, _) in &crew {
        if runtime.registry().contains(name) {
            continue;
        }
        runtime.spawn_in(name, *position, &group, *role)?;
    }
    for (name, _, _, goal) in &crew {
        if let Err(e) = runtime.submit_goal(name, goal) {
            tracing::warn!(agent = %name, error = %e, "Goal not accepted");
        }
    }

    // =========================================================================
    // Tick loop
    // =========================================================================
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let tick = runtime.tick();
                if tick > 1 && all_settled(&runtime) {
                    tracing::info!(tick, "Crew is idle");
                    break;
                }
                if tick >= MAX_TICKS {
                    tracing::warn!(tick, "Tick limit reached");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================
    for name in runtime.agent_names() {
        let status = runtime.status(&name)?;
        println!(
            "{:<8} {:<10} role={:<7} at {}  last failure: {}",
            status.name,
            status.state.as_str(),
            status.role.map(|r| format!("{:?}", r)).unwrap_or_else(|| "-".into()),
            status.position,
            status.last_failure.as_deref().unwrap_or("none"),
        );
    }
    let stats = runtime.bus().stats();
    println!(
        "messages: sent={} delivered={} dropped={}",
        stats.sent, stats.delivered, stats.dropped
    );

    let saved = runtime.save_all().await?;
    tracing::info!(agents = ?saved, dir = %config.persistence.snapshot_dir, "Crew saved");

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }
    Ok(())
}

fn all_settled(runtime: &CrewRuntime) -> bool {
    runtime.agent_names().iter().all(|name| {
        runtime
            .status(name)
            .map(|s| s.state == AgentState::Idle && runtime.bus().pending(name) == 0)
            .unwrap_or(true)
    }) && runtime.orchestrator().active_plans().is_empty()
}
