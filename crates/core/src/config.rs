use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::types::EvictionPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub planning: PlanningConfig,
    pub memory: MemoryConfig,
    pub bus: BusConfig,
    pub orchestrator: OrchestratorConfig,
    pub persistence: PersistenceConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on live agents.
    pub max_agents: usize,
    /// Liveness sweep period.
    pub sweep_interval_ticks: u64,
    /// Ticks an agent may spend in PLANNING or EXECUTING before it is quarantined.
    pub stuck_timeout_ticks: u64,
    pub default_group: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlanningConfig {
    /// Concurrent outstanding planning requests.
    pub max_concurrent: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub capacity: usize,
    pub eviction: EvictionPolicy,
    pub embedding_dimension: usize,
    pub recent_actions: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    pub inbox_capacity: usize,
    pub history_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub max_task_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    pub snapshot_dir: String,
    /// Accept unversioned snapshots through the logged legacy path.
    pub allow_legacy_snapshots: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    pub metrics: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CREW_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__RUNTIME__MAX_AGENTS=20 to runtime.max_agents
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                max_agents: 10,
                sweep_interval_ticks: 20,
                stuck_timeout_ticks: 6000,
                default_group: "crew".into(),
            },
            planning: PlanningConfig { max_concurrent: 4 },
            memory: MemoryConfig {
                capacity: 200,
                eviction: EvictionPolicy::Priority,
                embedding_dimension: 384,
                recent_actions: 20,
            },
            bus: BusConfig {
                inbox_capacity: 100,
                history_capacity: 1000,
            },
            orchestrator: OrchestratorConfig {
                max_task_retries: 2,
            },
            persistence: PersistenceConfig {
                snapshot_dir: "data/snapshots".into(),
                allow_legacy_snapshots: false,
            },
            telemetry: TelemetryConfig {
                json_logs: false,
                metrics: true,
            },
        }
    }
}
