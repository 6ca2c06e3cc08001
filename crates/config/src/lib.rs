//! Configuration for a harness run.
//!
//! Two files feed a run: the scenario description (`<task_root>/config.json`)
//! that declares tasks, agents, tool modules and the simulated clock, and the
//! harness settings (`config/default.toml`) that control logging and the
//! default task root.

mod scenario;
mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use scenario::{
    AgentProfile, AgentsConfig, ClockConfig, EvaluationDirective, ScenarioConfig, TaskConfig,
    ToolModuleConfig, scenario_json_schema,
};
pub use settings::{HarnessConfig, LoggingConfig, RunConfig};

/// Errors raised while loading configuration.  All of them are fatal at
/// start-up: nothing is registered until the configuration parses.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scenario config {}: {source}", path.display())]
    Scenario {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed harness settings {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot render harness settings: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
