use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ConfigError;

// ── Scenario file ────────────────────────────────────────────────────────────

/// Root of `<task_root>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioConfig {
    pub tasks: Vec<TaskConfig>,
    pub agents: AgentsConfig,
    /// Tool modules to load, in registration order.
    pub tools: Vec<ToolModuleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_config: Option<ClockConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskConfig {
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub task_description: String,
    /// Free-form deadline rendered into the task prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    /// Tasks without a directive are not scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationDirective>,
}

/// Names an evaluator and the arguments it is called with.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationDirective {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentsConfig {
    /// Player-controlled agents.  These receive task prompts.
    #[serde(default)]
    pub ego_agents: Vec<AgentProfile>,
    /// Simulated colleagues the ego agents can talk to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_agents: Vec<AgentProfile>,
}

impl AgentsConfig {
    pub fn ego_agent_names(&self) -> Vec<String> {
        self.ego_agents.iter().map(|a| a.agent_name.clone()).collect()
    }

    /// Every configured agent, ego agents first.
    pub fn all(&self) -> impl Iterator<Item = &AgentProfile> {
        self.ego_agents.iter().chain(self.other_agents.iter())
    }

    pub fn find_ego(&self, agent_name: &str) -> Option<&AgentProfile> {
        self.ego_agents.iter().find(|a| a.agent_name == agent_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentProfile {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Scripted replies handed out, in order, when someone messages this agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<String>,
}

/// One entry of the `tools` list: a module name and the backend servers its
/// tools are bound to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolModuleConfig {
    pub name: String,
    #[serde(default)]
    pub dependency: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClockConfig {
    /// Cost in simulated minutes, keyed by tool name.  Unlisted tools cost 1.
    pub action_costs: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

fn default_time_scale() -> f64 {
    1.0
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            action_costs: BTreeMap::new(),
            start_datetime: None,
            time_scale: default_time_scale(),
        }
    }
}

impl ScenarioConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Scenario {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Deduplicated backend names in first-seen order.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for module in &self.tools {
            for dep in &module.dependency {
                if !names.contains(dep) {
                    names.push(dep.clone());
                }
            }
        }
        names
    }

    pub fn module_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// JSON Schema of the scenario file, for authoring tools and editors.
pub fn scenario_json_schema() -> Value {
    let schema = schemars::schema_for!(ScenarioConfig);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

// ── Tests ────────────────────────────────────────────────────────────────────
