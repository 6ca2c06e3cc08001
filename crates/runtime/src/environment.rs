use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument};
use tracing_appender::non_blocking::WorkerGuard;

use trainee_clock::VirtualClock;
use trainee_config::{ConfigError, LoggingConfig, ScenarioConfig};
use trainee_exec::{BatchRecord, Dispatcher, RunTally, ToolCallRequest, TranscriptMessage};
use trainee_servers::{Backends, ServerContext, ServerError};
use trainee_tools::{BindError, ToolOutput, ToolRegistry, ToolSpec, discover};

use crate::evaluation::{EvaluationContext, EvaluationError, EvaluationReport, EvaluatorRegistry, TaskEvaluation};
use crate::logging;

/// Scenario file, relative to the task root.
pub const SCENARIO_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Outcome of a direct tool call that did not produce output.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("invalid parameters for tool '{tool}': {source}")]
    InvalidParams {
        tool: String,
        #[source]
        source: BindError,
    },
    #[error("internal error when calling tool '{tool}': {reason}")]
    Failed { tool: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentOptions {
    pub logging: LoggingConfig,
}

/// One simulated office for one run.
///
/// Owns the clock, every backend handle, the tool registry and the per-agent
/// tally.  Backends are closed by [`Environment::close`] or on drop.
pub struct Environment {
    task_root: PathBuf,
    workspace: PathBuf,
    scenario: ScenarioConfig,
    clock: Option<Arc<VirtualClock>>,
    backends: Backends,
    registry: ToolRegistry,
    evaluators: EvaluatorRegistry,
    tally: RunTally,
    log_file: Option<PathBuf>,
    closed: bool,
    _log_guard: Option<WorkerGuard>,
}

impl Environment {
    /// Load `<task_root>/config.json` and bring the office up.
    ///
    /// A missing or malformed scenario file fails before anything else is
    /// built.  So does a dependency on a backend that does not exist.
    pub fn new(task_root: impl Into<PathBuf>, options: EnvironmentOptions) -> Result<Self, EnvironmentError> {
        let task_root = task_root.into();
        let scenario = ScenarioConfig::load_from(task_root.join(SCENARIO_FILE))?;
        let log_guard = logging::init(&options.logging);
        let log_file = (!options.logging.file.is_empty()).then(|| PathBuf::from(&options.logging.file));

        let clock = scenario
            .clock_config
            .as_ref()
            .map(|cfg| Arc::new(VirtualClock::new(cfg)));

        let ctx = ServerContext {
            task_root: &task_root,
            clock: clock.clone(),
            agents: &scenario.agents,
        };
        let backends = Backends::build(&scenario.server_names(), &ctx)?;
        let registry = discover(&scenario.module_names(), &backends);
        info!(
            task_root = %task_root.display(),
            tools = registry.len(),
            servers = ?backends.running(),
            clock = clock.is_some(),
            "environment ready"
        );

        Ok(Self {
            workspace: task_root.join("workspace"),
            task_root,
            scenario,
            clock,
            backends,
            registry,
            evaluators: EvaluatorRegistry::with_builtins(),
            tally: RunTally::default(),
            log_file,
            closed: false,
            _log_guard: log_guard,
        })
    }

    pub fn task_root(&self) -> &Path {
        &self.task_root
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    pub fn clock(&self) -> Option<&VirtualClock> {
        self.clock.as_deref()
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tally(&self) -> &RunTally {
        &self.tally
    }

    pub fn evaluators_mut(&mut self) -> &mut EvaluatorRegistry {
        &mut self.evaluators
    }

    pub fn ego_agent_names(&self) -> Vec<String> {
        self.scenario.agents.ego_agent_names()
    }

    /// Calling contracts of every registered tool, in registration order.
    pub fn tool_contracts(&self) -> Vec<ToolSpec> {
        self.registry.list_specs()
    }

    pub fn openai_tools(&self) -> Value {
        self.registry.openai_tools()
    }

    /// The agent's system prompt followed by the list of scenario tasks.
    pub fn generate_tasks_prompt(&self, agent_name: &str) -> String {
        let mut prompt = self
            .scenario
            .agents
            .find_ego(agent_name)
            .and_then(|a| a.system_prompt.clone())
            .unwrap_or_default();
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }

        let tasks = &self.scenario.tasks;
        if tasks.is_empty() {
            return prompt;
        }

        let first_name = agent_name.split(' ').next().unwrap_or_default();
        let _ = writeln!(prompt, "Hi, {first_name} there's some work that needs your help:");
        for (i, task) in tasks.iter().enumerate() {
            let n = i + 1;
            match task.deadline.as_deref().filter(|d| !d.is_empty()) {
                Some(deadline) => {
                    let _ = write!(
                        prompt,
                        "\n## Task {n}-{}\n\n{}\nYou should finish this work before **{deadline}**.\n\n",
                        task.task_name, task.task_description
                    );
                }
                None => {
                    let _ = write!(prompt, "## Task {n}\n{}\n\n", task.task_description);
                }
            }
        }
        prompt
    }

    /// Run one batch of the agent's tool calls.  See [`Dispatcher::run_batch`].
    pub async fn execute_tool_calls(
        &mut self,
        agent_name: &str,
        calls: &[ToolCallRequest],
    ) -> Vec<TranscriptMessage> {
        self.execute_batch(agent_name, calls).await.messages
    }

    pub async fn execute_batch(&mut self, agent_name: &str, calls: &[ToolCallRequest]) -> BatchRecord {
        let dispatcher = Dispatcher::new(&self.registry, self.clock.as_deref());
        dispatcher.run_batch(agent_name, calls, &mut self.tally).await
    }

    /// Call a tool directly, outside any agent turn.  The clock does not move
    /// and nothing is tallied.
    pub async fn invoke_tool(&self, name: &str, args: Map<String, Value>) -> Result<ToolOutput, InvokeError> {
        let tool = self
            .registry
            .lookup(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;
        let bound = tool.bind(args).map_err(|source| InvokeError::InvalidParams {
            tool: name.to_string(),
            source,
        })?;
        tool.call(bound).await.map_err(|e| InvokeError::Failed {
            tool: name.to_string(),
            reason: format!("{e:#}"),
        })
    }

    /// Score every task that carries an evaluation directive.
    #[instrument(skip(self), fields(task_root = %self.task_root.display()))]
    pub fn evaluate(&self) -> Result<EvaluationReport, EvaluationError> {
        let ctx = EvaluationContext {
            task_root: &self.task_root,
            workspace: &self.workspace,
        };

        let mut evaluation_results = Vec::new();
        for task in &self.scenario.tasks {
            let Some(directive) = &task.evaluation else {
                continue;
            };
            let score = self.evaluators.call(&directive.name, &ctx, &directive.args)?;
            info!(
                task = %task.task_name,
                evaluator = %directive.name,
                total_score = score.total_score,
                full_score = score.full_score,
                notes = %score.notes,
                "task evaluated"
            );
            evaluation_results.push(TaskEvaluation {
                task_name: task.task_name.clone(),
                total_score: score.total_score,
                full_score: score.full_score,
                notes: score.notes,
            });
        }

        match &self.log_file {
            Some(path) => info!("Task has been finished, check {} for details.", path.display()),
            None => info!("Task has been finished."),
        }

        Ok(EvaluationReport {
            evaluation_results,
            total_tool_calls: self.tally.clone(),
        })
    }

    /// Close every backend server.  Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.backends.close_all();
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env_with(config: &str) -> (TempDir, Environment) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SCENARIO_FILE), config).unwrap();
        let env = Environment::new(dir.path(), EnvironmentOptions::default()).unwrap();
        (dir, env)
    }

    #[test]
    fn prompt_with_deadline_and_without() {
        let (_dir, env) = env_with(
            r#"{"tasks": [
                    {"task_name": "Report", "task_description": "Write it.", "deadline": "Friday"},
                    {"task_name": "Chat", "task_description": "Say hi."}
                ],
                "agents": {"ego_agents": [{"agent_name": "Alice Smith", "system_prompt": "You are Alice."}]},
                "tools": []}"#,
        );
        assert_eq!(
            env.generate_tasks_prompt("Alice Smith"),
            "You are Alice.\n\n\
             Hi, Alice there's some work that needs your help:\n\
             \n## Task 1-Report\n\nWrite it.\nYou should finish this work before **Friday**.\n\n\
             ## Task 2\nSay hi.\n\n"
        );
    }

    #[test]
    fn prompt_without_system_prompt_or_tasks() {
        let (_dir, env) = env_with(
            r#"{"tasks": [], "agents": {"ego_agents": [{"agent_name": "Bob"}]}, "tools": []}"#,
        );
        assert_eq!(env.generate_tasks_prompt("Bob"), "");
        assert_eq!(env.generate_tasks_prompt("Nobody"), "");
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SCENARIO_FILE),
            r#"{"tasks": [], "agents": {}, "tools": [{"name": "message_tool", "dependency": ["fax"]}]}"#,
        )
        .unwrap();
        let err = Environment::new(dir.path(), EnvironmentOptions::default()).err();
        assert!(matches!(err, Some(EnvironmentError::Server(ServerError::UnknownServer(_)))));
    }

    #[test]
    fn missing_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = Environment::new(dir.path(), EnvironmentOptions::default()).err();
        assert!(matches!(err, Some(EnvironmentError::Config(ConfigError::Read { .. }))));
    }

    #[tokio::test]
    async fn invoke_tool_outcomes() {
        let (_dir, env) = env_with(
            r#"{"tasks": [], "agents": {}, "tools": [{"name": "calculator_tool"}],
                "clock_config": {"action_costs": {}, "start_datetime": "2024-01-01 09:00:00"}}"#,
        );
        let args = |v: Value| v.as_object().cloned().unwrap();

        let out = env
            .invoke_tool("Calculate", args(serde_json::json!({"expression": "2 + 2"})))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Json(ref v) if v["result"] == 4.0));
        // Direct calls leave the clock alone.
        assert_eq!(env.clock().unwrap().format(), "2024-01-01 09:00:00");
        assert_eq!(env.tally().total(), 0);

        assert!(matches!(
            env.invoke_tool("Nope", Map::new()).await,
            Err(InvokeError::NotFound(_))
        ));
        assert!(matches!(
            env.invoke_tool("Calculate", Map::new()).await,
            Err(InvokeError::InvalidParams { .. })
        ));
        assert!(matches!(
            env.invoke_tool("Calculate", args(serde_json::json!({"expression": "1/0"}))).await,
            Err(InvokeError::Failed { .. })
        ));
    }

    #[test]
    fn close_twice_is_harmless() {
        let (_dir, mut env) = env_with(
            r#"{"tasks": [], "agents": {}, "tools": [{"name": "message_tool", "dependency": ["chat_server"]}]}"#,
        );
        assert_eq!(env.backends().running().len(), 1);
        env.close();
        env.close();
        assert!(env.backends().running().is_empty());
    }
}
