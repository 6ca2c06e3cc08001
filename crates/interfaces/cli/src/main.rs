use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use trainee_config::{HarnessConfig, scenario_json_schema};
use trainee_exec::{ToolCallRequest, TranscriptMessage};
use trainee_runtime::{Environment, EnvironmentOptions};

#[derive(Debug, Parser)]
#[command(
    name = "trainee",
    version,
    about = "Simulated-office tool harness for agent evaluation"
)]
struct Cli {
    /// Harness settings file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    /// Task directory holding config.json; overrides the settings file.
    #[arg(long, global = true)]
    task_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the calling contract of every registered tool.
    Tools,
    /// Print the task prompt for an ego agent.
    Prompt {
        /// Defaults to the first ego agent.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Run scripted tool-call batches through the dispatch loop.
    Replay {
        /// JSON array of batches, each an array of tool-call requests.
        #[arg(long)]
        calls: PathBuf,
        #[arg(long)]
        agent: Option<String>,
        /// Write the transcript here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Score the tasks after the last batch.
        #[arg(long)]
        evaluate: bool,
    },
    /// Score the tasks against the current task root.
    Evaluate,
    /// Print the JSON Schema of the scenario file.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Schema = cli.command {
        return print_json(&scenario_json_schema());
    }

    let settings = HarnessConfig::load_from(&cli.config)
        .with_context(|| format!("loading harness settings from {}", cli.config.display()))?;
    let task_root = cli
        .task_root
        .unwrap_or_else(|| PathBuf::from(&settings.run.task_root));
    let options = EnvironmentOptions {
        logging: settings.logging.clone(),
    };
    let mut env = Environment::new(&task_root, options)
        .with_context(|| format!("starting environment for {}", task_root.display()))?;

    let outcome = run(&mut env, cli.command).await;
    env.close();
    outcome
}

async fn run(env: &mut Environment, command: Commands) -> Result<()> {
    match command {
        Commands::Tools => print_json(&env.openai_tools()),
        Commands::Prompt { agent } => {
            let agent = resolve_agent(env, agent)?;
            println!("{}", env.generate_tasks_prompt(&agent));
            Ok(())
        }
        Commands::Replay {
            calls,
            agent,
            output,
            evaluate,
        } => {
            let agent = resolve_agent(env, agent)?;
            let batches = load_batches(&calls)?;
            let mut transcript: Vec<TranscriptMessage> = Vec::new();
            for (i, batch) in batches.iter().enumerate() {
                info!(agent = %agent, batch = i + 1, calls = batch.len(), "replaying batch");
                transcript.extend(env.execute_tool_calls(&agent, batch).await);
            }

            let rendered = serde_json::to_string_pretty(&transcript)?;
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, rendered)
                        .with_context(|| format!("writing transcript to {}", path.display()))?;
                    info!(path = %path.display(), messages = transcript.len(), "transcript saved");
                }
                None => println!("{rendered}"),
            }

            if evaluate {
                env.close();
                print_json(&serde_json::to_value(env.evaluate()?)?)?;
            }
            Ok(())
        }
        Commands::Evaluate => print_json(&serde_json::to_value(env.evaluate()?)?),
        Commands::Schema => print_json(&scenario_json_schema()),
    }
}

fn resolve_agent(env: &Environment, agent: Option<String>) -> Result<String> {
    let egos = env.ego_agent_names();
    match agent {
        Some(name) if egos.contains(&name) => Ok(name),
        Some(name) => bail!("'{name}' is not an ego agent; expected one of {egos:?}"),
        None => match egos.into_iter().next() {
            Some(name) => Ok(name),
            None => bail!("the scenario declares no ego agents"),
        },
    }
}

fn load_batches(path: &Path) -> Result<Vec<Vec<ToolCallRequest>>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing tool-call batches in {}", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn batches_parse_from_openai_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calls.json");
        fs::write(
            &path,
            r#"[[{"id": "c1", "type": "function",
                  "function": {"name": "ListUsers", "arguments": "{}"}}],
                []]"#,
        )
        .unwrap();
        let batches = load_batches(&path).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].function.name, "ListUsers");
        assert!(batches[1].is_empty());
    }

    #[test]
    fn cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["trainee", "prompt", "--agent", "Alice", "--task-root", "tasks/day_1"]).unwrap();
        assert_eq!(cli.task_root, Some(PathBuf::from("tasks/day_1")));
        assert!(matches!(cli.command, Commands::Prompt { agent: Some(ref a) } if a == "Alice"));
    }
}
