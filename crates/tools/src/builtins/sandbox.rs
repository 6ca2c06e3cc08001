//! `sandbox_tool`: shell commands in the workspace.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use trainee_servers::{Backends, Sandbox, ServerError};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

/// Upper bound on the timeout an agent may request.
const MAX_TIMEOUT_SECS: i64 = 600;

pub fn tools(backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let tools: Vec<Box<dyn Tool>> = vec![Box::new(ExecuteCommand {
        sandbox: backends.sandbox()?,
    })];
    Ok(tools)
}

pub struct ExecuteCommand {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Tool for ExecuteCommand {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "ExecuteCommand",
            r#"Execute a shell command within your workspace directory. Each invocation runs in a fresh shell, so `cd` does not persist between calls. Chain commands with `&&` when they must share a working directory.

            Args:
                command: Shell command to execute.
                timeout_secs: Maximum execution time in seconds."#,
        )
        .param(ParamDecl::required("command", ParamType::String))
        .param(ParamDecl::with_default("timeout_secs", ParamType::Integer, 30))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let timeout_secs = args.i64("timeout_secs")?;
        if !(1..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            bail!("timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}");
        }
        let outcome = self
            .sandbox
            .execute(args.str("command")?, Duration::from_secs(timeout_secs as u64))
            .await?;
        ToolOutput::json(outcome)
    }
}
