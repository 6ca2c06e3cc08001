//! Built-in tool modules, one per catalog entry.

pub mod calculator;
pub mod calendar;
pub mod cloud_disk;
pub mod message;
pub mod monitor;
pub mod sandbox;

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{Map, Value};

    use crate::{Tool, ToolOutput, RegisteredTool};

    /// Bind `args` against the tool's signature and run it.
    pub async fn run(tool: Box<dyn Tool>, args: Value) -> anyhow::Result<ToolOutput> {
        let args: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        RegisteredTool::new(tool).invoke(args).await
    }

    pub fn json(out: ToolOutput) -> Value {
        match out {
            ToolOutput::Json(v) => v,
            ToolOutput::Text(t) => panic!("expected JSON output, got text: {t}"),
        }
    }
}
