//! Dispatch loop: runs an agent's batch of tool calls against the registry,
//! advances the simulated clock and produces transcript messages.

pub mod protocol;

use std::fmt::Write as _;

use serde_json::{Map, Value};
use tracing::info;

use trainee_clock::VirtualClock;
use trainee_tools::{ATTACH_USER_MESSAGE, ToolOutput, ToolRegistry};

pub use protocol::{FunctionCall, RunTally, ToolCallRequest, TranscriptMessage};

/// Content returned when a call's arguments are malformed or empty.
pub const PARAM_FORMAT_ERROR: &str = "[Error] There is a problem with the tool parameters you entered. \
     Please make sure you enter the correct parameters in the correct format.";

/// Content returned when a tool call fails or names no registered tool.
pub fn invocation_error(tool_name: &str, error: impl std::fmt::Display) -> String {
    format!("[Error] The following error occurred when you called the tool `{tool_name}`: {error}.")
}

/// System message reporting the simulated time after a batch.
pub fn time_report(clock: &VirtualClock) -> String {
    format!("[System Time] Current time is {}.", clock.format())
}

/// What a single call produced before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Output(ToolOutput),
    /// Error text shown to the agent.
    Error(String),
}

/// Transcript messages for one batch plus the human-readable audit log.
#[derive(Debug, Clone, Default)]
pub struct BatchRecord {
    pub messages: Vec<TranscriptMessage>,
    pub audit: String,
}

/// Runs tool-call batches.  Holds no state of its own: the clock and the
/// tally it updates belong to the caller.
pub struct Dispatcher<'a> {
    registry: &'a ToolRegistry,
    clock: Option<&'a VirtualClock>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry, clock: Option<&'a VirtualClock>) -> Self {
        Self { registry, clock }
    }

    pub async fn execute(
        &self,
        agent_name: &str,
        calls: &[ToolCallRequest],
        tally: &mut RunTally,
    ) -> Vec<TranscriptMessage> {
        self.run_batch(agent_name, calls, tally).await.messages
    }

    /// Execute `calls` strictly in order.  Every call yields one tool message
    /// (plus a user message for attachments), advances the clock by the
    /// tool's cost and counts toward the agent's tally, whatever the outcome.
    /// A trailing system time report follows when a clock is configured.
    pub async fn run_batch(
        &self,
        agent_name: &str,
        calls: &[ToolCallRequest],
        tally: &mut RunTally,
    ) -> BatchRecord {
        let mut record = BatchRecord::default();
        if !calls.is_empty() {
            let _ = write!(record.audit, "[{agent_name}] Tool Calls:\n\n");
        }

        for call in calls {
            let name = call.function.name.as_str();
            let result = self.invoke(call).await;

            let _ = write!(
                record.audit,
                "ID: {}\nTool Name: {name}()\nArguments: {}\nExecute Results:\n{}\n\n",
                call.id,
                call.function.arguments,
                render_for_audit(&result)
            );
            record.messages.extend(normalize(name, &call.id, result));

            if let Some(clock) = self.clock {
                clock.advance_for_action(name);
            }
            tally.record(agent_name);
        }

        if !calls.is_empty() {
            info!(agent = agent_name, calls = calls.len(), "{}", record.audit);
        }

        if let Some(clock) = self.clock {
            let report = time_report(clock);
            info!(agent = agent_name, "{report}");
            record.messages.push(TranscriptMessage::System { content: report });
        }
        record
    }

    async fn invoke(&self, call: &ToolCallRequest) -> CallResult {
        let name = call.function.name.as_str();
        let args = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(value) if is_truthy(&value) => value,
            _ => return CallResult::Error(PARAM_FORMAT_ERROR.to_string()),
        };
        let Value::Object(args) = args else {
            return CallResult::Error(invocation_error(name, "arguments must be a JSON object"));
        };
        let Some(tool) = self.registry.lookup(name) else {
            return CallResult::Error(invocation_error(name, format!("no tool named '{name}' is registered")));
        };
        match tool.invoke(args).await {
            Ok(output) => CallResult::Output(output),
            Err(e) => CallResult::Error(invocation_error(name, e)),
        }
    }
}

/// Turn a call result into transcript messages.
///
/// An object carrying [`ATTACH_USER_MESSAGE`] becomes flag-only tool content
/// and, when the attachment is truthy, a following user message with its text.
pub fn normalize(tool_name: &str, tool_call_id: &str, result: CallResult) -> Vec<TranscriptMessage> {
    let tool_message = |content: String| TranscriptMessage::Tool {
        name: tool_name.to_string(),
        content,
        tool_call_id: tool_call_id.to_string(),
    };

    match result {
        CallResult::Error(text) | CallResult::Output(ToolOutput::Text(text)) => vec![tool_message(text)],
        CallResult::Output(ToolOutput::Json(Value::Object(map))) if map.contains_key(ATTACH_USER_MESSAGE) => {
            let mut flag = Map::new();
            flag.insert(ATTACH_USER_MESSAGE.to_string(), Value::Bool(true));
            let mut messages = vec![tool_message(Value::Object(flag).to_string())];
            if let Some(attachment) = map.get(ATTACH_USER_MESSAGE).filter(|v| is_truthy(v)) {
                let content = match attachment {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                messages.push(TranscriptMessage::User { content });
            }
            messages
        }
        CallResult::Output(ToolOutput::Json(value)) => vec![tool_message(value.to_string())],
    }
}

fn render_for_audit(result: &CallResult) -> String {
    match result {
        CallResult::Output(ToolOutput::Json(value)) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        CallResult::Output(ToolOutput::Text(text)) | CallResult::Error(text) => text.clone(),
    }
}

/// JSON truthiness: `null`, `false`, zero, and empty strings, arrays and
/// objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;
    use trainee_clock::parse_datetime;
    use trainee_tools::{ParamDecl, ParamType, Tool, ToolArgs, ToolSignature};

    /// Counts its invocations and behaves according to `mode`.
    struct Probe {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Probe {
        fn signature(&self) -> ToolSignature {
            ToolSignature::new(self.name, "Probe tool.")
                .param(ParamDecl::required("mode", ParamType::String))
        }

        async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.str("mode")? {
                "text" => Ok(ToolOutput::text("plain café")),
                "json" => Ok(ToolOutput::Json(json!({"name": "Zoë", "ok": true}))),
                "attach" => Ok(ToolOutput::attach("Bob says hi")),
                "attach_empty" => Ok(ToolOutput::Json(json!({"attach_user_message": ""}))),
                _ => bail!("boom"),
            }
        }
    }

    fn registry(calls: &Arc<AtomicUsize>) -> ToolRegistry {
        let mut reg = ToolRegistry::default();
        for name in ["SendMessage", "Probe"] {
            reg.register(Box::new(Probe {
                name,
                calls: calls.clone(),
            }));
        }
        reg
    }

    fn clock() -> VirtualClock {
        let costs: BTreeMap<String, i64> = [("SendMessage".to_string(), 5)].into_iter().collect();
        VirtualClock::starting_at(parse_datetime("2024-01-01 09:00:00").unwrap(), costs, 1.0)
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, arguments)
    }

    fn tool_content(msg: &TranscriptMessage) -> &str {
        match msg {
            TranscriptMessage::Tool { content, .. } => content,
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_scenario_reports_nine_oh_five() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let clock = clock();
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, Some(&clock))
            .execute("Alice", &[call("c1", "SendMessage", r#"{"mode": "json"}"#)], &mut tally)
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[1],
            TranscriptMessage::System {
                content: "[System Time] Current time is 2024-01-01 09:05:00.".into()
            }
        );
    }

    #[tokio::test]
    async fn message_count_is_n_or_n_plus_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let batch = vec![
            call("a", "Probe", r#"{"mode": "text"}"#),
            call("b", "Probe", r#"{"mode": "json"}"#),
            call("c", "Probe", "not json"),
        ];
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, None).execute("Alice", &batch, &mut tally).await;
        assert_eq!(out.len(), 3);

        let clock = clock();
        let out = Dispatcher::new(&reg, Some(&clock)).execute("Alice", &batch, &mut tally).await;
        assert_eq!(out.len(), 4);
        assert_eq!(tally.get("Alice"), 6);
    }

    #[tokio::test]
    async fn malformed_or_empty_arguments_never_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        for args in ["{bad", "", "{}", "null", "0", "false", "\"\"", "[]"] {
            let out = Dispatcher::new(&reg, None)
                .execute("Alice", &[call("x", "Probe", args)], &mut tally)
                .await;
            assert_eq!(tool_content(&out[0]), PARAM_FORMAT_ERROR, "args: {args}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tally.get("Alice"), 8);
    }

    #[tokio::test]
    async fn parameter_errors_still_cost_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let clock = clock();
        let mut tally = RunTally::default();
        Dispatcher::new(&reg, Some(&clock))
            .execute("Alice", &[call("x", "SendMessage", "{}")], &mut tally)
            .await;
        assert_eq!(clock.format(), "2024-01-01 09:05:00");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_invocation_error_and_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, None)
            .execute("Alice", &[call("x", "Teleport", r#"{"to": "Mars"}"#)], &mut tally)
            .await;
        let content = tool_content(&out[0]);
        assert!(content.starts_with("[Error] The following error occurred when you called the tool `Teleport`"));
        assert!(content.contains("Teleport"));
        assert_eq!(tally.get("Alice"), 1);
    }

    #[tokio::test]
    async fn tool_failures_and_bad_bindings_become_content() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, None)
            .execute(
                "Alice",
                &[
                    call("a", "Probe", r#"{"mode": "explode"}"#),
                    call("b", "Probe", r#"{"mode": "text", "extra": 1}"#),
                    call("c", "Probe", "[1, 2]"),
                ],
                &mut tally,
            )
            .await;
        assert_eq!(tool_content(&out[0]), "[Error] The following error occurred when you called the tool `Probe`: boom.");
        assert!(tool_content(&out[1]).contains("unexpected keyword argument 'extra'"));
        assert!(tool_content(&out[2]).contains("must be a JSON object"));
    }

    #[tokio::test]
    async fn attachment_is_split_into_user_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, None)
            .execute(
                "Alice",
                &[
                    call("a", "Probe", r#"{"mode": "attach"}"#),
                    call("b", "Probe", r#"{"mode": "attach_empty"}"#),
                ],
                &mut tally,
            )
            .await;
        assert_eq!(out.len(), 3);
        assert_eq!(tool_content(&out[0]), r#"{"attach_user_message":true}"#);
        assert_eq!(out[1], TranscriptMessage::User { content: "Bob says hi".into() });
        // Falsy attachment: flag only, no user message.
        assert_eq!(tool_content(&out[2]), r#"{"attach_user_message":true}"#);
    }

    #[tokio::test]
    async fn text_is_verbatim_and_json_keeps_unicode() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        let out = Dispatcher::new(&reg, None)
            .execute(
                "Alice",
                &[call("a", "Probe", r#"{"mode": "text"}"#), call("b", "Probe", r#"{"mode": "json"}"#)],
                &mut tally,
            )
            .await;
        assert_eq!(tool_content(&out[0]), "plain café");
        assert_eq!(tool_content(&out[1]), r#"{"name":"Zoë","ok":true}"#);
    }

    #[tokio::test]
    async fn empty_batch_still_reports_time() {
        let reg = ToolRegistry::default();
        let clock = clock();
        let mut tally = RunTally::default();
        let record = Dispatcher::new(&reg, Some(&clock)).run_batch("Alice", &[], &mut tally).await;
        assert_eq!(record.messages.len(), 1);
        assert!(record.audit.is_empty());
        assert_eq!(tally.get("Alice"), 0);

        let out = Dispatcher::new(&reg, None).execute("Alice", &[], &mut tally).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn audit_lists_every_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&calls);
        let mut tally = RunTally::default();
        let record = Dispatcher::new(&reg, None)
            .run_batch("Alice", &[call("id-7", "Probe", r#"{"mode": "json"}"#)], &mut tally)
            .await;
        assert!(record.audit.starts_with("[Alice] Tool Calls:"));
        assert!(record.audit.contains("ID: id-7\nTool Name: Probe()\n"));
        assert!(record.audit.contains("\"ok\": true"));
    }

    #[test]
    fn truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy}");
        }
        for truthy in [json!(true), json!(-1), json!("a"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy}");
        }
    }
}
