//! Wire types exchanged with the agent loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One tool call issued by the agent, in the OpenAI `tool_calls` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A message produced by the dispatch loop for the agent's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum TranscriptMessage {
    Tool {
        name: String,
        content: String,
        tool_call_id: String,
    },
    User {
        content: String,
    },
    System {
        content: String,
    },
}

impl TranscriptMessage {
    pub fn content(&self) -> &str {
        match self {
            Self::Tool { content, .. } | Self::User { content } | Self::System { content } => content,
        }
    }
}

/// Tool calls executed per agent during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTally(BTreeMap<String, u64>);

impl RunTally {
    pub fn record(&mut self, agent_name: &str) {
        *self.0.entry(agent_name.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, agent_name: &str) -> u64 {
        self.0.get(agent_name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_parses_openai_shape() {
        let raw = json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "SendMessage", "arguments": "{\"sender\": \"Alice\"}"}
        });
        let req: ToolCallRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.function.name, "SendMessage");
        assert_eq!(req.function.arguments, r#"{"sender": "Alice"}"#);
    }

    #[test]
    fn messages_serialize_with_role() {
        let tool = TranscriptMessage::Tool {
            name: "ListUsers".into(),
            content: "[]".into(),
            tool_call_id: "c1".into(),
        };
        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            json!({"role": "tool", "name": "ListUsers", "content": "[]", "tool_call_id": "c1"})
        );
        let system = TranscriptMessage::System { content: "t".into() };
        assert_eq!(serde_json::to_value(&system).unwrap(), json!({"role": "system", "content": "t"}));
    }

    #[test]
    fn tally_counts_and_serializes_as_map() {
        let mut tally = RunTally::default();
        tally.record("Alice");
        tally.record("Alice");
        tally.record("Bob");
        assert_eq!(tally.get("Alice"), 2);
        assert_eq!(tally.get("Carol"), 0);
        assert_eq!(tally.total(), 3);
        assert_eq!(serde_json::to_value(&tally).unwrap(), json!({"Alice": 2, "Bob": 1}));
    }
}
