use std::sync::OnceLock;

use anyhow::{Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

// ── Signatures and calling contracts ─────────────────────────────────────────

/// JSON-schema type vocabulary for a tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    /// Homogeneous list; the element type becomes the `items` sub-schema.
    Array(Box<ParamType>),
    Object,
    Null,
    /// Union of member types, rendered as `oneOf`.
    OneOf(Vec<ParamType>),
}

impl Default for ParamType {
    fn default() -> Self {
        Self::String
    }
}

impl ParamType {
    pub fn array_of(item: ParamType) -> Self {
        Self::Array(Box::new(item))
    }

    fn type_name(&self) -> Option<&'static str> {
        Some(match self {
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Array(_) => "array",
            ParamType::Object => "object",
            ParamType::Null => "null",
            ParamType::OneOf(_) => return None,
        })
    }

    /// Type-only schema fragment, without description or default.
    pub fn schema(&self) -> Map<String, Value> {
        let mut out = Map::new();
        match self {
            ParamType::OneOf(members) => {
                let members = members.iter().map(|m| Value::Object(m.schema())).collect();
                out.insert("oneOf".into(), Value::Array(members));
            }
            ParamType::Array(item) => {
                out.insert("type".into(), "array".into());
                out.insert("items".into(), Value::Object(item.schema()));
            }
            other => {
                if let Some(name) = other.type_name() {
                    out.insert("type".into(), name.into());
                }
            }
        }
        out
    }
}

/// Whether a parameter has a default, and which.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ParamDefault {
    /// No default: the caller must supply the argument.
    #[default]
    Required,
    /// Optional, defaults to `null`.  Not advertised in the contract.
    None,
    /// Optional with a concrete default that is advertised.
    Value(Value),
}

/// One declared parameter of a tool signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub param_type: ParamType,
    pub default: ParamDefault,
}

impl ParamDecl {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: ParamDefault::Required,
        }
    }

    /// Optional parameter whose default is `null`.
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: ParamDefault::None,
        }
    }

    pub fn with_default(name: impl Into<String>, param_type: ParamType, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: ParamDefault::Value(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default == ParamDefault::Required
    }
}

/// What a tool declares about itself: name, documentation with an `Args:`
/// section, and the ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSignature {
    pub name: String,
    pub doc: String,
    pub params: Vec<ParamDecl>,
}

impl ToolSignature {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, decl: ParamDecl) -> Self {
        self.params.push(decl);
        self
    }
}

/// Describes a single parameter in the generated calling contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Calling contract for one tool.  Built once from its signature and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

const NO_FUNCTION_DESCRIPTION: &str = "No function description.";

impl ToolSpec {
    pub fn from_signature(signature: &ToolSignature) -> Self {
        let doc = clean_doc(&signature.doc);
        let descriptions = parse_args_section(&doc);
        let description = match doc.split("\nArgs:").next().map(str::trim) {
            Some(text) if !doc.is_empty() => text.to_string(),
            _ => NO_FUNCTION_DESCRIPTION.to_string(),
        };

        let params = signature
            .params
            .iter()
            .map(|decl| ToolParam {
                description: descriptions
                    .iter()
                    .find(|(name, _)| *name == decl.name)
                    .map(|(_, text)| text.clone())
                    .unwrap_or_else(|| format!("No parameter description for {}.", decl.name)),
                name: decl.name.clone(),
                required: decl.is_required(),
                param_type: decl.param_type.clone(),
                default: match &decl.default {
                    ParamDefault::Value(v) => Some(v.clone()),
                    ParamDefault::Required | ParamDefault::None => None,
                },
            })
            .collect();

        Self {
            name: signature.name.clone(),
            description,
            params,
        }
    }

    pub fn required(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The `parameters` object of the contract.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = p.param_type.schema();
            prop.insert("description".into(), Value::String(p.description.clone()));
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required(),
        })
    }

    /// Generate the OpenAI-compatible `tools` array element for this tool.
    ///
    /// ```json
    /// {
    ///   "type": "function",
    ///   "function": {
    ///     "name": "SendMessage",
    ///     "description": "...",
    ///     "parameters": {
    ///       "type": "object",
    ///       "properties": { ... },
    ///       "required": [...]
    ///     }
    ///   }
    /// }
    /// ```
    pub fn to_openai_tool_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// Convert a slice of `ToolSpec` into the `tools` JSON array accepted by
/// OpenAI-style function-calling clients.
pub fn specs_to_openai_tools(specs: &[ToolSpec]) -> Value {
    Value::Array(specs.iter().map(|s| s.to_openai_tool_schema()).collect())
}

/// Strip the common indentation of every line after the first, then drop
/// leading and trailing blank lines.
fn clean_doc(doc: &str) -> String {
    let mut lines = doc.lines();
    let first = lines.next().unwrap_or("").trim().to_string();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_width(l))
        .min()
        .unwrap_or(0);

    let mut out: Vec<String> = vec![first];
    for line in rest {
        let cut = indent.min(indent_width(line));
        out.push(line[cut..].trim_end().to_string());
    }
    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// `(name, description)` pairs from the `Args:` block of a doc comment.
/// The block runs until `Returns:` or the end of the text.
fn parse_args_section(doc: &str) -> Vec<(String, String)> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        let block = Regex::new(r"(?s)Args:\s*(.*?)\s*(?:Returns:|\z)").ok()?;
        let line = Regex::new(r"^\s*(\w+)\s*:\s*(.*?)\s*$").ok()?;
        Some((block, line))
    });
    let Some((block, line)) = patterns else {
        return Vec::new();
    };
    let Some(section) = block.captures(doc).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    section
        .as_str()
        .lines()
        .filter_map(|l| line.captures(l.trim()))
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect()
}

// ── Tool output and arguments ────────────────────────────────────────────────

/// Reserved output key: its value is surfaced to the conversation as a
/// separate user message instead of being shown in the tool result.
pub const ATTACH_USER_MESSAGE: &str = "attach_user_message";

/// The value a tool returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// Plain text, placed in the transcript verbatim.
    Text(String),
    /// Structured result, serialised as JSON.
    Json(Value),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn json(value: impl Serialize) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// A JSON object whose only key is [`ATTACH_USER_MESSAGE`].
    pub fn attach(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(ATTACH_USER_MESSAGE.into(), Value::String(message.into()));
        Self::Json(Value::Object(map))
    }
}

/// Bound keyword arguments: every declared parameter is present, with
/// defaults filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.values.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => bail!("argument '{name}' must be a string, got {}", kind(other)),
            None => bail!("missing required argument: {name}"),
        }
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => bail!("argument '{name}' must be a string, got {}", kind(other)),
        }
    }

    /// Integer argument.  Numeric strings are accepted.
    pub fn i64(&self, name: &str) -> Result<i64> {
        match self.values.get(name) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("argument '{name}' must be an integer, got {n}")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("argument '{name}' must be an integer, got '{s}'")),
            Some(other) => bail!("argument '{name}' must be an integer, got {}", kind(other)),
            None => bail!("missing required argument: {name}"),
        }
    }

    /// A list of strings.  A single string is split on commas.
    pub fn string_list(&self, name: &str) -> Result<Vec<String>> {
        match self.values.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => bail!("argument '{name}' must contain strings, got {}", kind(other)),
                })
                .collect(),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()),
            Some(other) => bail!("argument '{name}' must be a list of strings, got {}", kind(other)),
            None => bail!("missing required argument: {name}"),
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Trait implemented by every tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn signature(&self) -> ToolSignature;
    async fn call(&self, args: ToolArgs) -> Result<ToolOutput>;
}

/// Keyword arguments that do not fit a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("{tool}() got an unexpected keyword argument '{name}'")]
    Unexpected { tool: String, name: String },
    #[error("{tool}() missing required argument: '{name}'")]
    Missing { tool: String, name: String },
}

/// A tool together with the signature and contract computed at registration.
pub struct RegisteredTool {
    signature: ToolSignature,
    spec: ToolSpec,
    tool: Box<dyn Tool>,
}

impl RegisteredTool {
    pub fn new(tool: Box<dyn Tool>) -> Self {
        let signature = tool.signature();
        let spec = ToolSpec::from_signature(&signature);
        Self { signature, spec, tool }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn signature(&self) -> &ToolSignature {
        &self.signature
    }

    /// Match keyword arguments against the signature, filling defaults.
    pub fn bind(&self, mut args: Map<String, Value>) -> Result<ToolArgs, BindError> {
        if let Some(extra) = args
            .keys()
            .find(|k| !self.signature.params.iter().any(|p| &p.name == *k))
        {
            return Err(BindError::Unexpected {
                tool: self.signature.name.clone(),
                name: extra.clone(),
            });
        }
        for decl in &self.signature.params {
            if args.contains_key(&decl.name) {
                continue;
            }
            let filler = match &decl.default {
                ParamDefault::Required => {
                    return Err(BindError::Missing {
                        tool: self.signature.name.clone(),
                        name: decl.name.clone(),
                    });
                }
                ParamDefault::None => Value::Null,
                ParamDefault::Value(v) => v.clone(),
            };
            args.insert(decl.name.clone(), filler);
        }
        Ok(ToolArgs::new(args))
    }

    pub async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        self.tool.call(args).await
    }

    /// Bind then call.  Binding errors become ordinary tool errors.
    pub async fn invoke(&self, args: Map<String, Value>) -> Result<ToolOutput> {
        let bound = self.bind(args)?;
        self.call(bound).await
    }
}

/// Central registry for all available tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    /// Register a tool.  A tool with the same name as an earlier one
    /// replaces it in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let entry = RegisteredTool::new(tool);
        match self.tools.iter_mut().find(|t| t.name() == entry.name()) {
            Some(slot) => {
                warn!(tool = entry.name(), "duplicate tool name, replacing earlier registration");
                *slot = entry;
            }
            None => self.tools.push(entry),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec().clone()).collect()
    }

    pub fn openai_tools(&self) -> Value {
        specs_to_openai_tools(&self.list_specs())
    }
}

// ── Tool modules ─────────────────────────────────────────────────────────────

pub mod builtins;
mod catalog;

pub use catalog::{CATALOG, ToolModule, discover, find_module};

// ── Tests ────────────────────────────────────────────────────────────────────
