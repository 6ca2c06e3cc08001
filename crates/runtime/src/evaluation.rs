//! Task scoring.
//!
//! A task's `evaluation` directive names an evaluator and passes it a map of
//! arguments.  Evaluators inspect the evidence a run left behind (workspace
//! files, chat history) and report a score.  Missing evidence scores zero;
//! evidence that exists but cannot be read is an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use trainee_exec::RunTally;
use trainee_servers::{CHAT_HISTORY_FILE, ChatState};

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("unknown evaluator '{0}'")]
    UnknownEvaluator(String),
    #[error("evaluator '{evaluator}': {reason}")]
    InvalidArgs { evaluator: &'static str, reason: String },
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed evidence {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Paths an evaluator may inspect.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub task_root: &'a Path,
    pub workspace: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub total_score: u32,
    pub full_score: u32,
    pub notes: String,
}

/// One scored task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvaluation {
    pub task_name: String,
    pub total_score: u32,
    pub full_score: u32,
    pub notes: String,
}

/// Result of `Environment::evaluate`.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub evaluation_results: Vec<TaskEvaluation>,
    pub total_tool_calls: RunTally,
}

pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &EvaluationContext<'_>, args: &Map<String, Value>) -> Result<Score, EvaluationError>;
}

pub struct EvaluatorRegistry {
    evaluators: Vec<Box<dyn Evaluator>>,
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl EvaluatorRegistry {
    pub fn empty() -> Self {
        Self { evaluators: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(FileExists));
        registry.register(Box::new(FileContains));
        registry.register(Box::new(MessageSent));
        registry
    }

    /// Add an evaluator, replacing any with the same name.
    pub fn register(&mut self, evaluator: Box<dyn Evaluator>) {
        self.evaluators.retain(|e| e.name() != evaluator.name());
        self.evaluators.push(evaluator);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    pub fn call(
        &self,
        name: &str,
        ctx: &EvaluationContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Score, EvaluationError> {
        let evaluator = self
            .evaluators
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| EvaluationError::UnknownEvaluator(name.to_string()))?;
        evaluator.evaluate(ctx, args)
    }
}

// ── Built-in evaluators ──────────────────────────────────────────────────────

/// `file_exists { paths: [..] }`: one point per workspace path present.
pub struct FileExists;

impl Evaluator for FileExists {
    fn name(&self) -> &'static str {
        "file_exists"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>, args: &Map<String, Value>) -> Result<Score, EvaluationError> {
        let paths = string_list(self.name(), args, "paths")?;
        let missing: Vec<&String> = paths.iter().filter(|p| !ctx.workspace.join(p).exists()).collect();
        let notes = if missing.is_empty() {
            "all expected files are present".to_string()
        } else {
            format!("missing: {}", join(&missing))
        };
        Ok(Score {
            total_score: count(paths.len() - missing.len()),
            full_score: count(paths.len()),
            notes,
        })
    }
}

/// `file_contains { path, keywords: [..], case_sensitive? }`: one point per
/// keyword found in a workspace file.
pub struct FileContains;

impl Evaluator for FileContains {
    fn name(&self) -> &'static str {
        "file_contains"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>, args: &Map<String, Value>) -> Result<Score, EvaluationError> {
        let rel = string_arg(self.name(), args, "path")?;
        let keywords = string_list(self.name(), args, "keywords")?;
        let case_sensitive = args.get("case_sensitive").and_then(Value::as_bool).unwrap_or(false);
        let full_score = count(keywords.len());

        let path = ctx.workspace.join(rel);
        let Some(text) = read_optional(&path)? else {
            return Ok(Score {
                total_score: 0,
                full_score,
                notes: format!("{rel} was not created"),
            });
        };

        let missing = missing_keywords(&[text.as_str()], &keywords, case_sensitive);
        Ok(Score {
            total_score: count(keywords.len() - missing.len()),
            full_score,
            notes: keyword_notes(rel, &missing),
        })
    }
}

/// `message_sent { sender, receiver, keywords?: [..] }`: one point for any
/// direct message from `sender` to `receiver`, plus one per keyword found in
/// those messages.
pub struct MessageSent;

impl Evaluator for MessageSent {
    fn name(&self) -> &'static str {
        "message_sent"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>, args: &Map<String, Value>) -> Result<Score, EvaluationError> {
        let sender = string_arg(self.name(), args, "sender")?;
        let receiver = string_arg(self.name(), args, "receiver")?;
        let keywords = if args.contains_key("keywords") {
            string_list(self.name(), args, "keywords")?
        } else {
            Vec::new()
        };
        let full_score = count(keywords.len() + 1);

        let path = ctx.task_root.join(CHAT_HISTORY_FILE);
        let Some(raw) = read_optional(&path)? else {
            return Ok(Score {
                total_score: 0,
                full_score,
                notes: "no chat history was recorded".to_string(),
            });
        };
        let history: ChatState = serde_json::from_str(&raw).map_err(|e| EvaluationError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let bodies: Vec<&str> = history
            .messages_between(sender, receiver)
            .map(|m| m.content.as_str())
            .collect();
        if bodies.is_empty() {
            return Ok(Score {
                total_score: 0,
                full_score,
                notes: format!("{sender} never messaged {receiver}"),
            });
        }

        let missing = missing_keywords(&bodies, &keywords, false);
        let notes = if missing.is_empty() {
            format!("{sender} messaged {receiver}")
        } else {
            format!("{sender} messaged {receiver}; missing keywords: {}", join(&missing))
        };
        Ok(Score {
            total_score: count(keywords.len() - missing.len() + 1),
            full_score,
            notes,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn string_arg<'a>(
    evaluator: &'static str,
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, EvaluationError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EvaluationError::InvalidArgs {
            evaluator,
            reason: format!("'{key}' must be a string"),
        })
}

fn string_list(evaluator: &'static str, args: &Map<String, Value>, key: &str) -> Result<Vec<String>, EvaluationError> {
    let invalid = || EvaluationError::InvalidArgs {
        evaluator,
        reason: format!("'{key}' must be a list of strings"),
    };
    let items = args.get(key).and_then(Value::as_array).ok_or_else(invalid)?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

/// `Ok(None)` when the file does not exist.
fn read_optional(path: &Path) -> Result<Option<String>, EvaluationError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(EvaluationError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn missing_keywords<'k>(haystacks: &[&str], keywords: &'k [String], case_sensitive: bool) -> Vec<&'k String> {
    let fold = |s: &str| if case_sensitive { s.to_string() } else { s.to_lowercase() };
    let haystacks: Vec<String> = haystacks.iter().map(|&h| fold(h)).collect();
    keywords
        .iter()
        .filter(|k| {
            let needle = fold(k.as_str());
            !haystacks.iter().any(|h| h.contains(&needle))
        })
        .collect()
}

fn keyword_notes(rel: &str, missing: &[&String]) -> String {
    if missing.is_empty() {
        format!("{rel} contains every expected keyword")
    } else {
        format!("{rel} is missing: {}", join(missing))
    }
}

fn join(items: &[&String]) -> String {
    items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────────────
