//! Office chat: direct messages and numbered group chats.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use trainee_clock::VirtualClock;
use trainee_config::AgentsConfig;

use crate::{BackendServer, CHAT_SERVER, lock, stamp};

/// Chat history file, relative to the task root.
pub const HISTORY_FILE: &str = "chat_history.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub sender: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatGroup {
    pub group_id: i64,
    pub group_name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub messages: Vec<GroupMessage>,
}

/// Everything the chat server knows.  Also the on-disk history format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub users: Vec<String>,
    #[serde(default)]
    pub direct_messages: Vec<DirectMessage>,
    #[serde(default)]
    pub groups: Vec<ChatGroup>,
}

impl ChatState {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read chat history {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed chat history {}", path.display()))
    }

    pub fn messages_between<'a>(
        &'a self,
        sender: &'a str,
        receiver: &'a str,
    ) -> impl Iterator<Item = &'a DirectMessage> + 'a {
        self.direct_messages
            .iter()
            .filter(move |m| m.sender == sender && m.receiver == receiver)
    }
}

/// Outcome of a direct message.  `reply` holds the receiver's scripted
/// answer, if it had one left.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub timestamp: String,
    pub reply: Option<String>,
}

pub struct ChatServer {
    state: Mutex<ChatState>,
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    clock: Option<Arc<VirtualClock>>,
    history_path: PathBuf,
}

impl ChatServer {
    pub fn new(agents: &AgentsConfig, clock: Option<Arc<VirtualClock>>, history_path: PathBuf) -> Self {
        let users = agents.all().map(|a| a.agent_name.clone()).collect();
        let replies = agents
            .all()
            .filter(|a| !a.replies.is_empty())
            .map(|a| (a.agent_name.clone(), a.replies.iter().cloned().collect()))
            .collect();
        Self {
            state: Mutex::new(ChatState {
                users,
                ..Default::default()
            }),
            replies: Mutex::new(replies),
            clock,
            history_path,
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn list_users(&self) -> Vec<String> {
        lock(&self.state).users.clone()
    }

    /// Groups without their message bodies.
    pub fn list_groups(&self) -> Vec<ChatGroup> {
        lock(&self.state)
            .groups
            .iter()
            .map(|g| ChatGroup {
                messages: Vec::new(),
                ..g.clone()
            })
            .collect()
    }

    pub fn send_message(&self, sender: &str, receiver: &str, content: &str) -> Result<Delivery> {
        let timestamp = stamp(self.clock.as_deref());
        let reply = {
            let mut state = lock(&self.state);
            ensure_user(&state, sender)?;
            ensure_user(&state, receiver)?;
            if sender == receiver {
                bail!("cannot send a message to yourself");
            }
            state.direct_messages.push(DirectMessage {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                content: content.to_string(),
                timestamp: timestamp.clone(),
            });

            let reply = lock(&self.replies)
                .get_mut(receiver)
                .and_then(|queue| queue.pop_front());
            if let Some(text) = &reply {
                state.direct_messages.push(DirectMessage {
                    sender: receiver.to_string(),
                    receiver: sender.to_string(),
                    content: text.clone(),
                    timestamp: timestamp.clone(),
                });
            }
            reply
        };
        self.persist()?;
        Ok(Delivery { timestamp, reply })
    }

    pub fn send_group_message(&self, sender: &str, group_id: i64, content: &str) -> Result<String> {
        let timestamp = stamp(self.clock.as_deref());
        {
            let mut state = lock(&self.state);
            let group = state
                .groups
                .iter_mut()
                .find(|g| g.group_id == group_id)
                .ok_or_else(|| anyhow::anyhow!("group {group_id} does not exist"))?;
            if !group.members.iter().any(|m| m == sender) {
                bail!("{sender} is not a member of group {group_id}");
            }
            group.messages.push(GroupMessage {
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp: timestamp.clone(),
            });
        }
        self.persist()?;
        Ok(timestamp)
    }

    /// Create a group and return its id.  The creator is always a member;
    /// a group needs at least two distinct members.
    pub fn create_group(&self, creator: &str, members: &[String], name: Option<&str>) -> Result<i64> {
        let group_id = {
            let mut state = lock(&self.state);
            ensure_user(&state, creator)?;

            let mut unique: Vec<String> = vec![creator.to_string()];
            for member in members {
                let member = member.trim();
                if member.is_empty() || unique.iter().any(|m| m == member) {
                    continue;
                }
                ensure_user(&state, member)?;
                unique.push(member.to_string());
            }
            if unique.len() < 2 {
                bail!("a group must contain at least two unique members");
            }

            let group_id = state.groups.iter().map(|g| g.group_id).max().unwrap_or(0) + 1;
            let group_name = name
                .filter(|n| !n.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Group {group_id}"));
            state.groups.push(ChatGroup {
                group_id,
                group_name,
                members: unique,
                messages: Vec::new(),
            });
            group_id
        };
        self.persist()?;
        Ok(group_id)
    }

    /// Direct messages involving `agent` (optionally only with `peer`) and
    /// the groups `agent` belongs to.
    pub fn history(&self, agent: &str, peer: Option<&str>) -> Result<ChatState> {
        let state = lock(&self.state);
        ensure_user(&state, agent)?;
        let direct_messages = state
            .direct_messages
            .iter()
            .filter(|m| m.sender == agent || m.receiver == agent)
            .filter(|m| peer.is_none_or(|p| m.sender == p || m.receiver == p))
            .cloned()
            .collect();
        let groups = if peer.is_some() {
            Vec::new()
        } else {
            state
                .groups
                .iter()
                .filter(|g| g.members.iter().any(|m| m == agent))
                .cloned()
                .collect()
        };
        Ok(ChatState {
            users: Vec::new(),
            direct_messages,
            groups,
        })
    }

    pub fn snapshot(&self) -> ChatState {
        lock(&self.state).clone()
    }

    fn persist(&self) -> Result<()> {
        let rendered = serde_json::to_string_pretty(&*lock(&self.state))?;
        fs::write(&self.history_path, rendered)
            .with_context(|| format!("cannot write chat history {}", self.history_path.display()))
    }
}

impl BackendServer for ChatServer {
    fn name(&self) -> &'static str {
        CHAT_SERVER
    }

    fn close(&self) -> Result<()> {
        self.persist()
    }
}

fn ensure_user(state: &ChatState, name: &str) -> Result<()> {
    if state.users.iter().any(|u| u == name) {
        Ok(())
    } else {
        bail!("user '{name}' does not exist")
    }
}
