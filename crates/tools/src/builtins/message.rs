//! `message_tool`: direct and group chat.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use trainee_servers::{Backends, ChatServer, ServerError};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

pub fn tools(backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let chat = backends.chat()?;
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(ListUsers { chat: chat.clone() }),
        Box::new(ListChatGroups { chat: chat.clone() }),
        Box::new(SendMessage { chat: chat.clone() }),
        Box::new(SendGroupMessage { chat: chat.clone() }),
        Box::new(CreateChatGroup { chat: chat.clone() }),
        Box::new(GetChatHistory { chat }),
    ];
    Ok(tools)
}

// ── ListUsers ────────────────────────────────────────────────────────────────

pub struct ListUsers {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for ListUsers {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new("ListUsers", "List every user registered on the chat server.")
    }

    async fn call(&self, _args: ToolArgs) -> Result<ToolOutput> {
        ToolOutput::json(json!({ "users": self.chat.list_users() }))
    }
}

// ── ListChatGroups ───────────────────────────────────────────────────────────

pub struct ListChatGroups {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for ListChatGroups {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "ListChatGroups",
            "List all chat groups with their ids, names and members.",
        )
    }

    async fn call(&self, _args: ToolArgs) -> Result<ToolOutput> {
        ToolOutput::json(json!({ "groups": self.chat.list_groups() }))
    }
}

// ── SendMessage ──────────────────────────────────────────────────────────────

pub struct SendMessage {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for SendMessage {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "SendMessage",
            r#"Send a direct message to another user.

            Args:
                sender: Your own user name.
                receiver: The user name of the recipient.
                message: The message text.

            Returns:
                Delivery status, or the recipient's reply when they answer."#,
        )
        .param(ParamDecl::required("sender", ParamType::String))
        .param(ParamDecl::required("receiver", ParamType::String))
        .param(ParamDecl::required("message", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let receiver = args.str("receiver")?;
        let delivery = self
            .chat
            .send_message(args.str("sender")?, receiver, args.str("message")?)?;
        match delivery.reply {
            Some(reply) => Ok(ToolOutput::attach(format!(
                "[{}] {receiver} replied: {reply}",
                delivery.timestamp
            ))),
            None => ToolOutput::json(json!({
                "status": "sent",
                "timestamp": delivery.timestamp,
            })),
        }
    }
}

// ── SendGroupMessage ─────────────────────────────────────────────────────────

pub struct SendGroupMessage {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for SendGroupMessage {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "SendGroupMessage",
            r#"Post a message to a chat group you belong to.

            Args:
                sender: Your own user name.
                group_id: Numeric id of the group.
                message: The message text."#,
        )
        .param(ParamDecl::required("sender", ParamType::String))
        .param(ParamDecl::required("group_id", ParamType::Integer))
        .param(ParamDecl::required("message", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let group_id = args.i64("group_id")?;
        let timestamp = self
            .chat
            .send_group_message(args.str("sender")?, group_id, args.str("message")?)?;
        ToolOutput::json(json!({
            "status": "sent",
            "group_id": group_id,
            "timestamp": timestamp,
        }))
    }
}

// ── CreateChatGroup ──────────────────────────────────────────────────────────

pub struct CreateChatGroup {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for CreateChatGroup {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "CreateChatGroup",
            r#"Create a new chat group.  You are added as a member automatically.

            Args:
                agent_name: Your own user name.
                group_members: User names of the other members.
                group_name: Optional display name for the group.

            Returns:
                The id of the new group."#,
        )
        .param(ParamDecl::required("agent_name", ParamType::String))
        .param(ParamDecl::required("group_members", ParamType::array_of(ParamType::String)))
        .param(ParamDecl::optional("group_name", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let group_id = self.chat.create_group(
            args.str("agent_name")?,
            &args.string_list("group_members")?,
            args.opt_str("group_name")?,
        )?;
        ToolOutput::json(json!({ "status": "created", "group_id": group_id }))
    }
}

// ── GetChatHistory ───────────────────────────────────────────────────────────

pub struct GetChatHistory {
    chat: Arc<ChatServer>,
}

#[async_trait]
impl Tool for GetChatHistory {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "GetChatHistory",
            r#"Read your chat history.

            Args:
                agent_name: Your own user name.
                peer: Only show direct messages exchanged with this user. Group chats are included when omitted."#,
        )
        .param(ParamDecl::required("agent_name", ParamType::String))
        .param(ParamDecl::optional("peer", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let history = self.chat.history(args.str("agent_name")?, args.opt_str("peer")?)?;
        ToolOutput::json(json!({
            "direct_messages": history.direct_messages,
            "groups": history.groups,
        }))
    }
}
