//! Messaging tools - internal mail plus the external-draft review queue.
//!
//! `external_draft_email` deliberately does not send anything: it stages a
//! draft for human approval, and even an approved draft is only a recorded
//! decision.

use super::{parse_args, parse_id, resolve_agent};
use crate::directory::AgentDirectory;
use crate::error::Result;
use crate::messages::{MessageStatus, MessageWorkflow};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

pub(super) fn register(
    set: &mut ToolSet,
    messages: MessageWorkflow,
    directory: AgentDirectory,
) -> Result<()> {
    set.register(MessageSend {
        messages: messages.clone(),
        directory,
    })?;
    set.register(MessageCheckInbox {
        messages: messages.clone(),
    })?;
    set.register(MessageMarkRead {
        messages: messages.clone(),
    })?;
    set.register(MessageReply {
        messages: messages.clone(),
    })?;
    set.register(MessageDelete {
        messages: messages.clone(),
    })?;
    set.register(ExternalDraftEmail {
        messages: messages.clone(),
    })?;
    set.register(DraftList {
        messages: messages.clone(),
    })?;
    set.register(DraftUpdate { messages })?;
    Ok(())
}

// ============================================================================
// message_send
// ============================================================================

#[derive(Debug, Deserialize)]
struct SendArgs {
    /// Recipient name or id. Omit to broadcast to everyone.
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    subject: String,
    body: String,
}

struct MessageSend {
    messages: MessageWorkflow,
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for MessageSend {
    fn name(&self) -> &str {
        "message_send"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message_send".to_string(),
            description: "Send internal mail to another agent, or broadcast to everyone by \
                          omitting the recipient."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Recipient agent name or id; omit to broadcast" },
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["body"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: SendArgs = parse_args(self.name(), args)?;
        let to = match args.to.as_deref() {
            None => None,
            Some(who) => Some(resolve_agent(&self.directory, who)?.id),
        };
        let msg = self
            .messages
            .send(ctx.agent.id, to, args.subject, args.body)?;
        Ok(json!({ "message": msg }))
    }
}

// ============================================================================
// message_check_inbox / message_mark_read
// ============================================================================

#[derive(Debug, Deserialize)]
struct InboxArgs {
    #[serde(default)]
    unread_only: bool,
}

struct MessageCheckInbox {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for MessageCheckInbox {
    fn name(&self) -> &str {
        "message_check_inbox"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message_check_inbox".to_string(),
            description: "Read your inbox: direct mail, system notices, and broadcasts from \
                          other agents, newest first."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "unread_only": { "type": "boolean", "default": false }
                }
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: InboxArgs = parse_args(self.name(), args)?;
        let inbox = self.messages.inbox(ctx.agent.id, args.unread_only)?;
        let unread = self.messages.unread_count(ctx.agent.id)?;
        Ok(json!({ "unread": unread, "messages": inbox }))
    }
}

#[derive(Debug, Deserialize)]
struct MessageIdArgs {
    message_id: String,
}

struct MessageMarkRead {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for MessageMarkRead {
    fn name(&self) -> &str {
        "message_mark_read"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message_mark_read".to_string(),
            description: "Mark an inbox message as read. A message can only be marked once."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message_id": { "type": "string" }
                },
                "required": ["message_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: MessageIdArgs = parse_args(self.name(), args)?;
        let msg = self
            .messages
            .mark_read(parse_id("message", &args.message_id)?, ctx.agent.id)?;
        Ok(json!({ "message": msg }))
    }
}

// ============================================================================
// message_reply / message_delete
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplyArgs {
    message_id: String,
    body: String,
}

struct MessageReply {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for MessageReply {
    fn name(&self) -> &str {
        "message_reply"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message_reply".to_string(),
            description: "Reply to a message in your inbox. The reply goes directly to the \
                          original sender."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message_id": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["message_id", "body"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ReplyArgs = parse_args(self.name(), args)?;
        let msg = self.messages.reply(
            parse_id("message", &args.message_id)?,
            ctx.agent.id,
            args.body,
        )?;
        Ok(json!({ "message": msg }))
    }
}

struct MessageDelete {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for MessageDelete {
    fn name(&self) -> &str {
        "message_delete"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message_delete".to_string(),
            description: "Remove a message from circulation. Only the sender or recipient may \
                          do this."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message_id": { "type": "string" }
                },
                "required": ["message_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: MessageIdArgs = parse_args(self.name(), args)?;
        let id = parse_id("message", &args.message_id)?;
        self.messages.delete(id, ctx.agent.id)?;
        Ok(json!({ "deleted": id }))
    }
}

// ============================================================================
// external drafts
// ============================================================================

#[derive(Debug, Deserialize)]
struct DraftArgs {
    /// External email address.
    to: String,
    subject: String,
    body: String,
}

struct ExternalDraftEmail {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for ExternalDraftEmail {
    fn name(&self) -> &str {
        "external_draft_email"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "external_draft_email".to_string(),
            description: "Draft an email to someone outside the organization. The draft is \
                          queued for human review and NOTHING is sent; approval only records \
                          a decision."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "External email address" },
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["to", "subject", "body"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DraftArgs = parse_args(self.name(), args)?;
        let draft = self
            .messages
            .create_draft(ctx.agent.id, args.to, args.subject, args.body)?;
        Ok(json!({
            "draft": draft,
            "note": "Draft queued for human review. It has not been sent and will not be \
                     sent by this system.",
        }))
    }
}

#[derive(Debug, Deserialize)]
struct DraftListArgs {
    #[serde(default)]
    status: Option<String>,
}

struct DraftList {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for DraftList {
    fn name(&self) -> &str {
        "draft_list"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "draft_list".to_string(),
            description: "List your external drafts and their review status.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["pending", "approved", "rejected"]
                    }
                }
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DraftListArgs = parse_args(self.name(), args)?;
        let status = args
            .status
            .as_deref()
            .map(MessageStatus::from_str)
            .transpose()?;
        let drafts = self.messages.drafts(Some(ctx.agent.id), status)?;
        Ok(json!({ "count": drafts.len(), "drafts": drafts }))
    }
}

#[derive(Debug, Deserialize)]
struct DraftUpdateArgs {
    draft_id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

struct DraftUpdate {
    messages: MessageWorkflow,
}

#[async_trait]
impl Tool for DraftUpdate {
    fn name(&self) -> &str {
        "draft_update"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "draft_update".to_string(),
            description: "Revise one of your drafts while it is still awaiting review. Decided \
                          drafts are immutable."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "draft_id": { "type": "string" },
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["draft_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DraftUpdateArgs = parse_args(self.name(), args)?;
        let draft = self.messages.update_draft(
            parse_id("draft", &args.draft_id)?,
            ctx.agent.id,
            args.subject,
            args.body,
        )?;
        Ok(json!({ "draft": draft }))
    }
}
