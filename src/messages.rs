//! Internal mail and the external-draft approval workflow.
//!
//! Agent-to-agent mail (direct, broadcast, system) delivers immediately.
//! Anything addressed outside the organization is different: agents can only
//! produce an `external_draft`, which sits in `pending` until a
//! reviewer approves or rejects it. A decided draft is immutable; approval
//! records intent and never sends anything on its own.

use crate::directory;
use crate::error::{CoreError, Result};
use crate::events::{EntityKind, EventBus, TransitionEvent};
use crate::store::{self, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Direct,
    Broadcast,
    System,
    ExternalDraft,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Direct => "direct",
            MessageKind::Broadcast => "broadcast",
            MessageKind::System => "system",
            MessageKind::ExternalDraft => "external_draft",
        }
    }
}

impl FromStr for MessageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(MessageKind::Direct),
            "broadcast" => Ok(MessageKind::Broadcast),
            "system" => Ok(MessageKind::System),
            "external_draft" => Ok(MessageKind::ExternalDraft),
            other => Err(CoreError::validation(format!(
                "unknown message kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery/review state. Internal mail is born `delivered` and may move to
/// `read` exactly once; drafts are born `pending` and are decided
/// (`approved` or `rejected`) exactly once. `read`, `approved`, and
/// `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Read,
    Approved,
    Rejected,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Approved => "approved",
            MessageStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "approved" => Ok(MessageStatus::Approved),
            "rejected" => Ok(MessageStatus::Rejected),
            other => Err(CoreError::validation(format!(
                "unknown message status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from_agent: Uuid,
    /// `None` for broadcasts and external drafts.
    pub to_agent: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    /// Outside address for external drafts.
    pub external_recipient: Option<String>,
    pub decision_reason: Option<String>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub in_reply_to: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn internal(
        from: Uuid,
        to: Option<Uuid>,
        subject: impl Into<String>,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from,
            to_agent: to,
            subject: subject.into(),
            body: body.into(),
            kind,
            status: MessageStatus::Delivered,
            external_recipient: None,
            decision_reason: None,
            decided_by: None,
            decided_at: None,
            in_reply_to: None,
            read_at: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Owns message delivery, inbox visibility, and the draft review workflow.
#[derive(Clone)]
pub struct MessageWorkflow {
    store: Arc<Store>,
    bus: EventBus,
}

impl MessageWorkflow {
    pub fn new(store: Arc<Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Deliver internal mail. `to = None` broadcasts to every other agent's
    /// inbox.
    pub fn send(
        &self,
        from: Uuid,
        to: Option<Uuid>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::validation("message body must not be empty"));
        }

        let msg = {
            let conn = self.store.lock();
            directory::get_active(&conn, from)?;
            if let Some(to) = to {
                directory::get_active(&conn, to)?;
            }
            let kind = match to {
                Some(_) => MessageKind::Direct,
                None => MessageKind::Broadcast,
            };
            let msg = Message::internal(from, to, subject, body, kind);
            store::insert_message(&conn, &msg)?;
            msg
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            msg.id,
            None::<String>,
            msg.status.as_str(),
            Some(from),
        ));
        Ok(msg)
    }

    /// System notifications carry no reply path and always have a recipient.
    pub fn notify(
        &self,
        from: Uuid,
        to: Uuid,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::validation("message body must not be empty"));
        }

        let msg = {
            let conn = self.store.lock();
            directory::get_active(&conn, to)?;
            let msg = Message::internal(from, Some(to), subject, body, MessageKind::System);
            store::insert_message(&conn, &msg)?;
            msg
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            msg.id,
            None::<String>,
            msg.status.as_str(),
            Some(from),
        ));
        Ok(msg)
    }

    /// Stage an outbound email for human review. Nothing leaves the system;
    /// the draft waits in `pending`.
    pub fn create_draft(
        &self,
        from: Uuid,
        external_recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        let recipient = external_recipient.into();
        if !recipient.contains('@') {
            return Err(CoreError::validation(format!(
                "'{recipient}' is not a valid external address"
            )));
        }
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::validation("draft body must not be empty"));
        }

        let msg = {
            let conn = self.store.lock();
            directory::get_active(&conn, from)?;
            let mut msg = Message::internal(from, None, subject, body, MessageKind::ExternalDraft);
            msg.status = MessageStatus::Pending;
            msg.external_recipient = Some(recipient);
            store::insert_message(&conn, &msg)?;
            msg
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            msg.id,
            None::<String>,
            msg.status.as_str(),
            Some(from),
        ));
        Ok(msg)
    }

    /// Approve a pending draft. `decided_by = None` records a decision made
    /// by the human operator rather than an agent.
    pub fn approve(
        &self,
        draft_id: Uuid,
        decided_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Message> {
        self.decide(draft_id, MessageStatus::Approved, decided_by, reason)
    }

    pub fn reject(
        &self,
        draft_id: Uuid,
        decided_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Message> {
        self.decide(draft_id, MessageStatus::Rejected, decided_by, reason)
    }

    fn decide(
        &self,
        draft_id: Uuid,
        verdict: MessageStatus,
        decided_by: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Message> {
        let msg = {
            let conn = self.store.lock();
            let mut msg = store::get_message(&conn, draft_id)?
                .ok_or_else(|| CoreError::not_found("draft", draft_id))?;
            if msg.kind != MessageKind::ExternalDraft {
                return Err(CoreError::validation(format!(
                    "message {draft_id} is not an external draft"
                )));
            }
            if msg.status != MessageStatus::Pending {
                return Err(CoreError::AlreadyDecided {
                    draft: draft_id,
                    status: msg.status.to_string(),
                });
            }
            msg.status = verdict;
            msg.decision_reason = reason;
            msg.decided_by = decided_by;
            msg.decided_at = Some(Utc::now());
            store::update_message(&conn, &msg)?;
            msg
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            draft_id,
            Some(MessageStatus::Pending.as_str()),
            verdict.as_str(),
            decided_by,
        ));
        Ok(msg)
    }

    /// Revise a draft's subject/body. Only its author, and only while the
    /// draft is still pending.
    pub fn update_draft(
        &self,
        draft_id: Uuid,
        author: Uuid,
        subject: Option<String>,
        body: Option<String>,
    ) -> Result<Message> {
        let conn = self.store.lock();
        let mut msg = store::get_message(&conn, draft_id)?
            .ok_or_else(|| CoreError::not_found("draft", draft_id))?;
        if msg.kind != MessageKind::ExternalDraft {
            return Err(CoreError::validation(format!(
                "message {draft_id} is not an external draft"
            )));
        }
        if msg.from_agent != author {
            return Err(CoreError::validation(
                "only the draft author may edit a draft",
            ));
        }
        if msg.status != MessageStatus::Pending {
            return Err(CoreError::NotEditable {
                draft: draft_id,
                status: msg.status.to_string(),
            });
        }
        if let Some(subject) = subject {
            msg.subject = subject;
        }
        if let Some(body) = body {
            if body.trim().is_empty() {
                return Err(CoreError::validation("draft body must not be empty"));
            }
            msg.body = body;
        }
        store::update_message(&conn, &msg)?;
        Ok(msg)
    }

    /// External drafts, optionally narrowed by author and status.
    pub fn drafts(&self, from: Option<Uuid>, status: Option<MessageStatus>) -> Result<Vec<Message>> {
        let conn = self.store.lock();
        store::list_drafts(&conn, from, status.map(|s| s.as_str()))
    }

    /// Hand-off list for whoever actually delivers approved mail. Pending
    /// and rejected drafts can never appear here.
    pub fn approved_drafts(&self) -> Result<Vec<Message>> {
        self.drafts(None, Some(MessageStatus::Approved))
    }

    pub fn inbox(&self, agent: Uuid, unread_only: bool) -> Result<Vec<Message>> {
        let conn = self.store.lock();
        directory::get_active(&conn, agent)?;
        store::list_inbox(&conn, agent, unread_only)
    }

    pub fn unread_count(&self, agent: Uuid) -> Result<u64> {
        let conn = self.store.lock();
        store::unread_count(&conn, agent)
    }

    pub fn get(&self, id: Uuid) -> Result<Message> {
        let conn = self.store.lock();
        store::get_message(&conn, id)?.ok_or_else(|| CoreError::not_found("message", id))
    }

    /// Mark an inbox message read. `delivered -> read` is the only legal
    /// move; re-reading is refused so read receipts stay trustworthy.
    /// A broadcast is one shared row, so its reads are recorded per
    /// recipient and the row itself stays `delivered`.
    pub fn mark_read(&self, id: Uuid, reader: Uuid) -> Result<Message> {
        let msg = {
            let conn = self.store.lock();
            let mut msg = store::get_message(&conn, id)?
                .ok_or_else(|| CoreError::not_found("message", id))?;
            if !visible_to(&msg, reader) {
                return Err(CoreError::validation(format!(
                    "message {id} is not in this agent's inbox"
                )));
            }
            let now = Utc::now();
            if msg.kind == MessageKind::Broadcast {
                if !store::insert_message_read(&conn, id, reader, now)? {
                    return Err(CoreError::InvalidTransition {
                        entity: "message",
                        from: MessageStatus::Read.to_string(),
                        to: MessageStatus::Read.to_string(),
                    });
                }
                // The caller sees their own read; other inboxes are
                // untouched.
                msg.status = MessageStatus::Read;
                msg.read_at = Some(now);
            } else {
                if msg.status != MessageStatus::Delivered {
                    return Err(CoreError::InvalidTransition {
                        entity: "message",
                        from: msg.status.to_string(),
                        to: MessageStatus::Read.to_string(),
                    });
                }
                msg.status = MessageStatus::Read;
                msg.read_at = Some(now);
                store::update_message(&conn, &msg)?;
            }
            msg
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            id,
            Some(MessageStatus::Delivered.as_str()),
            MessageStatus::Read.as_str(),
            Some(reader),
        ));
        Ok(msg)
    }

    /// Reply to an inbox message. The reply is direct mail back to the
    /// original sender, threaded via `in_reply_to`.
    pub fn reply(&self, id: Uuid, author: Uuid, body: impl Into<String>) -> Result<Message> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::validation("message body must not be empty"));
        }

        let msg = {
            let conn = self.store.lock();
            directory::get_active(&conn, author)?;
            let original = store::get_message(&conn, id)?
                .ok_or_else(|| CoreError::not_found("message", id))?;
            if !visible_to(&original, author) {
                return Err(CoreError::validation(format!(
                    "message {id} is not in this agent's inbox"
                )));
            }
            directory::get_active(&conn, original.from_agent)?;

            let subject = if original.subject.starts_with("Re:") {
                original.subject.clone()
            } else {
                format!("Re: {}", original.subject)
            };
            let mut reply = Message::internal(
                author,
                Some(original.from_agent),
                subject,
                body,
                MessageKind::Direct,
            );
            reply.in_reply_to = Some(id);
            store::insert_message(&conn, &reply)?;
            reply
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Message,
            msg.id,
            None::<String>,
            msg.status.as_str(),
            Some(author),
        ));
        Ok(msg)
    }

    /// Soft-delete a message from circulation. Sender or recipient only.
    pub fn delete(&self, id: Uuid, actor: Uuid) -> Result<()> {
        let conn = self.store.lock();
        let mut msg = store::get_message(&conn, id)?
            .ok_or_else(|| CoreError::not_found("message", id))?;
        if msg.deleted_at.is_some() {
            return Err(CoreError::not_found("message", id));
        }
        if msg.from_agent != actor && msg.to_agent != Some(actor) {
            return Err(CoreError::validation(
                "only the sender or recipient may delete a message",
            ));
        }
        msg.deleted_at = Some(Utc::now());
        store::update_message(&conn, &msg)?;
        Ok(())
    }
}

/// Inbox visibility: direct/system mail addressed to the reader, or a
/// broadcast someone else sent. Drafts belong to the review queue, not an
/// inbox.
fn visible_to(msg: &Message, reader: Uuid) -> bool {
    if msg.deleted_at.is_some() || msg.kind == MessageKind::ExternalDraft {
        return false;
    }
    match msg.kind {
        MessageKind::Broadcast => msg.from_agent != reader,
        _ => msg.to_agent == Some(reader),
    }
}
