//! Agent directory: identity, role, capabilities, and lifecycle status for
//! every employee in the organization.
//!
//! Agents are never physically deleted. Archiving is a soft delete: an
//! archived agent drops out of default listings and loses task-assignment
//! eligibility, but its history stays queryable via [`AgentDirectory::get_any`].

use crate::error::{CoreError, Result};
use crate::events::{EntityKind, EventBus, TransitionEvent};
use crate::permissions::Role;
use crate::store::{self, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle status an agent reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Offline => "offline",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "blocked" => Ok(AgentStatus::Blocked),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(CoreError::validation(format!(
                "unknown agent status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One employee of the simulated organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Short handle, unique across the organization.
    pub name: String,
    pub display_name: String,
    pub role: Role,
    /// Free-form capability tags ("Bash", "code_review", ...). Consumed by
    /// the permission gate's eligibility rules.
    pub capabilities: Vec<String>,
    /// Per-tool permission overrides; `true` grants a tool on top of the
    /// role profile. Edited only through the CEO-only override path.
    pub tool_overrides: HashMap<String, bool>,
    pub status: AgentStatus,
    pub status_message: Option<String>,
    pub archived: bool,
    pub archive_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: display_name.into(),
            role,
            capabilities: Vec::new(),
            tool_overrides: HashMap::new(),
            status: AgentStatus::Idle,
            status_message: None,
            archived: false,
            archive_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parameters for adding an agent to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tool_overrides: HashMap<String, bool>,
}

/// CRUD-with-soft-delete surface over the agent roster.
#[derive(Clone)]
pub struct AgentDirectory {
    store: Arc<Store>,
    bus: EventBus,
}

impl AgentDirectory {
    pub fn new(store: Arc<Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub fn create(&self, new: NewAgent) -> Result<Agent> {
        let mut agent = Agent::new(new.name, new.display_name, new.role);
        agent.capabilities = new.capabilities;
        agent.tool_overrides = new.tool_overrides;

        {
            let conn = self.store.lock();
            store::insert_agent(&conn, &agent)?;
        }
        self.bus.emit(TransitionEvent::new(
            EntityKind::Agent,
            agent.id,
            None::<String>,
            agent.status.as_str(),
            None,
        ));
        Ok(agent)
    }

    /// Active agents, optionally filtered by status. Archived agents are
    /// excluded.
    pub fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>> {
        let conn = self.store.lock();
        let agents = store::list_agents(&conn, false)?;
        Ok(match status {
            Some(s) => agents.into_iter().filter(|a| a.status == s).collect(),
            None => agents,
        })
    }

    /// Whole roster including archived agents (operator view).
    pub fn list_all(&self) -> Result<Vec<Agent>> {
        let conn = self.store.lock();
        store::list_agents(&conn, true)
    }

    /// Look up an active agent. Archived agents are treated as not found,
    /// which is what makes them ineligible for assignment.
    pub fn get(&self, id: Uuid) -> Result<Agent> {
        let conn = self.store.lock();
        get_active(&conn, id)
    }

    /// Look up an active agent by its unique short name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Result<Agent> {
        let conn = self.store.lock();
        let needle = name.trim().to_lowercase();
        store::list_agents(&conn, false)?
            .into_iter()
            .find(|a| a.name.to_lowercase() == needle)
            .ok_or_else(|| CoreError::not_found("agent", name))
    }

    /// Look up an agent regardless of archive state (history access).
    pub fn get_any(&self, id: Uuid) -> Result<Agent> {
        let conn = self.store.lock();
        store::get_agent(&conn, id)?.ok_or_else(|| CoreError::not_found("agent", id))
    }

    pub fn update_status(
        &self,
        id: Uuid,
        status: AgentStatus,
        message: Option<String>,
    ) -> Result<Agent> {
        let (agent, from) = {
            let conn = self.store.lock();
            let mut agent = get_active(&conn, id)?;
            let from = agent.status;
            agent.status = status;
            agent.status_message = message;
            agent.updated_at = Utc::now();
            store::update_agent(&conn, &agent)?;
            (agent, from)
        };
        if from != status {
            self.bus.emit(TransitionEvent::new(
                EntityKind::Agent,
                id,
                Some(from.as_str()),
                status.as_str(),
                Some(id),
            ));
        }
        Ok(agent)
    }

    /// Soft-delete. The record and its history remain in the store.
    pub fn archive(&self, id: Uuid, reason: Option<String>) -> Result<Agent> {
        let agent = {
            let conn = self.store.lock();
            let mut agent =
                store::get_agent(&conn, id)?.ok_or_else(|| CoreError::not_found("agent", id))?;
            if agent.archived {
                return Err(CoreError::validation(format!(
                    "agent {id} is already archived"
                )));
            }
            agent.archived = true;
            agent.archive_reason = reason;
            agent.updated_at = Utc::now();
            store::update_agent(&conn, &agent)?;
            agent
        };
        self.bus.emit(TransitionEvent::new(
            EntityKind::Agent,
            id,
            Some(agent.status.as_str()),
            "archived",
            None,
        ));
        Ok(agent)
    }

    pub fn restore(&self, id: Uuid) -> Result<Agent> {
        let agent = {
            let conn = self.store.lock();
            let mut agent =
                store::get_agent(&conn, id)?.ok_or_else(|| CoreError::not_found("agent", id))?;
            if !agent.archived {
                return Err(CoreError::validation(format!("agent {id} is not archived")));
            }
            agent.archived = false;
            agent.archive_reason = None;
            agent.updated_at = Utc::now();
            store::update_agent(&conn, &agent)?;
            agent
        };
        self.bus.emit(TransitionEvent::new(
            EntityKind::Agent,
            id,
            Some("archived"),
            agent.status.as_str(),
            None,
        ));
        Ok(agent)
    }

    /// Replace an agent's tool-permission override map. This is the CEO-only
    /// override path: the corresponding tool lives only in the CEO profile,
    /// and the human operator may call it directly.
    pub fn set_tool_overrides(
        &self,
        id: Uuid,
        overrides: HashMap<String, bool>,
    ) -> Result<Agent> {
        let conn = self.store.lock();
        let mut agent = get_active(&conn, id)?;
        agent.tool_overrides = overrides;
        agent.updated_at = Utc::now();
        store::update_agent(&conn, &agent)?;
        Ok(agent)
    }

    /// Replace an agent's capability tags (same CEO-only path).
    pub fn set_capabilities(&self, id: Uuid, capabilities: Vec<String>) -> Result<Agent> {
        let conn = self.store.lock();
        let mut agent = get_active(&conn, id)?;
        agent.capabilities = capabilities;
        agent.updated_at = Utc::now();
        store::update_agent(&conn, &agent)?;
        Ok(agent)
    }
}

pub(crate) fn get_active(conn: &rusqlite::Connection, id: Uuid) -> Result<Agent> {
    match store::get_agent(conn, id)? {
        Some(agent) if !agent.archived => Ok(agent),
        _ => Err(CoreError::not_found("agent", id)),
    }
}
