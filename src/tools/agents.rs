//! Roster tools - who exists, what they are doing, and (for admins)
//! reconfiguring an agent's capabilities, overrides, and archive state.

use super::{parse_args, resolve_agent};
use crate::directory::{Agent, AgentDirectory, AgentStatus};
use crate::error::Result;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;

pub(super) fn register(set: &mut ToolSet, directory: AgentDirectory) -> Result<()> {
    set.register(AgentList {
        directory: directory.clone(),
    })?;
    set.register(AgentGet {
        directory: directory.clone(),
    })?;
    set.register(AgentUpdateStatus {
        directory: directory.clone(),
    })?;
    set.register(ConfigUpdateAgent { directory })?;
    Ok(())
}

/// Roster card: everything another agent needs to know, nothing more.
fn summary(agent: &Agent) -> Value {
    json!({
        "id": agent.id,
        "name": agent.name,
        "display_name": agent.display_name,
        "role": agent.role,
        "status": agent.status,
        "status_message": agent.status_message,
        "capabilities": agent.capabilities,
    })
}

// ============================================================================
// agent_list / agent_get
// ============================================================================

#[derive(Debug, Deserialize)]
struct RosterArgs {
    #[serde(default)]
    status: Option<String>,
}

struct AgentList {
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for AgentList {
    fn name(&self) -> &str {
        "agent_list"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_list".to_string(),
            description: "List the active agent roster, optionally filtered by status."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["idle", "working", "blocked", "offline"]
                    }
                }
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: RosterArgs = parse_args(self.name(), args)?;
        let status = args
            .status
            .as_deref()
            .map(AgentStatus::from_str)
            .transpose()?;
        let agents = self.directory.list(status)?;
        let roster: Vec<Value> = agents.iter().map(summary).collect();
        Ok(json!({ "count": roster.len(), "agents": roster }))
    }
}

#[derive(Debug, Deserialize)]
struct WhoArgs {
    /// Agent name or id.
    agent: String,
}

struct AgentGet {
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for AgentGet {
    fn name(&self) -> &str {
        "agent_get"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_get".to_string(),
            description: "Look up one agent by name or id.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string", "description": "Agent name or id" }
                },
                "required": ["agent"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: WhoArgs = parse_args(self.name(), args)?;
        let agent = resolve_agent(&self.directory, &args.agent)?;
        Ok(json!({ "agent": summary(&agent) }))
    }
}

// ============================================================================
// agent_update_status
// ============================================================================

#[derive(Debug, Deserialize)]
struct StatusArgs {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

struct AgentUpdateStatus {
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for AgentUpdateStatus {
    fn name(&self) -> &str {
        "agent_update_status"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent_update_status".to_string(),
            description: "Update your own availability so the rest of the fleet can see what \
                          you are doing."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["idle", "working", "blocked", "offline"]
                    },
                    "message": { "type": "string", "description": "Short note, e.g. what you are working on" }
                },
                "required": ["status"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: StatusArgs = parse_args(self.name(), args)?;
        let status = AgentStatus::from_str(&args.status)?;
        let agent = self
            .directory
            .update_status(ctx.agent.id, status, args.message)?;
        Ok(json!({ "agent": summary(&agent) }))
    }
}

// ============================================================================
// config_update_agent (admin)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigArgs {
    /// Agent name or id.
    agent: String,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
    /// Per-tool grants (`true`) and informational denials (`false`).
    #[serde(default)]
    tool_overrides: Option<HashMap<String, bool>>,
}

struct ConfigUpdateAgent {
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for ConfigUpdateAgent {
    fn name(&self) -> &str {
        "config_update_agent"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "config_update_agent".to_string(),
            description: "Reconfigure an agent's capabilities and per-tool permission \
                          overrides. Overrides can only grant tools beyond the role profile; \
                          a false override never revokes one."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string", "description": "Agent name or id" },
                    "capabilities": { "type": "array", "items": { "type": "string" } },
                    "tool_overrides": {
                        "type": "object",
                        "additionalProperties": { "type": "boolean" }
                    }
                },
                "required": ["agent"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: ConfigArgs = parse_args(self.name(), args)?;
        let mut agent = resolve_agent(&self.directory, &args.agent)?;
        if let Some(capabilities) = args.capabilities {
            agent = self.directory.set_capabilities(agent.id, capabilities)?;
        }
        if let Some(overrides) = args.tool_overrides {
            agent = self.directory.set_tool_overrides(agent.id, overrides)?;
        }
        Ok(json!({ "agent": summary(&agent), "tool_overrides": agent.tool_overrides }))
    }
}
