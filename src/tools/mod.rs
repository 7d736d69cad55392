//! Built-in tools exposed to agents.
//!
//! Three families: task lifecycle, messaging (including the external-draft
//! workflow), and the agent roster. Tool availability per agent is decided
//! by the permission gate, not here.

pub mod agents;
pub mod messaging;
pub mod tasks;

use crate::directory::{Agent, AgentDirectory};
use crate::error::{CoreError, Result};
use crate::messages::MessageWorkflow;
use crate::tasks::TaskManager;
use crate::tool::ToolSet;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

/// Every built-in tool, registered under its canonical name.
pub fn builtin_tools(
    tasks: TaskManager,
    messages: MessageWorkflow,
    directory: AgentDirectory,
) -> Result<ToolSet> {
    let mut set = ToolSet::new();
    tasks::register(&mut set, tasks, directory.clone())?;
    messaging::register(&mut set, messages, directory.clone())?;
    agents::register(&mut set, directory)?;
    Ok(set)
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| CoreError::validation(format!("{tool}: invalid arguments: {e}")))
}

fn parse_id(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| CoreError::validation(format!("'{value}' is not a valid {field} id")))
}

/// Agents address each other by short name; ids are accepted too.
fn resolve_agent(directory: &AgentDirectory, who: &str) -> Result<Agent> {
    match Uuid::parse_str(who.trim()) {
        Ok(id) => directory.get(id),
        Err(_) => directory.find_by_name(who),
    }
}
