//! Tool system - trait, outcome envelope, and the permission-gated registry.
//!
//! Tools implement the `Tool` trait and are registered with `ToolRegistry`.
//! Every invocation goes through the registry, which resolves the calling
//! agent, checks the permission gate, and validates the input against the
//! tool's declared schema before the tool itself runs. Expected failures
//! come back as a failed [`ToolOutcome`], never as a panic or a raw error.

use crate::directory::{Agent, AgentDirectory};
use crate::error::{CoreError, Result};
use crate::permissions::PermissionGate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Tool definition surfaced to agents (JSON Schema parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    /// Stable machine-readable code when `success` is false.
    pub code: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            code: None,
        }
    }

    pub fn fail(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

impl From<CoreError> for ToolOutcome {
    fn from(err: CoreError) -> Self {
        ToolOutcome::fail(err.code(), err.to_string())
    }
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    /// The agent on whose behalf the tool runs.
    pub agent: Agent,
}

impl ToolContext {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

/// A callable capability exposed to agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used for dispatch and permission checks).
    fn name(&self) -> &str;

    /// Definition surfaced to agents, with a JSON Schema for the input.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Expected failures are returned as errors and the
    /// registry folds them into the outcome envelope.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Registry of available tools, fronted by the permission gate.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    gate: Arc<PermissionGate>,
    directory: AgentDirectory,
}

/// Builder-side collection; sealed into a [`ToolRegistry`] once assembled.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(CoreError::DuplicateTool { name });
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }
}

impl ToolRegistry {
    pub fn new(tools: ToolSet, gate: PermissionGate, directory: AgentDirectory) -> Self {
        Self {
            tools: Arc::new(tools.tools),
            gate: Arc::new(gate),
            directory,
        }
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names this agent may invoke, in sorted order.
    pub fn allowed_tools(&self, agent_id: Uuid) -> Result<Vec<String>> {
        let agent = self.directory.get(agent_id)?;
        Ok(self
            .gate
            .allowed_tools(&agent)
            .into_iter()
            .filter(|name| self.tools.contains_key(name))
            .collect())
    }

    /// Definitions for the agent's permitted tools only, so an agent never
    /// sees a tool it cannot call.
    pub fn definitions_for(&self, agent_id: Uuid) -> Result<Vec<ToolDefinition>> {
        let names = self.allowed_tools(agent_id)?;
        Ok(names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect())
    }

    /// Invoke a tool on behalf of an agent. The gate and schema are checked
    /// here; any [`CoreError`] (from the checks or the tool body) becomes a
    /// failed outcome with the error's stable code.
    pub async fn invoke(&self, agent_id: Uuid, name: &str, args: Value) -> ToolOutcome {
        match self.try_invoke(agent_id, name, args).await {
            Ok(data) => ToolOutcome::ok(data),
            Err(err) => {
                warn!(agent = %agent_id, tool = name, code = err.code(), "tool call refused: {err}");
                err.into()
            }
        }
    }

    async fn try_invoke(&self, agent_id: Uuid, name: &str, args: Value) -> Result<Value> {
        let agent = self.directory.get(agent_id)?;
        // Gate first: an agent probing outside its permissions learns
        // nothing about which tools exist.
        if !self.gate.allows(&agent, name) {
            return Err(CoreError::PermissionDenied {
                agent: agent.id,
                tool: name.to_string(),
            });
        }
        let tool = self
            .get(name)
            .ok_or_else(|| CoreError::not_found("tool", name))?;
        validate_args(&tool.definition(), &args)?;
        let ctx = ToolContext::new(agent);
        tool.execute(args, &ctx).await
    }
}

/// Check the input object against the tool's schema: it must be an object,
/// every `required` property must be present and non-null, and fields
/// outside `properties` are refused.
fn validate_args(def: &ToolDefinition, args: &Value) -> Result<()> {
    let obj = args.as_object().ok_or_else(|| {
        CoreError::validation(format!("{}: input must be a JSON object", def.name))
    })?;
    if let Some(required) = def.parameters.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| obj.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::validation(format!(
                "{}: missing required fields: {}",
                def.name,
                missing.join(", ")
            )));
        }
    }
    if let Some(properties) = def.parameters.get("properties").and_then(Value::as_object) {
        let unknown: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|key| !properties.contains_key(*key))
            .collect();
        if !unknown.is_empty() {
            return Err(CoreError::validation(format!(
                "{}: unknown fields: {}",
                def.name,
                unknown.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NewAgent;
    use crate::events::EventBus;
    use crate::permissions::Role;
    use crate::store::Store;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "task_list"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "task_list".into(),
                description: "echo for tests".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "status": { "type": "string" } },
                    "required": ["status"]
                }),
            }
        }

        async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
            Ok(json!({ "agent": ctx.agent.name, "args": args }))
        }
    }

    struct Shell;

    #[async_trait]
    impl Tool for Shell {
        fn name(&self) -> &str {
            "shell_exec"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "shell_exec".into(),
                description: "restricted tool".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(json!({ "ran": true }))
        }
    }

    fn registry_with(capabilities: Vec<String>) -> (ToolRegistry, Uuid) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let bus = EventBus::new(64);
        let directory = AgentDirectory::new(store, bus);
        let agent = directory
            .create(NewAgent {
                name: "viv".into(),
                display_name: "Viv Ortiz".into(),
                // Marketing has no shell access, so the gate tests below can
                // exercise both refusal and the capability unlock.
                role: Role::Marketing,
                capabilities,
                tool_overrides: HashMap::new(),
            })
            .unwrap();

        let mut tools = ToolSet::new();
        tools.register(Echo).unwrap();
        tools.register(Shell).unwrap();
        let registry = ToolRegistry::new(tools, PermissionGate::new(), directory);
        (registry, agent.id)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut tools = ToolSet::new();
        tools.register(Echo).unwrap();
        let err = tools.register(Echo).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTool { .. }));
    }

    #[tokio::test]
    async fn test_invoke_happy_path() {
        let (registry, agent) = registry_with(vec![]);
        let outcome = registry
            .invoke(agent, "task_list", json!({ "status": "pending" }))
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.data["agent"], "viv");
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let (registry, agent) = registry_with(vec![]);
        let outcome = registry.invoke(agent, "task_list", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("validation"));
    }

    #[tokio::test]
    async fn test_permitted_but_unregistered_tool_is_not_found() {
        let (registry, agent) = registry_with(vec![]);
        // task_get is in the marketing profile but nothing registered it.
        let outcome = registry.invoke(agent, "task_get", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_unknown_unpermitted_tool_reads_as_denied() {
        let (registry, agent) = registry_with(vec![]);
        let outcome = registry.invoke(agent, "no_such_tool", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn test_unknown_field_rejected() {
        let (registry, agent) = registry_with(vec![]);
        let outcome = registry
            .invoke(
                agent,
                "task_list",
                json!({ "status": "pending", "bogus": 1 }),
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("validation"));
    }

    #[tokio::test]
    async fn test_gate_refuses_unpermitted_tool() {
        let (registry, agent) = registry_with(vec![]);
        let outcome = registry.invoke(agent, "shell_exec", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("permission_denied"));
        // The refusal names the agent by id, not display name.
        let detail = outcome.error.unwrap();
        assert!(detail.contains(&agent.to_string()), "{detail}");
    }

    #[tokio::test]
    async fn test_capability_unlocks_gated_tool() {
        let (registry, agent) = registry_with(vec!["Bash".into()]);
        let outcome = registry.invoke(agent, "shell_exec", json!({})).await;
        assert!(outcome.success, "{:?}", outcome.error);
    }

    #[tokio::test]
    async fn test_definitions_show_only_permitted_tools() {
        let (registry, agent) = registry_with(vec![]);
        let defs = registry.definitions_for(agent).unwrap();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"task_list"));
        assert!(!names.contains(&"shell_exec"));
    }
}
