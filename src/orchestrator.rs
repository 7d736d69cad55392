//! Top-level assembly: one constructor that wires storage, the event bus,
//! the managers, the permission gate, and the built-in tool registry.
//!
//! Two surfaces come out of it. The manager handles (`directory`, `tasks`,
//! `messages`) are the operator surface, where errors are real `Result`s and
//! privileged operations like draft approval and agent archival live. The
//! registry is the agent surface: everything an agent does goes through
//! [`ToolRegistry::invoke`] and comes back as a [`ToolOutcome`].

use crate::config::CoreConfig;
use crate::directory::AgentDirectory;
use crate::error::Result;
use crate::events::{EventBus, TransitionEvent};
use crate::messages::MessageWorkflow;
use crate::permissions::PermissionGate;
use crate::store::Store;
use crate::tasks::TaskManager;
use crate::tool::{ToolOutcome, ToolRegistry};
use crate::tools;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

pub struct Orchestrator {
    bus: EventBus,
    directory: AgentDirectory,
    tasks: TaskManager,
    messages: MessageWorkflow,
    registry: ToolRegistry,
}

impl Orchestrator {
    /// Wire everything with the default permission rules.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_gate(config, PermissionGate::new())
    }

    /// Wire everything with a caller-supplied permission gate (custom
    /// eligibility rules).
    pub fn with_gate(config: CoreConfig, gate: PermissionGate) -> Result<Self> {
        let store = Arc::new(match &config.db_path {
            Some(path) => Store::open(path)?,
            None => Store::open_in_memory()?,
        });
        let bus = EventBus::new(config.event_capacity);
        let directory = AgentDirectory::new(store.clone(), bus.clone());
        let tasks = TaskManager::new(store.clone(), bus.clone(), &config);
        let messages = MessageWorkflow::new(store, bus.clone());

        let toolset = tools::builtin_tools(tasks.clone(), messages.clone(), directory.clone())?;
        let registry = ToolRegistry::new(toolset, gate, directory.clone());
        info!(tools = registry.names().len(), "orchestration core ready");

        Ok(Self {
            bus,
            directory,
            tasks,
            messages,
            registry,
        })
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn messages(&self) -> &MessageWorkflow {
        &self.messages
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Live feed of entity transitions (lossy under sustained backpressure).
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.bus.subscribe()
    }

    /// Agent-surface entry point. Never returns an error: refusals and
    /// failures come back as a failed outcome with a stable code.
    pub async fn invoke(&self, agent_id: Uuid, tool: &str, args: Value) -> ToolOutcome {
        self.registry.invoke(agent_id, tool, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NewAgent;
    use crate::messages::MessageStatus;
    use crate::permissions::Role;
    use crate::tasks::TaskStatus;
    use serde_json::json;
    use std::collections::HashMap;

    fn orchestrator() -> Orchestrator {
        // try_init so parallel tests racing to install the subscriber
        // don't panic; output only shows up with --nocapture.
        let _ = tracing_subscriber::fmt()
            .with_env_filter("bullpen=debug")
            .with_test_writer()
            .try_init();
        Orchestrator::new(CoreConfig::default()).unwrap()
    }

    fn hire(orch: &Orchestrator, name: &str, role: Role) -> Uuid {
        orch.directory()
            .create(NewAgent {
                name: name.into(),
                display_name: name.into(),
                role,
                capabilities: vec![],
                tool_overrides: HashMap::new(),
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_task_flow_end_to_end() {
        let orch = orchestrator();
        let marcus = hire(&orch, "marcus", Role::Ceo);
        let noah = hire(&orch, "noah", Role::Engineer);

        // CEO creates two tasks, the second waiting on the first.
        let created = orch
            .invoke(
                marcus,
                "task_create",
                json!({ "title": "build the api", "assignee": "noah" }),
            )
            .await;
        assert!(created.success, "{:?}", created.error);
        let first = created.data["task"]["id"].as_str().unwrap().to_string();

        let created = orch
            .invoke(
                marcus,
                "task_create",
                json!({
                    "title": "ship the docs",
                    "assignee": "noah",
                    "depends_on": [first],
                }),
            )
            .await;
        assert!(created.success, "{:?}", created.error);
        let second: Uuid = serde_json::from_value(created.data["task"]["id"].clone()).unwrap();
        assert_eq!(created.data["task"]["status"], "blocked");

        // The engineer works the first task to completion.
        let first: Uuid = first.parse().unwrap();
        for status in ["in_progress", "completed"] {
            let outcome = orch
                .invoke(
                    noah,
                    "task_update",
                    json!({ "task_id": first.to_string(), "status": status }),
                )
                .await;
            assert!(outcome.success, "{:?}", outcome.error);
        }

        // Completion released the dependent automatically.
        assert_eq!(
            orch.tasks().get(second).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_engineer_cannot_create_tasks() {
        let orch = orchestrator();
        let noah = hire(&orch, "noah", Role::Engineer);

        let outcome = orch
            .invoke(
                noah,
                "task_create",
                json!({ "title": "sneaky", "assignee": "noah" }),
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn test_draft_review_round_trip() {
        let orch = orchestrator();
        // sable is named in the default eligibility rules for external drafts.
        let sable = hire(&orch, "sable", Role::Marketing);

        let outcome = orch
            .invoke(
                sable,
                "external_draft_email",
                json!({
                    "to": "press@example.com",
                    "subject": "launch",
                    "body": "we shipped",
                }),
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        let draft_id: Uuid =
            serde_json::from_value(outcome.data["draft"]["id"].clone()).unwrap();

        // Operator approves; the agent sees the verdict through draft_list.
        orch.messages().approve(draft_id, None, None).unwrap();
        let outcome = orch
            .invoke(sable, "draft_list", json!({ "status": "approved" }))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data["count"], 1);

        // And the decided draft is no longer editable.
        let outcome = orch
            .invoke(
                sable,
                "draft_update",
                json!({ "draft_id": draft_id.to_string(), "body": "v2" }),
            )
            .await;
        assert_eq!(outcome.code.as_deref(), Some("not_editable"));
        assert_eq!(
            orch.messages().get(draft_id).unwrap().status,
            MessageStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_draft_eligibility_rules_are_additive_only() {
        let orch = orchestrator();
        // viv carries the marketing profile but is not in the named rule.
        let viv = hire(&orch, "viv", Role::Marketing);
        // Profile alone still lists the tool; the named rule is additive and
        // outreach roles carry it by profile, so viv may draft.
        let outcome = orch
            .invoke(
                viv,
                "external_draft_email",
                json!({ "to": "a@b.com", "subject": "s", "body": "b" }),
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);

        // An engineer is outside both the profile and the named rule.
        let quinn = hire(&orch, "quinn", Role::Engineer);
        let outcome = orch
            .invoke(
                quinn,
                "external_draft_email",
                json!({ "to": "a@b.com", "subject": "s", "body": "b" }),
            )
            .await;
        assert_eq!(outcome.code.as_deref(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn test_messaging_between_agents() {
        let orch = orchestrator();
        let marcus = hire(&orch, "marcus", Role::Ceo);
        let noah = hire(&orch, "noah", Role::Engineer);

        let outcome = orch
            .invoke(
                marcus,
                "message_send",
                json!({ "to": "noah", "subject": "priorities", "body": "api first" }),
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);

        let inbox = orch
            .invoke(noah, "message_check_inbox", json!({}))
            .await;
        assert!(inbox.success);
        assert_eq!(inbox.data["unread"], 1);
        let msg_id = inbox.data["messages"][0]["id"].as_str().unwrap();

        let outcome = orch
            .invoke(
                noah,
                "message_reply",
                json!({ "message_id": msg_id, "body": "on it" }),
            )
            .await;
        assert!(outcome.success, "{:?}", outcome.error);

        let ceo_inbox = orch.messages().inbox(marcus, true).unwrap();
        assert_eq!(ceo_inbox.len(), 1);
        assert_eq!(ceo_inbox[0].subject, "Re: priorities");
    }

    #[tokio::test]
    async fn test_archived_agent_is_refused_at_the_door() {
        let orch = orchestrator();
        let noah = hire(&orch, "noah", Role::Engineer);
        orch.directory().archive(noah, Some("offboarded".into())).unwrap();

        let outcome = orch.invoke(noah, "task_list", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_transition_events_reach_subscribers() {
        let orch = orchestrator();
        let mut rx = orch.subscribe();
        let marcus = hire(&orch, "marcus", Role::Ceo);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity_id, marcus);
        assert_eq!(event.from, None);
    }
}
