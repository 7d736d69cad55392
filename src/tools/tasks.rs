//! Task tools - create, inspect, and drive tasks through their lifecycle.

use super::{parse_args, parse_id, resolve_agent};
use crate::directory::AgentDirectory;
use crate::error::Result;
use crate::tasks::{NewTask, TaskFilter, TaskManager, TaskPriority, TaskStatus, TaskUpdate};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

pub(super) fn register(
    set: &mut ToolSet,
    tasks: TaskManager,
    directory: AgentDirectory,
) -> Result<()> {
    set.register(TaskCreate {
        tasks: tasks.clone(),
        directory: directory.clone(),
    })?;
    set.register(TaskGet {
        tasks: tasks.clone(),
    })?;
    set.register(TaskList {
        tasks: tasks.clone(),
        directory: directory.clone(),
    })?;
    set.register(TaskUpdateTool {
        tasks: tasks.clone(),
    })?;
    set.register(TaskCancel {
        tasks: tasks.clone(),
    })?;
    set.register(TaskRetry {
        tasks: tasks.clone(),
    })?;
    set.register(TaskReassign {
        tasks: tasks.clone(),
        directory,
    })?;
    set.register(TaskAddDependency {
        tasks: tasks.clone(),
    })?;
    set.register(TaskRemoveDependency {
        tasks: tasks.clone(),
    })?;
    set.register(TaskListDependencies { tasks })?;
    Ok(())
}

// ============================================================================
// task_create
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    description: String,
    /// Assignee short name or id.
    assignee: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

struct TaskCreate {
    tasks: TaskManager,
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for TaskCreate {
    fn name(&self) -> &str {
        "task_create"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_create".to_string(),
            description: "Create a task and assign it to an agent. If depends_on names tasks \
                          that are not yet completed, the new task starts out blocked and is \
                          released automatically once they finish."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Short imperative summary" },
                    "description": { "type": "string", "description": "Full context for the assignee" },
                    "assignee": { "type": "string", "description": "Agent name or id" },
                    "priority": { "type": "string", "enum": ["urgent", "high", "normal", "low"] },
                    "acceptance_criteria": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Checklist the assignee must satisfy"
                    },
                    "depends_on": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Task ids that must complete first"
                    }
                },
                "required": ["title", "assignee"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: CreateArgs = parse_args(self.name(), args)?;
        let assignee = resolve_agent(&self.directory, &args.assignee)?;
        let priority = args
            .priority
            .as_deref()
            .map(TaskPriority::from_str)
            .transpose()?;
        let depends_on = args
            .depends_on
            .iter()
            .map(|s| parse_id("task", s))
            .collect::<Result<Vec<_>>>()?;

        let task = self.tasks.create(
            NewTask {
                title: args.title,
                description: args.description,
                assignee_id: assignee.id,
                priority,
                acceptance_criteria: args.acceptance_criteria,
                depends_on,
            },
            Some(ctx.agent.id),
        )?;
        Ok(json!({ "task": task, "assignee": assignee.name }))
    }
}

// ============================================================================
// task_get / task_list
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetArgs {
    task_id: String,
}

struct TaskGet {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskGet {
    fn name(&self) -> &str {
        "task_get"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_get".to_string(),
            description: "Fetch a single task by id.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" }
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: GetArgs = parse_args(self.name(), args)?;
        let task = self.tasks.get(parse_id("task", &args.task_id)?)?;
        Ok(json!({ "task": task }))
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default)]
    status: Option<String>,
    /// Agent name or id; "me" narrows to the caller.
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

struct TaskList {
    tasks: TaskManager,
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for TaskList {
    fn name(&self) -> &str {
        "task_list"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_list".to_string(),
            description: "List tasks, most urgent first. Filter by status and/or assignee; \
                          pass assignee \"me\" for your own queue."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["pending", "in_progress", "blocked", "completed", "failed", "cancelled"]
                    },
                    "assignee": { "type": "string", "description": "Agent name, id, or \"me\"" },
                    "limit": { "type": "integer", "description": "Maximum tasks returned" }
                }
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ListArgs = parse_args(self.name(), args)?;
        let status = args.status.as_deref().map(TaskStatus::from_str).transpose()?;
        let assignee = match args.assignee.as_deref() {
            None => None,
            Some("me") => Some(ctx.agent.id),
            Some(who) => Some(resolve_agent(&self.directory, who)?.id),
        };
        let tasks = self.tasks.list(TaskFilter {
            status,
            assignee,
            limit: args.limit,
        })?;
        Ok(json!({ "count": tasks.len(), "tasks": tasks }))
    }
}

// ============================================================================
// task_update
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    task_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress_percent: Option<u8>,
}

struct TaskUpdateTool {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskUpdateTool {
    fn name(&self) -> &str {
        "task_update"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_update".to_string(),
            description: "Update a task's fields or move it through its lifecycle. Status \
                          changes follow the task state machine; a task cannot start or \
                          complete while a dependency is unfinished."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "priority": { "type": "string", "enum": ["urgent", "high", "normal", "low"] },
                    "status": {
                        "type": "string",
                        "enum": ["pending", "in_progress", "blocked", "completed", "failed", "cancelled"]
                    },
                    "progress_percent": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: UpdateArgs = parse_args(self.name(), args)?;
        let id = parse_id("task", &args.task_id)?;
        let update = TaskUpdate {
            title: args.title,
            description: args.description,
            priority: args.priority.as_deref().map(TaskPriority::from_str).transpose()?,
            status: args.status.as_deref().map(TaskStatus::from_str).transpose()?,
            progress_percent: args.progress_percent,
        };
        let task = self.tasks.update(id, update, Some(ctx.agent.id))?;
        Ok(json!({ "task": task }))
    }
}

// ============================================================================
// task_cancel / task_retry / task_reassign
// ============================================================================

#[derive(Debug, Deserialize)]
struct CancelArgs {
    task_id: String,
    #[serde(default)]
    reason: Option<String>,
}

struct TaskCancel {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskCancel {
    fn name(&self) -> &str {
        "task_cancel"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_cancel".to_string(),
            description: "Cancel a task that has not yet completed. Cancellation is final."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "reason": { "type": "string" }
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: CancelArgs = parse_args(self.name(), args)?;
        let task = self.tasks.cancel(
            parse_id("task", &args.task_id)?,
            args.reason,
            Some(ctx.agent.id),
        )?;
        Ok(json!({ "task": task }))
    }
}

struct TaskRetry {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskRetry {
    fn name(&self) -> &str {
        "task_retry"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_retry".to_string(),
            description: "Re-queue a failed task. Each task has a limited retry budget."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" }
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: GetArgs = parse_args(self.name(), args)?;
        let task = self
            .tasks
            .retry(parse_id("task", &args.task_id)?, Some(ctx.agent.id))?;
        Ok(json!({
            "task": task,
            "retries_remaining": task.max_retries.saturating_sub(task.retry_count),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ReassignArgs {
    task_id: String,
    assignee: String,
    #[serde(default)]
    reason: Option<String>,
}

struct TaskReassign {
    tasks: TaskManager,
    directory: AgentDirectory,
}

#[async_trait]
impl Tool for TaskReassign {
    fn name(&self) -> &str {
        "task_reassign"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_reassign".to_string(),
            description: "Hand a task to a different agent. The task keeps its current status."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "assignee": { "type": "string", "description": "New assignee name or id" },
                    "reason": { "type": "string" }
                },
                "required": ["task_id", "assignee"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ReassignArgs = parse_args(self.name(), args)?;
        let assignee = resolve_agent(&self.directory, &args.assignee)?;
        let task = self.tasks.reassign(
            parse_id("task", &args.task_id)?,
            assignee.id,
            args.reason,
            Some(ctx.agent.id),
        )?;
        Ok(json!({ "task": task, "assignee": assignee.name }))
    }
}

// ============================================================================
// dependencies
// ============================================================================

#[derive(Debug, Deserialize)]
struct DependencyArgs {
    task_id: String,
    depends_on_task_id: String,
}

struct TaskAddDependency {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskAddDependency {
    fn name(&self) -> &str {
        "task_add_dependency"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_add_dependency".to_string(),
            description: "Require one task to complete before another may run. Refused if the \
                          edge would create a cycle."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string", "description": "The dependent task" },
                    "depends_on_task_id": { "type": "string", "description": "The prerequisite task" }
                },
                "required": ["task_id", "depends_on_task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DependencyArgs = parse_args(self.name(), args)?;
        let id = parse_id("task", &args.task_id)?;
        let dep = parse_id("task", &args.depends_on_task_id)?;
        self.tasks.add_dependency(id, dep, Some(ctx.agent.id))?;
        Ok(json!({ "task_id": id, "depends_on_task_id": dep }))
    }
}

struct TaskRemoveDependency {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskRemoveDependency {
    fn name(&self) -> &str {
        "task_remove_dependency"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_remove_dependency".to_string(),
            description: "Remove a dependency edge. A blocked task whose remaining dependencies \
                          are all complete returns to pending."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "depends_on_task_id": { "type": "string" }
                },
                "required": ["task_id", "depends_on_task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DependencyArgs = parse_args(self.name(), args)?;
        let id = parse_id("task", &args.task_id)?;
        let dep = parse_id("task", &args.depends_on_task_id)?;
        self.tasks.remove_dependency(id, dep, Some(ctx.agent.id))?;
        Ok(json!({ "task_id": id, "removed": dep }))
    }
}

struct TaskListDependencies {
    tasks: TaskManager,
}

#[async_trait]
impl Tool for TaskListDependencies {
    fn name(&self) -> &str {
        "task_list_dependencies"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task_list_dependencies".to_string(),
            description: "Show what a task is waiting on and what is waiting on it.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" }
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let args: GetArgs = parse_args(self.name(), args)?;
        let overview = self.tasks.dependencies(parse_id("task", &args.task_id)?)?;
        Ok(json!({
            "dependencies": overview.dependencies,
            "dependents": overview.dependents,
        }))
    }
}
