//! Task lifecycle manager: the per-task status state machine and the
//! dependency graph that blocks and unblocks work.
//!
//! Transitions only ever happen through this manager. The one cross-task
//! side effect in the system is completion propagation: when a task reaches
//! `completed`, its direct dependents are re-evaluated inside the same
//! storage transaction, so there is no window where a completed dependency
//! is visible while dependents sit incorrectly blocked.

use crate::config::CoreConfig;
use crate::directory;
use crate::error::{CoreError, Result};
use crate::events::{EntityKind, EventBus, TransitionEvent};
use crate::store::{self, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl FromStr for TaskPriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "urgent" => Ok(TaskPriority::Urgent),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => Err(CoreError::validation(format!(
                "unknown task priority '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Statuses reachable from this one via a requested update. The
    /// `failed -> pending` move is deliberately absent: it only exists
    /// through [`TaskManager::retry`], which accounts for the retry budget.
    pub fn can_become(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        let allowed: &[TaskStatus] = match self {
            Pending => &[InProgress, Cancelled],
            InProgress => &[Completed, Failed, Blocked, Cancelled],
            Blocked => &[Pending, InProgress, Cancelled],
            Failed => &[Cancelled],
            Completed | Cancelled => &[],
        };
        allowed.contains(&to)
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(CoreError::validation(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of assigned work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assignee_id: Uuid,
    pub acceptance_criteria: Vec<String>,
    pub progress_percent: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub cancel_reason: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>, assignee: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            assignee_id: assignee,
            acceptance_criteria: Vec::new(),
            progress_percent: 0,
            retry_count: 0,
            max_retries: 3,
            cancel_reason: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Parameters for [`TaskManager::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub assignee_id: Uuid,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Tasks that must complete before this one may run. If any is not yet
    /// completed, the new task starts out `blocked`.
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

/// Fields a [`TaskManager::update`] may touch. Title, description, and
/// priority mutate freely; a requested status is honored only when the
/// state machine allows it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub progress_percent: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<Uuid>,
    pub limit: Option<usize>,
}

/// One edge of a task's dependency neighborhood.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyInfo {
    pub task_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    /// For upstream entries: whether this dependency is currently the
    /// reason the task cannot run.
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyOverview {
    /// Tasks this one depends on.
    pub dependencies: Vec<DependencyInfo>,
    /// Tasks that depend on this one (direct only).
    pub dependents: Vec<DependencyInfo>,
}

/// Owns the task entity, its state machine, and the dependency graph.
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<Store>,
    bus: EventBus,
    max_retries: u32,
}

impl TaskManager {
    pub fn new(store: Arc<Store>, bus: EventBus, config: &CoreConfig) -> Self {
        Self {
            store,
            bus,
            max_retries: config.max_task_retries,
        }
    }

    pub fn create(&self, new: NewTask, created_by: Option<Uuid>) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(CoreError::validation("task title must not be empty"));
        }

        let task = {
            let mut conn = self.store.lock();
            let tx = conn.transaction()?;

            directory::get_active(&tx, new.assignee_id)?;

            let mut task = Task::new(new.title, new.description, new.assignee_id);
            task.priority = new.priority.unwrap_or(TaskPriority::Normal);
            task.acceptance_criteria = new.acceptance_criteria;
            task.max_retries = self.max_retries;
            task.created_by = created_by;

            let mut unmet = false;
            for dep in &new.depends_on {
                let dep_task = store::get_task(&tx, *dep)?
                    .ok_or_else(|| CoreError::not_found("task", *dep))?;
                unmet |= dep_task.status != TaskStatus::Completed;
            }
            if unmet {
                task.status = TaskStatus::Blocked;
            }

            store::insert_task(&tx, &task)?;
            for dep in &new.depends_on {
                store::insert_dependency(&tx, task.id, *dep)?;
            }
            tx.commit()?;
            task
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Task,
            task.id,
            None::<String>,
            task.status.as_str(),
            created_by,
        ));
        Ok(task)
    }

    pub fn get(&self, id: Uuid) -> Result<Task> {
        let conn = self.store.lock();
        store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))
    }

    /// Tasks matching the filter, most urgent first, newest first within a
    /// priority band.
    pub fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut tasks = {
            let conn = self.store.lock();
            store::list_tasks(&conn, &filter)?
        };
        tasks.sort_by_key(|t| t.priority.rank());
        Ok(tasks)
    }

    pub fn update(&self, id: Uuid, update: TaskUpdate, actor: Option<Uuid>) -> Result<Task> {
        let (task, events) = {
            let mut conn = self.store.lock();
            let tx = conn.transaction()?;
            let mut events = Vec::new();

            let mut task =
                store::get_task(&tx, id)?.ok_or_else(|| CoreError::not_found("task", id))?;

            if let Some(percent) = update.progress_percent {
                task.progress_percent = percent.min(100);
            }

            // Progress lands before the status change so a completing
            // transition's forced 100% is the value that sticks.
            if let Some(to) = update.status {
                if to != task.status {
                    let from = task.status;
                    check_transition(&tx, &task, to)?;
                    apply_status(&mut task, to);
                    events.push(TransitionEvent::new(
                        EntityKind::Task,
                        id,
                        Some(from.as_str()),
                        to.as_str(),
                        actor,
                    ));
                    if to == TaskStatus::Completed {
                        // Task row must be written before dependents look at it.
                        store::update_task(&tx, &task)?;
                        events.extend(unblock_dependents(&tx, id, actor)?);
                    }
                }
            }

            if let Some(title) = update.title {
                if title.trim().is_empty() {
                    return Err(CoreError::validation("task title must not be empty"));
                }
                task.title = title;
            }
            if let Some(description) = update.description {
                task.description = description;
            }
            if let Some(priority) = update.priority {
                task.priority = priority;
            }
            task.updated_at = Utc::now();
            store::update_task(&tx, &task)?;
            tx.commit()?;
            (task, events)
        };

        self.bus.emit_all(events);
        Ok(task)
    }

    /// Progress reporting by the assignee. Clamped to 0..=100.
    pub fn update_progress(&self, id: Uuid, percent: u8, actor: Uuid) -> Result<Task> {
        let conn = self.store.lock();
        let mut task =
            store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
        if task.assignee_id != actor {
            return Err(CoreError::validation(
                "only the assignee may report task progress",
            ));
        }
        task.progress_percent = percent.min(100);
        task.updated_at = Utc::now();
        store::update_task(&conn, &task)?;
        Ok(task)
    }

    /// Cancel from any non-terminal state.
    pub fn cancel(&self, id: Uuid, reason: Option<String>, actor: Option<Uuid>) -> Result<Task> {
        let (task, from) = {
            let conn = self.store.lock();
            let mut task =
                store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
            if task.status.is_terminal() {
                return Err(CoreError::AlreadyTerminal {
                    task: id,
                    status: task.status.to_string(),
                });
            }
            let from = task.status;
            task.status = TaskStatus::Cancelled;
            task.cancel_reason = reason;
            task.updated_at = Utc::now();
            store::update_task(&conn, &task)?;
            (task, from)
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Task,
            id,
            Some(from.as_str()),
            TaskStatus::Cancelled.as_str(),
            actor,
        ));
        Ok(task)
    }

    /// Re-queue a failed task. Only legal from `failed`; the retry budget is
    /// consumed even when the task immediately lands back in `blocked`.
    pub fn retry(&self, id: Uuid, actor: Option<Uuid>) -> Result<Task> {
        let task = {
            let conn = self.store.lock();
            let mut task =
                store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
            if task.status != TaskStatus::Failed {
                return Err(CoreError::InvalidTransition {
                    entity: "task",
                    from: task.status.to_string(),
                    to: TaskStatus::Pending.to_string(),
                });
            }
            if task.retry_count >= task.max_retries {
                return Err(CoreError::validation(format!(
                    "task {id} exceeded its retry budget ({})",
                    task.max_retries
                )));
            }
            task.retry_count += 1;
            task.progress_percent = 0;
            task.status = if store::dependencies_met(&conn, id)? {
                TaskStatus::Pending
            } else {
                TaskStatus::Blocked
            };
            task.updated_at = Utc::now();
            store::update_task(&conn, &task)?;
            task
        };

        self.bus.emit(TransitionEvent::new(
            EntityKind::Task,
            id,
            Some(TaskStatus::Failed.as_str()),
            task.status.as_str(),
            actor,
        ));
        Ok(task)
    }

    /// Move a task to a different agent. Status is untouched.
    pub fn reassign(
        &self,
        id: Uuid,
        new_assignee: Uuid,
        reason: Option<String>,
        actor: Option<Uuid>,
    ) -> Result<Task> {
        let conn = self.store.lock();
        let mut task =
            store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
        let target = directory::get_active(&conn, new_assignee)?;
        let previous = task.assignee_id;
        task.assignee_id = new_assignee;
        task.updated_at = Utc::now();
        store::update_task(&conn, &task)?;
        info!(
            task = %id,
            from = %previous,
            to = %target.id,
            actor = ?actor,
            reason = reason.as_deref().unwrap_or("-"),
            "task reassigned"
        );
        Ok(task)
    }

    /// Add a "must complete first" edge. Rejected (without touching the
    /// graph) if it would create a cycle; an unmet dependency forces the
    /// dependent out of `pending`/`in_progress` into `blocked`.
    pub fn add_dependency(&self, id: Uuid, depends_on: Uuid, actor: Option<Uuid>) -> Result<()> {
        let event = {
            let mut conn = self.store.lock();
            let tx = conn.transaction()?;

            let mut task =
                store::get_task(&tx, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
            let dep_task = store::get_task(&tx, depends_on)?
                .ok_or_else(|| CoreError::not_found("task", depends_on))?;

            if id == depends_on || store::is_reachable(&tx, depends_on, id)? {
                return Err(CoreError::DependencyCycle {
                    task: id,
                    depends_on,
                });
            }
            if store::dependency_exists(&tx, id, depends_on)? {
                return Err(CoreError::validation(format!(
                    "task {id} already depends on {depends_on}"
                )));
            }

            store::insert_dependency(&tx, id, depends_on)?;

            let mut event = None;
            if dep_task.status != TaskStatus::Completed
                && matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
            {
                let from = task.status;
                task.status = TaskStatus::Blocked;
                task.updated_at = Utc::now();
                store::update_task(&tx, &task)?;
                event = Some(TransitionEvent::new(
                    EntityKind::Task,
                    id,
                    Some(from.as_str()),
                    TaskStatus::Blocked.as_str(),
                    actor,
                ));
            }
            tx.commit()?;
            event
        };

        if let Some(event) = event {
            self.bus.emit(event);
        }
        Ok(())
    }

    /// Drop an edge and re-evaluate whether the task can leave `blocked`.
    pub fn remove_dependency(&self, id: Uuid, depends_on: Uuid, actor: Option<Uuid>) -> Result<()> {
        let event = {
            let mut conn = self.store.lock();
            let tx = conn.transaction()?;

            if !store::delete_dependency(&tx, id, depends_on)? {
                return Err(CoreError::not_found(
                    "dependency",
                    format!("{id} -> {depends_on}"),
                ));
            }

            let mut task =
                store::get_task(&tx, id)?.ok_or_else(|| CoreError::not_found("task", id))?;
            let mut event = None;
            if task.status == TaskStatus::Blocked && store::dependencies_met(&tx, id)? {
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
                store::update_task(&tx, &task)?;
                event = Some(TransitionEvent::new(
                    EntityKind::Task,
                    id,
                    Some(TaskStatus::Blocked.as_str()),
                    TaskStatus::Pending.as_str(),
                    actor,
                ));
            }
            tx.commit()?;
            event
        };

        if let Some(event) = event {
            self.bus.emit(event);
        }
        Ok(())
    }

    /// Both directions of a task's dependency neighborhood.
    pub fn dependencies(&self, id: Uuid) -> Result<DependencyOverview> {
        let conn = self.store.lock();
        store::get_task(&conn, id)?.ok_or_else(|| CoreError::not_found("task", id))?;

        let mut dependencies = Vec::new();
        for dep_id in store::dependency_ids(&conn, id)? {
            let dep = store::get_task(&conn, dep_id)?
                .ok_or_else(|| CoreError::not_found("task", dep_id))?;
            dependencies.push(DependencyInfo {
                task_id: dep.id,
                title: dep.title,
                blocking: dep.status != TaskStatus::Completed,
                status: dep.status,
            });
        }

        let mut dependents = Vec::new();
        for dep_id in store::dependent_ids(&conn, id)? {
            let dep = store::get_task(&conn, dep_id)?
                .ok_or_else(|| CoreError::not_found("task", dep_id))?;
            dependents.push(DependencyInfo {
                task_id: dep.id,
                title: dep.title,
                blocking: false,
                status: dep.status,
            });
        }

        Ok(DependencyOverview {
            dependencies,
            dependents,
        })
    }
}

/// Validate a requested transition against the state machine and the
/// dependency guard: a task may only become `in_progress`/`completed` (or
/// leave `blocked` for `pending`) when every dependency is completed.
fn check_transition(conn: &rusqlite::Connection, task: &Task, to: TaskStatus) -> Result<()> {
    let reject = || CoreError::InvalidTransition {
        entity: "task",
        from: task.status.to_string(),
        to: to.to_string(),
    };

    if !task.status.can_become(to) {
        return Err(reject());
    }
    let needs_deps = matches!(to, TaskStatus::InProgress | TaskStatus::Completed)
        || (task.status == TaskStatus::Blocked && to == TaskStatus::Pending);
    if needs_deps && !store::dependencies_met(conn, task.id)? {
        return Err(reject());
    }
    Ok(())
}

fn apply_status(task: &mut Task, to: TaskStatus) {
    task.status = to;
    task.updated_at = Utc::now();
    match to {
        TaskStatus::InProgress => {
            if task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
        }
        TaskStatus::Completed => {
            task.completed_at = Some(Utc::now());
            task.progress_percent = 100;
        }
        _ => {}
    }
}

/// Completion fan-out: direct dependents only. Each dependent still blocked
/// whose dependencies are now all completed moves back to `pending`.
fn unblock_dependents(
    conn: &rusqlite::Connection,
    completed: Uuid,
    actor: Option<Uuid>,
) -> Result<Vec<TransitionEvent>> {
    let mut events = Vec::new();
    for dep_id in store::dependent_ids(conn, completed)? {
        let mut dependent = match store::get_task(conn, dep_id)? {
            Some(t) => t,
            None => continue,
        };
        if dependent.status == TaskStatus::Blocked && store::dependencies_met(conn, dep_id)? {
            dependent.status = TaskStatus::Pending;
            dependent.updated_at = Utc::now();
            store::update_task(conn, &dependent)?;
            events.push(TransitionEvent::new(
                EntityKind::Task,
                dep_id,
                Some(TaskStatus::Blocked.as_str()),
                TaskStatus::Pending.as_str(),
                actor,
            ));
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AgentDirectory, NewAgent};
    use crate::permissions::Role;
    use std::collections::HashMap;

    struct Fixture {
        manager: TaskManager,
        directory: AgentDirectory,
        bus: EventBus,
        agent: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let bus = EventBus::new(64);
        let directory = AgentDirectory::new(store.clone(), bus.clone());
        let manager = TaskManager::new(store, bus.clone(), &CoreConfig::default());
        let agent = directory
            .create(NewAgent {
                name: "noah".into(),
                display_name: "Noah Park".into(),
                role: Role::Engineer,
                capabilities: vec![],
                tool_overrides: HashMap::new(),
            })
            .unwrap()
            .id;
        Fixture {
            manager,
            directory,
            bus,
            agent,
        }
    }

    fn new_task(fx: &Fixture, title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            description: String::new(),
            assignee_id: fx.agent,
            priority: None,
            acceptance_criteria: vec![],
            depends_on: vec![],
        }
    }

    fn set_status(fx: &Fixture, id: Uuid, status: TaskStatus) -> Result<Task> {
        fx.manager.update(
            id,
            TaskUpdate {
                status: Some(status),
                ..Default::default()
            },
            None,
        )
    }

    fn complete(fx: &Fixture, id: Uuid) {
        set_status(fx, id, TaskStatus::InProgress).unwrap();
        set_status(fx, id, TaskStatus::Completed).unwrap();
    }

    #[test]
    fn test_create_starts_pending() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "ship it"), None).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_create_with_unmet_dependency_starts_blocked() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();
        assert_eq!(b.status, TaskStatus::Blocked);
    }

    #[test]
    fn test_create_with_completed_dependency_starts_pending() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        complete(&fx, a.id);

        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();
        assert_eq!(b.status, TaskStatus::Pending);
    }

    #[test]
    fn test_completing_dependency_unblocks_dependent() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();
        assert_eq!(b.status, TaskStatus::Blocked);

        complete(&fx, a.id);
        assert_eq!(fx.manager.get(b.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_partial_dependencies_keep_task_blocked() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let c = fx.manager.create(new_task(&fx, "c"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id, c.id];
        let b = fx.manager.create(req, None).unwrap();

        complete(&fx, a.id);
        assert_eq!(fx.manager.get(b.id).unwrap().status, TaskStatus::Blocked);

        complete(&fx, c.id);
        assert_eq!(fx.manager.get(b.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let b = fx.manager.create(new_task(&fx, "b"), None).unwrap();
        let c = fx.manager.create(new_task(&fx, "c"), None).unwrap();

        fx.manager.add_dependency(a.id, b.id, None).unwrap();
        fx.manager.add_dependency(b.id, c.id, None).unwrap();

        // c -> a closes the loop (a -> b -> c -> a).
        let err = fx.manager.add_dependency(c.id, a.id, None).unwrap_err();
        assert!(matches!(err, CoreError::DependencyCycle { .. }));
        assert!(fx.manager.dependencies(c.id).unwrap().dependencies.is_empty());

        // Failing again is just as harmless (idempotent failure).
        let err = fx.manager.add_dependency(c.id, a.id, None).unwrap_err();
        assert!(matches!(err, CoreError::DependencyCycle { .. }));

        // Self-dependency is the degenerate cycle.
        let err = fx.manager.add_dependency(a.id, a.id, None).unwrap_err();
        assert!(matches!(err, CoreError::DependencyCycle { .. }));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let b = fx.manager.create(new_task(&fx, "b"), None).unwrap();
        fx.manager.add_dependency(b.id, a.id, None).unwrap();
        let err = fx.manager.add_dependency(b.id, a.id, None).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_add_dependency_blocks_running_task() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let b = fx.manager.create(new_task(&fx, "b"), None).unwrap();
        set_status(&fx, b.id, TaskStatus::InProgress).unwrap();

        fx.manager.add_dependency(b.id, a.id, None).unwrap();
        assert_eq!(fx.manager.get(b.id).unwrap().status, TaskStatus::Blocked);
    }

    #[test]
    fn test_remove_dependency_unblocks() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();

        fx.manager.remove_dependency(b.id, a.id, None).unwrap();
        assert_eq!(fx.manager.get(b.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_remove_missing_dependency_not_found() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let b = fx.manager.create(new_task(&fx, "b"), None).unwrap();
        let err = fx.manager.remove_dependency(b.id, a.id, None).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_illegal_transition_leaves_task_unchanged() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();

        // pending -> completed skips in_progress.
        let err = set_status(&fx, task.id, TaskStatus::Completed).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(fx.manager.get(task.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_blocked_task_cannot_start() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();

        let err = set_status(&fx, b.id, TaskStatus::InProgress).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        // Nor can it be nudged to pending while the dependency is open.
        let err = set_status(&fx, b.id, TaskStatus::Pending).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_completed_stamps_fields() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        complete(&fx, task.id);

        let done = fx.manager.get(task.id).unwrap();
        assert_eq!(done.progress_percent, 100);
        assert!(done.completed_at.is_some());
        assert!(done.started_at.is_some());
    }

    #[test]
    fn test_completion_overrides_stale_progress_in_same_update() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        set_status(&fx, task.id, TaskStatus::InProgress).unwrap();

        let done = fx
            .manager
            .update(
                task.id,
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    progress_percent: Some(50),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(done.progress_percent, 100);
    }

    #[test]
    fn test_cancel_from_non_terminal() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let cancelled = fx
            .manager
            .cancel(task.id, Some("scope cut".into()), None)
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("scope cut"));
    }

    #[test]
    fn test_cancel_terminal_rejected() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        complete(&fx, task.id);

        let err = fx.manager.cancel(task.id, None, None).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyTerminal { .. }));
    }

    #[test]
    fn test_retry_only_from_failed() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();

        let err = fx.manager.retry(task.id, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        // No side effects on the refused retry.
        let unchanged = fx.manager.get(task.id).unwrap();
        assert_eq!(unchanged.retry_count, 0);
        assert_eq!(unchanged.status, TaskStatus::Pending);

        set_status(&fx, task.id, TaskStatus::InProgress).unwrap();
        set_status(&fx, task.id, TaskStatus::Failed).unwrap();
        let retried = fx.manager.retry(task.id, None).unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.retry_count, 1);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        for _ in 0..3 {
            set_status(&fx, task.id, TaskStatus::InProgress).unwrap();
            set_status(&fx, task.id, TaskStatus::Failed).unwrap();
            fx.manager.retry(task.id, None).unwrap();
        }
        set_status(&fx, task.id, TaskStatus::InProgress).unwrap();
        set_status(&fx, task.id, TaskStatus::Failed).unwrap();

        let err = fx.manager.retry(task.id, None).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_retry_lands_blocked_when_dependency_open() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let b = fx.manager.create(new_task(&fx, "b"), None).unwrap();
        set_status(&fx, b.id, TaskStatus::InProgress).unwrap();
        set_status(&fx, b.id, TaskStatus::Failed).unwrap();
        fx.manager.add_dependency(b.id, a.id, None).unwrap();

        let retried = fx.manager.retry(b.id, None).unwrap();
        assert_eq!(retried.status, TaskStatus::Blocked);
        assert_eq!(retried.retry_count, 1);
    }

    #[test]
    fn test_reassign_keeps_status() {
        let fx = fixture();
        let other = fx
            .directory
            .create(NewAgent {
                name: "priya".into(),
                display_name: "Priya Nair".into(),
                role: Role::Engineer,
                capabilities: vec![],
                tool_overrides: HashMap::new(),
            })
            .unwrap();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        set_status(&fx, task.id, TaskStatus::InProgress).unwrap();

        let moved = fx.manager.reassign(task.id, other.id, None, None).unwrap();
        assert_eq!(moved.assignee_id, other.id);
        assert_eq!(moved.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_reassign_to_archived_agent_rejected() {
        let fx = fixture();
        let other = fx
            .directory
            .create(NewAgent {
                name: "priya".into(),
                display_name: "Priya Nair".into(),
                role: Role::Engineer,
                capabilities: vec![],
                tool_overrides: HashMap::new(),
            })
            .unwrap();
        fx.directory.archive(other.id, None).unwrap();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();

        let err = fx.manager.reassign(task.id, other.id, None, None).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(fx.manager.get(task.id).unwrap().assignee_id, fx.agent);
    }

    #[test]
    fn test_progress_clamped_and_assignee_only() {
        let fx = fixture();
        let task = fx.manager.create(new_task(&fx, "a"), None).unwrap();

        let updated = fx.manager.update_progress(task.id, 150, fx.agent).unwrap();
        assert_eq!(updated.progress_percent, 100);

        let stranger = Uuid::new_v4();
        let err = fx.manager.update_progress(task.id, 10, stranger).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_list_orders_by_priority() {
        let fx = fixture();
        let mut low = new_task(&fx, "low");
        low.priority = Some(TaskPriority::Low);
        let mut urgent = new_task(&fx, "urgent");
        urgent.priority = Some(TaskPriority::Urgent);
        fx.manager.create(low, None).unwrap();
        fx.manager.create(urgent, None).unwrap();

        let tasks = fx.manager.list(TaskFilter::default()).unwrap();
        assert_eq!(tasks[0].title, "urgent");
        assert_eq!(tasks[1].title, "low");
    }

    #[tokio::test]
    async fn test_completion_emits_unblock_event() {
        let fx = fixture();
        let a = fx.manager.create(new_task(&fx, "a"), None).unwrap();
        let mut req = new_task(&fx, "b");
        req.depends_on = vec![a.id];
        let b = fx.manager.create(req, None).unwrap();

        let mut rx = fx.bus.subscribe();
        complete(&fx, a.id);

        // in_progress, completed, then the dependent's unblock.
        let mut transitions = Vec::new();
        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            transitions.push((event.entity_id, event.to.clone()));
        }
        assert_eq!(transitions[1], (a.id, "completed".to_string()));
        assert_eq!(transitions[2], (b.id, "pending".to_string()));
    }
}
