//! SQLite-backed durable state.
//!
//! One record per agent, task, and message, plus a relation table for task
//! dependency edges. The connection sits behind a single mutex: every
//! manager operation takes the lock once and performs its whole
//! read-validate-write sequence inside it, which is what makes entity
//! transitions atomic under concurrent agents and the operator.
//!
//! Row helpers are plain functions over `&Connection` so managers can
//! compose several of them inside one critical section (or one SQL
//! transaction where multiple rows must move together).

use crate::directory::Agent;
use crate::error::Result;
use crate::messages::Message;
use crate::tasks::{Task, TaskFilter};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

/// Handle to the backing database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Take the store lock. Held for the duration of one logical operation;
    /// callers must not do slow I/O while holding it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL,
            capabilities TEXT NOT NULL,
            tool_overrides TEXT NOT NULL,
            status TEXT NOT NULL,
            status_message TEXT,
            archived INTEGER NOT NULL DEFAULT 0,
            archive_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            assignee_id TEXT NOT NULL,
            acceptance_criteria TEXT NOT NULL,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            cancel_reason TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            FOREIGN KEY (assignee_id) REFERENCES agents(id)
        );

        CREATE TABLE IF NOT EXISTS task_dependencies (
            task_id TEXT NOT NULL,
            depends_on_task_id TEXT NOT NULL,
            PRIMARY KEY (task_id, depends_on_task_id),
            FOREIGN KEY (task_id) REFERENCES tasks(id),
            FOREIGN KEY (depends_on_task_id) REFERENCES tasks(id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            from_agent TEXT NOT NULL,
            to_agent TEXT,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            external_recipient TEXT,
            decision_reason TEXT,
            decided_by TEXT,
            decided_at TEXT,
            in_reply_to TEXT,
            read_at TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (from_agent) REFERENCES agents(id)
        );

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            read_at TEXT NOT NULL,
            PRIMARY KEY (message_id, agent_id),
            FOREIGN KEY (message_id) REFERENCES messages(id),
            FOREIGN KEY (agent_id) REFERENCES agents(id)
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_deps_depends_on ON task_dependencies(depends_on_task_id);
        CREATE INDEX IF NOT EXISTS idx_messages_to ON messages(to_agent);
        CREATE INDEX IF NOT EXISTS idx_messages_kind_status ON messages(kind, status);
        "#,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn conv_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conv_err(idx, e))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conv_err(idx, e)))
        .transpose()
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conv_err(idx, e))
    })
    .transpose()
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conv_err(idx, e))
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conv_err(idx, e))
}

fn opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

const AGENT_COLS: &str = "id, name, display_name, role, capabilities, tool_overrides, \
     status, status_message, archived, archive_reason, created_at, updated_at";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        role: get_parsed(row, 3)?,
        capabilities: get_json(row, 4)?,
        tool_overrides: get_json(row, 5)?,
        status: get_parsed(row, 6)?,
        status_message: row.get(7)?,
        archived: row.get(8)?,
        archive_reason: row.get(9)?,
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

pub(crate) fn insert_agent(conn: &Connection, agent: &Agent) -> Result<()> {
    conn.execute(
        "INSERT INTO agents (id, name, display_name, role, capabilities, tool_overrides, \
         status, status_message, archived, archive_reason, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            agent.id.to_string(),
            agent.name,
            agent.display_name,
            agent.role.as_str(),
            serde_json::to_string(&agent.capabilities)?,
            serde_json::to_string(&agent.tool_overrides)?,
            agent.status.as_str(),
            agent.status_message,
            agent.archived,
            agent.archive_reason,
            agent.created_at.to_rfc3339(),
            agent.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_agent(conn: &Connection, agent: &Agent) -> Result<()> {
    conn.execute(
        "UPDATE agents SET name = ?2, display_name = ?3, role = ?4, capabilities = ?5, \
         tool_overrides = ?6, status = ?7, status_message = ?8, archived = ?9, \
         archive_reason = ?10, updated_at = ?11 WHERE id = ?1",
        params![
            agent.id.to_string(),
            agent.name,
            agent.display_name,
            agent.role.as_str(),
            serde_json::to_string(&agent.capabilities)?,
            serde_json::to_string(&agent.tool_overrides)?,
            agent.status.as_str(),
            agent.status_message,
            agent.archived,
            agent.archive_reason,
            agent.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_agent(conn: &Connection, id: Uuid) -> Result<Option<Agent>> {
    let agent = conn
        .query_row(
            &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
            params![id.to_string()],
            agent_from_row,
        )
        .optional()?;
    Ok(agent)
}

pub(crate) fn list_agents(conn: &Connection, include_archived: bool) -> Result<Vec<Agent>> {
    let sql = if include_archived {
        format!("SELECT {AGENT_COLS} FROM agents ORDER BY name")
    } else {
        format!("SELECT {AGENT_COLS} FROM agents WHERE archived = 0 ORDER BY name")
    };
    let mut stmt = conn.prepare(&sql)?;
    let agents = stmt
        .query_map([], agent_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(agents)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

const TASK_COLS: &str = "id, title, description, priority, status, assignee_id, \
     acceptance_criteria, progress_percent, retry_count, max_retries, cancel_reason, \
     created_by, created_at, updated_at, started_at, completed_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: get_uuid(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: get_parsed(row, 3)?,
        status: get_parsed(row, 4)?,
        assignee_id: get_uuid(row, 5)?,
        acceptance_criteria: get_json(row, 6)?,
        progress_percent: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        cancel_reason: row.get(10)?,
        created_by: get_opt_uuid(row, 11)?,
        created_at: get_ts(row, 12)?,
        updated_at: get_ts(row, 13)?,
        started_at: get_opt_ts(row, 14)?,
        completed_at: get_opt_ts(row, 15)?,
    })
}

pub(crate) fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, title, description, priority, status, assignee_id, \
         acceptance_criteria, progress_percent, retry_count, max_retries, cancel_reason, \
         created_by, created_at, updated_at, started_at, completed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            task.id.to_string(),
            task.title,
            task.description,
            task.priority.as_str(),
            task.status.as_str(),
            task.assignee_id.to_string(),
            serde_json::to_string(&task.acceptance_criteria)?,
            task.progress_percent,
            task.retry_count,
            task.max_retries,
            task.cancel_reason,
            task.created_by.map(|id| id.to_string()),
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
            opt_ts(&task.started_at),
            opt_ts(&task.completed_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET title = ?2, description = ?3, priority = ?4, status = ?5, \
         assignee_id = ?6, acceptance_criteria = ?7, progress_percent = ?8, \
         retry_count = ?9, max_retries = ?10, cancel_reason = ?11, updated_at = ?12, \
         started_at = ?13, completed_at = ?14 WHERE id = ?1",
        params![
            task.id.to_string(),
            task.title,
            task.description,
            task.priority.as_str(),
            task.status.as_str(),
            task.assignee_id.to_string(),
            serde_json::to_string(&task.acceptance_criteria)?,
            task.progress_percent,
            task.retry_count,
            task.max_retries,
            task.cancel_reason,
            task.updated_at.to_rfc3339(),
            opt_ts(&task.started_at),
            opt_ts(&task.completed_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_task(conn: &Connection, id: Uuid) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
            params![id.to_string()],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

pub(crate) fn list_tasks(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let mut sql = format!("SELECT {TASK_COLS} FROM tasks");
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        args.push(Box::new(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", args.len()));
    }
    if let Some(assignee) = filter.assignee {
        args.push(Box::new(assignee.to_string()));
        clauses.push(format!("assignee_id = ?{}", args.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
    let tasks = stmt
        .query_map(params, task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Dependency edges
// ---------------------------------------------------------------------------

pub(crate) fn insert_dependency(conn: &Connection, task: Uuid, depends_on: Uuid) -> Result<()> {
    conn.execute(
        "INSERT INTO task_dependencies (task_id, depends_on_task_id) VALUES (?1, ?2)",
        params![task.to_string(), depends_on.to_string()],
    )?;
    Ok(())
}

/// Returns whether an edge was actually removed.
pub(crate) fn delete_dependency(conn: &Connection, task: Uuid, depends_on: Uuid) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on_task_id = ?2",
        params![task.to_string(), depends_on.to_string()],
    )?;
    Ok(n > 0)
}

pub(crate) fn dependency_exists(conn: &Connection, task: Uuid, depends_on: Uuid) -> Result<bool> {
    let n: u32 = conn.query_row(
        "SELECT COUNT(*) FROM task_dependencies WHERE task_id = ?1 AND depends_on_task_id = ?2",
        params![task.to_string(), depends_on.to_string()],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Tasks `task` depends on (upstream).
pub(crate) fn dependency_ids(conn: &Connection, task: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?1")?;
    let ids = stmt
        .query_map(params![task.to_string()], |row| get_uuid(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Tasks that depend on `task` (direct downstream only).
pub(crate) fn dependent_ids(conn: &Connection, task: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT task_id FROM task_dependencies WHERE depends_on_task_id = ?1")?;
    let ids = stmt
        .query_map(params![task.to_string()], |row| get_uuid(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Whether `target` is reachable from `start` by following dependency edges
/// (task -> its dependencies). Used for cycle detection before inserting an
/// edge.
pub(crate) fn is_reachable(conn: &Connection, start: Uuid, target: Uuid) -> Result<bool> {
    let n: u32 = conn.query_row(
        "WITH RECURSIVE reach(id) AS ( \
             SELECT ?1 \
             UNION \
             SELECT d.depends_on_task_id FROM task_dependencies d \
             JOIN reach r ON d.task_id = r.id \
         ) \
         SELECT COUNT(*) FROM reach WHERE id = ?2",
        params![start.to_string(), target.to_string()],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// True when every dependency of `task` is completed.
pub(crate) fn dependencies_met(conn: &Connection, task: Uuid) -> Result<bool> {
    let n: u32 = conn.query_row(
        "SELECT COUNT(*) FROM task_dependencies d \
         JOIN tasks t ON t.id = d.depends_on_task_id \
         WHERE d.task_id = ?1 AND t.status != 'completed'",
        params![task.to_string()],
        |row| row.get(0),
    )?;
    Ok(n == 0)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

const MESSAGE_COLS: &str = "id, from_agent, to_agent, subject, body, kind, status, \
     external_recipient, decision_reason, decided_by, decided_at, in_reply_to, read_at, \
     deleted_at, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: get_uuid(row, 0)?,
        from_agent: get_uuid(row, 1)?,
        to_agent: get_opt_uuid(row, 2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        kind: get_parsed(row, 5)?,
        status: get_parsed(row, 6)?,
        external_recipient: row.get(7)?,
        decision_reason: row.get(8)?,
        decided_by: get_opt_uuid(row, 9)?,
        decided_at: get_opt_ts(row, 10)?,
        in_reply_to: get_opt_uuid(row, 11)?,
        read_at: get_opt_ts(row, 12)?,
        deleted_at: get_opt_ts(row, 13)?,
        created_at: get_ts(row, 14)?,
    })
}

pub(crate) fn insert_message(conn: &Connection, msg: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, from_agent, to_agent, subject, body, kind, status, \
         external_recipient, decision_reason, decided_by, decided_at, in_reply_to, read_at, \
         deleted_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            msg.id.to_string(),
            msg.from_agent.to_string(),
            msg.to_agent.map(|id| id.to_string()),
            msg.subject,
            msg.body,
            msg.kind.as_str(),
            msg.status.as_str(),
            msg.external_recipient,
            msg.decision_reason,
            msg.decided_by.map(|id| id.to_string()),
            opt_ts(&msg.decided_at),
            msg.in_reply_to.map(|id| id.to_string()),
            opt_ts(&msg.read_at),
            opt_ts(&msg.deleted_at),
            msg.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_message(conn: &Connection, msg: &Message) -> Result<()> {
    conn.execute(
        "UPDATE messages SET subject = ?2, body = ?3, status = ?4, decision_reason = ?5, \
         decided_by = ?6, decided_at = ?7, read_at = ?8, deleted_at = ?9 WHERE id = ?1",
        params![
            msg.id.to_string(),
            msg.subject,
            msg.body,
            msg.status.as_str(),
            msg.decision_reason,
            msg.decided_by.map(|id| id.to_string()),
            opt_ts(&msg.decided_at),
            opt_ts(&msg.read_at),
            opt_ts(&msg.deleted_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let msg = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            message_from_row,
        )
        .optional()?;
    Ok(msg)
}

/// Messages visible in an agent's inbox: direct/system mail addressed to it
/// plus broadcasts from other agents. Drafts and soft-deleted messages never
/// appear.
pub(crate) fn list_inbox(conn: &Connection, agent: Uuid, unread_only: bool) -> Result<Vec<Message>> {
    let mut sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages WHERE deleted_at IS NULL \
         AND kind != 'external_draft' \
         AND (to_agent = ?1 OR (kind = 'broadcast' AND from_agent != ?1))"
    );
    if unread_only {
        // Addressed mail tracks reads on the row itself; broadcast rows are
        // shared, so each recipient's read lives in message_reads.
        sql.push_str(
            " AND ((to_agent = ?1 AND read_at IS NULL) \
             OR (kind = 'broadcast' AND NOT EXISTS \
             (SELECT 1 FROM message_reads r \
              WHERE r.message_id = messages.id AND r.agent_id = ?1)))",
        );
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let msgs = stmt
        .query_map(params![agent.to_string()], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(msgs)
}

pub(crate) fn unread_count(conn: &Connection, agent: Uuid) -> Result<u64> {
    let n: u64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE deleted_at IS NULL \
         AND kind != 'external_draft' \
         AND ((to_agent = ?1 AND read_at IS NULL) \
         OR (kind = 'broadcast' AND from_agent != ?1 AND NOT EXISTS \
         (SELECT 1 FROM message_reads r \
          WHERE r.message_id = messages.id AND r.agent_id = ?1)))",
        params![agent.to_string()],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Record an agent's read of a shared broadcast row. Returns `false` when
/// the agent had already read it.
pub(crate) fn insert_message_read(
    conn: &Connection,
    message: Uuid,
    agent: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, agent_id, read_at) \
         VALUES (?1, ?2, ?3)",
        params![message.to_string(), agent.to_string(), at.to_rfc3339()],
    )?;
    Ok(n > 0)
}

/// External drafts, optionally narrowed to one author and/or one status.
pub(crate) fn list_drafts(
    conn: &Connection,
    from: Option<Uuid>,
    status: Option<&str>,
) -> Result<Vec<Message>> {
    let mut sql = format!("SELECT {MESSAGE_COLS} FROM messages WHERE kind = 'external_draft'");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(from) = from {
        args.push(Box::new(from.to_string()));
        sql.push_str(&format!(" AND from_agent = ?{}", args.len()));
    }
    if let Some(status) = status {
        args.push(Box::new(status.to_string()));
        sql.push_str(&format!(" AND status = ?{}", args.len()));
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
    let msgs = stmt
        .query_map(params, message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(msgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Agent;
    use crate::permissions::Role;

    #[test]
    fn test_agent_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock();

        let mut agent = Agent::new("noah", "Noah Park", Role::Engineer);
        agent.capabilities.push("Bash".to_string());
        agent.tool_overrides.insert("deploy".to_string(), false);
        insert_agent(&conn, &agent).unwrap();

        let back = get_agent(&conn, agent.id).unwrap().unwrap();
        assert_eq!(back.name, "noah");
        assert_eq!(back.role, Role::Engineer);
        assert_eq!(back.capabilities, vec!["Bash"]);
        assert_eq!(back.tool_overrides.get("deploy"), Some(&false));
    }

    #[test]
    fn test_agent_name_unique() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock();

        insert_agent(&conn, &Agent::new("noah", "Noah", Role::Engineer)).unwrap();
        let dup = insert_agent(&conn, &Agent::new("noah", "Other Noah", Role::Engineer));
        assert!(dup.is_err());
    }

    #[test]
    fn test_reachability() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock();

        let agent = Agent::new("noah", "Noah", Role::Engineer);
        insert_agent(&conn, &agent).unwrap();

        // a -> b -> c as dependency edges
        let mk = |title: &str| {
            let task = crate::tasks::Task::new(title, "", agent.id);
            insert_task(&conn, &task).unwrap();
            task.id
        };
        let (a, b, c) = (mk("a"), mk("b"), mk("c"));
        insert_dependency(&conn, a, b).unwrap();
        insert_dependency(&conn, b, c).unwrap();

        assert!(is_reachable(&conn, a, c).unwrap());
        assert!(is_reachable(&conn, a, a).unwrap());
        assert!(!is_reachable(&conn, c, a).unwrap());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bullpen.db");

        let agent = Agent::new("noah", "Noah", Role::Engineer);
        {
            let store = Store::open(&path).unwrap();
            let conn = store.lock();
            insert_agent(&conn, &agent).unwrap();
        }

        // Reopen and read back.
        let store = Store::open(&path).unwrap();
        let conn = store.lock();
        let back = get_agent(&conn, agent.id).unwrap().unwrap();
        assert_eq!(back.name, "noah");
    }
}
