//! Error taxonomy for the orchestration core.
//!
//! Everything here except `DuplicateTool` and `Storage` is an expected,
//! recoverable condition: callers get it back as a structured failed
//! [`ToolOutcome`](crate::tool::ToolOutcome) at the registry boundary so an
//! agent worker can reason about the failure and retry or report it.

use uuid::Uuid;

/// All failure modes the core can report.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input, rejected before any state change. For tool
    /// invocations `detail` lists the violated fields.
    #[error("validation failed: {detail}")]
    Validation { detail: String },

    /// The invoking agent's profile and overrides do not grant this tool.
    #[error("agent {agent} is not permitted to use tool '{tool}'")]
    PermissionDenied { agent: Uuid, tool: String },

    /// Illegal state-machine move; the entity is left unchanged.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Adding the edge would make the dependency graph cyclic.
    #[error("dependency {task} -> {depends_on} would create a cycle")]
    DependencyCycle { task: Uuid, depends_on: Uuid },

    /// Referenced entity is missing or archived.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation attempted on a task in a terminal status.
    #[error("task {task} is already terminal ({status})")]
    AlreadyTerminal { task: Uuid, status: String },

    /// A draft that has been approved or rejected cannot be decided again.
    #[error("draft {draft} was already decided ({status})")]
    AlreadyDecided { draft: Uuid, status: String },

    /// A draft that has been decided can no longer be edited.
    #[error("draft {draft} is no longer editable ({status})")]
    NotEditable { draft: Uuid, status: String },

    /// Programmer error: a tool name registered twice. Aborts registry
    /// construction rather than being returned to agents.
    #[error("tool '{name}' is already registered")]
    DuplicateTool { name: String },

    /// Backing store failure (corrupt record, unavailable database).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Persisted record that no longer deserializes.
    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable machine-readable code, carried on failed tool outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation",
            CoreError::PermissionDenied { .. } => "permission_denied",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::DependencyCycle { .. } => "dependency_cycle",
            CoreError::NotFound { .. } => "not_found",
            CoreError::AlreadyTerminal { .. } => "already_terminal",
            CoreError::AlreadyDecided { .. } => "already_decided",
            CoreError::NotEditable { .. } => "not_editable",
            CoreError::DuplicateTool { .. } => "duplicate_tool",
            CoreError::Storage(_) => "storage",
            CoreError::CorruptRecord(_) => "corrupt_record",
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(detail: impl Into<String>) -> Self {
        CoreError::Validation {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = CoreError::validation("missing field");
        assert_eq!(err.code(), "validation");

        let err = CoreError::not_found("agent", Uuid::nil());
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("agent not found"));
    }

    #[test]
    fn test_transition_error_message() {
        let err = CoreError::InvalidTransition {
            entity: "task",
            from: "completed".into(),
            to: "pending".into(),
        };
        assert_eq!(err.to_string(), "invalid task transition: completed -> pending");
    }
}
