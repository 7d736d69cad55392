//! Bullpen - orchestration core for a fleet of agents working as the
//! employees of a simulated organization.
//!
//! This crate provides:
//! - A task lifecycle state machine with a dependency graph that blocks and
//!   releases work automatically
//! - A role-based permission gate deciding which tools each agent may call
//! - Internal messaging plus a human-approval queue for anything addressed
//!   outside the organization
//! - An agent directory with capabilities, per-tool overrides, and archival
//!
//! [`Orchestrator::new`] wires the whole thing; agents act through
//! [`ToolRegistry::invoke`], operators through the manager handles.

pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod store;

// Domain managers
pub mod messages;
pub mod permissions;
pub mod tasks;

// Tool surface and assembly
pub mod orchestrator;
pub mod tool;
pub mod tools;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use orchestrator::Orchestrator;

pub use directory::{Agent, AgentDirectory, AgentStatus, NewAgent};
pub use events::{EntityKind, EventBus, TransitionEvent};
pub use messages::{Message, MessageKind, MessageStatus, MessageWorkflow};
pub use permissions::{EligibilityRule, PermissionGate, Predicate, Role};
pub use tasks::{
    NewTask, Task, TaskFilter, TaskManager, TaskPriority, TaskStatus, TaskUpdate,
};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolOutcome, ToolRegistry, ToolSet};
