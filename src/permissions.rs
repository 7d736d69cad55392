//! Role-based tool permission gate.
//!
//! Each role carries a static allow-list of tool names; an agent's explicit
//! per-tool overrides and a small set of declarative eligibility rules are
//! unioned on top. The gate is pure: it never mutates anything and can be
//! shared across workers without locking.

use crate::directory::Agent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Permission profile key. Free-text roles coming from configuration are
/// normalized once, at the parse boundary; anything unrecognized falls back
/// to [`Role::Unknown`] and its restricted default profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Ceo,
    EngineeringLead,
    Engineer,
    Marketing,
    Sales,
    Operations,
    Unknown,
}

impl Role {
    /// Canonical profile key for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Ceo => "ceo",
            Role::EngineeringLead => "engineering_lead",
            Role::Engineer => "engineer",
            Role::Marketing => "marketing",
            Role::Sales => "sales",
            Role::Operations => "operations",
            Role::Unknown => "default",
        }
    }

    /// Tools this role's profile grants.
    pub fn profile(&self) -> &'static [&'static str] {
        match self {
            Role::Ceo => CEO_TOOLS,
            Role::EngineeringLead => ENGINEERING_LEAD_TOOLS,
            Role::Engineer => ENGINEER_TOOLS,
            Role::Marketing | Role::Sales => OUTREACH_TOOLS,
            Role::Operations => OPERATIONS_TOOLS,
            Role::Unknown => DEFAULT_TOOLS,
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        Ok(match key.as_str() {
            "ceo" => Role::Ceo,
            "engineering_lead" => Role::EngineeringLead,
            "engineer" => Role::Engineer,
            "marketing" => Role::Marketing,
            "sales" => Role::Sales,
            "operations" => Role::Operations,
            _ => Role::Unknown,
        })
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Role::Unknown)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Profile tables. These mirror the organization's policy: the CEO sees the
// whole surface, leads run teams, engineers work their own tasks, outreach
// roles can draft external mail (subject to human approval), and unknown
// roles get read access plus messaging.

const CEO_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "message_reply",
    "message_delete",
    "task_create",
    "task_get",
    "task_list",
    "task_update",
    "task_cancel",
    "task_retry",
    "task_reassign",
    "task_add_dependency",
    "task_remove_dependency",
    "task_list_dependencies",
    "external_draft_email",
    "draft_list",
    "draft_update",
    "agent_list",
    "agent_get",
    "agent_update_status",
    "config_update_agent",
];

const ENGINEERING_LEAD_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "message_reply",
    "task_create",
    "task_get",
    "task_list",
    "task_update",
    "task_cancel",
    "task_retry",
    "task_reassign",
    "task_add_dependency",
    "task_remove_dependency",
    "task_list_dependencies",
    "shell_exec",
    "agent_list",
    "agent_get",
];

const ENGINEER_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "message_reply",
    "task_get",
    "task_list",
    "task_update",
    "task_list_dependencies",
    "shell_exec",
    "agent_list",
    "agent_get",
];

const OUTREACH_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "message_reply",
    "external_draft_email",
    "draft_list",
    "draft_update",
    "task_get",
    "task_list",
    "agent_list",
    "agent_get",
];

const OPERATIONS_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "message_reply",
    "task_create",
    "task_get",
    "task_list",
    "task_update",
    "task_cancel",
    "external_draft_email",
    "draft_list",
    "agent_list",
    "agent_get",
];

const DEFAULT_TOOLS: &[&str] = &[
    "message_send",
    "message_check_inbox",
    "message_mark_read",
    "task_get",
    "task_list",
    "agent_list",
    "agent_get",
];

/// Condition under which an [`EligibilityRule`] fires.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// Agent declares this capability tag.
    HasCapability(&'static str),
    /// Agent's name is one of these.
    NamedOneOf(&'static [&'static str]),
}

impl Predicate {
    pub fn matches(&self, agent: &Agent) -> bool {
        match self {
            Predicate::HasCapability(cap) => agent.capabilities.iter().any(|c| c == cap),
            Predicate::NamedOneOf(names) => names.contains(&agent.name.as_str()),
        }
    }
}

/// Supplemental tool unlock, evaluated uniformly by the gate. Rules are
/// additive only: a rule can grant a tool, never take one away.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityRule {
    pub tool: &'static str,
    pub when: Predicate,
}

/// Default supplemental rules. The capability-based shell unlock and the
/// named external-draft allow-list are long-standing policy; keeping them
/// declarative here makes the rule set auditable on its own.
pub const DEFAULT_RULES: &[EligibilityRule] = &[
    EligibilityRule {
        tool: "shell_exec",
        when: Predicate::HasCapability("Bash"),
    },
    EligibilityRule {
        tool: "external_draft_email",
        when: Predicate::NamedOneOf(&["sable", "marta", "noah", "priya"]),
    },
];

/// Decides which tools an agent may invoke.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    rules: Vec<EligibilityRule>,
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGate {
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }

    /// Gate with a custom rule set, replacing [`DEFAULT_RULES`].
    pub fn with_rules(rules: Vec<EligibilityRule>) -> Self {
        Self { rules }
    }

    /// Full set of tool names this agent may invoke: role profile, plus
    /// explicit `true` overrides, plus any matching eligibility rule.
    /// Overrides set to `false` only mask themselves out of the override
    /// union; they never subtract from the profile.
    pub fn allowed_tools(&self, agent: &Agent) -> BTreeSet<String> {
        let mut allowed: BTreeSet<String> = agent
            .role
            .profile()
            .iter()
            .map(|t| t.to_string())
            .collect();

        for (tool, enabled) in &agent.tool_overrides {
            if *enabled {
                allowed.insert(tool.clone());
            }
        }

        for rule in &self.rules {
            if rule.when.matches(agent) {
                allowed.insert(rule.tool.to_string());
            }
        }

        allowed
    }

    pub fn allows(&self, agent: &Agent, tool: &str) -> bool {
        if agent.role.profile().contains(&tool) {
            return true;
        }
        if agent.tool_overrides.get(tool).copied() == Some(true) {
            return true;
        }
        self.rules
            .iter()
            .any(|r| r.tool == tool && r.when.matches(agent))
    }
}
