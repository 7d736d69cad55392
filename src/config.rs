//! Configuration for the orchestration core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunables for an [`Orchestrator`](crate::Orchestrator) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path to the sqlite database. `None` keeps all state in memory,
    /// which is what the tests use.
    pub db_path: Option<PathBuf>,

    /// How many times a failed task may be retried before retry is refused.
    #[serde(default = "default_max_retries")]
    pub max_task_retries: u32,

    /// Capacity of the transition-event broadcast channel. Slow observers
    /// that fall more than this far behind lose events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_event_capacity() -> usize {
    256
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_task_retries: default_max_retries(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl CoreConfig {
    /// Config backed by an on-disk database.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.max_task_retries, 3);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"db_path": null}"#).unwrap();
        assert_eq!(config.max_task_retries, 3);
    }
}
