//! The task model (C1): a directed acyclic graph of sub-tasks with
//! status transitions enforced at the single point where tasks are
//! mutated.

pub mod dag;
pub mod resolver;

pub use dag::{Task, TaskDag, TaskId, TaskMetadata};
pub use resolver::{DagValidation, Resolver};

use serde::{Deserialize, Serialize};

/// Execution status of a [`Task`]. Terminal states (`Completed`, `Failed`,
/// `Skipped`) never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Scheduling priority. Ties within a priority are broken by insertion
/// order (§4.3 fairness rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}
