//! Data contracts shared by the scheduler, the worker loop, and the
//! supervisor. These are plain data: nothing here performs I/O or holds a
//! lock, which is what lets them cross the sync/async boundary between
//! this crate and `taskwright-runtime` as ordinary owned values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One executed browser/tool action and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    pub target: Option<String>,
    pub error: Option<String>,
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of asking the verifier whether a task's goal has been met.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub completed: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl VerificationResult {
    /// A task is successful iff the verifier says it's complete *and*
    /// meets the configured confidence bar.
    pub fn is_success(&self, threshold: f64) -> bool {
        self.completed && self.confidence >= threshold
    }
}

/// Final record of a task's execution, attached to the DAG when the task
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub action_history: Vec<ActionResult>,
    #[serde(default)]
    pub extracted_data: HashMap<String, serde_json::Value>,
    pub verification: Option<VerificationResult>,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub worker_id: String,
    pub error: Option<StructuredError>,
    #[serde(default)]
    pub needs_replan: bool,
    pub replan_reason: Option<String>,
}

/// Per-task progress counters, updated after every action, used to judge
/// whether a stalled task is making meaningful progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub actions_executed: u32,
    pub successful_actions: u32,
    pub failed_actions: u32,
    #[serde(default)]
    pub last_n_actions: Vec<String>,
    pub state_changes: u32,
    pub unique_states_visited: u32,
    pub convergence_detected: bool,
    pub convergence_metric: Option<String>,
    pub convergence_value: Option<f64>,
}

impl ProgressMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.actions_executed == 0 {
            0.0
        } else {
            self.successful_actions as f64 / self.actions_executed as f64
        }
    }

    pub fn has_meaningful_progress(&self) -> bool {
        self.successful_actions > 0 && (self.state_changes > 0 || self.convergence_detected)
    }

    /// Records one action's outcome and, if it changed the page state
    /// fingerprint, bumps the state-change counters.
    pub fn record_action(&mut self, action_type: &str, success: bool, state_changed: bool) {
        self.actions_executed += 1;
        if success {
            self.successful_actions += 1;
        } else {
            self.failed_actions += 1;
        }
        self.last_n_actions.push(action_type.to_string());
        if self.last_n_actions.len() > 10 {
            self.last_n_actions.remove(0);
        }
        if state_changed {
            self.state_changes += 1;
        }
    }
}

/// Coarse failure taxonomy used by the error classifier and the
/// supervisor's recovery strategy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Timeout,
    ElementNotFound,
    ActionFailed,
    NavigationError,
    VerificationFailed,
    SystemError,
    /// Kernel-internal failures: planning/config/io errors that never
    /// came from a worker's perceive/decide/act/verify loop.
    Planning,
    Configuration,
    Io,
    Internal,
    Unknown,
}

/// What the classifier recommends doing about a failed task, absent a
/// supervisor override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Retry,
    Continue,
    Skip,
    Abort,
}

/// Typed classification of a task failure, with enough context for the
/// supervisor to decide on a recovery strategy without re-parsing strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub category: ErrorCategory,
    pub message: String,
    pub progress_metrics: Option<ProgressMetrics>,
    pub timeout_reason: Option<String>,
    pub is_recoverable: bool,
    pub suggested_action: SuggestedAction,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl StructuredError {
    /// Classify a failure per the supervisor's default policy (§4.5):
    /// this is the fallback used before any supervisor LLM decision is
    /// consulted.
    pub fn classify(
        category: ErrorCategory,
        message: impl Into<String>,
        progress: Option<ProgressMetrics>,
    ) -> Self {
        let has_progress = progress
            .as_ref()
            .map(ProgressMetrics::has_meaningful_progress)
            .unwrap_or(false);
        let suggested_action = match category {
            ErrorCategory::Timeout => {
                if has_progress {
                    SuggestedAction::Continue
                } else {
                    SuggestedAction::Retry
                }
            }
            ErrorCategory::ElementNotFound => SuggestedAction::Retry,
            ErrorCategory::ActionFailed | ErrorCategory::NavigationError => SuggestedAction::Retry,
            ErrorCategory::VerificationFailed => SuggestedAction::Skip,
            ErrorCategory::SystemError => SuggestedAction::Abort,
            ErrorCategory::Planning
            | ErrorCategory::Configuration
            | ErrorCategory::Io
            | ErrorCategory::Internal
            | ErrorCategory::Unknown => SuggestedAction::Retry,
        };
        let is_recoverable = !matches!(suggested_action, SuggestedAction::Abort);
        StructuredError {
            category,
            message: message.into(),
            progress_metrics: progress,
            timeout_reason: None,
            is_recoverable,
            suggested_action,
            context: HashMap::new(),
        }
    }
}

/// Three-level health status of an in-flight execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// A point-in-time snapshot of the whole execution's health, computed
/// without mutating any task state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHealth {
    pub status: HealthStatus,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
    pub elapsed_ms: u64,
    pub success_rate: f64,
    pub avg_task_duration_ms: f64,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub is_stuck: bool,
    pub is_deadlocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_metrics_success_rate_and_meaningful_progress() {
        let mut pm = ProgressMetrics::default();
        assert_eq!(pm.success_rate(), 0.0);
        assert!(!pm.has_meaningful_progress());

        pm.record_action("click", true, true);
        pm.record_action("click", false, false);

        assert_eq!(pm.success_rate(), 0.5);
        assert!(pm.has_meaningful_progress());
    }

    #[test]
    fn verification_result_requires_confidence_threshold() {
        let v = VerificationResult {
            completed: true,
            confidence: 0.5,
            reasoning: "looks done".into(),
            evidence: vec![],
            issues: vec![],
        };
        assert!(!v.is_success(0.6));
        assert!(v.is_success(0.4));
    }

    #[test]
    fn classify_timeout_with_progress_continues() {
        let mut pm = ProgressMetrics::default();
        pm.record_action("type", true, true);
        let err = StructuredError::classify(ErrorCategory::Timeout, "took too long", Some(pm));
        assert_eq!(err.suggested_action, SuggestedAction::Continue);
        assert!(err.is_recoverable);
    }

    #[test]
    fn classify_timeout_without_progress_retries() {
        let err = StructuredError::classify(ErrorCategory::Timeout, "took too long", None);
        assert_eq!(err.suggested_action, SuggestedAction::Retry);
    }

    #[test]
    fn classify_system_error_aborts_and_is_unrecoverable() {
        let err = StructuredError::classify(ErrorCategory::SystemError, "panic in driver", None);
        assert_eq!(err.suggested_action, SuggestedAction::Abort);
        assert!(!err.is_recoverable);
    }

    #[test]
    fn classify_verification_failed_skips() {
        let err = StructuredError::classify(ErrorCategory::VerificationFailed, "low confidence", None);
        assert_eq!(err.suggested_action, SuggestedAction::Skip);
    }
}
