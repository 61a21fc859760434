//! AI Supervisor (C5): health monitoring, failure classification, and an
//! LLM-backed decision engine that can retry, skip, bridge, replan, or
//! abort in response to a terminal failure or an unresolved deadlock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use taskwright_kernel::contracts::{ErrorCategory, ExecutionHealth, HealthStatus, StructuredError};
use taskwright_kernel::recovery::RecoveryBudget;
use taskwright_kernel::task::dag::{Task, TaskMetadata};
use taskwright_kernel::TaskDag;

use crate::interfaces::{InterfaceError, Step, SupervisorDecision, SupervisorLlm, SupervisorRequest};

/// Computes [`ExecutionHealth`] from a DAG snapshot without mutating any
/// task state (§4.5, §8 property 6).
pub struct HealthMonitor {
    stuck_threshold: Duration,
    start: Instant,
    last_success: Arc<Mutex<Option<Instant>>>,
    durations_ms: Arc<Mutex<Vec<u64>>>,
}

impl HealthMonitor {
    pub fn new(stuck_threshold: Duration) -> Self {
        Self {
            stuck_threshold,
            start: Instant::now(),
            last_success: Arc::new(Mutex::new(None)),
            durations_ms: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Called by the scheduler/supervisor glue whenever a task
    /// completes, so stuck-detection and average-duration have fresh
    /// data without the health check itself touching the DAG's mutex.
    pub async fn record_task_result(&self, success: bool, duration_ms: u64) {
        if success {
            *self.last_success.lock().await = Some(Instant::now());
        }
        self.durations_ms.lock().await.push(duration_ms);
    }

    pub async fn health(&self, dag: &TaskDag) -> ExecutionHealth {
        let completed = dag.completed_count() as u32;
        let failed = dag.failed_count() as u32;
        let total = dag.total_count() as u32;
        let elapsed = self.start.elapsed();

        let success_rate = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };

        let avg_duration_ms = {
            let durations = self.durations_ms.lock().await;
            if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / durations.len() as f64
            }
        };

        let is_stuck = {
            let last_success = self.last_success.lock().await;
            match *last_success {
                Some(t) => t.elapsed() > self.stuck_threshold,
                None => elapsed > self.stuck_threshold && completed == 0,
            }
        };
        // Deliberately a pure read of current statuses: is_deadlocked()
        // never mutates the DAG (§8 property 6).
        let is_deadlocked = dag.is_deadlocked();

        let mut concerns = Vec::new();
        if is_stuck {
            concerns.push(format!(
                "no successful task in the last {} seconds",
                self.stuck_threshold.as_secs()
            ));
        }
        if is_deadlocked {
            concerns.push("tasks are blocked by unsatisfied or failed dependencies".to_string());
        }
        if success_rate < 0.5 && completed > 2 {
            concerns.push("success rate below 50%".to_string());
        }
        if avg_duration_ms > 30_000.0 {
            concerns.push("tasks taking longer than expected".to_string());
        }

        let status = if (is_deadlocked && !dag.is_complete())
            || (failed >= 3 && failed as f64 > 2.0 * completed as f64)
        {
            HealthStatus::Critical
        } else if (success_rate < 0.3 && completed + failed >= 5)
            || self.stuck_for_longer_than(Duration::from_secs(120)).await
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        ExecutionHealth {
            status,
            completed,
            failed,
            total,
            elapsed_ms: elapsed.as_millis() as u64,
            success_rate,
            avg_task_duration_ms: avg_duration_ms,
            concerns,
            is_stuck,
            is_deadlocked,
        }
    }

    async fn stuck_for_longer_than(&self, threshold: Duration) -> bool {
        match *self.last_success.lock().await {
            Some(t) => t.elapsed() > threshold,
            None => self.start.elapsed() > threshold,
        }
    }
}

/// Turns a terminal failure's raw message + progress metrics into a
/// [`StructuredError`] with a suggested action, per the defaults in
/// §4.5. The category is assumed to already be known (the worker loop
/// classifies at the point of failure); this mirrors the source's
/// `ErrorClassifier`, which re-derives the suggested action from the
/// category and progress alone.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(
        category: ErrorCategory,
        message: impl Into<String>,
        progress: Option<taskwright_kernel::contracts::ProgressMetrics>,
    ) -> StructuredError {
        StructuredError::classify(category, message, progress)
    }
}

/// The canonical named recovery strategies (§4.5), beyond the plain
/// retry/skip/bridge/replan actions: these describe *how* a REPLAN or
/// RETRY decision rewrites the failed task, not just that it does.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Mark a verification-only task complete outright; used when the
    /// underlying work plainly happened but verification itself failed.
    SkipVerification,
    /// Retry with a shortened, less ambitious description.
    RetryWithSimplifiedTask,
    /// Insert a minimal placeholder task to unblock downstream work.
    BridgeTask,
    /// Ask the planner for a new plan given what's completed so far.
    Replanning,
}

impl RecoveryStrategy {
    /// Maps a failure pattern name to a strategy, defaulting to
    /// skip-verification when the pattern is unrecognized — the same
    /// fallback the source's `RecoveryManager` uses.
    pub fn for_pattern(pattern: &str) -> Self {
        match pattern {
            "verification_failure" => RecoveryStrategy::SkipVerification,
            "action_redundancy" | "complex_analysis" => RecoveryStrategy::RetryWithSimplifiedTask,
            "timeout" | "critical_block" => RecoveryStrategy::BridgeTask,
            "deadlock" => RecoveryStrategy::Replanning,
            _ => RecoveryStrategy::SkipVerification,
        }
    }

    /// Shortens an overly composite task description using the same
    /// canned substitution table as the source's simplifier, falling
    /// back to truncation.
    pub fn simplify_description(description: &str) -> String {
        const REPLACEMENTS: &[(&str, &str)] = &[
            ("observe the position and color", "wait for result to appear"),
            ("analyze result and formulate", "wait 3 seconds"),
            ("verify task completion", "assume success"),
            ("press the Enter key", "press enter if input field exists"),
        ];
        for (pattern, replacement) in REPLACEMENTS {
            if description.contains(pattern) {
                return description.replace(pattern, replacement);
            }
        }
        if description.len() > 100 {
            format!("{} (simplified)", &description[..100])
        } else {
            format!("{description} (simplified)")
        }
    }
}

/// Orchestrates recovery: consults the supervisor LLM, enforces the
/// recovery budget, and applies the chosen [`SupervisorDecision`] to the
/// DAG.
pub struct RecoveryManager {
    llm: Arc<dyn SupervisorLlm>,
    budget: Mutex<RecoveryBudget>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Applied(SupervisorDecision),
    BudgetExhausted,
    Aborted(String),
}

impl RecoveryManager {
    pub fn new(llm: Arc<dyn SupervisorLlm>, original_task_count: u32, factor: f64) -> Self {
        Self {
            llm,
            budget: Mutex::new(RecoveryBudget::new(original_task_count, factor)),
        }
    }

    /// Consults the supervisor LLM and applies its decision to `dag`,
    /// spending one unit of recovery budget per task the decision
    /// inserts into the graph (so a single `Replan` that inserts N tasks
    /// costs N units, not one — §8 property 8: total supervisor-inserted
    /// tasks stays `<= factor * original_task_count`). Skip and abort
    /// cost nothing; a `Replan` that runs out of budget partway through
    /// stops inserting and reports `BudgetExhausted` rather than
    /// inserting the rest for free.
    pub async fn recover(
        &self,
        dag: &mut TaskDag,
        request: &SupervisorRequest,
    ) -> Result<RecoveryOutcome, InterfaceError> {
        let decision = self.llm.decide(request).await?;

        match &decision {
            SupervisorDecision::Retry { task_id } => {
                if !self.spend_one().await {
                    warn!("recovery budget exhausted, forcing abort");
                    return Ok(RecoveryOutcome::BudgetExhausted);
                }
                if let Some(original) = dag.get(task_id).cloned() {
                    let new_id = format!("{task_id}-retry-{}", uuid::Uuid::new_v4());
                    let new_task = Task::new(new_id, original.description.clone())
                        .with_dependencies(original.dependencies.clone())
                        .with_priority(original.priority);
                    dag.add_task(new_task).ok();
                }
            }
            SupervisorDecision::Skip { task_id } => {
                dag.mark_skipped(task_id).ok();
            }
            SupervisorDecision::Bridge { task_id } => {
                if !self.spend_one().await {
                    warn!("recovery budget exhausted, forcing abort");
                    return Ok(RecoveryOutcome::BudgetExhausted);
                }
                if let Some(original) = dag.get(task_id).cloned() {
                    let bridge_id = format!("bridge-{task_id}");
                    let bridge = Task::new(bridge_id, format!("bridge for {task_id}"))
                        .with_dependencies(original.dependencies.clone());
                    dag.add_task(bridge).ok();
                }
            }
            SupervisorDecision::Replan { alternative, new_tasks } => {
                for step in new_tasks.iter().chain(alternative.iter()) {
                    if !self.spend_one().await {
                        warn!("recovery budget exhausted mid-replan, stopping insertion");
                        return Ok(RecoveryOutcome::BudgetExhausted);
                    }
                    dag.add_task(step_to_task(step)).ok();
                }
            }
            SupervisorDecision::Abort { reason } => {
                info!(reason = %reason, "supervisor issued abort");
                return Ok(RecoveryOutcome::Aborted(reason.clone()));
            }
        }

        Ok(RecoveryOutcome::Applied(decision))
    }

    /// Spends one recovery-budget unit; `false` if the budget was
    /// already exhausted.
    async fn spend_one(&self) -> bool {
        self.budget.lock().await.spend()
    }
}

fn step_to_task(step: &Step) -> Task {
    let id = format!("step-{}-{}", step.number, uuid::Uuid::new_v4());
    Task::new(id, step.description.clone())
        .with_dependencies(step.dependencies.iter().map(|n| format!("step-{n}")))
        .with_metadata(TaskMetadata {
            step_number: Some(step.number),
            estimated_time_s: step.estimated_time_s,
            fallback_strategy: step.fallback_strategy.clone(),
            extra: Default::default(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_strategy_maps_known_patterns() {
        assert_eq!(
            RecoveryStrategy::for_pattern("verification_failure"),
            RecoveryStrategy::SkipVerification
        );
        assert_eq!(
            RecoveryStrategy::for_pattern("timeout"),
            RecoveryStrategy::BridgeTask
        );
        assert_eq!(
            RecoveryStrategy::for_pattern("deadlock"),
            RecoveryStrategy::Replanning
        );
    }

    #[test]
    fn recovery_strategy_defaults_to_skip_verification_for_unknown_pattern() {
        assert_eq!(
            RecoveryStrategy::for_pattern("something_new"),
            RecoveryStrategy::SkipVerification
        );
    }

    #[test]
    fn simplify_description_uses_known_substitution() {
        let simplified = RecoveryStrategy::simplify_description(
            "observe the position and color of the marker",
        );
        assert!(simplified.starts_with("wait for result to appear"));
    }

    #[test]
    fn simplify_description_truncates_unknown_long_text() {
        let long = "x".repeat(150);
        let simplified = RecoveryStrategy::simplify_description(&long);
        assert!(simplified.ends_with("(simplified)"));
        assert!(simplified.len() < long.len() + 20);
    }

    #[tokio::test]
    async fn health_monitor_reports_healthy_with_no_tasks() {
        let dag = TaskDag::new(true);
        let monitor = HealthMonitor::new(Duration::from_secs(60));
        let health = monitor.health(&dag).await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(!health.is_deadlocked);
    }

    #[tokio::test]
    async fn health_monitor_flags_critical_on_many_failures() {
        let mut dag = TaskDag::new(true);
        for i in 0..4 {
            let id = format!("t{i}");
            dag.add_task(Task::new(id.clone(), "x")).unwrap();
            dag.mark_running(&id, "w").unwrap();
            dag.mark_failed(
                &id,
                taskwright_kernel::contracts::TaskResult {
                    task_id: id.clone(),
                    success: false,
                    action_history: vec![],
                    extracted_data: Default::default(),
                    verification: None,
                    start_ms: 0,
                    end_ms: 1,
                    duration_ms: 1,
                    worker_id: "w".into(),
                    error: None,
                    needs_replan: false,
                    replan_reason: None,
                },
            )
            .unwrap();
        }
        let monitor = HealthMonitor::new(Duration::from_secs(60));
        let health = monitor.health(&dag).await;
        assert_eq!(health.status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn health_monitor_not_stuck_while_tasks_keep_completing() {
        let dag = TaskDag::new(true);
        let monitor = HealthMonitor::new(Duration::from_secs(1));
        monitor.record_task_result(true, 10).await;
        let health = monitor.health(&dag).await;
        assert!(!health.is_stuck);
        assert_eq!(health.avg_task_duration_ms, 10.0);
    }

    struct ReplanLlm {
        new_task_count: usize,
        with_alternative: bool,
    }

    #[async_trait::async_trait]
    impl SupervisorLlm for ReplanLlm {
        async fn decide(
            &self,
            _request: &SupervisorRequest,
        ) -> Result<SupervisorDecision, InterfaceError> {
            let new_tasks = (0..self.new_task_count)
                .map(|i| Step {
                    number: i as u32 + 1,
                    name: format!("step-{i}"),
                    description: format!("recovery step {i}"),
                    step_type: crate::interfaces::StepType::Direct,
                    dependencies: vec![],
                    estimated_time_s: None,
                    fallback_strategy: None,
                })
                .collect();
            let alternative = self.with_alternative.then(|| Step {
                number: 0,
                name: "alt".into(),
                description: "alternative step".into(),
                step_type: crate::interfaces::StepType::Direct,
                dependencies: vec![],
                estimated_time_s: None,
                fallback_strategy: None,
            });
            Ok(SupervisorDecision::Replan { alternative, new_tasks })
        }
    }

    fn sample_request() -> SupervisorRequest {
        SupervisorRequest {
            goal: "goal".into(),
            failed_task_id: "t0".into(),
            failed_task_description: "do a thing".into(),
            error: StructuredError::classify(ErrorCategory::SystemError, "boom", None),
            execution_health: taskwright_kernel::contracts::ExecutionHealth {
                status: HealthStatus::Healthy,
                completed: 0,
                failed: 1,
                total: 1,
                elapsed_ms: 0,
                success_rate: 0.0,
                avg_task_duration_ms: 0.0,
                concerns: vec![],
                is_stuck: false,
                is_deadlocked: false,
            },
            recent_history: vec![],
        }
    }

    #[tokio::test]
    async fn replan_charges_budget_per_inserted_task() {
        // budget limit = 2 * 1.0 = 2.
        let manager = RecoveryManager::new(
            Arc::new(ReplanLlm { new_task_count: 2, with_alternative: false }),
            2,
            1.0,
        );
        let mut dag = TaskDag::new(true);
        dag.add_task(Task::new("t0", "x")).unwrap();

        let outcome = manager.recover(&mut dag, &sample_request()).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Applied(_)));
        // Both new tasks fit exactly within the 2-unit budget.
        assert_eq!(dag.total_count(), 3);
    }

    #[tokio::test]
    async fn replan_stops_and_reports_budget_exhausted_mid_insert() {
        // budget limit = 1 * 1.0 = 1, but this decision wants 3 insertions.
        let manager = RecoveryManager::new(
            Arc::new(ReplanLlm { new_task_count: 2, with_alternative: true }),
            1,
            1.0,
        );
        let mut dag = TaskDag::new(true);
        dag.add_task(Task::new("t0", "x")).unwrap();

        let outcome = manager.recover(&mut dag, &sample_request()).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::BudgetExhausted);
        // Only the first insertion (one unit of budget) went through.
        assert_eq!(dag.total_count(), 2);
    }
}
