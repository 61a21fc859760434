//! `execute_goal`: the top-level entrypoint that turns a natural-language
//! goal into a plan, runs the scheduler to completion (or abort), and
//! aggregates per-task outcomes into an [`ExecutionResult`] (§7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use taskwright_kernel::config::KernelConfig;
use taskwright_kernel::contracts::TaskResult;
use taskwright_kernel::TaskDag;

use crate::cache::PerceptionCache;
use crate::interfaces::{BrowserDriver, DecisionLlm, InterfaceError, PerceptionProvider, PlannerLlm, SupervisorLlm};
use crate::planner::plan_to_dag;
use crate::scheduler::{WorkerFactory, WorkerPoolScheduler};
use crate::supervisor::{HealthMonitor, RecoveryManager, RecoveryOutcome};
use crate::worker::{Worker, WorkerConfig};

/// Aggregate outcome of one `execute_goal` call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub total_tasks: usize,
    /// Mean of completed tasks' verification confidence; `0.0` if none
    /// completed.
    pub confidence: f64,
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

/// The pluggable collaborators `execute_goal` wires together. Each is
/// shared across workers; the browser is additionally guarded by a
/// `RwLock` inside [`Worker`] to serialize mutating actions.
pub struct Collaborators {
    pub browser: Arc<tokio::sync::RwLock<dyn BrowserDriver>>,
    pub perception: Arc<dyn PerceptionProvider>,
    pub decision_llm: Arc<dyn DecisionLlm>,
    pub planner_llm: Arc<dyn PlannerLlm>,
    pub supervisor_llm: Arc<dyn SupervisorLlm>,
}

pub async fn execute_goal(
    goal: &str,
    starting_url: &str,
    config: &KernelConfig,
    collaborators: Collaborators,
) -> Result<ExecutionResult, InterfaceError> {
    let start = Instant::now();
    let deadline = start + Duration::from_secs(config.global_timeout_s);

    let plan = collaborators.planner_llm.plan(goal, starting_url, None).await?;
    let dag = plan_to_dag(&plan, config.skip_satisfies_dependency);
    let original_task_count = dag.total_count() as u32;
    let dag = Arc::new(Mutex::new(dag));

    let perception_cache: Arc<Mutex<PerceptionCache>> = Arc::new(Mutex::new(PerceptionCache::new(
        config.cache.max_entries,
        Duration::from_secs(config.cache.dom_cache_ttl_s),
    )));

    let worker_config = WorkerConfig {
        max_iterations_per_task: config.max_iterations_per_task,
        verify_confidence_threshold: config.verify_confidence_threshold,
        ..WorkerConfig::default()
    };

    let browser = Arc::clone(&collaborators.browser);
    let perception = Arc::clone(&collaborators.perception);
    let decision_llm = Arc::clone(&collaborators.decision_llm);
    let cache_for_worker = Arc::clone(&perception_cache);
    let worker_config_for_factory = worker_config.clone();

    let factory: WorkerFactory = Arc::new(move |task| {
        let worker = Worker::new(
            format!("worker-{}", task.id),
            Arc::clone(&browser),
            Arc::clone(&perception),
            Arc::clone(&decision_llm),
            Arc::clone(&cache_for_worker),
            worker_config_for_factory.clone(),
        );
        Box::pin(async move { worker.execute(task).await })
    });

    let health_monitor = Arc::new(HealthMonitor::new(Duration::from_secs(config.stuck_threshold_s)));
    let recovery_manager = RecoveryManager::new(
        Arc::clone(&collaborators.supervisor_llm),
        original_task_count,
        config.recovery_task_budget_factor,
    );

    let scheduler = WorkerPoolScheduler::new(
        Arc::clone(&dag),
        factory,
        config.max_parallel_workers as usize,
        deadline,
    )
    .with_health_monitor(Arc::clone(&health_monitor));

    let mut final_summary = scheduler.run().await;
    let mut aborted_reason: Option<String> = None;

    // Keep recovering and re-scheduling until the DAG reaches a terminal
    // state, the recovery budget is exhausted, the supervisor aborts, or
    // a round makes no structural progress (nothing inserted or skipped) —
    // whichever comes first. A single recover-then-reschedule pass isn't
    // enough: a round's recovery can itself fail again (§7).
    'recovery: loop {
        if Instant::now() >= deadline {
            break;
        }

        let mut recovered_any = false;
        {
            let mut dag_guard = dag.lock().await;
            if dag_guard.is_complete() {
                break 'recovery;
            }

            let failed_ids: Vec<String> = dag_guard
                .iter()
                .filter(|t| t.status == taskwright_kernel::task::TaskStatus::Failed)
                .map(|t| t.id.clone())
                .collect();
            if failed_ids.is_empty() {
                break 'recovery;
            }

            let total_before = dag_guard.total_count();
            let skipped_before = dag_guard.skipped_count();

            for task_id in failed_ids {
                let Some(task) = dag_guard.get(&task_id).cloned() else { continue };
                let Some(error) = task.result.as_ref().and_then(|r| r.error.clone()) else { continue };
                if !error.is_recoverable {
                    continue;
                }
                let health = health_monitor.health(&dag_guard).await;
                let request = crate::interfaces::SupervisorRequest {
                    goal: goal.to_string(),
                    failed_task_id: task_id.clone(),
                    failed_task_description: task.description.clone(),
                    error,
                    execution_health: health,
                    recent_history: vec![],
                };
                match recovery_manager.recover(&mut dag_guard, &request).await {
                    Ok(RecoveryOutcome::Applied(decision)) => {
                        info!(task_id = %task_id, decision = ?decision, "supervisor applied recovery decision");
                    }
                    Ok(RecoveryOutcome::BudgetExhausted) => {
                        aborted_reason = Some("recovery budget exhausted".to_string());
                        break;
                    }
                    Ok(RecoveryOutcome::Aborted(reason)) => {
                        aborted_reason = Some(reason);
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "supervisor decision call failed");
                    }
                }
            }

            let made_progress = dag_guard.total_count() != total_before
                || dag_guard.skipped_count() != skipped_before;
            recovered_any = aborted_reason.is_none() && made_progress;
        }

        if aborted_reason.is_some() {
            break 'recovery;
        }
        if !recovered_any {
            // The supervisor was consulted but nothing was actually
            // inserted or skipped this round; looping again would spin
            // forever on the same failed tasks.
            break 'recovery;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break 'recovery;
        }

        let follow_up = WorkerPoolScheduler::new(
            Arc::clone(&dag),
            rebuild_factory(&collaborators, &perception_cache, &worker_config),
            config.max_parallel_workers as usize,
            deadline,
        )
        .with_health_monitor(Arc::clone(&health_monitor));
        final_summary = follow_up.run().await;
    }

    let dag_guard = dag.lock().await;
    let (results, extracted_data) = collect_results(&dag_guard);
    let confidence = mean_confidence(&results);
    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| e.message.clone()))
        .collect();

    let success = aborted_reason.is_none() && dag_guard.is_complete() && final_summary.failed == 0;

    Ok(ExecutionResult {
        success,
        completed_tasks: final_summary.completed,
        failed_tasks: final_summary.failed,
        skipped_tasks: final_summary.skipped,
        total_tasks: final_summary.total,
        confidence,
        extracted_data,
        errors: aborted_reason.into_iter().chain(errors).collect(),
        elapsed: start.elapsed(),
    })
}

fn rebuild_factory(
    collaborators: &Collaborators,
    perception_cache: &Arc<Mutex<PerceptionCache>>,
    worker_config: &WorkerConfig,
) -> WorkerFactory {
    let browser = Arc::clone(&collaborators.browser);
    let perception = Arc::clone(&collaborators.perception);
    let decision_llm = Arc::clone(&collaborators.decision_llm);
    let cache = Arc::clone(perception_cache);
    let config = worker_config.clone();
    Arc::new(move |task| {
        let worker = Worker::new(
            format!("worker-{}", task.id),
            Arc::clone(&browser),
            Arc::clone(&perception),
            Arc::clone(&decision_llm),
            Arc::clone(&cache),
            config.clone(),
        );
        Box::pin(async move { worker.execute(task).await })
    })
}

fn collect_results(dag: &TaskDag) -> (Vec<TaskResult>, serde_json::Map<String, serde_json::Value>) {
    let mut results = Vec::new();
    let mut extracted = serde_json::Map::new();
    for task in dag.iter() {
        if let Some(result) = &task.result {
            extracted.extend(result.extracted_data.clone());
            results.push(result.clone());
        }
    }
    (results, extracted)
}

fn mean_confidence(results: &[TaskResult]) -> f64 {
    let confidences: Vec<f64> = results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.verification.as_ref())
        .map(|v| v.confidence)
        .collect();
    if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    }
}
