//! Worker-pool scheduler (C3): pulls ready tasks from the DAG, hands them
//! to worker tasks up to a fixed parallelism, and enforces the global
//! deadline.
//!
//! The ready queue and completion signal are a bounded channel plus a
//! `Notify`, per the design notes' guidance to replace ad-hoc event
//! loops with explicit queues/channels. The DAG itself is the only
//! shared mutable state, guarded by a single `tokio::sync::Mutex` (§5).

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use taskwright_kernel::contracts::{ErrorCategory, StructuredError, SuggestedAction, TaskResult};
use taskwright_kernel::task::TaskId;
use taskwright_kernel::TaskDag;

use crate::supervisor::HealthMonitor;

/// A task's execution, produced by the worker execution loop. Boxed so
/// the scheduler doesn't need to know the concrete collaborator types.
pub type WorkerFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
pub type WorkerFactory = Arc<dyn Fn(taskwright_kernel::task::Task) -> WorkerFuture + Send + Sync>;

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Aggregate result of one `run()` call (§4.3 item 6).
#[derive(Debug, Clone)]
pub struct SchedulerSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub deadline_exceeded: bool,
}

pub struct WorkerPoolScheduler {
    dag: Arc<Mutex<TaskDag>>,
    worker_factory: WorkerFactory,
    max_parallel: usize,
    deadline: Instant,
    health_monitor: Option<Arc<HealthMonitor>>,
}

impl WorkerPoolScheduler {
    pub fn new(
        dag: Arc<Mutex<TaskDag>>,
        worker_factory: WorkerFactory,
        max_parallel: usize,
        deadline: Instant,
    ) -> Self {
        Self {
            dag,
            worker_factory,
            max_parallel: max_parallel.max(1),
            deadline,
            health_monitor: None,
        }
    }

    /// Feeds every task completion this run observes into `monitor`, so
    /// `HealthMonitor::health`'s stuck-detection and average-duration
    /// figures reflect real progress instead of staying empty (§4.5).
    pub fn with_health_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    pub async fn run(&self) -> SchedulerSummary {
        let start = Instant::now();
        let enqueued: Arc<Mutex<HashSet<TaskId>>> = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::channel::<TaskId>(1024);
        let rx = Arc::new(Mutex::new(rx));
        let notify = Arc::new(Notify::new());

        let pump = self.spawn_pump(tx, Arc::clone(&enqueued), Arc::clone(&notify));

        let mut handles = Vec::with_capacity(self.max_parallel);
        for worker_idx in 0..self.max_parallel {
            let dag = Arc::clone(&self.dag);
            let rx = Arc::clone(&rx);
            let enqueued = Arc::clone(&enqueued);
            let notify = Arc::clone(&notify);
            let factory = Arc::clone(&self.worker_factory);
            let deadline = self.deadline;
            let health_monitor = self.health_monitor.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_idx, dag, rx, enqueued, notify, factory, deadline, health_monitor).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        pump.abort();

        let deadline_exceeded = Instant::now() >= self.deadline;
        let dag = self.dag.lock().await;
        let summary = SchedulerSummary {
            completed: dag.completed_count(),
            failed: dag.failed_count(),
            skipped: dag.skipped_count(),
            total: dag.total_count(),
            elapsed: start.elapsed(),
            deadline_exceeded,
        };
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            total = summary.total,
            "scheduler run complete"
        );
        summary
    }

    fn spawn_pump(
        &self,
        tx: mpsc::Sender<TaskId>,
        enqueued: Arc<Mutex<HashSet<TaskId>>>,
        notify: Arc<Notify>,
    ) -> tokio::task::JoinHandle<()> {
        let dag = Arc::clone(&self.dag);
        let deadline = self.deadline;
        tokio::spawn(async move {
            loop {
                if Instant::now() >= deadline {
                    break;
                }
                let (ready_ids, is_complete) = {
                    let dag = dag.lock().await;
                    (
                        dag.ready_tasks().into_iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
                        dag.is_complete(),
                    )
                };
                if is_complete {
                    break;
                }
                {
                    let mut enqueued = enqueued.lock().await;
                    for id in ready_ids {
                        // Idempotent enqueue: a task id is sent at most
                        // once per readiness transition (§8 property 10).
                        if enqueued.insert(id.clone()) {
                            if tx.send(id).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(PUMP_INTERVAL) => {}
                }
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    worker_idx: usize,
    dag: Arc<Mutex<TaskDag>>,
    rx: Arc<Mutex<mpsc::Receiver<TaskId>>>,
    enqueued: Arc<Mutex<HashSet<TaskId>>>,
    notify: Arc<Notify>,
    factory: WorkerFactory,
    deadline: Instant,
    health_monitor: Option<Arc<HealthMonitor>>,
) {
    let worker_id = format!("worker-{worker_idx}");
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let task_id = {
            let mut rx = rx.lock().await;
            match tokio::time::timeout(remaining.min(PUMP_INTERVAL * 4), rx.recv()).await {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(_) => {
                    // No task arrived within the wait window; re-check
                    // overall completion before looping (handles the
                    // "exit if deadlocked" branch of §4.3 item 1c — the
                    // supervisor is responsible for resolving deadlocks,
                    // the scheduler just stops spinning once the DAG is
                    // done or the deadline has passed).
                    let dag = dag.lock().await;
                    if dag.is_complete() || Instant::now() >= deadline {
                        break;
                    }
                    continue;
                }
            }
        };

        let task = {
            let mut dag = dag.lock().await;
            match dag.mark_running(&task_id, worker_id.clone()) {
                Ok(()) => dag.get(&task_id).cloned(),
                Err(err) => {
                    // Already claimed by another worker or otherwise
                    // stale; drop silently, this is not a failure.
                    debug!(task_id, error = %err, "skipping stale ready-queue entry");
                    None
                }
            }
        };
        let Some(task) = task else { continue };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = tokio::time::timeout(remaining, factory(task.clone())).await;

        let task_result = match result {
            Ok(task_result) => task_result,
            Err(_) => timeout_result(&task, &worker_id),
        };

        let success = task_result.success;
        let duration_ms = task_result.duration_ms;
        {
            let mut dag = dag.lock().await;
            let outcome = if success {
                dag.mark_completed(&task_id, task_result)
            } else {
                dag.mark_failed(&task_id, task_result)
            };
            if let Err(err) = outcome {
                warn!(task_id, error = %err, "failed to record terminal task result");
            }
        }
        if let Some(monitor) = &health_monitor {
            monitor.record_task_result(success, duration_ms).await;
        }
        enqueued.lock().await.remove(&task_id);
        notify.notify_waiters();
    }
}

fn timeout_result(task: &taskwright_kernel::task::Task, worker_id: &str) -> TaskResult {
    let now = now_ms();
    TaskResult {
        task_id: task.id.clone(),
        success: false,
        action_history: vec![],
        extracted_data: Default::default(),
        verification: None,
        start_ms: now,
        end_ms: now,
        duration_ms: 0,
        worker_id: worker_id.to_string(),
        error: Some(StructuredError {
            category: ErrorCategory::Timeout,
            message: "global deadline exceeded".into(),
            progress_metrics: None,
            timeout_reason: Some("TIME_LIMIT".into()),
            is_recoverable: false,
            suggested_action: SuggestedAction::Abort,
            context: Default::default(),
        }),
        needs_replan: false,
        replan_reason: None,
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwright_kernel::task::dag::Task;

    fn immediate_success(task: taskwright_kernel::task::Task) -> WorkerFuture {
        Box::pin(async move {
            let now = now_ms();
            TaskResult {
                task_id: task.id.clone(),
                success: true,
                action_history: vec![],
                extracted_data: Default::default(),
                verification: None,
                start_ms: now,
                end_ms: now,
                duration_ms: 0,
                worker_id: "test".into(),
                error: None,
                needs_replan: false,
                replan_reason: None,
            }
        })
    }

    #[tokio::test]
    async fn runs_a_linear_plan_to_completion() {
        let mut dag = TaskDag::new(true);
        dag.add_task(Task::new("a", "a")).unwrap();
        dag.add_task(Task::new("b", "b").with_dependencies(["a".to_string()]))
            .unwrap();
        dag.add_task(Task::new("c", "c").with_dependencies(["b".to_string()]))
            .unwrap();

        let scheduler = WorkerPoolScheduler::new(
            Arc::new(Mutex::new(dag)),
            Arc::new(immediate_success),
            2,
            Instant::now() + Duration::from_secs(5),
        );

        let summary = scheduler.run().await;
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert!(!summary.deadline_exceeded);
    }

    #[tokio::test]
    async fn deadline_marks_in_flight_task_as_timeout() {
        let mut dag = TaskDag::new(true);
        dag.add_task(Task::new("a", "a")).unwrap();

        let scheduler = WorkerPoolScheduler::new(
            Arc::new(Mutex::new(dag)),
            Arc::new(|task| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    immediate_result_unreachable(task)
                })
            }),
            1,
            Instant::now() + Duration::from_millis(100),
        );

        let summary = scheduler.run().await;
        assert_eq!(summary.failed, 1);
    }

    fn immediate_result_unreachable(task: taskwright_kernel::task::Task) -> TaskResult {
        let now = now_ms();
        TaskResult {
            task_id: task.id,
            success: true,
            action_history: vec![],
            extracted_data: Default::default(),
            verification: None,
            start_ms: now,
            end_ms: now,
            duration_ms: 0,
            worker_id: "test".into(),
            error: None,
            needs_replan: false,
            replan_reason: None,
        }
    }
}
