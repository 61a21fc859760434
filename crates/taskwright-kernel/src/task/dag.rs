//! The task DAG itself: storage, status transitions, and the handful of
//! pure query operations (`ready_tasks`, `is_complete`, counts) that the
//! scheduler and health monitor depend on.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::contracts::TaskResult;
use crate::error::{KernelError, KernelResult};
use crate::task::{Priority, TaskStatus};

/// Opaque task identifier. Callers mint their own (planner step ids,
/// supervisor-generated recovery ids); the DAG only requires uniqueness.
pub type TaskId = String;

/// Planner/supervisor-attached metadata: step number, estimated duration
/// used by the resolver's time estimates, and a free-form fallback
/// strategy hint plus arbitrary key/values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub step_number: Option<u32>,
    pub estimated_time_s: Option<f64>,
    pub fallback_strategy: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TaskMetadata {
    /// Default estimated duration used by the resolver when a task
    /// carries none (§4.2).
    pub const DEFAULT_ESTIMATED_TIME_S: f64 = 30.0;

    pub fn estimated_time_s(&self) -> f64 {
        self.estimated_time_s.unwrap_or(Self::DEFAULT_ESTIMATED_TIME_S)
    }
}

/// A single unit of work in the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub dependencies: HashSet<TaskId>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_worker: Option<String>,
    pub metadata: TaskMetadata,
    pub result: Option<TaskResult>,
    /// Monotonic insertion sequence, used to break priority ties (§4.3)
    /// and critical-path ties (§4.2).
    pub(crate) sequence: u64,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: HashSet::new(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            assigned_worker: None,
            metadata: TaskMetadata::default(),
            result: None,
            sequence: 0,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The task graph: a map from id to [`Task`] plus forward adjacency
/// (dependents), enforcing the status-transition and acyclicity
/// invariants (§3 TaskDAG).
#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    tasks: HashMap<TaskId, Task>,
    /// parent id -> set of child ids that depend on it.
    dependents: HashMap<TaskId, HashSet<TaskId>>,
    next_sequence: u64,
    skip_satisfies_dependency: bool,
}

impl TaskDag {
    pub fn new(skip_satisfies_dependency: bool) -> Self {
        Self {
            tasks: HashMap::new(),
            dependents: HashMap::new(),
            next_sequence: 0,
            skip_satisfies_dependency,
        }
    }

    /// Inserts a task. Dependencies are not required to already exist in
    /// the graph (the supervisor may insert tasks out of order); they are
    /// validated lazily by [`Self::ready_tasks`] and [`Self::validate`].
    pub fn add_task(&mut self, mut task: Task) -> KernelResult<&Task> {
        if self.tasks.contains_key(&task.id) {
            return Err(KernelError::DuplicateTask(task.id));
        }
        task.sequence = self.next_sequence;
        self.next_sequence += 1;
        for dep in &task.dependencies {
            self.dependents.entry(dep.clone()).or_default().insert(task.id.clone());
        }
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        Ok(self.tasks.get(&id).expect("just inserted"))
    }

    /// Adds `child_id` as depending on `parent_id`. Rejects the edge if it
    /// would close a cycle (DFS from parent through existing edges
    /// looking for child).
    pub fn add_dependency(&mut self, child_id: &str, parent_id: &str) -> KernelResult<()> {
        if !self.tasks.contains_key(child_id) {
            return Err(KernelError::TaskNotFound(child_id.to_string()));
        }
        if !self.tasks.contains_key(parent_id) {
            return Err(KernelError::TaskNotFound(parent_id.to_string()));
        }
        if self.reaches(parent_id, child_id) {
            return Err(KernelError::CycleDetected {
                path: format!("{parent_id} -> ... -> {child_id} -> {parent_id}"),
            });
        }
        self.tasks
            .get_mut(child_id)
            .expect("checked above")
            .dependencies
            .insert(parent_id.to_string());
        self.dependents
            .entry(parent_id.to_string())
            .or_default()
            .insert(child_id.to_string());
        Ok(())
    }

    /// Whether `from` can reach `to` by following dependency edges
    /// forward (i.e. through dependents). Used to detect would-be cycles.
    fn reaches(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(children) = self.dependents.get(&current) {
                queue.extend(children.iter().cloned());
            }
        }
        false
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Atomically claims a task for a worker. Requires status is
    /// `Pending` or `Ready`.
    pub fn mark_running(&mut self, id: &str, worker_id: impl Into<String>) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
            return Err(KernelError::InvalidValue {
                field: "status".into(),
                reason: format!(
                    "task '{id}' is {:?}, cannot transition to Running",
                    task.status
                ),
            });
        }
        task.status = TaskStatus::Running;
        task.assigned_worker = Some(worker_id.into());
        Ok(())
    }

    pub fn mark_completed(&mut self, id: &str, result: TaskResult) -> KernelResult<()> {
        self.mark_terminal(id, TaskStatus::Completed, Some(result), &[TaskStatus::Running])
    }

    pub fn mark_failed(&mut self, id: &str, result: TaskResult) -> KernelResult<()> {
        self.mark_terminal(id, TaskStatus::Failed, Some(result), &[TaskStatus::Running])
    }

    /// Marks a task skipped. Unlike completed/failed, this is legal from
    /// any non-terminal status (the supervisor may skip a task that
    /// never ran).
    pub fn mark_skipped(&mut self, id: &str) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        if task.status.is_terminal() {
            return Err(KernelError::InvalidValue {
                field: "status".into(),
                reason: format!("task '{id}' is already terminal ({:?})", task.status),
            });
        }
        task.status = TaskStatus::Skipped;
        Ok(())
    }

    fn mark_terminal(
        &mut self,
        id: &str,
        new_status: TaskStatus,
        result: Option<TaskResult>,
        required_from: &[TaskStatus],
    ) -> KernelResult<()> {
        let task = self.task_mut(id)?;
        if !required_from.contains(&task.status) {
            return Err(KernelError::InvalidValue {
                field: "status".into(),
                reason: format!(
                    "task '{id}' is {:?}, cannot transition to {new_status:?}",
                    task.status
                ),
            });
        }
        task.status = new_status;
        task.result = result;
        Ok(())
    }

    fn task_mut(&mut self, id: &str) -> KernelResult<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| KernelError::TaskNotFound(id.to_string()))
    }

    /// Whether a dependency is satisfied: completed, or skipped when
    /// `skip_satisfies_dependency` is enabled.
    fn dependency_satisfied(&self, dep_id: &str) -> bool {
        match self.tasks.get(dep_id) {
            Some(t) => {
                t.status == TaskStatus::Completed
                    || (self.skip_satisfies_dependency && t.status == TaskStatus::Skipped)
            }
            // A dependency that doesn't exist yet (supervisor inserts out
            // of order) is simply not satisfied.
            None => false,
        }
    }

    pub fn can_run(&self, id: &str) -> bool {
        match self.tasks.get(id) {
            Some(t) if !t.status.is_terminal() => {
                t.dependencies.iter().all(|d| self.dependency_satisfied(d))
            }
            _ => false,
        }
    }

    /// Pure query: tasks whose dependencies are all satisfied and whose
    /// status is `Pending` or `Ready`, ordered by priority (high first)
    /// then insertion order (§4.3 fairness).
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter(|t| t.dependencies.iter().all(|d| self.dependency_satisfied(d)))
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        ready
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn completed_count(&self) -> usize {
        self.count_with(TaskStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count_with(TaskStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count_with(TaskStatus::Skipped)
    }

    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    fn count_with(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// True iff at least one task is non-terminal and zero are ready.
    /// Computed purely from current statuses — never mutates, per the
    /// invariant that deadlock detection must not have side effects.
    pub fn is_deadlocked(&self) -> bool {
        let any_non_terminal = self.tasks.values().any(|t| !t.status.is_terminal());
        any_non_terminal && self.ready_tasks().is_empty() && !self.any_running()
    }

    fn any_running(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag() -> TaskDag {
        TaskDag::new(true)
    }

    #[test]
    fn add_task_rejects_duplicates() {
        let mut d = dag();
        d.add_task(Task::new("a", "do a")).unwrap();
        let err = d.add_task(Task::new("a", "do a again")).unwrap_err();
        assert!(matches!(err, KernelError::DuplicateTask(_)));
    }

    #[test]
    fn ready_tasks_respects_dependencies() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b").with_dependencies(["a".to_string()]))
            .unwrap();

        let ready: Vec<_> = d.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["a".to_string()]);

        d.mark_running("a", "w1").unwrap();
        d.mark_completed(
            "a",
            crate::contracts::TaskResult {
                task_id: "a".into(),
                success: true,
                action_history: vec![],
                extracted_data: Default::default(),
                verification: None,
                start_ms: 0,
                end_ms: 1,
                duration_ms: 1,
                worker_id: "w1".into(),
                error: None,
                needs_replan: false,
                replan_reason: None,
            },
        )
        .unwrap();

        let ready: Vec<_> = d.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["b".to_string()]);
    }

    #[test]
    fn ready_tasks_orders_by_priority_then_insertion() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b").with_priority(Priority::High))
            .unwrap();
        d.add_task(Task::new("c", "c")).unwrap();

        let ready: Vec<_> = d.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["b", "a", "c"]);
    }

    #[test]
    fn add_dependency_rejects_cycle() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b")).unwrap();
        d.add_dependency("b", "a").unwrap();
        let err = d.add_dependency("a", "b").unwrap_err();
        assert!(matches!(err, KernelError::CycleDetected { .. }));
    }

    #[test]
    fn mark_running_requires_pending_or_ready() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.mark_running("a", "w1").unwrap();
        let err = d.mark_running("a", "w2").unwrap_err();
        assert!(matches!(err, KernelError::InvalidValue { .. }));
    }

    #[test]
    fn skip_satisfies_dependency_when_enabled() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b").with_dependencies(["a".to_string()]))
            .unwrap();
        d.mark_skipped("a").unwrap();
        assert!(d.can_run("b"));
    }

    #[test]
    fn skip_blocks_dependency_when_disabled() {
        let mut d = TaskDag::new(false);
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b").with_dependencies(["a".to_string()]))
            .unwrap();
        d.mark_skipped("a").unwrap();
        assert!(!d.can_run("b"));
    }

    #[test]
    fn is_deadlocked_true_when_non_terminal_and_no_ready() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.add_task(Task::new("b", "b").with_dependencies(["missing".to_string()]))
            .unwrap();
        d.mark_running("a", "w1").unwrap();
        d.mark_failed(
            "a",
            crate::contracts::TaskResult {
                task_id: "a".into(),
                success: false,
                action_history: vec![],
                extracted_data: Default::default(),
                verification: None,
                start_ms: 0,
                end_ms: 1,
                duration_ms: 1,
                worker_id: "w1".into(),
                error: None,
                needs_replan: false,
                replan_reason: None,
            },
        )
        .unwrap();
        assert!(d.is_deadlocked());
    }

    #[test]
    fn is_deadlocked_false_while_a_task_is_running() {
        let mut d = dag();
        d.add_task(Task::new("a", "a")).unwrap();
        d.mark_running("a", "w1").unwrap();
        assert!(!d.is_deadlocked());
    }
}
