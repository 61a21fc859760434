//! Dependency resolver (C2): pure, read-only queries over a [`TaskDag`]
//! snapshot. Never mutates the graph it's given.

use std::collections::{HashMap, HashSet};

use crate::task::dag::{Task, TaskDag, TaskId};
use crate::task::TaskStatus;

/// Result of [`Resolver::validate`]: structural problems in a DAG that
/// would prevent it from ever completing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagValidation {
    pub cycles: Vec<Vec<TaskId>>,
    pub dangling_dependencies: Vec<(TaskId, TaskId)>,
}

impl DagValidation {
    pub fn is_valid(&self) -> bool {
        self.cycles.is_empty() && self.dangling_dependencies.is_empty()
    }
}

/// Stateless view over a [`TaskDag`] providing execution-order queries.
pub struct Resolver<'a> {
    dag: &'a TaskDag,
}

impl<'a> Resolver<'a> {
    pub fn new(dag: &'a TaskDag) -> Self {
        Self { dag }
    }

    /// Groups tasks into levels: level *i* contains every task whose
    /// longest dependency chain (within the graph, ignoring terminal
    /// status) is exactly *i*. Implemented by repeated Kahn-style
    /// peeling.
    pub fn execution_levels(&self) -> Vec<Vec<TaskId>> {
        let mut remaining_deps: HashMap<TaskId, HashSet<TaskId>> = self
            .dag
            .iter()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();
        let mut levels = Vec::new();

        while !remaining_deps.is_empty() {
            let mut frontier: Vec<TaskId> = remaining_deps
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();

            if frontier.is_empty() {
                // Remaining tasks form a cycle or reference ids outside
                // the snapshot; stop rather than loop forever. validate()
                // surfaces this precisely.
                break;
            }
            frontier.sort();
            for id in &frontier {
                remaining_deps.remove(id);
            }
            for deps in remaining_deps.values_mut() {
                for id in &frontier {
                    deps.remove(id);
                }
            }
            levels.push(frontier);
        }
        levels
    }

    /// A task is runnable iff it's non-terminal and every dependency is
    /// satisfied (completed, or skipped under `skip_satisfies_dependency`).
    pub fn can_run(&self, id: &str) -> bool {
        self.dag.can_run(id)
    }

    /// One longest path by estimated duration; ties broken by insertion
    /// order.
    pub fn critical_path(&self) -> Vec<TaskId> {
        let mut best_cost: HashMap<TaskId, f64> = HashMap::new();
        let mut best_pred: HashMap<TaskId, Option<TaskId>> = HashMap::new();

        let mut tasks: Vec<&Task> = self.dag.iter().collect();
        tasks.sort_by_key(|t| t.sequence);

        for task in &tasks {
            let own_cost = task.metadata.estimated_time_s();
            let (cost, pred) = task
                .dependencies
                .iter()
                .filter_map(|d| best_cost.get(d).map(|c| (*c, d.clone())))
                .max_by(|(c1, d1), (c2, d2)| {
                    c1.partial_cmp(c2)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            let s1 = self.dag.get(d1).map(|t| t.sequence).unwrap_or(u64::MAX);
                            let s2 = self.dag.get(d2).map(|t| t.sequence).unwrap_or(u64::MAX);
                            s2.cmp(&s1)
                        })
                })
                .map(|(c, d)| (c + own_cost, Some(d)))
                .unwrap_or((own_cost, None));
            best_cost.insert(task.id.clone(), cost);
            best_pred.insert(task.id.clone(), pred);
        }

        let Some(end) = best_cost
            .iter()
            .max_by(|(id1, c1), (id2, c2)| {
                c1.partial_cmp(c2)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let s1 = self.dag.get(id2.as_str()).map(|t| t.sequence).unwrap_or(0);
                        let s2 = self.dag.get(id1.as_str()).map(|t| t.sequence).unwrap_or(0);
                        s1.cmp(&s2)
                    })
            })
            .map(|(id, _)| id.clone())
        else {
            return Vec::new();
        };

        let mut path = vec![end.clone()];
        let mut current = end;
        while let Some(Some(pred)) = best_pred.get(&current) {
            path.push(pred.clone());
            current = pred.clone();
        }
        path.reverse();
        path
    }

    /// Sum of the slowest task per level: a lower bound on wall-clock
    /// time given unlimited parallelism.
    pub fn estimate_parallel_time(&self) -> f64 {
        self.execution_levels()
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|id| self.dag.get(id))
                    .map(|t| t.metadata.estimated_time_s())
                    .fold(0.0, f64::max)
            })
            .sum()
    }

    /// Sum of every task's estimated duration: time if run one at a time.
    pub fn estimate_sequential_time(&self) -> f64 {
        self.dag.iter().map(|t| t.metadata.estimated_time_s()).sum()
    }

    /// Finds structural problems: cycles and dependencies referencing
    /// ids absent from the graph.
    pub fn validate(&self) -> DagValidation {
        let mut dangling = Vec::new();
        for task in self.dag.iter() {
            for dep in &task.dependencies {
                if self.dag.get(dep).is_none() {
                    dangling.push((task.id.clone(), dep.clone()));
                }
            }
        }

        let covered: HashSet<TaskId> = self.execution_levels().into_iter().flatten().collect();
        let mut cycles = Vec::new();
        let uncovered: Vec<TaskId> = self
            .dag
            .iter()
            .map(|t| t.id.clone())
            .filter(|id| !covered.contains(id))
            .collect();
        if !uncovered.is_empty() {
            let mut sorted = uncovered;
            sorted.sort();
            cycles.push(sorted);
        }

        dangling.sort();
        DagValidation {
            cycles,
            dangling_dependencies: dangling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::dag::Task;
    use crate::task::Priority;

    fn task_with_time(id: &str, deps: &[&str], secs: f64) -> Task {
        Task::new(id, id)
            .with_dependencies(deps.iter().map(|s| s.to_string()))
            .with_metadata(crate::task::dag::TaskMetadata {
                estimated_time_s: Some(secs),
                ..Default::default()
            })
    }

    #[test]
    fn execution_levels_group_by_longest_chain() {
        let mut d = TaskDag::new(true);
        d.add_task(task_with_time("a", &[], 1.0)).unwrap();
        d.add_task(task_with_time("b", &[], 1.0)).unwrap();
        d.add_task(task_with_time("c", &["a", "b"], 1.0)).unwrap();
        d.add_task(task_with_time("d", &["c"], 1.0)).unwrap();

        let levels = Resolver::new(&d).execution_levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].len(), 2);
        assert_eq!(levels[1], vec!["c"]);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn estimate_parallel_and_sequential_time() {
        let mut d = TaskDag::new(true);
        d.add_task(task_with_time("a", &[], 10.0)).unwrap();
        d.add_task(task_with_time("b", &[], 20.0)).unwrap();
        d.add_task(task_with_time("c", &["a", "b"], 5.0)).unwrap();

        let r = Resolver::new(&d);
        assert_eq!(r.estimate_parallel_time(), 25.0);
        assert_eq!(r.estimate_sequential_time(), 35.0);
    }

    #[test]
    fn critical_path_follows_longest_weighted_chain() {
        let mut d = TaskDag::new(true);
        d.add_task(task_with_time("a", &[], 10.0)).unwrap();
        d.add_task(task_with_time("b", &[], 1.0)).unwrap();
        d.add_task(task_with_time("c", &["a"], 1.0)).unwrap();
        d.add_task(task_with_time("d", &["b"], 1.0)).unwrap();

        let path = Resolver::new(&d).critical_path();
        assert_eq!(path, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn validate_reports_dangling_dependency() {
        let mut d = TaskDag::new(true);
        d.add_task(task_with_time("a", &["ghost"], 1.0)).unwrap();
        let v = Resolver::new(&d).validate();
        assert!(!v.is_valid());
        assert_eq!(v.dangling_dependencies, vec![("a".to_string(), "ghost".to_string())]);
    }

    #[test]
    fn validate_passes_on_clean_dag() {
        let mut d = TaskDag::new(true);
        d.add_task(task_with_time("a", &[], 1.0)).unwrap();
        d.add_task(task_with_time("b", &["a"], 1.0)).unwrap();
        assert!(Resolver::new(&d).validate().is_valid());
    }

    #[test]
    fn priority_field_exists_for_scheduler_use() {
        let t = Task::new("x", "x").with_priority(Priority::Critical);
        assert_eq!(t.priority, Priority::Critical);
    }
}
