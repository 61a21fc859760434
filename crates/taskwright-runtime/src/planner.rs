//! Converts a planner LLM's [`StructuredPlan`] into a [`TaskDag`] (§6.4):
//! each step becomes a task, and step dependencies (by step number)
//! become task dependencies (by task id).

use taskwright_kernel::task::dag::{Task, TaskMetadata};
use taskwright_kernel::task::Priority;
use taskwright_kernel::TaskDag;

use crate::interfaces::{Complexity, StructuredPlan};

/// The task id a step is given, derived from its step number so
/// dependency references resolve without a lookup table.
pub fn step_task_id(step_number: u32) -> String {
    format!("step-{step_number}")
}

/// Converts a plan's complexity into a scheduling priority: more complex
/// plans get no special treatment per-task, but a `complex` plan's first
/// step is bumped to `High` so exploratory work starts promptly.
fn priority_for(step_number: u32, complexity: Complexity) -> Priority {
    if step_number == 1 && complexity == Complexity::Complex {
        Priority::High
    } else {
        Priority::Normal
    }
}

/// Builds a [`TaskDag`] from a structured plan. `skip_satisfies_dependency`
/// is threaded through from the kernel configuration (§6.6).
pub fn plan_to_dag(plan: &StructuredPlan, skip_satisfies_dependency: bool) -> TaskDag {
    let mut dag = TaskDag::new(skip_satisfies_dependency);
    for step in &plan.steps {
        let task = Task::new(step_task_id(step.number), step.description.clone())
            .with_dependencies(step.dependencies.iter().map(|n| step_task_id(*n)))
            .with_priority(priority_for(step.number, plan.complexity))
            .with_metadata(TaskMetadata {
                step_number: Some(step.number),
                estimated_time_s: step.estimated_time_s,
                fallback_strategy: step.fallback_strategy.clone(),
                extra: Default::default(),
            });
        // A malformed plan step referencing a duplicate number would
        // collide here; surfacing that as a planning error belongs to
        // whoever calls this (execute_goal), not to the silent-drop
        // behavior a planner misbehavior would otherwise cause.
        let _ = dag.add_task(task);
    }
    dag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{StepType};

    fn step(number: u32, deps: &[u32]) -> crate::interfaces::Step {
        crate::interfaces::Step {
            number,
            name: format!("step {number}"),
            description: format!("do step {number}"),
            step_type: StepType::Direct,
            dependencies: deps.to_vec(),
            estimated_time_s: None,
            fallback_strategy: None,
        }
    }

    #[test]
    fn converts_steps_to_tasks_with_matching_dependencies() {
        let plan = StructuredPlan {
            steps: vec![step(1, &[]), step(2, &[1]), step(3, &[1, 2])],
            complexity: Complexity::Moderate,
        };
        let dag = plan_to_dag(&plan, true);
        assert_eq!(dag.total_count(), 3);

        let t3 = dag.get("step-3").unwrap();
        assert!(t3.dependencies.contains("step-1"));
        assert!(t3.dependencies.contains("step-2"));

        let ready: Vec<_> = dag.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["step-1".to_string()]);
    }

    #[test]
    fn complex_plans_prioritize_the_first_step() {
        let plan = StructuredPlan {
            steps: vec![step(1, &[]), step(2, &[1])],
            complexity: Complexity::Complex,
        };
        let dag = plan_to_dag(&plan, true);
        assert_eq!(dag.get("step-1").unwrap().priority, Priority::High);
        assert_eq!(dag.get("step-2").unwrap().priority, Priority::Normal);
    }
}
