//! Async I/O layer of the taskwright orchestration kernel: external
//! collaborator traits, the perception/decision caches, the worker-pool
//! scheduler (C3), the per-task execution loop (C4), the AI supervisor
//! (C5), the planner-to-DAG converter, and the `execute_goal` entrypoint
//! that wires all of the above together.

pub mod cache;
pub mod execute;
pub mod interfaces;
pub mod planner;
pub mod scheduler;
pub mod supervisor;
pub mod worker;

pub use execute::{execute_goal, Collaborators, ExecutionResult};
pub use interfaces::{
    BrowserDriver, Complexity, DecisionLlm, Element, InterfaceError, Observation, PerceptionProvider,
    PlannerLlm, Step, StepType, StructuredPlan, SupervisorDecision, SupervisorLlm, SupervisorRequest,
    Tool,
};
pub use scheduler::{SchedulerSummary, WorkerPoolScheduler};
pub use supervisor::{ErrorClassifier, HealthMonitor, RecoveryManager, RecoveryOutcome, RecoveryStrategy};
pub use worker::{Worker, WorkerConfig};
