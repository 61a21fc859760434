//! Pure, synchronous core of the taskwright orchestration kernel.
//!
//! This crate holds no I/O and no async runtime: the task DAG, the
//! dependency resolver, the data contracts, the recovery/backoff
//! primitives, and configuration loading. Everything that talks to a
//! browser, an LLM, or the filesystem in a blocking way lives one layer up
//! in `taskwright-runtime`.

pub mod clock;
pub mod config;
pub mod contracts;
pub mod error;
pub mod recovery;
pub mod task;

pub use clock::{Clock, SystemClock};
pub use contracts::{
    ActionResult, ErrorCategory, ExecutionHealth, HealthStatus, ProgressMetrics, StructuredError,
    SuggestedAction, TaskResult, VerificationResult,
};
pub use error::{KernelError, KernelResult};
pub use task::{Priority, Task, TaskDag, TaskId, TaskStatus};
