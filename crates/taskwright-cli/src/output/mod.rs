//! Output for the CLI's single command: a colorized summary line plus a
//! live progress indicator while the run is in flight.

pub mod progress;

pub use progress::ProgressBar;

use colored::Colorize;
use taskwright_runtime::ExecutionResult;

/// Renders an [`ExecutionResult`] as the human-readable summary printed
/// to stdout at the end of a run.
pub fn format_result(result: &ExecutionResult) -> String {
    let headline = if result.success {
        "goal achieved".green().bold()
    } else {
        "goal not achieved".red().bold()
    };

    let mut out = format!(
        "{headline}\n  tasks: {} completed, {} failed, {} skipped, {} total\n  confidence: {:.2}\n  elapsed: {:.1}s",
        result.completed_tasks,
        result.failed_tasks,
        result.skipped_tasks,
        result.total_tasks,
        result.confidence,
        result.elapsed.as_secs_f64(),
    );

    if !result.errors.is_empty() {
        out.push_str("\n  errors:");
        for err in &result.errors {
            out.push_str(&format!("\n    - {err}"));
        }
    }
    out
}
