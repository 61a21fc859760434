//! `taskwright run` command implementation.
//!
//! Wires [`taskwright_runtime::execute_goal`] up with placeholder
//! collaborators. Real browser, perception, and LLM backends are
//! expected to be supplied by an embedder; this binary exists to
//! exercise the orchestration kernel end to end and reports a clear
//! [`InterfaceError::NotImplemented`] the moment a command actually
//! needs one of them.

use std::sync::Arc;

use async_trait::async_trait;
use colored::Colorize;
use tokio::sync::RwLock;

use taskwright_kernel::config::KernelConfig;
use taskwright_kernel::contracts::{ActionResult, VerificationResult};
use taskwright_runtime::interfaces::Screenshot;
use taskwright_runtime::{
    BrowserDriver, Collaborators, Complexity, DecisionLlm, Element, InterfaceError,
    PerceptionProvider, PlannerLlm, Step, StepType, StructuredPlan,
    SupervisorDecision, SupervisorLlm, SupervisorRequest, Tool,
};

use crate::error::CliError;
use crate::output::format_result;

/// A `BrowserDriver` that reports every operation as unimplemented. A
/// real embedder swaps this for a CDP- or WebDriver-backed session.
struct UnimplementedBrowser {
    viewport: (i64, i64),
}

#[async_trait]
impl BrowserDriver for UnimplementedBrowser {
    async fn navigate(&self, _url: &str) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn click(&self, _x_px: i64, _y_px: i64) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn type_text(&self, _text: &str) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn press_key(&self, _name: &str) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn scroll(&self, _dx: i64, _dy: i64) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn wait(&self, _seconds: f64) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn get_url(&self) -> Result<String, InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    async fn evaluate(&self, _js: &str) -> Result<serde_json::Value, InterfaceError> {
        Err(InterfaceError::NotImplemented("browser driver"))
    }
    fn viewport_size(&self) -> (i64, i64) {
        self.viewport
    }
    async fn cleanup(&self) -> Result<(), InterfaceError> {
        Ok(())
    }
}

struct UnimplementedPerception;

#[async_trait]
impl PerceptionProvider for UnimplementedPerception {
    async fn capture_screenshot(&self) -> Result<Screenshot, InterfaceError> {
        Err(InterfaceError::NotImplemented("perception provider"))
    }
    async fn parse(&self, _screenshot: &Screenshot) -> Result<Vec<Element>, InterfaceError> {
        Err(InterfaceError::NotImplemented("perception provider"))
    }
}

struct UnimplementedDecisionLlm;

#[async_trait]
impl DecisionLlm for UnimplementedDecisionLlm {
    async fn decide(
        &self,
        _task_description: &str,
        _elements: &[Element],
        _url: &str,
        _stored_data: &serde_json::Map<String, serde_json::Value>,
        _viewport: (i64, i64),
        _thread_id: &str,
    ) -> Result<Tool, InterfaceError> {
        Err(InterfaceError::NotImplemented("decision llm"))
    }

    async fn verify(
        &self,
        _task_description: &str,
        _elements: &[Element],
        _url: &str,
        _stored_data: &serde_json::Map<String, serde_json::Value>,
        _action_history: &[ActionResult],
        _thread_id: &str,
        _screenshot: Option<&Screenshot>,
    ) -> Result<VerificationResult, InterfaceError> {
        Err(InterfaceError::NotImplemented("decision llm"))
    }

    async fn clear_context(&self, _thread_id: &str) {}

    async fn active_sessions(&self) -> usize {
        0
    }
}

/// A `PlannerLlm` that produces a single direct step naming the
/// requested task, so the kernel has a real DAG to run (and fail on)
/// even with no real planning backend attached.
struct SingleStepPlanner;

#[async_trait]
impl PlannerLlm for SingleStepPlanner {
    async fn plan(
        &self,
        goal: &str,
        _starting_url: &str,
        _exploration: Option<&str>,
    ) -> Result<StructuredPlan, InterfaceError> {
        Ok(StructuredPlan {
            steps: vec![Step {
                number: 1,
                name: "accomplish goal".to_string(),
                description: goal.to_string(),
                step_type: StepType::Direct,
                dependencies: vec![],
                estimated_time_s: None,
                fallback_strategy: None,
            }],
            complexity: Complexity::Simple,
        })
    }

    async fn create_recovery_plan(
        &self,
        _goal: &str,
        _completed_task_ids: &[String],
        _current_state: &serde_json::Value,
    ) -> Result<StructuredPlan, InterfaceError> {
        Err(InterfaceError::NotImplemented("planner llm (recovery plan)"))
    }
}

/// A `SupervisorLlm` that always skips the failed task rather than
/// escalating to a real recovery backend.
struct SkipSupervisor;

#[async_trait]
impl SupervisorLlm for SkipSupervisor {
    async fn decide(&self, request: &SupervisorRequest) -> Result<SupervisorDecision, InterfaceError> {
        Ok(SupervisorDecision::Skip {
            task_id: request.failed_task_id.clone(),
        })
    }
}

pub async fn run(
    url: &str,
    task: &str,
    workers: Option<u32>,
    headless: bool,
    config_path: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let mut config = match config_path {
        Some(path) => KernelConfig::from_file(&path.to_string_lossy())
            .map_err(|e| CliError::Config(e.to_string()))?,
        None => KernelConfig::default(),
    };
    if let Some(workers) = workers {
        config.max_parallel_workers = workers;
    }
    config.validate().map_err(|e| CliError::Config(e.to_string()))?;

    if headless {
        tracing::debug!("running with a headless browser session");
    }

    let collaborators = Collaborators {
        browser: Arc::new(RwLock::new(UnimplementedBrowser {
            viewport: (1280, 720),
        })),
        perception: Arc::new(UnimplementedPerception),
        decision_llm: Arc::new(UnimplementedDecisionLlm),
        planner_llm: Arc::new(SingleStepPlanner),
        supervisor_llm: Arc::new(SkipSupervisor),
    };

    println!("{} starting run against {}", "→".green(), url);

    let result = taskwright_runtime::execute_goal(task, url, &config, collaborators).await?;
    println!("{}", format_result(&result));

    if !result.success {
        return Err(CliError::Other("goal not achieved".to_string()));
    }
    Ok(())
}
