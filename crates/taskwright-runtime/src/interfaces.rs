//! External collaborators the worker loop, planner, and supervisor talk
//! to (§6). Each is a trait so the CLI (and tests) can supply real or
//! fake implementations; every provider carries an explicit `cleanup()`
//! rather than relying on `Drop` alone, per the design notes' rule that
//! teardown must run on every exit path, including cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskwright_kernel::contracts::VerificationResult;

/// A perceived UI region: the unit of agent action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: i64,
    pub element_type: String,
    /// `(x1, y1, x2, y2)`, each in `[0, 1]` normalized to the viewport.
    pub bbox: (f64, f64, f64, f64),
    /// `(x, y)` in `[0, 1]`.
    pub center: (f64, f64),
    pub content: String,
    pub interactivity: bool,
    pub dom: Option<DomInfo>,
}

/// Element ids at or above this value are allocated by
/// `analyze_visual_content` and carry absolute pixel coordinates rather
/// than the normalized scheme used by perception-sourced elements.
pub const VISUAL_ELEMENT_ID_FLOOR: i64 = 9000;

impl Element {
    pub fn is_visual_analysis_element(&self) -> bool {
        self.id >= VISUAL_ELEMENT_ID_FLOOR
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DomInfo {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
    pub role: Option<String>,
    pub text: Option<String>,
    pub placeholder: Option<String>,
}

/// Raw screenshot bytes plus a content hash, used as the perception
/// cache key. The hash is computed once at capture time so the cache
/// never needs to hold the bytes themselves beyond the current
/// iteration (§5 memory model).
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub bytes: Vec<u8>,
    pub hash: ScreenshotHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenshotHash(pub u64);

impl ScreenshotHash {
    pub fn of(bytes: &[u8]) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        ScreenshotHash(hasher.finish())
    }
}

/// A perception snapshot as consumed by the decision LLM. Deliberately
/// holds no screenshot bytes: only the hash and the parsed elements
/// survive past the iteration that produced them.
#[derive(Debug, Clone)]
pub struct Observation {
    pub url: String,
    pub screenshot_hash: ScreenshotHash,
    pub elements: Vec<Element>,
}

/// §6.1 — captures and parses the current page.
#[async_trait]
pub trait PerceptionProvider: Send + Sync {
    async fn capture_screenshot(&self) -> Result<Screenshot, InterfaceError>;
    async fn parse(&self, screenshot: &Screenshot) -> Result<Vec<Element>, InterfaceError>;
    /// Optional DOM enrichment for a batch of pixel coordinates.
    async fn query_dom_batch(&self, points_px: &[(i64, i64)]) -> Result<Vec<Option<DomInfo>>, InterfaceError> {
        Ok(vec![None; points_px.len()])
    }
    async fn cleanup(&self) -> Result<(), InterfaceError> {
        Ok(())
    }
}

/// §6.2 — the single shared browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), InterfaceError>;
    async fn click(&self, x_px: i64, y_px: i64) -> Result<(), InterfaceError>;
    async fn type_text(&self, text: &str) -> Result<(), InterfaceError>;
    async fn press_key(&self, name: &str) -> Result<(), InterfaceError>;
    async fn scroll(&self, dx: i64, dy: i64) -> Result<(), InterfaceError>;
    async fn wait(&self, seconds: f64) -> Result<(), InterfaceError>;
    async fn get_url(&self) -> Result<String, InterfaceError>;
    async fn evaluate(&self, js: &str) -> Result<serde_json::Value, InterfaceError>;
    /// Fixed per-session viewport size, used for pixel-mapping actions.
    fn viewport_size(&self) -> (i64, i64);
    async fn cleanup(&self) -> Result<(), InterfaceError>;
}

/// The closed catalog of tools the decision LLM may invoke (§4.4). This
/// is a tagged variant, not duck-typed dispatch: an LLM response that
/// doesn't parse into one of these is an error, never a best-effort
/// pass-through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Tool {
    Click { element_id: i64 },
    Type { element_id: i64, text: String },
    PressEnter,
    Navigate { url: String },
    Scroll { direction: String, #[serde(default = "default_scroll_amount")] amount: i64 },
    Wait { seconds: f64 },
    ScrollToResult { element_id: i64 },
    AnalyzeVisualContent { question: String },
    GetElementDetails { element_ids: Vec<i64> },
    StoreData { key: String, value: serde_json::Value },
    GetAccomplishments,
    MarkTaskComplete { reasoning: String },
}

fn default_scroll_amount() -> i64 {
    500
}

impl Tool {
    /// Whether applying this tool mutates browser/page state and should
    /// therefore invalidate the perception cache for the current URL.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Tool::Click { .. }
                | Tool::Type { .. }
                | Tool::PressEnter
                | Tool::Navigate { .. }
                | Tool::Scroll { .. }
                | Tool::ScrollToResult { .. }
        )
    }

    pub fn triggers_navigation(&self) -> bool {
        matches!(self, Tool::Navigate { .. } | Tool::PressEnter)
    }
}

/// §6.3 — the decision/verification LLM, with a per-worker conversation
/// keyed by `thread_id`.
#[async_trait]
pub trait DecisionLlm: Send + Sync {
    async fn decide(
        &self,
        task_description: &str,
        elements: &[Element],
        url: &str,
        stored_data: &serde_json::Map<String, serde_json::Value>,
        viewport: (i64, i64),
        thread_id: &str,
    ) -> Result<Tool, InterfaceError>;

    async fn verify(
        &self,
        task_description: &str,
        elements: &[Element],
        url: &str,
        stored_data: &serde_json::Map<String, serde_json::Value>,
        action_history: &[taskwright_kernel::contracts::ActionResult],
        thread_id: &str,
        screenshot: Option<&Screenshot>,
    ) -> Result<VerificationResult, InterfaceError>;

    async fn clear_context(&self, thread_id: &str);
    async fn active_sessions(&self) -> usize;
}

/// §6.4 — one step of a structured plan, before conversion into a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StepType {
    Direct,
    Delegate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    pub estimated_time_s: Option<f64>,
    pub fallback_strategy: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredPlan {
    pub steps: Vec<Step>,
    pub complexity: Complexity,
}

/// §6.4 — turns a natural-language goal into a [`StructuredPlan`].
#[async_trait]
pub trait PlannerLlm: Send + Sync {
    async fn plan(
        &self,
        goal: &str,
        starting_url: &str,
        exploration: Option<&str>,
    ) -> Result<StructuredPlan, InterfaceError>;

    /// Used by the replanning recovery strategy (§4.5) to produce
    /// additional steps given what has already completed.
    async fn create_recovery_plan(
        &self,
        goal: &str,
        completed_task_ids: &[String],
        current_state: &serde_json::Value,
    ) -> Result<StructuredPlan, InterfaceError>;
}

/// §4.5 / §6.5 — the request handed to the supervisor decision LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorRequest {
    pub goal: String,
    pub failed_task_id: String,
    pub failed_task_description: String,
    pub error: taskwright_kernel::contracts::StructuredError,
    pub execution_health: taskwright_kernel::contracts::ExecutionHealth,
    pub recent_history: Vec<String>,
}

/// A discriminated union over the five supervisor actions (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SupervisorDecision {
    Retry { task_id: String },
    Skip { task_id: String },
    Replan {
        alternative: Option<Step>,
        new_tasks: Vec<Step>,
    },
    Bridge { task_id: String },
    Abort { reason: String },
}

/// §6.5 — consulted by the supervisor's decision engine on a terminal
/// failure or an unresolved deadlock.
#[async_trait]
pub trait SupervisorLlm: Send + Sync {
    async fn decide(&self, request: &SupervisorRequest) -> Result<SupervisorDecision, InterfaceError>;
}

/// Errors from any of the above collaborators. Kept distinct from
/// [`taskwright_kernel::KernelError`] because these always originate
/// from I/O or an external process, never from graph invariants.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InterfaceError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("perception error: {0}")]
    Perception(String),
    #[error("llm error: {0}")]
    Llm(String),
    #[error("the LLM returned a response that did not match any known tool: {0}")]
    UnknownTool(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_analysis_element_id_range() {
        let e = Element {
            id: 9001,
            element_type: "text".into(),
            bbox: (0.0, 0.0, 1.0, 1.0),
            center: (0.5, 0.5),
            content: String::new(),
            interactivity: false,
            dom: None,
        };
        assert!(e.is_visual_analysis_element());
    }

    #[test]
    fn tool_mutation_classification() {
        assert!(Tool::Click { element_id: 1 }.is_mutating());
        assert!(!Tool::GetAccomplishments.is_mutating());
        assert!(Tool::Navigate { url: "x".into() }.triggers_navigation());
        assert!(!Tool::Click { element_id: 1 }.triggers_navigation());
    }

    #[test]
    fn tool_deserializes_from_tagged_json() {
        let json = r#"{"tool": "click", "element_id": 42}"#;
        let tool: Tool = serde_json::from_str(json).unwrap();
        assert_eq!(tool, Tool::Click { element_id: 42 });
    }

    #[test]
    fn unknown_tool_json_fails_to_parse() {
        let json = r#"{"tool": "teleport"}"#;
        assert!(serde_json::from_str::<Tool>(json).is_err());
    }
}
