//! Worker execution loop (C4): perceive → decide → act → verify, one
//! task at a time, until verification succeeds, the iteration cap is
//! hit, or the task's deadline elapses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use taskwright_kernel::contracts::{
    ActionResult, ErrorCategory, ProgressMetrics, StructuredError, SuggestedAction, TaskResult,
};
use taskwright_kernel::recovery::{Backoff, RetryPolicy};
use taskwright_kernel::task::Task;

use crate::cache::{invalidate_url, PerceptionCache, PerceptionCacheKey};
use crate::interfaces::{
    BrowserDriver, DecisionLlm, Element, InterfaceError, Observation, PerceptionProvider, Tool,
};

/// Per-worker configuration mirroring the kernel's recognized options
/// (§6.6) that the execution loop itself consults.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_iterations_per_task: u32,
    pub verify_confidence_threshold: f64,
    pub action_retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_task: 50,
            verify_confidence_threshold: 0.6,
            action_retry_policy: RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(250))),
        }
    }
}

/// The collaborators one worker needs for its lifetime. The browser and
/// perception provider are shared across workers (single session); the
/// decision LLM is too, but addressed under this worker's own
/// `thread_id`.
pub struct Worker {
    pub worker_id: String,
    pub thread_id: String,
    browser: Arc<RwLock<dyn BrowserDriver>>,
    perception: Arc<dyn PerceptionProvider>,
    decision_llm: Arc<dyn DecisionLlm>,
    perception_cache: Arc<Mutex<PerceptionCache>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        browser: Arc<RwLock<dyn BrowserDriver>>,
        perception: Arc<dyn PerceptionProvider>,
        decision_llm: Arc<dyn DecisionLlm>,
        perception_cache: Arc<Mutex<PerceptionCache>>,
        config: WorkerConfig,
    ) -> Self {
        let worker_id = worker_id.into();
        let thread_id = format!("worker-{}-{}", worker_id, Uuid::new_v4());
        Self {
            worker_id,
            thread_id,
            browser,
            perception,
            decision_llm,
            perception_cache,
            config,
        }
    }

    /// Runs the perceive/decide/act/verify loop for one task to
    /// completion and returns its [`TaskResult`]. Never panics on a
    /// worker-level failure: all errors are folded into a FAILED result
    /// with a [`StructuredError`].
    pub async fn execute(&self, task: Task) -> TaskResult {
        let span = info_span!("worker.execute", task_id = %task.id, worker_id = %self.worker_id);
        self.execute_inner(task).instrument(span).await
    }

    async fn execute_inner(&self, task: Task) -> TaskResult {
        let start = Instant::now();
        let start_ms = now_ms();
        let mut progress = ProgressMetrics::default();
        let mut action_history: Vec<ActionResult> = Vec::new();
        let mut extracted_data = serde_json::Map::new();
        let mut last_state_fingerprint: Option<u64> = None;
        let mut iteration = 0u32;

        let result = loop {
            if iteration >= self.config.max_iterations_per_task {
                break self.fail(
                    &task,
                    ErrorCategory::Timeout,
                    "exceeded max iterations per task",
                    Some("MAX_ITERATIONS"),
                    &progress,
                    action_history,
                    extracted_data,
                );
            }

            let observation = match self.perceive(&task).await {
                Ok(obs) => obs,
                Err(err) => {
                    break self.fail(
                        &task,
                        ErrorCategory::SystemError,
                        &format!("perception failed: {err}"),
                        None,
                        &progress,
                        action_history,
                        extracted_data,
                    );
                }
            };

            let viewport = self.browser.read().await.viewport_size();
            let decision = match self
                .decision_llm
                .decide(
                    &task.description,
                    &observation.elements,
                    &observation.url,
                    &extracted_data,
                    viewport,
                    &self.thread_id,
                )
                .await
            {
                Ok(tool) => tool,
                Err(err) => {
                    break self.fail(
                        &task,
                        ErrorCategory::SystemError,
                        &format!("decision llm failed: {err}"),
                        None,
                        &progress,
                        action_history,
                        extracted_data,
                    );
                }
            };

            if let Tool::MarkTaskComplete { reasoning: _ } = &decision {
                let verification = self
                    .decision_llm
                    .verify(
                        &task.description,
                        &observation.elements,
                        &observation.url,
                        &extracted_data,
                        &action_history,
                        &self.thread_id,
                        None,
                    )
                    .await;
                match verification {
                    Ok(v) if v.is_success(self.config.verify_confidence_threshold) => {
                        self.decision_llm.clear_context(&self.thread_id).await;
                        break TaskResult {
                            task_id: task.id.clone(),
                            success: true,
                            action_history,
                            extracted_data,
                            verification: Some(v),
                            start_ms,
                            end_ms: now_ms(),
                            duration_ms: start.elapsed().as_millis() as u64,
                            worker_id: self.worker_id.clone(),
                            error: None,
                            needs_replan: false,
                            replan_reason: None,
                        };
                    }
                    Ok(_) => {
                        // Verification declined; keep iterating rather
                        // than failing outright (§4.4).
                        iteration += 1;
                        continue;
                    }
                    Err(err) => {
                        break self.fail(
                            &task,
                            ErrorCategory::VerificationFailed,
                            &format!("verification call failed: {err}"),
                            None,
                            &progress,
                            action_history,
                            extracted_data,
                        );
                    }
                }
            }

            if let Tool::StoreData { key, value } = &decision {
                extracted_data.insert(key.clone(), value.clone());
                progress.record_action("store_data", true, false);
                iteration += 1;
                continue;
            }

            let action_result = self.apply_with_retry(&decision, &observation.elements).await;
            let state_fingerprint = self.fingerprint(&observation.url, &observation.elements);
            let state_changed = last_state_fingerprint != Some(state_fingerprint);
            last_state_fingerprint = Some(state_fingerprint);

            progress.record_action(&action_result.action_type, action_result.success, state_changed);
            if decision.triggers_navigation() || decision.is_mutating() {
                let mut cache = self.perception_cache.lock().await;
                invalidate_url(&mut cache, &observation.url);
            }
            action_history.push(action_result);
            iteration += 1;
        };

        result
    }

    async fn perceive(&self, _task: &Task) -> Result<Observation, InterfaceError> {
        let screenshot = self.perception.capture_screenshot().await?;
        let url = {
            let browser = self.browser.read().await;
            browser.get_url().await?
        };
        let cache_key = PerceptionCacheKey {
            url: url.clone(),
            screenshot_hash: screenshot.hash,
        };

        let mut cache = self.perception_cache.lock().await;
        if let Some(elements) = cache.get(&cache_key) {
            return Ok(Observation {
                url,
                screenshot_hash: screenshot.hash,
                elements,
            });
        }
        drop(cache);

        let elements: Vec<Element> = self.perception.parse(&screenshot).await?;
        let mut cache = self.perception_cache.lock().await;
        cache.put(cache_key, elements.clone());

        Ok(Observation {
            url,
            screenshot_hash: screenshot.hash,
            elements,
        })
    }

    async fn apply_with_retry(&self, tool: &Tool, elements: &[Element]) -> ActionResult {
        let policy = self.config.action_retry_policy;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply(tool, elements).await {
                Ok(result) => return result,
                Err(err) if !policy.is_exhausted(attempt) => {
                    warn!(attempt, error = %err, "action failed, retrying");
                    tokio::time::sleep(policy.backoff.delay_for(attempt)).await;
                }
                Err(err) => {
                    return ActionResult {
                        action_type: tool_name(tool).to_string(),
                        success: false,
                        target: target_of(tool),
                        error: Some(err.to_string()),
                        timestamp: now_ms(),
                        metadata: Default::default(),
                    };
                }
            }
        }
    }

    async fn apply(&self, tool: &Tool, elements: &[Element]) -> Result<ActionResult, InterfaceError> {
        let browser = self.browser.write().await;
        let viewport = browser.viewport_size();
        let target = target_of(tool);

        match tool {
            Tool::Click { element_id } => {
                let (x, y) = pixel_center(elements, *element_id, viewport)?;
                browser.click(x, y).await?;
            }
            Tool::Type { element_id, text } => {
                let (x, y) = pixel_center(elements, *element_id, viewport)?;
                browser.click(x, y).await?;
                // select-all + delete, then emit text (§4.4 type policy).
                browser.press_key("ctrl+a").await?;
                browser.press_key("delete").await?;
                browser.type_text(text).await?;
            }
            Tool::PressEnter => browser.press_key("enter").await?,
            Tool::Navigate { url } => browser.navigate(url).await?,
            Tool::Scroll { direction, amount } => {
                let (dx, dy) = scroll_delta(direction, *amount);
                browser.scroll(dx, dy).await?;
            }
            Tool::ScrollToResult { element_id } => {
                let (_, y) = pixel_center(elements, *element_id, viewport)?;
                browser.scroll(0, y).await?;
            }
            Tool::Wait { seconds } => browser.wait(*seconds).await?,
            Tool::AnalyzeVisualContent { .. } | Tool::GetElementDetails { .. } | Tool::GetAccomplishments => {
                // Read-only tools: no browser mutation, handled by the
                // caller's context accumulation rather than here.
            }
            Tool::StoreData { .. } | Tool::MarkTaskComplete { .. } => {
                unreachable!("handled before reaching apply()")
            }
        }

        Ok(ActionResult {
            action_type: tool_name(tool).to_string(),
            success: true,
            target,
            error: None,
            timestamp: now_ms(),
            metadata: Default::default(),
        })
    }

    fn fingerprint(&self, url: &str, elements: &[Element]) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        url.hash(&mut hasher);
        for e in elements {
            e.content.hash(&mut hasher);
        }
        hasher.finish()
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        task: &Task,
        category: ErrorCategory,
        message: &str,
        timeout_reason: Option<&str>,
        progress: &ProgressMetrics,
        action_history: Vec<ActionResult>,
        extracted_data: serde_json::Map<String, serde_json::Value>,
    ) -> TaskResult {
        let mut structured = StructuredError::classify(category, message, Some(progress.clone()));
        if let Some(reason) = timeout_reason {
            structured.timeout_reason = Some(reason.to_string());
        }
        let now = now_ms();
        TaskResult {
            task_id: task.id.clone(),
            success: false,
            action_history,
            extracted_data,
            verification: None,
            start_ms: now,
            end_ms: now,
            duration_ms: 0,
            worker_id: self.worker_id.clone(),
            error: Some(structured),
            needs_replan: false,
            replan_reason: None,
        }
    }
}

fn tool_name(tool: &Tool) -> &'static str {
    match tool {
        Tool::Click { .. } => "click",
        Tool::Type { .. } => "type",
        Tool::PressEnter => "press_enter",
        Tool::Navigate { .. } => "navigate",
        Tool::Scroll { .. } => "scroll",
        Tool::Wait { .. } => "wait",
        Tool::ScrollToResult { .. } => "scroll_to_result",
        Tool::AnalyzeVisualContent { .. } => "analyze_visual_content",
        Tool::GetElementDetails { .. } => "get_element_details",
        Tool::StoreData { .. } => "store_data",
        Tool::GetAccomplishments => "get_accomplishments",
        Tool::MarkTaskComplete { .. } => "mark_task_complete",
    }
}

fn target_of(tool: &Tool) -> Option<String> {
    match tool {
        Tool::Click { element_id } | Tool::Type { element_id, .. } | Tool::ScrollToResult { element_id } => {
            Some(element_id.to_string())
        }
        Tool::Navigate { url } => Some(url.clone()),
        _ => None,
    }
}

fn scroll_delta(direction: &str, amount: i64) -> (i64, i64) {
    match direction {
        "up" => (0, -amount),
        "down" => (0, amount),
        "left" => (-amount, 0),
        "right" => (amount, 0),
        _ => (0, amount),
    }
}

/// Translates a normalized `[0,1]` element center, or an already-pixel
/// visual-analysis element (id >= 9000, §4.4), into integer pixel
/// coordinates for the given viewport.
fn pixel_center(
    elements: &[Element],
    element_id: i64,
    viewport: (i64, i64),
) -> Result<(i64, i64), InterfaceError> {
    let element = elements
        .iter()
        .find(|e| e.id == element_id)
        .ok_or_else(|| InterfaceError::Browser(format!("no element with id {element_id}")))?;

    if element.is_visual_analysis_element() {
        return Ok((element.center.0 as i64, element.center.1 as i64));
    }
    let (vw, vh) = viewport;
    let x = (element.center.0 * vw as f64).round() as i64;
    let y = (element.center.1 * vh as f64).round() as i64;
    Ok((x, y))
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

    #[test]
    fn pixel_center_scales_normalized_elements() {
        let elements = vec![Element {
            id: 1,
            element_type: "button".into(),
            bbox: (0.0, 0.0, 0.2, 0.2),
            center: (0.5, 0.5),
            content: "go".into(),
            interactivity: true,
            dom: None,
        }];
        let (x, y) = pixel_center(&elements, 1, (1000, 800)).unwrap();
        assert_eq!((x, y), (500, 400));
    }

    #[test]
    fn pixel_center_treats_visual_elements_as_absolute() {
        let elements = vec![Element {
            id: 9001,
            element_type: "text".into(),
            bbox: (0.0, 0.0, 0.0, 0.0),
            center: (120.0, 340.0),
            content: String::new(),
            interactivity: false,
            dom: None,
        }];
        let (x, y) = pixel_center(&elements, 9001, (1000, 800)).unwrap();
        assert_eq!((x, y), (120, 340));
    }

    #[test]
    fn pixel_center_errors_on_missing_element() {
        assert!(pixel_center(&[], 1, (100, 100)).is_err());
    }

    #[test]
    fn scroll_delta_maps_directions() {
        assert_eq!(scroll_delta("down", 500), (0, 500));
        assert_eq!(scroll_delta("up", 500), (0, -500));
        assert_eq!(scroll_delta("left", 200), (-200, 0));
    }
}
