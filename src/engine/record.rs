//! Execution records
//!
//! Every run produces a `PipelineExecution` and one `StepExecution` per step
//! the run reached. Records are append-style snapshots of what happened,
//! including the fully interpolated request and the raw response, so a run
//! can be audited after the fact.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::context::Context;
use crate::engine::interpolate::ConcreteRequest;
use crate::pipeline::definition::{Pipeline, PipelineStep};
use crate::sessions::CookieJar;

/// Terminal and in-flight states of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// States of one step within a run. SUCCESS, FAILED and SKIPPED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// Raw response snapshot kept on a step record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

/// The audit record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: u32,
    /// Steps that reached a terminal state, SKIPPED included.
    pub completed_steps: u32,
    pub successful_steps: u32,
    pub failed_steps: u32,
    /// Final context after the last executed step.
    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub context: Context,
    /// Session cookies accumulated over the run.
    #[serde(default, skip_serializing_if = "CookieJar::is_empty")]
    pub session_cookies: CookieJar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PipelineExecution {
    pub fn start(pipeline: &Pipeline, total_steps: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_steps,
            completed_steps: 0,
            successful_steps: 0,
            failed_steps: 0,
            context: Context::new(),
            session_cookies: CookieJar::new(),
            error_message: None,
        }
    }

    pub fn record_success(&mut self) {
        self.completed_steps += 1;
        self.successful_steps += 1;
    }

    pub fn record_skip(&mut self) {
        self.completed_steps += 1;
    }

    pub fn record_failure(&mut self, step_name: &str, message: &str) {
        self.completed_steps += 1;
        self.failed_steps += 1;
        self.error_message = Some(format!("step '{step_name}' failed: {message}"));
    }

    /// Move the run to its terminal status. A run finishes exactly once.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert_eq!(self.status, RunStatus::Running);
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// The audit record of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub step_order: u32,
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The fully interpolated request that was (or would have been) sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<ConcreteRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<ResponseSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Values this step contributed to the context.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extracted_data: IndexMap<String, JsonValue>,
}

impl StepExecution {
    pub fn pending(execution_id: Uuid, step: &PipelineStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id: step.id,
            step_order: step.step_order,
            step_name: step.name.clone(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            request_data: None,
            response_data: None,
            http_status: None,
            response_time_ms: None,
            error_message: None,
            extracted_data: IndexMap::new(),
        }
    }

    pub fn mark_running(&mut self, request: ConcreteRequest) {
        debug_assert_eq!(self.status, StepStatus::Pending);
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.request_data = Some(request);
    }

    pub fn mark_skipped(&mut self) {
        debug_assert_eq!(self.status, StepStatus::Pending);
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_success(
        &mut self,
        response: ResponseSnapshot,
        response_time_ms: u64,
        extracted: IndexMap<String, JsonValue>,
    ) {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.status = StepStatus::Success;
        self.completed_at = Some(Utc::now());
        self.http_status = Some(response.status);
        self.response_data = Some(response);
        self.response_time_ms = Some(response_time_ms);
        self.extracted_data = extracted;
    }

    pub fn mark_failed(
        &mut self,
        response: Option<ResponseSnapshot>,
        response_time_ms: Option<u64>,
        message: String,
    ) {
        debug_assert!(!self.status.is_terminal());
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.http_status = response.as_ref().map(|r| r.status);
        self.response_data = response;
        self.response_time_ms = response_time_ms;
        self.error_message = Some(message);
    }
}

/// Sink for execution records as a run progresses.
///
/// `step_updated` fires on every step state change with a full snapshot, so
/// an implementation can upsert by `StepExecution::id`.
pub trait ExecutionRecorder: Send + Sync {
    fn run_started(&self, _execution: &PipelineExecution) {}
    fn step_updated(&self, _execution: &PipelineExecution, _step: &StepExecution) {}
    fn run_finished(&self, _execution: &PipelineExecution) {}
}

/// Recorder that discards everything.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl ExecutionRecorder for NullRecorder {}

/// In-memory recorder for tests and embedding callers that poll run history.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    executions: Vec<PipelineExecution>,
    steps: Vec<StepExecution>,
}

impl MemoryRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executions(&self) -> Vec<PipelineExecution> {
        self.inner.lock().unwrap().executions.clone()
    }

    /// Step records for one run, in execution order.
    pub fn steps_of(&self, execution_id: Uuid) -> Vec<StepExecution> {
        self.inner
            .lock()
            .unwrap()
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect()
    }

    fn upsert_execution(&self, execution: &PipelineExecution) {
        let mut state = self.inner.lock().unwrap();
        match state.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => *existing = execution.clone(),
            None => state.executions.push(execution.clone()),
        }
    }
}

impl ExecutionRecorder for MemoryRecorder {
    fn run_started(&self, execution: &PipelineExecution) {
        self.upsert_execution(execution);
    }

    fn step_updated(&self, execution: &PipelineExecution, step: &StepExecution) {
        self.upsert_execution(execution);
        let mut state = self.inner.lock().unwrap();
        match state.steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step.clone(),
            None => state.steps.push(step.clone()),
        }
    }

    fn run_finished(&self, execution: &PipelineExecution) {
        self.upsert_execution(execution);
    }
}
