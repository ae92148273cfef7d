//! Pipeline execution engine
//!
//! Runs a pipeline's active steps in order as one logical transaction: each
//! step's request is rewritten by injections, interpolated against the run
//! context, dispatched with the run's cookie jar, validated against its
//! expectations and mined for extractions. The first failure aborts the run;
//! cancellation is observed between steps.

pub mod expect;
pub mod interpolate;
pub mod pool;
pub mod record;
pub mod step_runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::errors::Result;
use crate::pipeline::definition::{Pipeline, PipelineStep};
use crate::pipeline::rules::{apply_extractions, apply_injections};
use crate::sessions::CookieJar;

use expect::{check_expectations, failure_message};
use interpolate::interpolate_request;
use record::{ExecutionRecorder, NullRecorder, PipelineExecution, RunStatus, StepExecution};
use step_runner::{DispatchOutcome, StepRunner, DEFAULT_TIMEOUT};

/// Cooperative cancellation handle for one run.
///
/// Setting the flag does not interrupt an in-flight request; the engine
/// checks it before starting each step.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution: PipelineExecution,
    pub steps: Vec<StepExecution>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.execution.status == RunStatus::Completed
    }
}

/// The engine: owns the HTTP runner and the record sink, stateless across
/// runs. One engine can serve many concurrent runs.
pub struct Engine {
    runner: StepRunner,
    recorder: Arc<dyn ExecutionRecorder>,
}

impl Engine {
    pub fn new() -> Result<Self> {
        Self::with_recorder(Arc::new(NullRecorder))
    }

    pub fn with_recorder(recorder: Arc<dyn ExecutionRecorder>) -> Result<Self> {
        Ok(Self {
            runner: StepRunner::new(DEFAULT_TIMEOUT)?,
            recorder,
        })
    }

    /// Per-call HTTP timeout for every step of every run.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.runner.set_timeout(timeout);
    }

    /// Execute one run of `pipeline`, seeding the context with `seed`.
    ///
    /// Err is reserved for setup problems; anything that happens to a step
    /// is reported through the outcome's records instead.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        seed: Context,
        cancel: CancelFlag,
    ) -> Result<RunOutcome> {
        let active = pipeline.active_steps();
        let mut execution = PipelineExecution::start(pipeline, active.len() as u32);
        let mut ctx = seed;
        let mut jar = CookieJar::new();
        let mut steps = Vec::with_capacity(active.len());

        tracing::info!(
            pipeline = %pipeline.name,
            execution = %execution.id,
            steps = active.len(),
            "run started"
        );
        self.recorder.run_started(&execution);

        for step in active {
            if cancel.is_cancelled() {
                tracing::warn!(execution = %execution.id, "run cancelled");
                execution.finish(RunStatus::Cancelled);
                break;
            }

            let mut step_exec = StepExecution::pending(execution.id, step);
            self.recorder.step_updated(&execution, &step_exec);

            if !should_run(step, &ctx) {
                step_exec.mark_skipped();
                execution.record_skip();
                tracing::info!(step = %step.name, "step skipped");
                self.recorder.step_updated(&execution, &step_exec);
                steps.push(step_exec);
                continue;
            }

            // Injections rewrite the template before interpolation, so an
            // injected value wins over a literal placeholder in the file.
            let mut template = step.request.clone();
            apply_injections(&step.inject, &ctx, &mut template);
            let request = interpolate_request(&template, &ctx);

            step_exec.mark_running(request.clone());
            self.recorder.step_updated(&execution, &step_exec);

            match self.runner.dispatch(&request, &mut jar).await {
                DispatchOutcome::Response { snapshot, elapsed } => {
                    let results = check_expectations(
                        &step.expect,
                        snapshot.status,
                        &snapshot.headers,
                        &snapshot.body,
                    );
                    if let Some(message) = failure_message(&results) {
                        tracing::warn!(step = %step.name, status = snapshot.status, %message, "step failed");
                        step_exec.mark_failed(
                            Some(snapshot),
                            Some(elapsed.as_millis() as u64),
                            message.clone(),
                        );
                        execution.record_failure(&step.name, &message);
                        execution.finish(RunStatus::Failed);
                        self.recorder.step_updated(&execution, &step_exec);
                        steps.push(step_exec);
                        break;
                    }

                    let body: JsonValue =
                        serde_json::from_str(&snapshot.body).unwrap_or(JsonValue::Null);
                    let extracted = apply_extractions(&step.extract, &body, &snapshot.headers);
                    ctx.merge(&extracted);

                    tracing::info!(
                        step = %step.name,
                        status = snapshot.status,
                        elapsed_ms = elapsed.as_millis() as u64,
                        extracted = extracted.len(),
                        "step succeeded"
                    );
                    step_exec.mark_success(snapshot, elapsed.as_millis() as u64, extracted);
                    execution.record_success();
                    self.recorder.step_updated(&execution, &step_exec);
                    steps.push(step_exec);

                    if step.delay_after_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(step.delay_after_ms)).await;
                    }
                }
                DispatchOutcome::TransportError {
                    kind,
                    message,
                    elapsed,
                } => {
                    tracing::warn!(step = %step.name, ?kind, %message, "step failed");
                    step_exec.mark_failed(None, Some(elapsed.as_millis() as u64), message.clone());
                    execution.record_failure(&step.name, &message);
                    execution.finish(RunStatus::Failed);
                    self.recorder.step_updated(&execution, &step_exec);
                    steps.push(step_exec);
                    break;
                }
            }
        }

        if execution.status == RunStatus::Running {
            execution.finish(RunStatus::Completed);
        }
        execution.context = ctx;
        execution.session_cookies = jar;

        tracing::info!(
            execution = %execution.id,
            status = ?execution.status,
            completed = execution.completed_steps,
            failed = execution.failed_steps,
            "run finished"
        );
        self.recorder.run_finished(&execution);

        Ok(RunOutcome { execution, steps })
    }
}

/// Skip gate: the `skip` flag wins, then the condition. A condition that
/// references missing context data evaluates false (fail closed), so the
/// step skips rather than running on bad data.
fn should_run(step: &PipelineStep, ctx: &Context) -> bool {
    if step.skip {
        return false;
    }
    match &step.condition {
        Some(condition) => condition.evaluate(ctx),
        None => true,
    }
}
