//! chainflow: a pipeline execution engine for HTTP request chains.
//!
//! A pipeline is an ordered list of parameterized request steps run as one
//! logical transaction. Values extracted from earlier responses thread into
//! later requests through a per-run context; cookies persist across steps in
//! a per-run jar; the first failure aborts the run. Every run leaves an
//! auditable execution record.

pub mod cli;
pub mod context;
pub mod engine;
pub mod errors;
pub mod pipeline;
pub mod report;
pub mod sessions;

pub use context::Context;
pub use engine::record::{
    ExecutionRecorder, MemoryRecorder, NullRecorder, PipelineExecution, RunStatus, StepExecution,
    StepStatus,
};
pub use engine::{CancelFlag, Engine, RunOutcome};
pub use errors::{ChainflowError, Result};
pub use pipeline::definition::{load_pipeline, Pipeline, PipelineStep, RequestTemplate};
