//! Run summaries for the CLI
//!
//! Text output for humans, JSON lines (one object per step plus a summary
//! line) for CI and log aggregation.

use crate::engine::record::{RunStatus, StepStatus};
use crate::engine::RunOutcome;

pub fn format_run(outcome: &RunOutcome) -> String {
    let execution = &outcome.execution;
    let mut output = String::new();

    output.push_str("\n═══════════════════════════════════════════════════════════════════\n");
    output.push_str(&format!("  PIPELINE RUN: {}\n", execution.pipeline_name));
    output.push_str("═══════════════════════════════════════════════════════════════════\n\n");

    for step in &outcome.steps {
        let status_icon = match step.status {
            StepStatus::Success => "✓",
            StepStatus::Skipped => "⊘",
            StepStatus::Failed => "✗",
            _ => "?",
        };

        let status_str = step
            .http_status
            .map(|c| c.to_string())
            .unwrap_or_else(|| "---".to_string());

        output.push_str(&format!(
            "  {} Step {}: {} ({})\n",
            status_icon,
            step.step_order,
            step.step_name,
            if step.status == StepStatus::Skipped {
                "SKIPPED"
            } else {
                &status_str
            }
        ));

        if let Some(request) = &step.request_data {
            output.push_str(&format!("      {} {}\n", request.method, request.url));
        }
        if let Some(ms) = step.response_time_ms {
            output.push_str(&format!("      Time: {ms}ms\n"));
        }
        if let Some(error) = &step.error_message {
            output.push_str(&format!("      Error: {error}\n"));
        }
        if !step.extracted_data.is_empty() {
            output.push_str("      Extracted:\n");
            for (key, value) in &step.extracted_data {
                output.push_str(&format!("        {key} = {value}\n"));
            }
        }

        output.push('\n');
    }

    output.push_str("───────────────────────────────────────────────────────────────────\n");
    output.push_str(&format!(
        "  Status: {} | Total: {} | Succeeded: {} | Failed: {} | Skipped: {}\n",
        status_label(execution.status),
        execution.total_steps,
        execution.successful_steps,
        execution.failed_steps,
        execution
            .completed_steps
            .saturating_sub(execution.successful_steps + execution.failed_steps),
    ));
    if let Some(ms) = execution.duration_ms() {
        output.push_str(&format!("  Duration: {ms}ms\n"));
    }
    if let Some(error) = &execution.error_message {
        output.push_str(&format!("  Error: {error}\n"));
    }
    output.push_str("═══════════════════════════════════════════════════════════════════\n");

    output
}

pub fn format_run_json(outcome: &RunOutcome) -> String {
    let execution = &outcome.execution;
    let mut output = String::new();

    for step in &outcome.steps {
        let json = serde_json::json!({
            "level": if step.status == StepStatus::Failed { "error" } else { "info" },
            "event": "step_result",
            "execution_id": execution.id,
            "step_name": step.step_name,
            "step_order": step.step_order,
            "status": step.status,
            "http_status": step.http_status,
            "duration_ms": step.response_time_ms,
            "error": step.error_message,
            "extracted": step.extracted_data,
        });
        output.push_str(&serde_json::to_string(&json).unwrap_or_default());
        output.push('\n');
    }

    let summary = serde_json::json!({
        "level": if execution.status == RunStatus::Completed { "info" } else { "error" },
        "event": "run_summary",
        "execution_id": execution.id,
        "pipeline": execution.pipeline_name,
        "status": execution.status,
        "total_steps": execution.total_steps,
        "completed_steps": execution.completed_steps,
        "successful_steps": execution.successful_steps,
        "failed_steps": execution.failed_steps,
        "duration_ms": execution.duration_ms(),
        "error": execution.error_message,
    });
    output.push_str(&serde_json::to_string(&summary).unwrap_or_default());
    output.push('\n');

    output
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "RUNNING",
        RunStatus::Completed => "COMPLETED",
        RunStatus::Failed => "FAILED",
        RunStatus::Cancelled => "CANCELLED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{PipelineExecution, StepExecution};
    use crate::pipeline::definition::Pipeline;

    fn outcome() -> RunOutcome {
        let pipeline: Pipeline = serde_yaml::from_str(
            r#"
name: demo
steps:
  - name: ping
    step_order: 1
    request:
      url: http://example.com/ping
"#,
        )
        .unwrap();

        let mut execution = PipelineExecution::start(&pipeline, 1);
        let mut step = StepExecution::pending(execution.id, &pipeline.steps[0]);
        step.mark_skipped();
        execution.record_skip();
        execution.finish(RunStatus::Completed);

        RunOutcome {
            execution,
            steps: vec![step],
        }
    }

    #[test]
    fn test_text_report() {
        let text = format_run(&outcome());
        assert!(text.contains("PIPELINE RUN: demo"));
        assert!(text.contains("SKIPPED"));
        assert!(text.contains("Status: COMPLETED"));
    }

    #[test]
    fn test_json_report_lines() {
        let json = format_run_json(&outcome());
        let lines: Vec<&str> = json.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let step: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(step["event"], "step_result");
        assert_eq!(step["status"], "SKIPPED");

        let summary: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(summary["event"], "run_summary");
        assert_eq!(summary["status"], "COMPLETED");
    }
}
