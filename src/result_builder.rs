//! Assembles the final structured `Result` (spec §4.5).

use crate::error::{ErrorType, PipelineError};
use crate::executor::RawResult;
use crate::types::ToolResult;
use std::collections::HashMap;
use std::time::Instant;

/// Builds a successful or partially-failed result from the executor's raw
/// output. `execution_time` is measured from `start` and floored at the
/// minimum spec.md guarantees.
pub fn from_raw(raw: RawResult, correlation_id: String, start: Instant) -> ToolResult {
    let error_type = if raw.timed_out {
        Some(ErrorType::Timeout)
    } else {
        None
    };
    let recovery_suggestion = if raw.timed_out {
        PipelineError::Timeout(std::time::Duration::default()).recovery_suggestion()
    } else if raw.returncode != 0 {
        "Check stdout/stderr and the tool's exit code for diagnostic detail"
    } else {
        "No action needed; execution completed successfully"
    };
    let mut metadata = HashMap::new();
    metadata.insert(
        "recovery_suggestion".to_string(),
        serde_json::json!(recovery_suggestion),
    );

    ToolResult {
        stdout: raw.stdout,
        stderr: raw.stderr,
        truncated_stdout: raw.truncated_stdout,
        truncated_stderr: raw.truncated_stderr,
        returncode: raw.returncode,
        timed_out: raw.timed_out,
        error: if raw.timed_out {
            Some("execution timed out".to_string())
        } else {
            None
        },
        error_type,
        execution_time: start.elapsed().as_secs_f64(),
        correlation_id,
        metadata,
    }
    .finalize()
}

/// Builds a result for an error path that never reached (or never finished)
/// the executor — validation failures, disabled tools, circuit-open
/// rejections, command-not-found, and internal faults.
pub fn from_error(err: &PipelineError, correlation_id: String, start: Instant) -> ToolResult {
    let mut metadata = HashMap::new();
    metadata.insert(
        "recovery_suggestion".to_string(),
        serde_json::json!(err.recovery_suggestion()),
    );
    if let PipelineError::CircuitOpen { retry_after, .. } = err {
        metadata.insert(
            "retry_after".to_string(),
            serde_json::json!(retry_after.as_secs_f64()),
        );
    }

    ToolResult {
        stdout: String::new(),
        stderr: String::new(),
        truncated_stdout: false,
        truncated_stderr: false,
        returncode: err.returncode(),
        timed_out: matches!(err, PipelineError::Timeout(_)),
        error: Some(err.to_string()),
        error_type: Some(err.error_type()),
        execution_time: start.elapsed().as_secs_f64(),
        correlation_id,
        metadata,
    }
    .finalize()
}
