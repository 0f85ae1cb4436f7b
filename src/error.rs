//! Error taxonomy for the tool execution pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable string tags surfaced on every `Result` value and in logs.
///
/// These are serialized exactly as their lowercase `snake_case` tag so that
/// callers can match on them without depending on Rust's enum representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    NotFound,
    ValidationError,
    ExecutionError,
    ResourceExhausted,
    CircuitBreakerOpen,
    Unknown,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorType::Timeout => "timeout",
            ErrorType::NotFound => "not_found",
            ErrorType::ValidationError => "validation_error",
            ErrorType::ExecutionError => "execution_error",
            ErrorType::ResourceExhausted => "resource_exhausted",
            ErrorType::CircuitBreakerOpen => "circuit_breaker_open",
            ErrorType::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

/// Internal error type threaded through the pipeline's fallible helpers.
///
/// This never crosses the orchestrator boundary as a Rust error — the
/// orchestrator always flattens it into a [`crate::types::ToolResult`] via
/// [`PipelineError::error_type`] and [`PipelineError::returncode`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("tool '{0}' is disabled")]
    ToolDisabled(String),

    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),

    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("circuit open for '{tool}': retry after {retry_after:?}")]
    CircuitOpen {
        tool: String,
        retry_after: std::time::Duration,
    },

    #[error("executor failed to spawn or supervise child: {0}")]
    Execution(String),

    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("unexpected internal error: {0}")]
    Unknown(String),
}

impl PipelineError {
    /// Maps this error onto the stable taxonomy from spec §7.
    pub fn error_type(&self) -> ErrorType {
        match self {
            PipelineError::Validation(_) => ErrorType::ValidationError,
            PipelineError::ToolNotFound(_) => ErrorType::NotFound,
            PipelineError::ToolDisabled(_) => ErrorType::ValidationError,
            PipelineError::CommandNotFound(_) => ErrorType::NotFound,
            PipelineError::Timeout(_) => ErrorType::Timeout,
            PipelineError::CircuitOpen { .. } => ErrorType::CircuitBreakerOpen,
            PipelineError::Execution(_) => ErrorType::ExecutionError,
            PipelineError::ResourceExhausted(_) => ErrorType::ResourceExhausted,
            PipelineError::Unknown(_) => ErrorType::Unknown,
        }
    }

    /// Conventional shell-style return code for this error (spec §7).
    pub fn returncode(&self) -> i32 {
        match self {
            PipelineError::Validation(_) => 1,
            PipelineError::ToolNotFound(_) => 1,
            PipelineError::ToolDisabled(_) => 1,
            PipelineError::CommandNotFound(_) => 127,
            PipelineError::Timeout(_) => 124,
            PipelineError::CircuitOpen { .. } => 1,
            PipelineError::Execution(_) => 1,
            PipelineError::ResourceExhausted(_) => 1,
            PipelineError::Unknown(_) => 1,
        }
    }

    /// Whether this error counts as a "failure" for circuit-breaker purposes
    /// (spec §4.9 step 10 — only expected exception classes advance the breaker).
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout(_) | PipelineError::Execution(_) | PipelineError::CommandNotFound(_)
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "Check the target and extra_args against the tool's allow-list",
            PipelineError::ToolNotFound(_) => "Verify the tool name against GET /tools",
            PipelineError::ToolDisabled(_) => "Enable the tool via POST /tools/{name}/enable",
            PipelineError::CommandNotFound(_) => "Install the required tool or check PATH",
            PipelineError::Timeout(_) => "Retry with a larger timeout_sec or investigate the target",
            PipelineError::CircuitOpen { .. } => "Wait for recovery timeout or check service health",
            PipelineError::Execution(_) => "Check server logs for spawn/OS-level failure detail",
            PipelineError::ResourceExhausted(_) => "Reduce scope or increase MAX_MEMORY_MB/MAX_FILE_DESCRIPTORS",
            PipelineError::Unknown(_) => "Check server logs; this path should not normally occur",
        }
    }
}
