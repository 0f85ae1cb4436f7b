//! Core data model: requests, results, tool definitions, breaker config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A validated or raw incoming execution request (spec §3 "Request").
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub target: String,
    #[serde(default)]
    pub extra_args: String,
    pub timeout_sec: Option<f64>,
    pub correlation_id: Option<String>,
}

/// The structured outcome of a single execution (spec §3 "Result").
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub stdout: String,
    pub stderr: String,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
    pub returncode: i32,
    pub timed_out: bool,
    pub error: Option<String>,
    pub error_type: Option<crate::error::ErrorType>,
    pub execution_time: f64,
    pub correlation_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Floors `execution_time` at the minimum spec.md guarantees (§8 property 8)
    /// and guarantees `metadata` is present (§8 property 10).
    pub fn finalize(mut self) -> Self {
        if self.execution_time < 0.001 {
            self.execution_time = 0.001;
        }
        self
    }
}

/// Per-tool circuit breaker tuning (spec §3 "Tool Definition" breaker_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub timeout_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
    pub enable_jitter: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            timeout_multiplier: 1.5,
            max_timeout: Duration::from_secs(300),
            enable_jitter: false,
        }
    }
}

/// Immutable per-process tool definition (spec §3 "Tool Definition").
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub command_name: String,
    pub description: String,
    /// Prefix list for allowed flag tokens. `None` means "reject every flag".
    pub allowed_flags: Option<Vec<String>>,
    pub default_timeout_sec: f64,
    /// Max simultaneous executions for this tool. `0` means "unset" and is
    /// resolved to `Config::default_concurrency` at registration time.
    pub concurrency: usize,
    #[serde(skip)]
    pub breaker_config: BreakerConfig,
}

/// Listing entry returned by `list_tools` (spec §6 adapter contract).
#[derive(Debug, Clone, Serialize)]
pub struct ToolListing {
    pub name: String,
    pub enabled: bool,
    pub command: String,
    pub description: String,
    pub concurrency: usize,
    pub timeout: f64,
    pub has_metrics: bool,
    pub has_breaker: bool,
}

/// Overall health classification (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub checks: Vec<HealthCheck>,
}
