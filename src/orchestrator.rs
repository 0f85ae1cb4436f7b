//! The pipeline glue: Validator → Breaker check → Gate acquire → Executor →
//! Breaker update → Metrics → Result (spec §4.9).

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::concurrency_gate::ConcurrencyGate;
use crate::config::Config;
use crate::error::PipelineError;
use crate::executor::{Executor, ResourceLimits};
use crate::metrics::{MetricsSink, Outcome};
use crate::registry::ToolRegistry;
use crate::result_builder;
use crate::types::{ExecuteRequest, HealthReport, ToolListing, ToolResult};
use crate::validator;
use std::sync::Arc;
use std::time::Instant;

/// Owns every subsystem and exposes the adapter contract transports depend
/// on (spec §6). Threaded as a single `Arc` through both the HTTP and
/// stdio transports — never a process-global singleton (spec §9).
pub struct Pipeline {
    config: Arc<Config>,
    registry: ToolRegistry,
    breakers: CircuitBreakerRegistry,
    gate: ConcurrencyGate,
    metrics: MetricsSink,
    executor: Executor,
}

impl Pipeline {
    pub fn new(config: Arc<Config>) -> Self {
        let executor = Executor::new(config.max_stdout_bytes, config.max_stderr_bytes);
        Self {
            config,
            registry: ToolRegistry::new(),
            breakers: CircuitBreakerRegistry::new(),
            gate: ConcurrencyGate::new(),
            metrics: MetricsSink::new(),
            executor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// Registers a tool definition, applying the registry's include/exclude
    /// filters and seeding its breaker configuration. A tool registered with
    /// `concurrency: 0` falls back to `Config::default_concurrency`.
    pub fn register_tool(&self, mut def: crate::types::ToolDefinition) {
        if def.concurrency == 0 {
            def.concurrency = self.config.default_concurrency;
        }
        let breaker_config = def.breaker_config.clone();
        let name = def.name.clone();
        let include = self.config.tool_include.as_deref();
        let exclude = self.config.tool_exclude.as_deref();
        if self.registry.register_filtered(def, include, exclude) {
            self.breakers.register(&name, breaker_config);
        }
    }

    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.registry.list()
    }

    pub fn enable(&self, name: &str) -> bool {
        self.registry.enable(name)
    }

    pub fn disable(&self, name: &str) -> bool {
        self.registry.disable(name)
    }

    pub fn get_health(&self) -> HealthReport {
        crate::health::probe(&self.registry, &self.breakers)
    }

    pub fn get_metrics_snapshot(&self) -> Vec<crate::metrics::ToolStats> {
        self.metrics.snapshot()
    }

    /// Total function: every error path is embedded in the returned
    /// `ToolResult.error_type` rather than propagated as a Rust error
    /// (spec §6 "execute(tool_name, Request) → Result — total function").
    pub async fn execute(&self, tool_name: &str, req: ExecuteRequest) -> ToolResult {
        let start = Instant::now();
        let correlation_id = req
            .correlation_id
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(default_correlation_id);

        self.metrics.incr_active(tool_name);
        let result = self.execute_inner(tool_name, req, &correlation_id, start).await;
        self.metrics.decr_active(tool_name);
        result
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        req: ExecuteRequest,
        correlation_id: &str,
        start: Instant,
    ) -> ToolResult {
        let span = tracing::info_span!("execute", tool = tool_name, correlation_id);
        let _enter = span.enter();

        // 1. Look up tool.
        let Some(tool) = self.registry.get(tool_name) else {
            let err = PipelineError::ToolNotFound(tool_name.to_string());
            return self.finish(tool_name, Outcome::Rejected, &err, correlation_id, start);
        };
        if !self.registry.is_enabled(tool_name) {
            let err = PipelineError::ToolDisabled(tool_name.to_string());
            return self.finish(tool_name, Outcome::Rejected, &err, correlation_id, start);
        }

        // 2. Breaker pre-check.
        match self.breakers.check(tool_name) {
            Ok(transition) => self.record_transition(tool_name, transition),
            Err(open) => {
                let err = PipelineError::CircuitOpen {
                    tool: tool_name.to_string(),
                    retry_after: open.retry_after,
                };
                return self.finish(tool_name, Outcome::Rejected, &err, correlation_id, start);
            }
        }

        // 3. Acquire concurrency gate.
        let epoch = self.registry.epoch();
        let _permit = self.gate.acquire(tool_name, epoch, tool.concurrency).await;

        // 4. Validate. Validation failures do not trip the breaker, but do
        // count as a "success" from the breaker's perspective (spec §4.9
        // step 7: "mark breaker success — validation errors are not
        // service faults").
        let validated = match validator::validate(&req, &tool, self.config.max_args_len) {
            Ok(v) => v,
            Err(err) => {
                let transition = self.breakers.record_success(tool_name);
                self.record_transition(tool_name, transition);
                return self.finish(tool_name, Outcome::Rejected, &err, correlation_id, start);
            }
        };

        // 5. Resolve the binary; a missing command is validation-class for
        // breaker purposes (spec §4.9 step 8).
        let resolved = match self.executor.resolve(&tool.command_name) {
            Ok(path) => path,
            Err(err) => {
                let transition = self.breakers.record_success(tool_name);
                self.record_transition(tool_name, transition);
                return self.finish(tool_name, Outcome::Failure, &err, correlation_id, start);
            }
        };

        // 6. Execute.
        let limits = ResourceLimits {
            max_memory_mb: self.config.max_memory_mb,
            max_file_descriptors: self.config.max_file_descriptors,
            cpu_seconds_soft: validated.timeout_sec as u64,
            cpu_seconds_hard: validated.timeout_sec as u64 + 5,
        };

        match self.executor.execute(&resolved, &validated, limits).await {
            Ok(raw) => {
                // 7. Classify outcome (spec §4.9 step 9): success iff
                // returncode == 0 && !timed_out.
                let success = raw.returncode == 0 && !raw.timed_out;
                let transition = if success {
                    self.breakers.record_success(tool_name)
                } else {
                    // Non-zero exit (including timeout) with no
                    // executor-internal fault: spec §4.9 step 10 counts
                    // "executor errors, non-zero exit including timeouts"
                    // as breaker failures.
                    self.breakers.record_failure(tool_name)
                };
                self.record_transition(tool_name, transition);
                let outcome = if success { Outcome::Success } else { Outcome::Failure };
                let result = result_builder::from_raw(raw, correlation_id.to_string(), start);
                self.metrics
                    .record(tool_name, outcome, result.error_type, result.execution_time);
                result
            }
            Err(err) => {
                let transition = self.breakers.record_failure(tool_name);
                self.record_transition(tool_name, transition);
                self.finish(tool_name, Outcome::Failure, &err, correlation_id, start)
            }
        }
    }

    fn record_transition(
        &self,
        tool_name: &str,
        transition: Option<(crate::circuit_breaker::CircuitState, crate::circuit_breaker::CircuitState)>,
    ) {
        if let Some((from, to)) = transition {
            tracing::info!(tool = tool_name, from = %format!("{from:?}"), to = %format!("{to:?}"), "circuit breaker transition");
            self.metrics
                .record_transition(tool_name, &format!("{from:?}").to_lowercase(), &format!("{to:?}").to_lowercase());
        }
    }

    fn finish(
        &self,
        tool_name: &str,
        outcome: Outcome,
        err: &PipelineError,
        correlation_id: &str,
        start: Instant,
    ) -> ToolResult {
        let result = result_builder::from_error(err, correlation_id.to_string(), start);
        self.metrics
            .record(tool_name, outcome, result.error_type, result.execution_time);
        if err.trips_breaker() {
            tracing::error!(tool = tool_name, error_type = %err.error_type(), "execution failed");
        } else {
            tracing::warn!(tool = tool_name, error_type = %err.error_type(), "request rejected");
        }
        result
    }
}

fn default_correlation_id() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().to_string()
}
