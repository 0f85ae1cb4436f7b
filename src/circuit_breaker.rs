//! Per-tool three-state circuit breaker (spec §4.3).

use crate::types::BreakerConfig;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MAX_HALF_OPEN_CALLS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit open for tool '{tool_name}': {failure_count} consecutive failures, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub tool_name: String,
    pub failure_count: u32,
    pub retry_after: Duration,
}

/// Breaker state for a single tool (spec §3 "Breaker State").
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    current_recovery_timeout: Duration,
    half_open_inflight: u32,
}

impl BreakerState {
    fn new(config: &BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            current_recovery_timeout: config.recovery_timeout,
            half_open_inflight: 0,
        }
    }
}

/// Per-tool registry of breaker states, each guarded by its own lock
/// (spec §5: "Breaker state per tool: single mutex per tool"). Breaker
/// state is created lazily on first access and lives for the process
/// lifetime (spec §3 "Lifecycles").
pub struct CircuitBreakerRegistry {
    states: RwLock<HashMap<String, RwLock<BreakerState>>>,
    configs: RwLock<HashMap<String, BreakerConfig>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the breaker configuration for a tool. Called
    /// once at registry bootstrap per spec §3's "Tool definitions created at
    /// startup... immutable thereafter."
    pub fn register(&self, tool: &str, config: BreakerConfig) {
        self.configs.write().insert(tool.to_string(), config);
    }

    fn config_for(&self, tool: &str) -> BreakerConfig {
        self.configs
            .read()
            .get(tool)
            .cloned()
            .unwrap_or_default()
    }

    fn ensure_state(&self, tool: &str) {
        if self.states.read().contains_key(tool) {
            return;
        }
        let config = self.config_for(tool);
        self.states
            .write()
            .entry(tool.to_string())
            .or_insert_with(|| RwLock::new(BreakerState::new(&config)));
    }

    /// Pre-check before admitting a call (spec §4.9 step 4, table rows for
    /// `Open`). Returns `Err` with a suggested retry-after when the breaker
    /// is open and not yet due for a half-open probe. On success, returns
    /// `Some((from, to))` when this call itself caused a state transition
    /// (the only such case is `Open` → `HalfOpen`), so callers can feed it
    /// to a metrics sink.
    pub fn check(&self, tool: &str) -> Result<Option<(CircuitState, CircuitState)>, CircuitOpenError> {
        self.ensure_state(tool);
        let config = self.config_for(tool);
        let states = self.states.read();
        let lock = states.get(tool).expect("ensured above");
        let mut st = lock.write();

        match st.state {
            CircuitState::Closed => Ok(None),
            CircuitState::HalfOpen => {
                if st.half_open_inflight >= MAX_HALF_OPEN_CALLS {
                    Err(CircuitOpenError {
                        tool_name: tool.to_string(),
                        failure_count: st.failure_count,
                        retry_after: Duration::from_millis(100),
                    })
                } else {
                    st.half_open_inflight += 1;
                    Ok(None)
                }
            }
            CircuitState::Open => {
                let last_failure = st.last_failure_time.unwrap_or_else(Instant::now);
                let due_in = jittered(st.current_recovery_timeout, config.enable_jitter);
                if last_failure.elapsed() >= due_in {
                    st.state = CircuitState::HalfOpen;
                    st.success_count = 0;
                    st.half_open_inflight = 1;
                    Ok(Some((CircuitState::Open, CircuitState::HalfOpen)))
                } else {
                    let retry_after = due_in.saturating_sub(last_failure.elapsed());
                    Err(CircuitOpenError {
                        tool_name: tool.to_string(),
                        failure_count: st.failure_count,
                        retry_after,
                    })
                }
            }
        }
    }

    /// Records a successful call (spec §4.3 table: `Closed`/`HalfOpen` success
    /// rows). Returns `Some((from, to))` when the call closed the breaker.
    pub fn record_success(&self, tool: &str) -> Option<(CircuitState, CircuitState)> {
        self.ensure_state(tool);
        let config = self.config_for(tool);
        let states = self.states.read();
        let mut st = states.get(tool).expect("ensured above").write();

        match st.state {
            CircuitState::Closed => {
                st.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                st.success_count += 1;
                st.half_open_inflight = st.half_open_inflight.saturating_sub(1);
                if st.success_count >= config.success_threshold {
                    st.state = CircuitState::Closed;
                    st.failure_count = 0;
                    st.success_count = 0;
                    st.current_recovery_timeout = config.recovery_timeout;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Open => {
                // Defensive: a stray success while Open should not happen in
                // practice (the gate shouldn't have admitted the call), but
                // treat it as evidence of recovery rather than ignore it.
                st.state = CircuitState::Closed;
                st.failure_count = 0;
                Some((CircuitState::Open, CircuitState::Closed))
            }
        }
    }

    /// Records a failed call (spec §4.3 table: failure rows). Only "expected
    /// exception classes" should reach this call — unexpected errors must
    /// not advance the breaker (spec §4.3 "Exception classification").
    /// Returns `Some((from, to))` when the call opened the breaker.
    pub fn record_failure(&self, tool: &str) -> Option<(CircuitState, CircuitState)> {
        self.ensure_state(tool);
        let config = self.config_for(tool);
        let states = self.states.read();
        let mut st = states.get(tool).expect("ensured above").write();
        let now = Instant::now();

        match st.state {
            CircuitState::Closed => {
                st.failure_count += 1;
                st.last_failure_time = Some(now);
                if st.failure_count >= config.failure_threshold {
                    st.state = CircuitState::Open;
                    st.current_recovery_timeout = config.recovery_timeout;
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                st.state = CircuitState::Open;
                st.half_open_inflight = 0;
                st.last_failure_time = Some(now);
                let grown = st.current_recovery_timeout.mul_f64(config.timeout_multiplier);
                st.current_recovery_timeout = grown.min(config.max_timeout);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            CircuitState::Open => {
                st.failure_count += 1;
                st.last_failure_time = Some(now);
                None
            }
        }
    }

    pub fn state_of(&self, tool: &str) -> CircuitState {
        self.ensure_state(tool);
        let states = self.states.read();
        states.get(tool).expect("ensured above").read().state
    }
}

/// Applies optional jitter to a recovery timeout. Jitter is always added,
/// never subtracted, so the effective timeout can never be driven below
/// `base` — resolving spec §9's open question about clamping jitter
/// non-negative.
fn jittered(base: Duration, enable_jitter: bool) -> Duration {
    if !enable_jitter {
        return base;
    }
    let fraction: f64 = rand::thread_rng().gen_range(0.0..=0.10);
    base + base.mul_f64(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery: Duration) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
            success_threshold: 1,
            timeout_multiplier: 1.5,
            max_timeout: Duration::from_secs(300),
            enable_jitter: false,
        }
    }

    #[test]
    fn starts_closed_and_allows_calls() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(3, Duration::from_millis(50)));
        assert!(reg.check("nmap").is_ok());
        assert_eq!(reg.state_of("nmap"), CircuitState::Closed);
    }

    #[test]
    fn trips_after_threshold_failures() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(3, Duration::from_millis(50)));
        for _ in 0..3 {
            reg.record_failure("nmap");
        }
        assert_eq!(reg.state_of("nmap"), CircuitState::Open);
        assert!(reg.check("nmap").is_err());
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(3, Duration::from_millis(50)));
        reg.record_failure("nmap");
        reg.record_failure("nmap");
        reg.record_success("nmap");
        reg.record_failure("nmap");
        reg.record_failure("nmap");
        // two more failures after reset should not yet trip a threshold-3 breaker
        assert_eq!(reg.state_of("nmap"), CircuitState::Closed);
    }

    #[test]
    fn recovers_through_half_open_on_success() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(1, Duration::from_millis(10)));
        reg.record_failure("nmap");
        assert_eq!(reg.state_of("nmap"), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(reg.check("nmap").is_ok());
        assert_eq!(reg.state_of("nmap"), CircuitState::HalfOpen);

        reg.record_success("nmap");
        assert_eq!(reg.state_of("nmap"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_with_grown_timeout() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(1, Duration::from_millis(10)));
        reg.record_failure("nmap");
        std::thread::sleep(Duration::from_millis(20));
        reg.check("nmap").unwrap();
        reg.record_failure("nmap");
        assert_eq!(reg.state_of("nmap"), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let reg = CircuitBreakerRegistry::new();
        reg.register("nmap", config(1, Duration::from_millis(10)));
        reg.record_failure("nmap");
        std::thread::sleep(Duration::from_millis(20));
        assert!(reg.check("nmap").is_ok());
        // a second concurrent probe must be rejected (max_half_open_calls=1)
        assert!(reg.check("nmap").is_err());
    }

    #[test]
    fn success_threshold_of_two_requires_two_successes() {
        let reg = CircuitBreakerRegistry::new();
        let mut cfg = config(1, Duration::from_millis(10));
        cfg.success_threshold = 2;
        reg.register("amass", cfg);
        reg.record_failure("amass");
        std::thread::sleep(Duration::from_millis(20));
        reg.check("amass").unwrap();
        reg.record_success("amass");
        assert_eq!(reg.state_of("amass"), CircuitState::HalfOpen);
    }
}
