//! On-demand health probes (spec §4.7). Read-only; must never acquire the
//! concurrency gate.

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::registry::ToolRegistry;
use crate::types::{HealthCheck, HealthReport, HealthStatus};

pub fn probe(registry: &ToolRegistry, breakers: &CircuitBreakerRegistry) -> HealthReport {
    let mut checks = Vec::new();
    let mut overall = HealthStatus::Healthy;

    for listing in registry.list() {
        if !listing.enabled {
            continue;
        }
        let resolvable = which::which(&listing.command).is_ok();
        let breaker_open = matches!(breakers.state_of(&listing.name), CircuitState::Open);

        let (status, message) = if !resolvable {
            (
                HealthStatus::Unhealthy,
                format!("command '{}' not found in PATH", listing.command),
            )
        } else if breaker_open {
            (HealthStatus::Degraded, "circuit breaker open".to_string())
        } else {
            (HealthStatus::Healthy, "ok".to_string())
        };

        overall = worse(overall, status);
        checks.push(HealthCheck {
            name: listing.name,
            status,
            message,
        });
    }

    HealthReport { overall, checks }
}

fn worse(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    use HealthStatus::*;
    match (a, b) {
        (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
        (Degraded, _) | (_, Degraded) => Degraded,
        _ => Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BreakerConfig, ToolDefinition};

    #[test]
    fn healthy_when_command_resolves_and_breaker_closed() {
        let registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "echo_tool".into(),
            command_name: "echo".into(),
            description: "d".into(),
            allowed_flags: Some(vec![]),
            default_timeout_sec: 30.0,
            concurrency: 1,
            breaker_config: BreakerConfig::default(),
        });
        let breakers = CircuitBreakerRegistry::new();
        let report = probe(&registry, &breakers);
        assert_eq!(report.overall, HealthStatus::Healthy);
    }

    #[test]
    fn unhealthy_when_command_missing() {
        let registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "ghost".into(),
            command_name: "definitely-not-a-real-binary-xyz".into(),
            description: "d".into(),
            allowed_flags: Some(vec![]),
            default_timeout_sec: 30.0,
            concurrency: 1,
            breaker_config: BreakerConfig::default(),
        });
        let breakers = CircuitBreakerRegistry::new();
        let report = probe(&registry, &breakers);
        assert_eq!(report.overall, HealthStatus::Unhealthy);
    }

    #[test]
    fn degraded_when_breaker_open() {
        let registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "echo_tool".into(),
            command_name: "echo".into(),
            description: "d".into(),
            allowed_flags: Some(vec![]),
            default_timeout_sec: 30.0,
            concurrency: 1,
            breaker_config: BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
        });
        let breakers = CircuitBreakerRegistry::new();
        breakers.register("echo_tool", BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        breakers.record_failure("echo_tool");
        let report = probe(&registry, &breakers);
        assert_eq!(report.overall, HealthStatus::Degraded);
    }
}
