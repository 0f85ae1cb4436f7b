//! Built-in tool catalog bootstrapped at startup (spec §4.8: "discover tool
//! definitions by walking a well-known namespace"). In this deployment the
//! namespace is a small static table of allow-listed scanner/enumerator
//! wrappers rather than a plugin directory — the registry's filtering and
//! enable/disable semantics are identical either way.

use crate::types::{BreakerConfig, ToolDefinition};
use std::time::Duration;

/// Returns the built-in tool definitions. Names beginning with `Test`,
/// `Mock`, `Base`, `Abstract`, `Example`, or `_` are intentionally absent —
/// the registry would reject them anyway (spec §4.8).
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "nmap".to_string(),
            command_name: "nmap".to_string(),
            description: "TCP/UDP port scanner".to_string(),
            allowed_flags: Some(vec![
                "-s".to_string(),
                "-p".to_string(),
                "-T".to_string(),
                "-A".to_string(),
                "-O".to_string(),
                "--top-ports".to_string(),
            ]),
            default_timeout_sec: 300.0,
            concurrency: 2,
            breaker_config: BreakerConfig::default(),
        },
        ToolDefinition {
            name: "masscan".to_string(),
            command_name: "masscan".to_string(),
            description: "high-rate async port scanner".to_string(),
            allowed_flags: Some(vec!["-p".to_string(), "--rate".to_string()]),
            default_timeout_sec: 300.0,
            concurrency: 1,
            breaker_config: BreakerConfig {
                failure_threshold: 3,
                ..BreakerConfig::default()
            },
        },
        ToolDefinition {
            name: "amass".to_string(),
            command_name: "amass".to_string(),
            description: "subdomain and asset enumeration".to_string(),
            allowed_flags: Some(vec!["-active".to_string(), "-d".to_string()]),
            default_timeout_sec: 600.0,
            concurrency: 1,
            breaker_config: BreakerConfig {
                recovery_timeout: Duration::from_secs(90),
                success_threshold: 2,
                ..BreakerConfig::default()
            },
        },
    ]
}
