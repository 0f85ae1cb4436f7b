//! Process-wide configuration loaded once from the environment.
//!
//! Mirrors the teacher's `HttpApiConfig`/`SYMBIONT_*` env-var convention:
//! a best-effort `.env` load followed by typed reads with documented
//! defaults, never a panic on a malformed numeric value.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_args_len: usize,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
    pub default_timeout_sec: f64,
    /// Fallback concurrency for any tool registered without its own value
    /// (`ToolDefinition.concurrency == 0`); see `Pipeline::register_tool`.
    pub default_concurrency: usize,
    pub max_memory_mb: u64,
    pub max_file_descriptors: u64,
    pub server_transport: Transport,
    pub server_host: String,
    pub server_port: u16,
    pub shutdown_grace_period: Duration,
    pub tool_include: Option<Vec<String>>,
    pub tool_exclude: Option<Vec<String>>,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

impl Config {
    /// Loads configuration from the process environment, applying a
    /// best-effort `.env` file first. Invalid numeric values fall back to
    /// their documented default with a warning rather than aborting startup.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            max_args_len: env_usize("MAX_ARGS_LEN", 2048),
            max_stdout_bytes: env_usize("MAX_STDOUT_BYTES", 1_048_576),
            max_stderr_bytes: env_usize("MAX_STDERR_BYTES", 262_144),
            default_timeout_sec: env_f64("DEFAULT_TIMEOUT_SEC", 300.0),
            default_concurrency: env_usize("DEFAULT_CONCURRENCY", 2),
            max_memory_mb: env_u64("MAX_MEMORY_MB", 512),
            max_file_descriptors: env_u64("MAX_FILE_DESCRIPTORS", 256),
            server_transport: env_transport("SERVER_TRANSPORT", Transport::Http),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_u16("SERVER_PORT", 8080),
            shutdown_grace_period: Duration::from_secs(env_u64("SHUTDOWN_GRACE_PERIOD", 30)),
            tool_include: env_csv("TOOL_INCLUDE"),
            tool_exclude: env_csv("TOOL_EXCLUDE"),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            tracing::debug!(key, default, "using default for env var");
            default
        })
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_transport(key: &str, default: Transport) -> Transport {
    match std::env::var(key).ok().as_deref() {
        Some("stdio") => Transport::Stdio,
        Some("http") => Transport::Http,
        Some(other) => {
            tracing::warn!(value = other, "unrecognized SERVER_TRANSPORT, using default");
            default
        }
        None => default,
    }
}

fn env_csv(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
