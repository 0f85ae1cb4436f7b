//! Request validation (spec §4.1).
//!
//! Pure functions only — the validator never executes external processes
//! and has no side effects.

use crate::error::PipelineError;
use crate::types::{ExecuteRequest, ToolDefinition};
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '>', '<', '\r', '\n'];

static HOSTNAME_LABEL: OnceLock<Regex> = OnceLock::new();
static ARG_TOKEN: OnceLock<Regex> = OnceLock::new();

fn hostname_label_re() -> &'static Regex {
    HOSTNAME_LABEL
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap())
}

fn arg_token_re() -> &'static Regex {
    ARG_TOKEN.get_or_init(|| Regex::new(r"^[A-Za-z0-9.:/=+\-,@%_]+$").unwrap())
}

const LAB_SUFFIX: &str = ".lab.internal";

/// A request that has passed every validation step, ready for the executor.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub target: String,
    pub argv: Vec<String>,
    pub timeout_sec: f64,
    pub correlation_id: String,
}

/// Validates `req` against `tool`'s allow-list and limits (spec §4.1 steps 1-4).
pub fn validate(
    req: &ExecuteRequest,
    tool: &ToolDefinition,
    max_args_len: usize,
) -> Result<ValidatedRequest, PipelineError> {
    let target = validate_target(&req.target)?;
    let argv = validate_extra_args(&req.extra_args, tool, max_args_len)?;
    let timeout_sec = validate_timeout(req.timeout_sec, tool.default_timeout_sec);
    let correlation_id = req
        .correlation_id
        .clone()
        .filter(|c| !c.is_empty() && c.len() <= 64)
        .unwrap_or_else(default_correlation_id);

    Ok(ValidatedRequest {
        target,
        argv,
        timeout_sec,
        correlation_id,
    })
}

fn default_correlation_id() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().to_string()
}

/// Step 1: target must be an RFC1918 IPv4 address, an RFC1918 IPv4 CIDR
/// network, or a hostname ending in `.lab.internal` with a valid label.
fn validate_target(raw: &str) -> Result<String, PipelineError> {
    let target = raw.trim();

    if let Some(label) = target.strip_suffix(LAB_SUFFIX) {
        if !label.is_empty() && hostname_label_re().is_match(label) {
            return Ok(target.to_string());
        }
        return Err(PipelineError::Validation(format!(
            "invalid .lab.internal hostname label: {label}"
        )));
    }

    if let Some((addr_part, prefix_part)) = target.split_once('/') {
        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| PipelineError::Validation(format!("invalid CIDR address: {target}")))?;
        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| PipelineError::Validation(format!("invalid CIDR prefix: {target}")))?;
        if prefix > 32 {
            return Err(PipelineError::Validation(format!(
                "invalid CIDR prefix: {target}"
            )));
        }
        if is_rfc1918(addr) {
            return Ok(target.to_string());
        }
        return Err(PipelineError::Validation(format!(
            "target not in RFC1918 space: {target}"
        )));
    }

    let addr: Ipv4Addr = target
        .parse()
        .map_err(|_| PipelineError::Validation(format!("target is not a valid IPv4 address: {target}")))?;
    if is_rfc1918(addr) {
        Ok(target.to_string())
    } else {
        Err(PipelineError::Validation(format!(
            "target not in RFC1918 space: {target}"
        )))
    }
}

fn is_rfc1918(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    matches!(
        octets,
        [10, ..]
            | [172, 16..=31, ..]
            | [192, 168, ..]
    )
}

/// Steps 2-3: length, forbidden characters, POSIX word-splitting, and
/// flag-prefix allow-listing.
fn validate_extra_args(
    raw: &str,
    tool: &ToolDefinition,
    max_args_len: usize,
) -> Result<Vec<String>, PipelineError> {
    if raw.len() > max_args_len {
        return Err(PipelineError::Validation(format!(
            "extra_args exceeds {max_args_len} bytes"
        )));
    }
    if raw.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return Err(PipelineError::Validation(
            "extra_args contains a forbidden metacharacter".to_string(),
        ));
    }

    let tokens = shell_words::split(raw)
        .map_err(|e| PipelineError::Validation(format!("unbalanced quoting in extra_args: {e}")))?;

    for token in &tokens {
        if token.is_empty() || !arg_token_re().is_match(token) {
            return Err(PipelineError::Validation(format!(
                "argument token fails allow-list pattern: {token}"
            )));
        }
        if token.starts_with('-') {
            let allowed = tool.allowed_flags.as_deref().unwrap_or(&[]);
            if !allowed.iter().any(|prefix| token.starts_with(prefix.as_str())) {
                return Err(PipelineError::Validation(format!(
                    "flag not in tool's allow-list: {token}"
                )));
            }
        }
    }

    Ok(tokens)
}

/// Step 4: clamp to `[1, 3600]`, defaulting from the tool when unset.
fn validate_timeout(requested: Option<f64>, tool_default: f64) -> f64 {
    let raw = requested.unwrap_or(tool_default);
    raw.clamp(1.0, 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BreakerConfig;

    fn tool(allowed_flags: Option<Vec<&str>>) -> ToolDefinition {
        ToolDefinition {
            name: "nmap".into(),
            command_name: "nmap".into(),
            description: "scanner".into(),
            allowed_flags: allowed_flags.map(|v| v.into_iter().map(String::from).collect()),
            default_timeout_sec: 300.0,
            concurrency: 2,
            breaker_config: BreakerConfig::default(),
        }
    }

    #[test]
    fn accepts_private_ipv4() {
        let req = ExecuteRequest {
            target: "192.168.1.10".into(),
            extra_args: "-sV".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-s"]));
        let out = validate(&req, &t, 2048).unwrap();
        assert_eq!(out.target, "192.168.1.10");
        assert_eq!(out.argv, vec!["-sV".to_string()]);
    }

    #[test]
    fn rejects_public_ip() {
        let req = ExecuteRequest {
            target: "8.8.8.8".into(),
            extra_args: "".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-s"]));
        assert!(validate(&req, &t, 2048).is_err());
    }

    #[test]
    fn accepts_rfc1918_cidr() {
        let req = ExecuteRequest {
            target: "10.0.0.0/24".into(),
            extra_args: "".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-s"]));
        assert!(validate(&req, &t, 2048).is_ok());
    }

    #[test]
    fn accepts_lab_internal_hostname() {
        let req = ExecuteRequest {
            target: "scanner-1.lab.internal".into(),
            extra_args: "".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-s"]));
        assert!(validate(&req, &t, 2048).is_ok());
    }

    #[test]
    fn rejects_metacharacters() {
        let req = ExecuteRequest {
            target: "10.0.0.1".into(),
            extra_args: "-v; rm -rf /".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-v"]));
        let err = validate(&req, &t, 2048).unwrap_err();
        assert_eq!(err.error_type(), crate::error::ErrorType::ValidationError);
    }

    #[test]
    fn rejects_flag_outside_allowlist() {
        let req = ExecuteRequest {
            target: "10.0.0.1".into(),
            extra_args: "--script=vuln".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(Some(vec!["-s"]));
        assert!(validate(&req, &t, 2048).is_err());
    }

    #[test]
    fn rejects_any_flag_when_allowlist_unset() {
        let req = ExecuteRequest {
            target: "10.0.0.1".into(),
            extra_args: "-sV".into(),
            timeout_sec: None,
            correlation_id: None,
        };
        let t = tool(None);
        assert!(validate(&req, &t, 2048).is_err());
    }

    #[test]
    fn clamps_timeout() {
        assert_eq!(validate_timeout(Some(9999.0), 300.0), 3600.0);
        assert_eq!(validate_timeout(Some(0.0), 300.0), 1.0);
        assert_eq!(validate_timeout(None, 300.0), 300.0);
    }
}
