//! Subprocess spawn, supervise, truncate, timeout, and kill (spec §4.4).
//!
//! Grounded in the resource-limiting `pre_exec` hook used for native
//! sandboxing and the process-group kill used for CLI supervision: the
//! child is placed in its own process group so a single `killpg` reaches
//! every descendant it may have spawned.

use crate::error::PipelineError;
use crate::validator::ValidatedRequest;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Resource ceilings applied before `exec` (spec §4.4 "Resource caps").
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_file_descriptors: u64,
    pub cpu_seconds_soft: u64,
    pub cpu_seconds_hard: u64,
}

/// The executor's unprocessed output, before the result builder attaches
/// correlation/error-taxonomy metadata.
#[derive(Debug)]
pub struct RawResult {
    pub stdout: String,
    pub stderr: String,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
    pub returncode: i32,
    pub timed_out: bool,
}

pub struct Executor {
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl Executor {
    pub fn new(max_stdout_bytes: usize, max_stderr_bytes: usize) -> Self {
        Self {
            max_stdout_bytes,
            max_stderr_bytes,
        }
    }

    /// Resolves `command_name` in `PATH`. Spec §4.4: "missing binary yields
    /// `NOT_FOUND` with returncode 127 without spawning."
    pub fn resolve(&self, command_name: &str) -> Result<PathBuf, PipelineError> {
        which::which(command_name)
            .map_err(|_| PipelineError::CommandNotFound(command_name.to_string()))
    }

    /// Executes the resolved binary against a validated request.
    pub async fn execute(
        &self,
        resolved_binary: &PathBuf,
        validated: &ValidatedRequest,
        limits: ResourceLimits,
    ) -> Result<RawResult, PipelineError> {
        let mut argv = validated.argv.clone();
        argv.push(validated.target.clone());

        let mut command = Command::new(resolved_binary);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("LANG", "C.UTF-8")
            .env("LC_ALL", "C.UTF-8");

        apply_process_group_and_limits(&mut command, limits);

        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::Execution(format!("spawn failed: {e}")))?;

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");
        let max_stdout = self.max_stdout_bytes;
        let max_stderr = self.max_stderr_bytes;

        let start = Instant::now();
        let deadline = Duration::from_secs_f64(validated.timeout_sec);

        let outcome = tokio::time::timeout(deadline, async {
            let stdout_fut = read_capped(&mut stdout, max_stdout);
            let stderr_fut = read_capped(&mut stderr, max_stderr);
            let (stdout_res, stderr_res) = tokio::join!(stdout_fut, stderr_fut);
            let status = child.wait().await;
            (stdout_res, stderr_res, status)
        })
        .await;

        match outcome {
            Ok((stdout_cap, stderr_cap, status)) => {
                let status = status
                    .map_err(|e| PipelineError::Execution(format!("wait failed: {e}")))?;
                let returncode = status.code().unwrap_or(-1);
                Ok(RawResult {
                    stdout: stdout_cap.data,
                    stderr: stderr_cap.data,
                    truncated_stdout: stdout_cap.truncated,
                    truncated_stderr: stderr_cap.truncated,
                    returncode,
                    timed_out: false,
                })
            }
            Err(_elapsed) => {
                kill_process_group(&mut child).await;
                let _ = start.elapsed();
                Ok(RawResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    truncated_stdout: false,
                    truncated_stderr: false,
                    returncode: 124,
                    timed_out: true,
                })
            }
        }
    }
}

struct CappedOutput {
    data: String,
    truncated: bool,
}

/// Reads a stream to completion, capping the *decoded* output at `max_bytes`
/// but continuing to drain past the cap so the child never blocks writing
/// to a full pipe (spec §4.4 "continue draining to avoid child blocking").
async fn read_capped<R: AsyncReadExt + Unpin>(reader: &mut R, max_bytes: usize) -> CappedOutput {
    let mut kept = Vec::with_capacity(max_bytes.min(64 * 1024));
    let mut truncated = false;
    let mut scratch = [0u8; 8192];

    loop {
        match reader.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => {
                if kept.len() < max_bytes {
                    let remaining = max_bytes - kept.len();
                    let take = remaining.min(n);
                    kept.extend_from_slice(&scratch[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    CappedOutput {
        data: lossy_decode_capped(&kept, max_bytes),
        truncated,
    }
}

/// Decodes `bytes` lossily, then re-caps the *decoded* string at `max_bytes`.
/// `from_utf8_lossy` can grow the byte count past `bytes.len()` when the
/// input was truncated mid multi-byte sequence: each `U+FFFD` replacement
/// encodes as 3 bytes even for a dangling 1- or 2-byte lead. Truncating
/// along a char boundary keeps the documented size cap exact.
fn lossy_decode_capped(bytes: &[u8], max_bytes: usize) -> String {
    let mut decoded = String::from_utf8_lossy(bytes).into_owned();
    if decoded.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !decoded.is_char_boundary(cut) {
            cut -= 1;
        }
        decoded.truncate(cut);
    }
    decoded
}

#[cfg(unix)]
fn apply_process_group_and_limits(command: &mut Command, limits: ResourceLimits) {
    use std::io;

    unsafe {
        command.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }

            #[cfg(feature = "native-sandbox")]
            {
                let mem_bytes = limits.max_memory_mb * 1024 * 1024;
                let _ = rlimit::setrlimit(rlimit::Resource::AS, mem_bytes, mem_bytes);
                let _ = rlimit::setrlimit(
                    rlimit::Resource::CPU,
                    limits.cpu_seconds_soft,
                    limits.cpu_seconds_hard,
                );
                let _ = rlimit::setrlimit(
                    rlimit::Resource::NOFILE,
                    limits.max_file_descriptors,
                    limits.max_file_descriptors,
                );
                let _ = rlimit::setrlimit(rlimit::Resource::CORE, 0, 0);
            }
            #[cfg(not(feature = "native-sandbox"))]
            {
                let _ = limits;
            }

            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_process_group_and_limits(_command: &mut Command, _limits: ResourceLimits) {
    tracing::warn!("process-group isolation and resource limits are POSIX-only; skipping");
}

#[cfg(unix)]
async fn kill_process_group(child: &mut tokio::process::Child) {
    if let Some(id) = child.id() {
        unsafe {
            libc::killpg(id as i32, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidatedRequest;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_mb: 512,
            max_file_descriptors: 256,
            cpu_seconds_soft: 300,
            cpu_seconds_hard: 305,
        }
    }

    #[tokio::test]
    async fn runs_and_captures_stdout() {
        let exec = Executor::new(1_048_576, 262_144);
        let bin = exec.resolve("echo").unwrap();
        let validated = ValidatedRequest {
            target: "10.0.0.1".to_string(),
            argv: vec!["-n".to_string(), "hello".to_string()],
            timeout_sec: 5.0,
            correlation_id: "1".to_string(),
        };
        let result = exec.execute(&bin, &validated, limits()).await.unwrap();
        assert_eq!(result.returncode, 0);
        assert!(!result.timed_out);
        assert!(result.stdout.contains("hello"));
        assert!(result.stdout.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found_without_spawn() {
        let exec = Executor::new(1_048_576, 262_144);
        let err = exec.resolve("definitely-not-a-real-binary-xyz").unwrap_err();
        assert_eq!(err.returncode(), 127);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_124() {
        let exec = Executor::new(1_048_576, 262_144);
        let bin = exec.resolve("sleep").unwrap();
        let validated = ValidatedRequest {
            target: "10.0.0.1".to_string(),
            argv: vec!["10".to_string()],
            timeout_sec: 1.0,
            correlation_id: "1".to_string(),
        };
        let start = Instant::now();
        let result = exec.execute(&bin, &validated, limits()).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.returncode, 124);
        assert!(start.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn truncates_large_output_without_deadlock() {
        let exec = Executor::new(1024, 262_144);
        let bin = exec.resolve("head").unwrap();
        // `target` is appended as the final positional argument by `execute`,
        // so route it to double as the file operand: `head -c 5000 /dev/zero`.
        let validated = ValidatedRequest {
            target: "/dev/zero".to_string(),
            argv: vec!["-c".to_string(), "5000".to_string()],
            timeout_sec: 5.0,
            correlation_id: "1".to_string(),
        };
        let result = exec.execute(&bin, &validated, limits()).await.unwrap();
        assert!(!result.timed_out);
        assert!(result.truncated_stdout);
        assert!(result.stdout.len() <= 1024);
    }

    #[test]
    fn lossy_decode_never_exceeds_cap_on_split_multibyte_sequence() {
        // A 3-byte UTF-8 sequence (e.g. U+20AC) cut after its first byte
        // decodes to a 3-byte replacement character, which would overrun a
        // cap of 1 byte if not re-capped after decoding.
        let euro = "\u{20AC}".as_bytes();
        let cut = &euro[..1];
        let decoded = lossy_decode_capped(cut, 1);
        assert!(decoded.len() <= 1);
    }

    #[test]
    fn lossy_decode_keeps_valid_ascii_untouched() {
        let decoded = lossy_decode_capped(b"hello", 1024);
        assert_eq!(decoded, "hello");
    }
}
