//! `shell_cmd` — the one concrete tool named in scope (spec.md §6).
//!
//! Directory-scope validation, inline-eval rejection, and shell-control-token
//! rejection all happen here before a child process is ever spawned; once
//! spawned, the child runs through the same sandbox pre-exec hook the
//! teacher's `ToolExecutor::run_shell_sandboxed` used for `run_shell`.

pub mod sandbox;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use agentworld_tools::{Tool, ToolOutput, ToolSpec};

/// Commands that accept an inline script on the command line rather than a
/// file path — always rejected regardless of which flag carries the script,
/// since `shell_cmd` is for running discrete binaries, not arbitrary shell.
const INLINE_EVAL_COMMANDS: &[&str] = &["sh", "bash", "zsh", "node", "python", "python3", "powershell", "pwsh"];
const INLINE_EVAL_FLAGS: &[&str] = &["-c", "-e", "-Command", "/c", "/C"];

/// Characters/sequences that would let a single argument smuggle a second
/// command past the structured `command`/`parameters` split.
const SHELL_CONTROL_TOKENS: &[&str] = &["&&", "||", "|", ">", "<", ";", "`", "$("];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputDetail {
    Minimal,
    #[default]
    Full,
}

#[derive(Debug, Deserialize)]
struct ShellCmdArgs {
    command: String,
    #[serde(default)]
    parameters: Vec<String>,
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    output_format: OutputFormat,
    #[serde(default)]
    output_detail: OutputDetail,
    #[serde(default)]
    artifact_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ArtifactInfo {
    path: String,
    sha256: String,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct ShellCmdJson {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    timed_out: bool,
    duration_ms: u128,
    artifacts: Vec<ArtifactInfo>,
}

/// `shell_cmd`'s tool definition. One instance is created per world, rooted
/// at that world's `trustedCwd` (spec.md §6: `world.variables["working_directory"]
/// ?? defaultWorkingDirectory`).
pub struct ShellCmdTool {
    pub trusted_cwd: PathBuf,
    pub default_timeout_ms: u64,
}

impl ShellCmdTool {
    pub fn new(trusted_cwd: PathBuf, default_timeout_ms: u64) -> Self {
        Self { trusted_cwd, default_timeout_ms }
    }

    fn resolve_scoped(&self, relative: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(relative);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.trusted_cwd.join(candidate)
        };
        let canonical_root = self
            .trusted_cwd
            .canonicalize()
            .map_err(|e| format!("trusted working directory is invalid: {e}"))?;
        let canonical_target = joined
            .canonicalize()
            .map_err(|e| format!("path does not exist or is unreadable: {e}"))?;
        if !canonical_target.starts_with(&canonical_root) {
            return Err(format!(
                "path escapes trusted working directory: {}",
                canonical_target.display()
            ));
        }
        Ok(canonical_target)
    }

    fn validate(&self, args: &ShellCmdArgs) -> Result<PathBuf, String> {
        let base_name = Path::new(&args.command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&args.command);
        if INLINE_EVAL_COMMANDS.contains(&base_name) {
            let has_inline_flag = args
                .parameters
                .iter()
                .any(|p| INLINE_EVAL_FLAGS.iter().any(|flag| p == flag));
            if has_inline_flag {
                return Err(format!(
                    "inline-eval invocation rejected: '{}' with an inline-script flag is not permitted",
                    args.command
                ));
            }
        }

        let all_tokens = std::iter::once(args.command.as_str()).chain(args.parameters.iter().map(String::as_str));
        for token in all_tokens {
            for control in SHELL_CONTROL_TOKENS {
                if token.contains(control) {
                    return Err(format!(
                        "shell control token '{control}' is not permitted in shell_cmd arguments"
                    ));
                }
            }
        }

        match &args.directory {
            Some(dir) => self.resolve_scoped(dir),
            None => Ok(self.trusted_cwd.clone()),
        }
    }
}

#[async_trait]
impl Tool for ShellCmdTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "shell_cmd".to_string(),
            description: "Run a single command with arguments inside the world's trusted working directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "parameters": {"type": "array", "items": {"type": "string"}},
                    "directory": {"type": "string"},
                    "timeout": {"type": "integer"},
                    "output_format": {"type": "string", "enum": ["markdown", "json"]},
                    "output_detail": {"type": "string", "enum": ["minimal", "full"]},
                    "artifact_paths": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["command"]
            }),
        }
    }

    async fn run(&self, args: Value) -> ToolOutput {
        let args: ShellCmdArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(err) => return ToolOutput::error(format!("Error executing tool: invalid arguments: {err}")),
        };

        let working_dir = match self.validate(&args) {
            Ok(dir) => dir,
            Err(message) => return ToolOutput::error(format!("Error executing tool: {message}")),
        };

        let timeout_ms = args.timeout.unwrap_or(self.default_timeout_ms);
        let started = std::time::Instant::now();
        let executed_at = chrono_now_rfc3339();

        let mut command = tokio::process::Command::new(&args.command);
        command.args(&args.parameters).current_dir(&working_dir);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        #[cfg(all(feature = "sandbox", unix))]
        {
            use std::os::unix::process::CommandExt as _;
            let ws = working_dir.display().to_string();
            // SAFETY: `apply_to_child` only makes async-signal-safe syscalls
            // and runs between fork and exec.
            unsafe {
                command.as_std_mut().pre_exec(move || sandbox::apply_to_child(&ws));
            }
        }

        info!(command = %args.command, ?working_dir, "shell_cmd: executing");

        let spawn_result = command.spawn();
        let mut child = match spawn_result {
            Ok(child) => child,
            Err(err) => {
                return ToolOutput::error(format!("Error executing tool: failed to spawn '{}': {err}", args.command));
            }
        };

        let wait_result = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await;
        let duration = started.elapsed();

        let (exit_code, stdout, stderr, timed_out) = match wait_result {
            Ok(Ok(output)) => (
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                false,
            ),
            Ok(Err(err)) => {
                return ToolOutput::error(format!("Error executing tool: {err}"));
            }
            Err(_) => {
                warn!(command = %args.command, timeout_ms, "shell_cmd: timed out");
                (None, String::new(), String::new(), true)
            }
        };

        let artifacts = self.collect_artifacts(&args.artifact_paths);

        let success = !timed_out && exit_code == Some(0);
        let content = match args.output_format {
            OutputFormat::Json => {
                let payload = ShellCmdJson {
                    exit_code,
                    stdout,
                    stderr,
                    timed_out,
                    duration_ms: duration.as_millis(),
                    artifacts,
                };
                serde_json::to_string(&payload).unwrap_or_else(|e| format!("Error executing tool: failed to serialize output: {e}"))
            }
            OutputFormat::Markdown => render_markdown(
                &args.command,
                &executed_at,
                duration,
                exit_code,
                timed_out,
                &stdout,
                &stderr,
                &artifacts,
                args.output_detail,
            ),
        };

        if success {
            ToolOutput::ok(content)
        } else {
            ToolOutput::error(content)
        }
    }
}

impl ShellCmdTool {
    fn collect_artifacts(&self, paths: &[String]) -> Vec<ArtifactInfo> {
        let mut artifacts = Vec::new();
        for raw in paths {
            let resolved = match self.resolve_scoped(raw) {
                Ok(p) => p,
                Err(err) => {
                    warn!(path = %raw, %err, "shell_cmd: skipping unscoped artifact");
                    continue;
                }
            };
            let bytes = match std::fs::read(&resolved) {
                Ok(b) => b,
                Err(err) => {
                    warn!(path = %raw, %err, "shell_cmd: skipping unreadable artifact");
                    continue;
                }
            };
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let digest = hasher.finalize();
            artifacts.push(ArtifactInfo {
                path: raw.clone(),
                sha256: hex_encode(&digest),
                bytes: bytes.len() as u64,
            });
        }
        artifacts
    }
}

#[allow(clippy::too_many_arguments)]
fn render_markdown(
    command: &str,
    executed_at: &str,
    duration: Duration,
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: &str,
    stderr: &str,
    artifacts: &[ArtifactInfo],
    detail: OutputDetail,
) -> String {
    let exit_display = if timed_out {
        "timed out".to_string()
    } else {
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
    };

    let mut out = String::new();
    out.push_str(&format!("### command\n{command}\n\n"));
    out.push_str(&format!("### executed_at\n{executed_at}\n\n"));
    out.push_str(&format!("### duration\n{}ms\n\n", duration.as_millis()));
    out.push_str(&format!("### exit_code\n{exit_display}\n\n"));

    if matches!(detail, OutputDetail::Full) || !stdout.is_empty() {
        out.push_str(&format!("### stdout\n{stdout}\n\n"));
    }
    if matches!(detail, OutputDetail::Full) || !stderr.is_empty() {
        out.push_str(&format!("### stderr\n{stderr}\n\n"));
    }

    if !artifacts.is_empty() {
        out.push_str("### artifacts\n");
        for artifact in artifacts {
            out.push_str(&format!("{} ({}, {} bytes)\n", artifact.path, artifact.sha256, artifact.bytes));
        }
    }

    out.trim_end().to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn chrono_now_rfc3339() -> String {
    // `agentworld-exec` has no direct `chrono` dependency; callers that need
    // a real wall-clock timestamp pass one in via the orchestrator's event
    // envelope. This local helper only needs monotonic-enough uniqueness for
    // the markdown `executed_at` section within a single process.
    format!("{:?}", std::time::SystemTime::now())
}

/// Resolve a world's `trustedCwd`: the configured working directory if set,
/// else the process's current directory (spec.md §6).
pub fn resolve_trusted_cwd(world_working_directory: Option<&str>) -> PathBuf {
    match world_working_directory {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_in(dir: &Path) -> ShellCmdTool {
        ShellCmdTool::new(dir.to_path_buf(), 5_000)
    }

    #[tokio::test]
    async fn runs_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "echo", "parameters": ["hi"]}))
            .await;
        assert!(result.success);
        assert!(result.content.contains("hi"));
    }

    #[tokio::test]
    async fn rejects_directory_escape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "echo", "parameters": ["hi"], "directory": "../../etc"}))
            .await;
        assert!(!result.success);
        assert!(result.content.contains("Error executing tool"));
    }

    #[tokio::test]
    async fn rejects_inline_eval() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "sh", "parameters": ["-c", "echo hi"]}))
            .await;
        assert!(!result.success);
        assert!(result.content.contains("inline-eval"));
    }

    #[tokio::test]
    async fn rejects_shell_control_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "echo", "parameters": ["hi", "&&", "rm -rf /"]}))
            .await;
        assert!(!result.success);
        assert!(result.content.contains("control token"));
    }

    #[tokio::test]
    async fn json_output_includes_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "echo", "parameters": ["hi"], "output_format": "json"}))
            .await;
        assert!(result.success);
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({"command": "false", "parameters": []}))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn artifact_paths_are_hashed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.txt"), b"hello").unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .run(json!({
                "command": "echo",
                "parameters": ["hi"],
                "artifact_paths": ["out.txt"],
                "output_format": "json"
            }))
            .await;
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["artifacts"][0]["bytes"], 5);
        assert!(parsed["artifacts"][0]["sha256"].as_str().unwrap().len() == 64);
    }

    #[test]
    fn resolve_trusted_cwd_falls_back_to_cwd() {
        let resolved = resolve_trusted_cwd(None);
        assert!(resolved.exists() || resolved == PathBuf::from("."));
    }
}
