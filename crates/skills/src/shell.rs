use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use taskcell_core::{Error, Result, ShellConfig};

use crate::descriptor::{ActionSpec, ParamKind};
use crate::{Skill, SkillContext, SkillDescriptor};

const DENY_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"rm\s+-rf\s+~",
    r"rm\s+-rf\s+\*",
    r"\bdd\b.*\bif=",
    r"\bshutdown\b",
    r"\breboot\b",
    r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;", // fork bomb
    r">\s*/dev/sd",
    r"mkfs\.",
];

fn is_dangerous_command(command: &str) -> bool {
    for pattern in DENY_PATTERNS {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(command) {
                return true;
            }
        }
    }
    false
}

/// Truncate a string to at most `max_chars` bytes, respecting UTF-8 char
/// boundaries.
fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Run `command` through `sh -c` with a timeout, output truncation and
/// cooperative cancellation. Shared by the shell skill and manifest-declared
/// script skills.
pub(crate) async fn run_sh(
    command: &str,
    working_dir: &Path,
    envs: &[(String, String)],
    config: &ShellConfig,
    cancel: &CancellationToken,
) -> Result<Value> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let wait = timeout(Duration::from_secs(config.timeout_secs), cmd.output());
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(Error::Cancelled("Command cancelled".to_string()));
        }
        result = wait => result,
    };

    match result {
        Ok(Ok(output)) => {
            let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();

            let mut truncated = false;
            if stdout.len() > config.max_output_chars {
                stdout = format!(
                    "{}\n... (output truncated)",
                    safe_truncate(&stdout, config.max_output_chars)
                );
                truncated = true;
            }
            if stderr.len() > config.max_output_chars {
                stderr = format!(
                    "{}\n... (output truncated)",
                    safe_truncate(&stderr, config.max_output_chars)
                );
                truncated = true;
            }

            Ok(json!({
                "exit_code": output.status.code(),
                "stdout": stdout,
                "stderr": stderr,
                "truncated": truncated
            }))
        }
        Ok(Err(e)) => Err(Error::Other(format!("Failed to execute command: {}", e))),
        Err(_) => Err(Error::Timeout(format!(
            "Command timed out after {} seconds",
            config.timeout_secs
        ))),
    }
}

fn resolve_working_dir(params: &Value, config: &ShellConfig) -> PathBuf {
    let default = config
        .workspace
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    params
        .get("working_dir")
        .and_then(|v| v.as_str())
        .map(|s| {
            if s.starts_with('/') {
                PathBuf::from(s)
            } else {
                default.join(s)
            }
        })
        .unwrap_or(default)
}

/// Built-in skill executing shell commands with safety controls.
pub struct ShellSkill;

#[async_trait]
impl Skill for ShellSkill {
    fn descriptor(&self) -> SkillDescriptor {
        SkillDescriptor::new("shell", "Shell command execution and system automation").action(
            ActionSpec::new("run")
                .param("cmd", ParamKind::String, true)
                .param("working_dir", ParamKind::String, false),
        )
    }

    fn reusable(&self) -> bool {
        true
    }

    async fn execute(&self, action: &str, ctx: SkillContext, params: Value) -> Result<Value> {
        if action != "run" {
            return Err(Error::NotFound(format!("Unknown action: {}", action)));
        }

        let command = params
            .get("cmd")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing required parameter: cmd".to_string()))?;

        if is_dangerous_command(command) {
            return Err(Error::Validation(
                "Command matches dangerous pattern and is blocked".to_string(),
            ));
        }

        let working_dir = resolve_working_dir(&params, &ctx.shell);
        run_sh(command, &working_dir, &[], &ctx.shell, &ctx.cancel).await
    }
}
