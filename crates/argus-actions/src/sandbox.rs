use argus_common::types::RiskLevel;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing;

/// Output captured from a sandboxed command execution.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Allowlist: glob pattern over the joined command line → risk level.
const COMMAND_ALLOWLIST: &[(&str, RiskLevel)] = &[
    // READ_ONLY diagnostics
    ("df *", RiskLevel::ReadOnly),
    ("free *", RiskLevel::ReadOnly),
    ("uptime", RiskLevel::ReadOnly),
    ("ps *", RiskLevel::ReadOnly),
    ("top -b -n 1*", RiskLevel::ReadOnly),
    ("cat /proc/*", RiskLevel::ReadOnly),
    ("ls *", RiskLevel::ReadOnly),
    ("netstat *", RiskLevel::ReadOnly),
    ("ss *", RiskLevel::ReadOnly),
    ("ip *", RiskLevel::ReadOnly),
    ("dig *", RiskLevel::ReadOnly),
    ("nslookup *", RiskLevel::ReadOnly),
    ("ping -c *", RiskLevel::ReadOnly),
    ("curl *", RiskLevel::ReadOnly),
    ("journalctl *", RiskLevel::ReadOnly),
    ("systemctl status *", RiskLevel::ReadOnly),
    ("docker ps*", RiskLevel::ReadOnly),
    ("docker logs *", RiskLevel::ReadOnly),
    // LOW risk
    ("echo *", RiskLevel::Low),
    // MEDIUM risk
    ("systemctl restart *", RiskLevel::Medium),
    ("systemctl reload *", RiskLevel::Medium),
    ("docker restart *", RiskLevel::Medium),
    ("docker stop *", RiskLevel::Medium),
    ("docker start *", RiskLevel::Medium),
    ("service * restart", RiskLevel::Medium),
    ("service * reload", RiskLevel::Medium),
    // HIGH risk
    ("kill *", RiskLevel::High),
    ("pkill *", RiskLevel::High),
    ("find * -delete", RiskLevel::High),
    // CRITICAL risk
    ("rm -rf *", RiskLevel::Critical),
    ("rm -r *", RiskLevel::Critical),
    ("reboot", RiskLevel::Critical),
    ("shutdown *", RiskLevel::Critical),
];

/// Command substrings refused regardless of approval.
const COMMAND_BLOCKLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    "chmod -R 777 /",
    "> /dev/sd",
    ":(){",
];

/// Allowlist validation and guarded execution for shell actions.
pub struct CommandSandbox {
    allowlist: Vec<(String, RiskLevel)>,
}

impl CommandSandbox {
    pub fn new() -> Self {
        Self {
            allowlist: COMMAND_ALLOWLIST
                .iter()
                .map(|(pattern, risk)| (pattern.to_string(), *risk))
                .collect(),
        }
    }

    pub fn with_allowlist(allowlist: Vec<(String, RiskLevel)>) -> Self {
        Self { allowlist }
    }

    /// Classify a command. `None` means refused: either a blocklist hit or
    /// not on the allowlist at all.
    pub fn validate(&self, command: &[String]) -> Option<RiskLevel> {
        let cmd_str = command.join(" ");

        for blocked in COMMAND_BLOCKLIST {
            if cmd_str.contains(blocked) {
                tracing::warn!(command = %cmd_str, "Blocked command (blocklist)");
                return None;
            }
        }

        for (pattern, risk) in &self.allowlist {
            if glob_match::glob_match(pattern, &cmd_str) {
                return Some(*risk);
            }
        }

        tracing::warn!(command = %cmd_str, "Command not in allowlist");
        None
    }

    /// Execute an approved command with output capture and a hard timeout.
    /// On timeout the child is killed and exit code -1 reported.
    pub async fn execute(&self, command: &[String], timeout: Duration) -> CommandOutcome {
        let start = Instant::now();
        let Some((program, args)) = command.split_first() else {
            return CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: "empty command".to_string(),
                duration_ms: 0,
            };
        };

        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                return CommandOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn: {err}"),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let result = tokio::time::timeout(timeout, async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        })
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok((status, stdout, stderr)) => CommandOutcome {
                exit_code: status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1),
                stdout,
                stderr,
                duration_ms,
            },
            Err(_) => CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("command timed out after {}s", timeout.as_secs()),
                duration_ms,
            },
        }
    }
}

impl Default for CommandSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_by_allowlist() {
        let sandbox = CommandSandbox::new();
        assert_eq!(sandbox.validate(&cmd(&["df", "-h"])), Some(RiskLevel::ReadOnly));
        assert_eq!(
            sandbox.validate(&cmd(&["systemctl", "restart", "nginx"])),
            Some(RiskLevel::Medium)
        );
        assert_eq!(sandbox.validate(&cmd(&["kill", "1234"])), Some(RiskLevel::High));
        assert_eq!(sandbox.validate(&cmd(&["reboot"])), Some(RiskLevel::Critical));
    }

    #[test]
    fn refuses_unlisted_commands() {
        let sandbox = CommandSandbox::new();
        assert_eq!(sandbox.validate(&cmd(&["python3", "-c", "import os"])), None);
    }

    #[test]
    fn blocklist_beats_allowlist() {
        let sandbox = CommandSandbox::new();
        // "rm -rf *" is allowlisted as CRITICAL, but the root form is
        // blocked outright.
        assert_eq!(sandbox.validate(&cmd(&["rm", "-rf", "/"])), None);
        assert_eq!(sandbox.validate(&cmd(&["dd", "if=/dev/zero"])), None);
    }

    #[tokio::test]
    async fn executes_and_captures_output() {
        let sandbox = CommandSandbox::new();
        let outcome = sandbox
            .execute(&cmd(&["echo", "hello"]), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_spawn_failure() {
        let sandbox = CommandSandbox::new();
        let outcome = sandbox
            .execute(
                &cmd(&["definitely-not-a-command-xyz"]),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.stderr.contains("failed to spawn"));
    }
}
