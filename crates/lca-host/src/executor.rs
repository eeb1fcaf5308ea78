//! Process execution seam
//!
//! Everything that spawns a process goes through [`CommandExecutor`] so the
//! host-facing components can be tested without touching the machine.

use std::process::{Command, Output};

#[cfg(test)]
use mockall::automock;
use tracing::{debug, trace};

use lca_common::Error;

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Runs a program to completion and returns its stdout
///
/// Implementations must block until the process exits and must not retry.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute `program` with `args`
    ///
    /// Returns stdout on exit status 0, otherwise [`Error::Command`] carrying
    /// the exit code and the captured stdout and stderr.
    fn execute(&self, program: &str, args: &[String]) -> Result<String, Error>;
}

/// Executor that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, program: &str, args: &[String]) -> Result<String, Error> {
        debug!(program = %program, args = ?args, "executing command");
        let output: CommandOutput = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::command(program, None, format!("failed to spawn: {}", e)))?
            .into();

        trace!(program = %program, stdout = %output.stdout, stderr = %output.stderr, "command finished");
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::command(program, output.exit_code, output.combined()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn combined_joins_streams() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: "partial\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert!(!output.success());
        assert_eq!(output.combined(), "partial\nboom");
    }

    #[test]
    fn combined_without_stderr() {
        let output = CommandOutput {
            exit_code: Some(0),
            stdout: "ok\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(output.combined(), "ok");
    }

    #[test]
    fn process_executor_returns_stdout() {
        let out = ProcessExecutor
            .execute("sh", &args(&["-c", "echo hello"]))
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn process_executor_wraps_nonzero_exit() {
        let err = ProcessExecutor
            .execute("sh", &args(&["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap_err();
        match err {
            Error::Command {
                program,
                exit_code,
                output,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn process_executor_reports_spawn_failure() {
        let err = ProcessExecutor
            .execute("/nonexistent/definitely-not-a-binary", &[])
            .unwrap_err();
        assert!(matches!(err, Error::Command { exit_code: None, .. }));
    }
}
