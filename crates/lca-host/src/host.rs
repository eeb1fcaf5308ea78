//! Running commands in the host's namespaces
//!
//! The agent runs in a container but has to drive host services, the host
//! container runtime and host files. Commands are wrapped in `nsenter`
//! targeting PID 1 so they see the host's process tree, mount table, IPC
//! namespace and cgroup hierarchy.

use std::sync::Arc;

use tracing::{info, instrument};

use lca_common::Error;

use crate::executor::{CommandExecutor, ProcessExecutor};

/// Program used to enter the host namespaces
pub const NSENTER: &str = "nsenter";

/// Namespace-entry arguments placed before the target command
pub const NSENTER_ARGS: &[&str] = &["--target", "1", "--cgroup", "--mount", "--ipc", "--pid", "--"];

/// A single command to run on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    /// Program name or path on the host
    pub program: String,
    /// Ordered arguments
    pub args: Vec<String>,
    /// Join program and args into one `bash -c` command line
    pub shell: bool,
}

impl HostCommand {
    /// Command executed directly
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            shell: false,
        }
    }

    /// Command interpreted by `bash -c`
    pub fn shell<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shell: true,
            ..Self::new(program, args)
        }
    }

    /// Full argument vector handed to `nsenter`
    pub fn nsenter_args(&self) -> Vec<String> {
        let mut out: Vec<String> = NSENTER_ARGS.iter().map(|s| s.to_string()).collect();
        if self.shell {
            let mut line = vec![self.program.as_str()];
            line.extend(self.args.iter().map(String::as_str));
            out.extend(["bash".to_string(), "-c".to_string(), line.join(" ")]);
        } else {
            out.push(self.program.clone());
            out.extend(self.args.iter().cloned());
        }
        out
    }
}

/// Executes commands as if native on the host
///
/// Calls block for the lifetime of the process and are never retried. From
/// async code use [`HostExecutor::run_blocking`], which moves the call onto
/// the blocking thread pool.
#[derive(Debug, Default)]
pub struct HostExecutor<E: CommandExecutor = ProcessExecutor> {
    executor: Arc<E>,
}

impl<E: CommandExecutor> Clone for HostExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl HostExecutor<ProcessExecutor> {
    /// Executor spawning real processes
    pub fn new() -> Self {
        Self::with_executor(ProcessExecutor)
    }
}

impl<E: CommandExecutor> HostExecutor<E> {
    /// Use a custom executor (for testing)
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    /// Execute a prepared command and return its stdout
    pub fn execute(&self, command: &HostCommand) -> Result<String, Error> {
        self.executor.execute(NSENTER, &command.nsenter_args())
    }

    /// Run `program args...` in the host namespaces
    pub fn run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Result<String, Error> {
        self.execute(&HostCommand::new(
            program,
            args.iter().map(|a| a.as_ref().to_string()),
        ))
    }

    /// Run `program args...` joined into a `bash -c` command line
    pub fn run_shell<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Result<String, Error> {
        self.execute(&HostCommand::shell(
            program,
            args.iter().map(|a| a.as_ref().to_string()),
        ))
    }

    /// Run `program args...` on the blocking thread pool
    ///
    /// Long-lived host commands (container launches, the recovery tool) must
    /// not stall the async runtime while they run.
    pub async fn run_blocking(&self, program: &str, args: Vec<String>) -> Result<String, Error>
    where
        E: 'static,
    {
        let host = self.clone();
        let command = HostCommand::new(program, args);
        tokio::task::spawn_blocking(move || host.execute(&command))
            .await
            .map_err(|e| Error::internal_with_context("host command task", e.to_string()))?
    }

    /// `systemctl <action> <units...>` on the host
    #[instrument(skip(self))]
    pub fn systemctl(&self, action: &str, units: &[&str]) -> Result<String, Error> {
        info!("running systemctl");
        let mut args = vec![action];
        args.extend_from_slice(units);
        self.run("systemctl", &args)
    }
}
