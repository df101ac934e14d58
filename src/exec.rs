//! Execution policy for external operations
//!
//! All external commands flow through [`Executor`], which applies the
//! dry-run/verbose/silent reporting modes and the bounded-retry policy. The
//! [`CommandRunner`] trait is the process boundary; tests substitute a
//! scripted runner for real process execution.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ops::{Op, RenderedCommand};

/// Fixed backoff between retry attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Attempts used when refreshing cluster credentials between retries
const CREDENTIAL_REFRESH_ATTEMPTS: u32 = 2;

/// Outcome of one external command invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the command exited successfully
    pub status_ok: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// A successful outcome with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status_ok: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed outcome with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            status_ok: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Boundary trait for running rendered commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output
    async fn run(&self, cmd: &RenderedCommand) -> Result<CommandOutput>;
}

/// Runs commands as real child processes via tokio
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &RenderedCommand) -> Result<CommandOutput> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let output = if let Some(payload) = &cmd.stdin {
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let mut child = command.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                stdin.write_all(payload.as_bytes()).await?;
            }
            child.wait_with_output().await?
        } else {
            command.output().await?
        };

        Ok(CommandOutput {
            status_ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Uniform execution policy: dry-run, verbose, silent, and bounded retries
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    verbose: bool,
    credential_refresh: Option<Op>,
}

impl Executor {
    /// Create an executor over the given runner
    pub fn new(runner: Arc<dyn CommandRunner>, dry_run: bool, verbose: bool) -> Self {
        Self {
            runner,
            dry_run,
            verbose,
            credential_refresh: None,
        }
    }

    /// Set the operation used to refresh cluster credentials between retries
    pub fn set_credential_refresh(&mut self, op: Op) {
        self.credential_refresh = Some(op);
    }

    /// Whether this executor is in dry-run mode
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute one operation under the configured reporting mode.
    ///
    /// Dry-run logs the would-be command and reports success without
    /// executing; verbose logs before and after; silent just executes.
    /// The real exit status is propagated in the returned output.
    pub async fn execute(&self, op: &Op) -> Result<CommandOutput> {
        let cmd = op.render();
        if self.dry_run {
            info!("dry-run: {}", cmd.summary);
            return Ok(CommandOutput::ok(""));
        }
        if self.verbose {
            info!("running: {}", cmd.summary);
        }
        let output = self.runner.run(&cmd).await?;
        if self.verbose {
            info!(ok = output.status_ok, "finished: {}", cmd.summary);
        }
        Ok(output)
    }

    /// Execute one operation and fail on a nonzero exit status.
    pub async fn execute_ok(&self, op: &Op) -> Result<CommandOutput> {
        let output = self.execute(op).await?;
        if !output.status_ok {
            return Err(Error::external(op.summary(), output.stderr.trim()));
        }
        Ok(output)
    }

    /// Run a read-only query and capture its output.
    ///
    /// Returns `None` under dry-run: nothing was executed, so there is
    /// nothing to inspect. Callers treat an uncaptured query as vacuously
    /// satisfied.
    pub async fn capture(&self, op: &Op) -> Result<Option<CommandOutput>> {
        if self.dry_run {
            info!("dry-run: {}", op.summary());
            return Ok(None);
        }
        Ok(Some(self.execute(op).await?))
    }

    /// Invoke `op` up to `max_attempts` times.
    ///
    /// Between attempts: warn, sleep the fixed backoff, and refresh cluster
    /// credentials when the operation targets the cluster-management or
    /// cluster-control surface. `max_attempts == 0` fails without invoking.
    pub async fn retry(&self, max_attempts: u32, op: &Op) -> Result<CommandOutput> {
        if max_attempts == 0 {
            return Err(Error::external(op.summary(), "no attempts permitted"));
        }

        let mut last_failure = String::new();
        for attempt in 1..=max_attempts {
            match self.execute(op).await {
                Ok(output) if output.status_ok => return Ok(output),
                Ok(output) => last_failure = output.stderr.trim().to_string(),
                Err(e) => last_failure = e.to_string(),
            }

            if attempt < max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    "operation failed, retrying: {}",
                    op.summary()
                );
                tokio::time::sleep(RETRY_DELAY).await;
                if op.refreshes_cluster_credentials() {
                    self.refresh_credentials().await;
                }
            }
        }

        Err(Error::external(
            op.summary(),
            format!("failed after {} attempts: {}", max_attempts, last_failure),
        ))
    }

    /// Best-effort credential refresh, itself retried twice.
    async fn refresh_credentials(&self) {
        let Some(op) = &self.credential_refresh else {
            return;
        };
        for attempt in 1..=CREDENTIAL_REFRESH_ATTEMPTS {
            match self.execute(op).await {
                Ok(output) if output.status_ok => return,
                _ if attempt < CREDENTIAL_REFRESH_ATTEMPTS => {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                _ => warn!("cluster credential refresh failed"),
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted command runner shared by unit tests.

    use std::sync::Mutex;

    use super::*;

    /// Matches rendered commands by substring and replays canned outputs.
    /// Unmatched commands succeed with empty output.
    pub struct ScriptedRunner {
        responses: Vec<(String, CommandOutput)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                responses: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Add a canned response for commands whose rendered form contains `needle`.
        /// Earlier entries win.
        pub fn respond(mut self, needle: &str, output: CommandOutput) -> Self {
            self.responses.push((needle.to_string(), output));
            self
        }

        /// All commands run so far, in order.
        pub fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of commands containing `needle`.
        pub fn count_matching(&self, needle: &str) -> usize {
            self.commands().iter().filter(|c| c.contains(needle)).count()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, cmd: &RenderedCommand) -> Result<CommandOutput> {
            let line = format!("{} {}", cmd.program, cmd.args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            for (needle, output) in &self.responses {
                if line.contains(needle.as_str()) {
                    return Ok(output.clone());
                }
            }
            Ok(CommandOutput::ok(""))
        }
    }
}
