//! Execution seam and the local process executor.
//!
//! The scheduler hands steps to an `Executor` and receives outcomes; the
//! executor never touches task state. Every run gets a cancellation token
//! and must stop at its next safe checkpoint when the token fires.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::core::{Step, StepAction};
use crate::olog_debug;

/// Default wall-clock limit for a single step execution.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Cap on captured output retained per step.
const MAX_CAPTURED_OUTPUT: usize = 4096;

/// Outcome of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum StepOutcome {
    /// The step completed successfully.
    Succeeded {
        /// Captured output, if any.
        output: Option<String>,
    },
    /// The step failed.
    Failed {
        /// Error detail describing the failure.
        error: String,
    },
}

impl StepOutcome {
    /// Check if the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

/// Runs steps and reports outcomes.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one step.
    ///
    /// Implementations must observe `cancel` and stop at their next safe
    /// checkpoint when it fires, reporting the interruption as a failed
    /// outcome.
    async fn run(&self, step: &Step, cancel: CancellationToken) -> StepOutcome;
}

/// Executor that runs `shell_command` steps as local subprocesses.
///
/// Remote API calls and config template application require a remote
/// execution backend and are reported as unsupported here; the capability
/// set stays closed either way.
#[derive(Debug, Clone)]
pub struct LocalProcessExecutor {
    /// Wall-clock limit for one step.
    timeout: Duration,
}

impl Default for LocalProcessExecutor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

impl LocalProcessExecutor {
    /// Create an executor with the default step timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with a custom step timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run_command(
        &self,
        command: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> StepOutcome {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        olog_debug!("executing: {} {:?}", command, args);

        let output = tokio::select! {
            result = cmd.output() => result,
            _ = cancel.cancelled() => {
                return StepOutcome::Failed {
                    error: "cancelled before completion".to_string(),
                };
            }
            _ = tokio::time::sleep(self.timeout) => {
                return StepOutcome::Failed {
                    error: format!("timed out after {:?}", self.timeout),
                };
            }
        };

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let trimmed = stdout.trim();
                let captured = if trimmed.is_empty() {
                    None
                } else {
                    Some(truncate(trimmed, MAX_CAPTURED_OUTPUT))
                };
                StepOutcome::Succeeded { output: captured }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                StepOutcome::Failed {
                    error: format!(
                        "{} exited with {}: {}",
                        command,
                        code,
                        truncate(stderr.trim(), MAX_CAPTURED_OUTPUT)
                    ),
                }
            }
            Err(err) => StepOutcome::Failed {
                error: format!("failed to spawn {}: {}", command, err),
            },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[async_trait]
impl Executor for LocalProcessExecutor {
    async fn run(&self, step: &Step, cancel: CancellationToken) -> StepOutcome {
        match &step.action {
            StepAction::ShellCommand { command, args } => {
                self.run_command(command, args, cancel).await
            }
            other => StepOutcome::Failed {
                error: format!("action not supported by local executor: {}", other),
            },
        }
    }
}
