//! Step data model for planned task execution.
//!
//! Steps are the atomic units of work within a task plan. Each step
//! carries a capability-typed action, its dependency set, a risk level,
//! and a failure policy that decides how the task reacts when the step
//! fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a step within a task plan.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub Uuid);

impl StepId {
    /// Create a new unique step identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StepId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Risk classification for a planned step.
///
/// Risk levels feed the approval gate: higher-autonomy tasks only require
/// a human gate when risky steps are present.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or trivially reversible operation.
    #[default]
    Low,
    /// Mutating operation with a known rollback path.
    Medium,
    /// Mutating operation that is hard to reverse.
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// How the task reacts when this step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching new steps and fail the task.
    #[default]
    Abort,
    /// Mark all transitive dependents skipped and keep going.
    SkipDependents,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::SkipDependents => write!(f, "skip_dependents"),
        }
    }
}

/// The closed set of actions a step may perform.
///
/// Keeping the executor contract capability-typed (rather than free-form
/// scripts) keeps execution closed and testable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepAction {
    /// Run a local command.
    ShellCommand {
        /// Program to invoke.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
    },
    /// Call a remote management API endpoint.
    RemoteApiCall {
        /// Endpoint URL or address.
        endpoint: String,
        /// HTTP-style method name.
        method: String,
        /// Request payload.
        payload: serde_json::Value,
    },
    /// Render a configuration template onto a target.
    ConfigTemplateApply {
        /// Template reference.
        template: String,
        /// Target file or system the rendered config applies to.
        target: String,
    },
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::ShellCommand { command, .. } => write!(f, "shell: {}", command),
            StepAction::RemoteApiCall {
                endpoint, method, ..
            } => write!(f, "api: {} {}", method, endpoint),
            StepAction::ConfigTemplateApply { template, target } => {
                write!(f, "config: {} -> {}", template, target)
            }
        }
    }
}

/// Step status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StepStatus {
    /// Step created but not yet dispatched.
    #[default]
    Pending,
    /// Step is currently being executed.
    Running,
    /// Step completed successfully.
    Succeeded,
    /// Step failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Step was skipped (failed dependency, abort drain, or policy).
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed { error } => write!(f, "failed: {}", error),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single planned step within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier for this step.
    pub id: StepId,
    /// Human-readable description of what the step does.
    pub description: String,
    /// The action this step performs.
    pub action: StepAction,
    /// Steps that must settle (succeed or be skipped) before this one runs.
    pub depends_on: Vec<StepId>,
    /// Risk classification, set at planning time.
    pub risk_level: RiskLevel,
    /// How the task reacts if this step fails.
    pub failure_policy: FailurePolicy,
    /// Current execution status.
    pub status: StepStatus,
    /// Output captured from a successful execution.
    pub output: Option<String>,
    /// When the step started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Create a new pending step with no dependencies.
    ///
    /// Defaults to low risk and the conservative abort policy; the planner
    /// overrides both per step.
    pub fn new(description: &str, action: StepAction) -> Self {
        Self {
            id: StepId::new(),
            description: description.to_string(),
            action,
            depends_on: Vec::new(),
            risk_level: RiskLevel::Low,
            failure_policy: FailurePolicy::Abort,
            status: StepStatus::Pending,
            output: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the risk level.
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    /// Set the failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the dependency set.
    pub fn with_depends_on(mut self, deps: Vec<StepId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Start the step execution.
    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the step as successfully completed.
    pub fn succeed(&mut self, output: Option<String>) {
        self.status = StepStatus::Succeeded;
        self.output = output;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the step as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = StepStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the step as skipped.
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// Check if the step is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Succeeded | StepStatus::Failed { .. } | StepStatus::Skipped
        )
    }

    /// Check if the step is settled: its dependents are allowed to run.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded | StepStatus::Skipped)
    }
}
