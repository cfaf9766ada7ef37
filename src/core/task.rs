//! Task data model for the lifecycle manager.
//!
//! Tasks are operator-submitted units of administrative work tracked
//! end-to-end. Each task records its parameters, autonomy policy, planned
//! steps, and an append-only history of every state transition applied.

use crate::core::step::{RiskLevel, Step, StepId};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Category of administrative work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Change configuration on an existing server.
    ServerConfigure,
    /// Collect and analyze system health data.
    SystemDiagnose,
    /// Routine maintenance (updates, cleanup, rotation).
    SystemMaintenance,
    /// Bring up a new server.
    ServerProvision,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::ServerConfigure => write!(f, "server_configure"),
            TaskType::SystemDiagnose => write!(f, "system_diagnose"),
            TaskType::SystemMaintenance => write!(f, "system_maintenance"),
            TaskType::ServerProvision => write!(f, "server_provision"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "server_configure" => Ok(TaskType::ServerConfigure),
            "system_diagnose" => Ok(TaskType::SystemDiagnose),
            "system_maintenance" => Ok(TaskType::SystemMaintenance),
            "server_provision" => Ok(TaskType::ServerProvision),
            other => Err(Error::Validation(format!("unknown task type: {}", other))),
        }
    }
}

/// Priority of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// Policy controlling which transitions require human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every plan requires approval.
    Guided,
    /// Every plan requires approval.
    #[default]
    Supervised,
    /// Plans with any step at medium risk or above require approval.
    SemiAutonomous,
    /// Plans with any high-risk step require approval.
    FullyAutonomous,
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutonomyLevel::Guided => write!(f, "guided"),
            AutonomyLevel::Supervised => write!(f, "supervised"),
            AutonomyLevel::SemiAutonomous => write!(f, "semi_autonomous"),
            AutonomyLevel::FullyAutonomous => write!(f, "fully_autonomous"),
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "guided" => Ok(AutonomyLevel::Guided),
            "supervised" => Ok(AutonomyLevel::Supervised),
            "semi_autonomous" => Ok(AutonomyLevel::SemiAutonomous),
            "fully_autonomous" => Ok(AutonomyLevel::FullyAutonomous),
            other => Err(Error::Validation(format!(
                "unknown autonomy level: {}",
                other
            ))),
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task accepted but planning has not started.
    #[default]
    Created,
    /// Planner is producing the step graph.
    Planning,
    /// Plan is waiting for a human gate.
    AwaitingApproval,
    /// Approval timed out; a higher-tier contact was notified.
    Escalated,
    /// Plan approved, execution not yet dispatched.
    Approved,
    /// Steps are being executed.
    Executing,
    /// Execution paused; in-flight steps drain, nothing new dispatches.
    Paused,
    /// All steps settled without an aborting failure.
    Succeeded,
    /// Planning failed or an aborting step failure occurred.
    Failed,
    /// Rejected or cancelled by the operator.
    Cancelled,
}

impl TaskStatus {
    /// Check if the status is terminal (no further transitions are legal).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Planning => write!(f, "planning"),
            TaskStatus::AwaitingApproval => write!(f, "awaiting_approval"),
            TaskStatus::Escalated => write!(f, "escalated"),
            TaskStatus::Approved => write!(f, "approved"),
            TaskStatus::Executing => write!(f, "executing"),
            TaskStatus::Paused => write!(f, "paused"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Who triggered a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The manager itself (planning, dispatch, step outcomes).
    System,
    /// An explicit external call (approve, reject, cancel, pause, resume).
    Operator,
    /// The approval timeout timer.
    Timeout,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Operator => write!(f, "operator"),
            Actor::Timeout => write!(f, "timeout"),
        }
    }
}

/// A record of one applied state transition.
///
/// History is append-only and never mutated; it is the audit trail for
/// every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
    /// The state the task left.
    pub from: TaskStatus,
    /// The state the task entered.
    pub to: TaskStatus,
    /// Who triggered the transition.
    pub actor: Actor,
}

/// An operator-submitted unit of administrative work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, immutable.
    pub id: TaskId,
    /// Category of work.
    pub task_type: TaskType,
    /// Operator-supplied description.
    pub description: String,
    /// Parameters supplied at creation; immutable once planning accepts them.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Priority level.
    pub priority: Priority,
    /// Approval policy.
    pub autonomy_level: AutonomyLevel,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Planned steps; append-only once planning completes.
    pub steps: Vec<Step>,
    /// One-line plan summary from the planner.
    pub plan_summary: Option<String>,
    /// Terminal failure reason, if any.
    pub error: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task last changed.
    pub updated_at: DateTime<Utc>,
    /// Append-only log of applied transitions.
    pub history: Vec<HistoryEntry>,
}

impl Task {
    /// Create a new task in the `Created` state with no steps.
    pub fn new(
        task_type: TaskType,
        description: &str,
        parameters: HashMap<String, serde_json::Value>,
        priority: Priority,
        autonomy_level: AutonomyLevel,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type,
            description: description.to_string(),
            parameters,
            priority,
            autonomy_level,
            status: TaskStatus::Created,
            steps: Vec::new(),
            plan_summary: None,
            error: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// Get a step by id.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Get a mutable step by id.
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Highest risk level among the planned steps.
    pub fn max_risk(&self) -> RiskLevel {
        self.steps
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low)
    }

    /// Whether this plan requires a human approval gate.
    ///
    /// The gate threshold rises with the autonomy level: guided and
    /// supervised always gate, semi_autonomous gates at medium risk,
    /// fully_autonomous gates only at high risk.
    pub fn requires_approval(&self) -> bool {
        match self.autonomy_level {
            AutonomyLevel::Guided | AutonomyLevel::Supervised => true,
            AutonomyLevel::SemiAutonomous => self.max_risk() >= RiskLevel::Medium,
            AutonomyLevel::FullyAutonomous => self.max_risk() >= RiskLevel::High,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Condensed view for listings.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            task_type: self.task_type,
            description: self.description.clone(),
            priority: self.priority,
            status: self.status,
            step_count: self.steps.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Condensed task view returned by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task identifier.
    pub id: TaskId,
    /// Category of work.
    pub task_type: TaskType,
    /// Operator-supplied description.
    pub description: String,
    /// Priority level.
    pub priority: Priority,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Number of planned steps.
    pub step_count: usize,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task last changed.
    pub updated_at: DateTime<Utc>,
}
