//! Core domain models for the opsflow lifecycle manager.
//!
//! This module contains the fundamental data structures used throughout
//! the system: tasks, planned steps, and the step dependency DAG.

pub mod dag;
pub mod step;
pub mod task;

pub use dag::StepDag;
pub use step::{FailurePolicy, RiskLevel, Step, StepAction, StepId, StepStatus};
pub use task::{
    Actor, AutonomyLevel, HistoryEntry, Priority, Task, TaskId, TaskStatus, TaskSummary, TaskType,
};
