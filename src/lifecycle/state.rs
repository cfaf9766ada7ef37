//! Task state management with transition validation.
//!
//! This module provides `TaskState` which wraps a `Task` and enforces the
//! legal lifecycle transitions:
//!
//! created -> planning -> awaiting_approval -> approved -> executing
//!   -> (succeeded | failed | cancelled)
//!
//! with `paused` reachable from `executing` (and back), and `escalated` as
//! the timeout sub-state of `awaiting_approval`. Every applied transition
//! appends exactly one history entry; a rejected transition changes
//! nothing.

use chrono::Utc;

use crate::core::{Actor, HistoryEntry, Task, TaskStatus};
use crate::error::{Error, Result};

/// Check whether a transition between two states is legal.
///
/// This is the single source of truth for the lifecycle state machine;
/// every mutation of a task's status goes through it.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Created, Planning)
            | (Planning, AwaitingApproval)
            | (Planning, Approved)
            | (Planning, Failed)
            | (AwaitingApproval, Approved)
            | (AwaitingApproval, Cancelled)
            | (AwaitingApproval, Escalated)
            | (Escalated, Approved)
            | (Escalated, Cancelled)
            | (Approved, Executing)
            | (Executing, Paused)
            | (Executing, Succeeded)
            | (Executing, Failed)
            | (Executing, Cancelled)
            | (Paused, Executing)
            | (Paused, Cancelled)
    )
}

/// Manages one task's state and enforces valid transitions.
#[derive(Debug, Clone)]
pub struct TaskState {
    /// The underlying task being managed.
    task: Task,
}

impl TaskState {
    /// Create a new TaskState from an existing Task.
    pub fn new(task: Task) -> Self {
        Self { task }
    }

    /// Check if a transition to the target state is valid from the current state.
    pub fn can_transition(&self, target: TaskStatus) -> bool {
        is_valid_transition(self.task.status, target)
    }

    /// Attempt to transition the task to a new state.
    ///
    /// On success the task's status is updated and exactly one history
    /// entry is appended. On failure nothing changes.
    pub fn transition(&mut self, target: TaskStatus, actor: Actor) -> Result<()> {
        let from = self.task.status;
        if !is_valid_transition(from, target) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: target.to_string(),
            });
        }

        let now = Utc::now();
        self.task.status = target;
        self.task.updated_at = now;
        self.task.history.push(HistoryEntry {
            timestamp: now,
            from,
            to: target,
            actor,
        });

        Ok(())
    }

    /// Get the current state of the task.
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    /// Get a reference to the underlying task.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Get a mutable reference to the underlying task.
    ///
    /// Callers mutate steps and plan metadata here; the status field is
    /// only changed through `transition`.
    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }
}
