//! Step scheduler for approved task execution.
//!
//! The StepScheduler drives one approved task: it dispatches steps whose
//! dependencies have settled, up to the concurrency cap, and applies the
//! outcomes the executor reports. It reacts to pause (no new dispatch,
//! in-flight steps drain) and cancellation (in-flight steps are signalled,
//! recorded outcomes stay untouched), and performs the task's terminal
//! transition when the run ends.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use chrono::Utc;

use crate::core::{Actor, FailurePolicy, Step, StepDag, StepId, StepStatus, TaskStatus};
use crate::error::Result;
use crate::lifecycle::state::TaskState;
use crate::orchestration::executor::{Executor, StepOutcome};
use crate::orchestration::notifier::{send_logged, EventKind, Notifier};
use crate::{olog_debug, olog_error};

/// Drives the steps of one approved task to completion.
///
/// All task mutation happens under the shared state's write lock, so
/// scheduler outcomes serialize with operator calls and the escalation
/// timer.
pub struct StepScheduler {
    /// Shared task state, also held by the manager.
    state: Arc<RwLock<TaskState>>,
    /// Executor the steps are dispatched to.
    executor: Arc<dyn Executor>,
    /// Notifier for the terminal event.
    notifier: Arc<dyn Notifier>,
    /// Task-level cancellation; child tokens go to in-flight steps.
    cancel: CancellationToken,
    /// Pause signal from the manager.
    paused: watch::Receiver<bool>,
    /// Maximum number of steps in flight at once.
    max_concurrency: usize,
}

impl StepScheduler {
    /// Create a scheduler for one task.
    pub fn new(
        state: Arc<RwLock<TaskState>>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
        paused: watch::Receiver<bool>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            state,
            executor,
            notifier,
            cancel,
            paused,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run the task's steps until the task reaches a terminal state.
    ///
    /// Returns once every dispatched step has reported and the terminal
    /// transition (succeeded/failed) has been applied, or once the task
    /// was cancelled and all in-flight steps drained.
    pub async fn run(mut self) -> Result<()> {
        let dag = {
            let state = self.state.read().await;
            StepDag::build(&state.task().steps)?
        };

        let mut in_flight: JoinSet<(StepId, StepOutcome)> = JoinSet::new();
        let mut abort_error: Option<String> = None;

        loop {
            let paused = *self.paused.borrow_and_update();
            let stopping = abort_error.is_some() || self.cancel.is_cancelled();

            if !stopping && !paused {
                self.dispatch_ready(&dag, &mut in_flight).await;
            }

            if in_flight.is_empty() {
                if self.cancel.is_cancelled() {
                    // Operator cancelled; the manager already applied the
                    // terminal transition.
                    return Ok(());
                }
                if paused {
                    // Drained while paused; hold the terminal transition
                    // until the operator resumes or cancels.
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        changed = self.paused.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
                break;
            }

            let joined = if stopping {
                // Drain: in-flight steps finish (or report cancellation),
                // nothing new dispatches.
                in_flight.join_next().await
            } else {
                tokio::select! {
                    joined = in_flight.join_next() => joined,
                    _ = self.cancel.cancelled() => None,
                    changed = self.paused.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        None
                    }
                }
            };

            if let Some(joined) = joined {
                self.apply_outcome(&dag, joined, &mut abort_error).await;
            }
        }

        self.finalize(abort_error).await;
        Ok(())
    }

    /// Dispatch ready pending steps up to remaining capacity.
    async fn dispatch_ready(
        &self,
        dag: &StepDag,
        in_flight: &mut JoinSet<(StepId, StepOutcome)>,
    ) {
        let capacity = self.max_concurrency.saturating_sub(in_flight.len());
        if capacity == 0 {
            return;
        }

        let picked: Vec<Step> = {
            let mut state = self.state.write().await;
            let task = state.task_mut();
            let settled: HashSet<StepId> = task
                .steps
                .iter()
                .filter(|s| s.is_settled())
                .map(|s| s.id)
                .collect();

            let mut picked = Vec::new();
            for id in dag.ready_steps(&settled) {
                if picked.len() >= capacity {
                    break;
                }
                if let Some(step) = task.step_mut(&id) {
                    if step.status == StepStatus::Pending {
                        step.start();
                        picked.push(step.clone());
                    }
                }
            }
            if !picked.is_empty() {
                task.updated_at = Utc::now();
            }
            picked
        };

        for step in picked {
            olog_debug!(
                "dispatching step {} ({})",
                step.id.short(),
                step.description
            );
            let executor = Arc::clone(&self.executor);
            let token = self.cancel.child_token();
            in_flight.spawn(async move {
                let outcome = executor.run(&step, token).await;
                (step.id, outcome)
            });
        }
    }

    /// Record one step outcome and apply its failure policy.
    async fn apply_outcome(
        &self,
        dag: &StepDag,
        joined: std::result::Result<(StepId, StepOutcome), tokio::task::JoinError>,
        abort_error: &mut Option<String>,
    ) {
        let (step_id, outcome) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                olog_error!("step execution task panicked: {}", err);
                return;
            }
        };

        let mut state = self.state.write().await;
        let task = state.task_mut();

        let Some(step) = task.step_mut(&step_id) else {
            return;
        };

        match outcome {
            StepOutcome::Succeeded { output } => {
                olog_debug!("step {} succeeded", step_id.short());
                step.succeed(output);
            }
            StepOutcome::Failed { error } => {
                olog_debug!("step {} failed: {}", step_id.short(), error);
                let policy = step.failure_policy;
                let description = step.description.clone();
                step.fail(&error);

                match policy {
                    FailurePolicy::Abort => {
                        if abort_error.is_none() {
                            *abort_error =
                                Some(format!("step '{}' failed: {}", description, error));
                        }
                    }
                    FailurePolicy::SkipDependents => {
                        for dep_id in dag.transitive_dependents(&step_id) {
                            if let Some(dependent) = task.step_mut(&dep_id) {
                                if dependent.status == StepStatus::Pending {
                                    dependent.skip();
                                }
                            }
                        }
                    }
                }
            }
        }

        task.updated_at = Utc::now();
    }

    /// Apply the terminal transition and notify.
    ///
    /// A pause that lands just as the run drains holds the terminal
    /// transition until resume or cancel; a cancellation means the manager
    /// already applied the terminal state and nothing is done here.
    async fn finalize(&mut self, abort_error: Option<String>) {
        let (task_id, kind, payload) = loop {
            {
                let mut state = self.state.write().await;
                match state.status() {
                    TaskStatus::Executing => {}
                    TaskStatus::Paused => {
                        drop(state);
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            changed = self.paused.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                            }
                        }
                        continue;
                    }
                    _ => return,
                }

                // Anything never dispatched is skipped, not lost.
                let task = state.task_mut();
                for step in task.steps.iter_mut() {
                    if step.status == StepStatus::Pending {
                        step.skip();
                    }
                }

                let task_id = task.id;
                if let Some(error) = abort_error.clone() {
                    task.error = Some(error.clone());
                    if let Err(err) = state.transition(TaskStatus::Failed, Actor::System) {
                        olog_error!("terminal transition failed: {}", err);
                        return;
                    }
                    break (
                        task_id,
                        EventKind::TaskFailed,
                        serde_json::json!({ "error": error }),
                    );
                } else {
                    let step_count = task.steps.len();
                    if let Err(err) = state.transition(TaskStatus::Succeeded, Actor::System) {
                        olog_error!("terminal transition failed: {}", err);
                        return;
                    }
                    break (
                        task_id,
                        EventKind::TaskSucceeded,
                        serde_json::json!({ "steps": step_count }),
                    );
                }
            }
        };

        send_logged(self.notifier.as_ref(), task_id, kind, payload).await;
    }
}
