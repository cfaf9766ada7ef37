//! Task lifecycle manager.
//!
//! The TaskManager owns every task's state, transitions, approval gates,
//! and escalation triggers. It calls the Planner, Executor, and Notifier
//! but is the only component that mutates task state. Each task's state
//! sits behind its own async lock, so transitions for one task are
//! serialized (an approval and a timeout escalation can race, but only
//! one wins) while distinct tasks proceed fully in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{
    Actor, AutonomyLevel, Priority, Task, TaskId, TaskStatus, TaskSummary, TaskType,
};
use crate::error::{Error, Result};
use crate::lifecycle::state::TaskState;
use crate::orchestration::executor::Executor;
use crate::orchestration::notifier::{send_logged, EventKind, Notifier};
use crate::orchestration::planner::Planner;
use crate::orchestration::scheduler::StepScheduler;
use crate::{olog, olog_warn};

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a task may wait for approval before escalating.
    pub approval_timeout: Duration,
    /// Per-task cap on concurrently running steps.
    pub max_concurrency: usize,
    /// Maximum number of steps accepted in a plan.
    pub max_steps: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::from_secs(900),
            max_concurrency: 4,
            max_steps: 32,
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            approval_timeout: config.approval_timeout(),
            max_concurrency: config.max_concurrency,
            max_steps: config.max_steps,
        }
    }
}

/// Per-task bookkeeping kept alongside the shared state.
struct TaskEntry {
    /// The task state, shared with the scheduler.
    state: Arc<RwLock<TaskState>>,
    /// Task-level cancellation; stops timers and in-flight steps.
    cancel: CancellationToken,
    /// Pause signal sender; the scheduler holds the receiving side.
    pause_tx: watch::Sender<bool>,
    /// Receiver template handed to the scheduler.
    pause_rx: watch::Receiver<bool>,
    /// Bumped on every entry into awaiting_approval; stale escalation
    /// timers compare against it and stand down.
    approval_epoch: AtomicU64,
    /// Handle of the running step scheduler, if execution started.
    driver: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Owns task registration, lifecycle transitions, approval gating,
/// escalation, and execution dispatch.
pub struct TaskManager {
    /// Registry of live tasks keyed by id.
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    config: ManagerConfig,
}

impl TaskManager {
    /// Create a manager with the given collaborators.
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            planner,
            executor,
            notifier,
            config,
        }
    }

    /// Submit a new task.
    ///
    /// Planning starts immediately. The returned id is valid even when
    /// planning fails; the failure lands on the task and is queryable via
    /// `get`.
    pub async fn create(
        &self,
        task_type: TaskType,
        description: &str,
        parameters: HashMap<String, serde_json::Value>,
        priority: Priority,
        autonomy_level: AutonomyLevel,
    ) -> Result<TaskId> {
        let task = Task::new(task_type, description, parameters, priority, autonomy_level);
        let task_id = task.id;

        let (pause_tx, pause_rx) = watch::channel(false);
        let entry = Arc::new(TaskEntry {
            state: Arc::new(RwLock::new(TaskState::new(task))),
            cancel: CancellationToken::new(),
            pause_tx,
            pause_rx,
            approval_epoch: AtomicU64::new(0),
            driver: Mutex::new(None),
        });
        self.tasks.write().await.insert(task_id, Arc::clone(&entry));

        olog!(
            "task {} created ({}, {}, {})",
            task_id.short(),
            task_type,
            priority,
            autonomy_level
        );

        self.plan(entry).await;
        Ok(task_id)
    }

    /// Get a full snapshot of a task, including its history.
    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        let entry = self.entry(id).await?;
        let state = entry.state.read().await;
        Ok(state.task().clone())
    }

    /// List task summaries, optionally filtered by status, ordered by
    /// creation time.
    pub async fn list(&self, filter: Option<TaskStatus>) -> Vec<TaskSummary> {
        let entries: Vec<Arc<TaskEntry>> = self.tasks.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let state = entry.state.read().await;
            let task = state.task();
            if filter.map_or(true, |f| f == task.status) {
                summaries.push(task.summary());
            }
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Approve a task waiting for a human gate (awaiting_approval or
    /// escalated) and dispatch its execution.
    pub async fn approve(&self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let mut state = entry.state.write().await;
            state.transition(TaskStatus::Approved, Actor::Operator)?;
        }
        entry.approval_epoch.fetch_add(1, Ordering::SeqCst);
        olog!("task {} approved", id.short());

        self.start_execution(entry).await;
        Ok(())
    }

    /// Reject a task waiting for a human gate.
    ///
    /// Unlike `cancel`, rejection is only legal while the task is waiting
    /// for approval.
    pub async fn reject(&self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let mut state = entry.state.write().await;
            match state.status() {
                TaskStatus::AwaitingApproval | TaskStatus::Escalated => {}
                other => {
                    return Err(Error::InvalidTransition {
                        from: other.to_string(),
                        to: TaskStatus::Cancelled.to_string(),
                    })
                }
            }
            state.transition(TaskStatus::Cancelled, Actor::Operator)?;
        }
        entry.cancel.cancel();
        olog!("task {} rejected", id.short());
        Ok(())
    }

    /// Cancel a task.
    ///
    /// Legal from the approval states and from executing/paused. In-flight
    /// steps are signalled to stop at their next safe checkpoint; already
    /// recorded step outcomes stay untouched.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let mut state = entry.state.write().await;
            state.transition(TaskStatus::Cancelled, Actor::Operator)?;
        }
        entry.cancel.cancel();
        olog!("task {} cancelled", id.short());
        Ok(())
    }

    /// Pause an executing task. In-flight steps finish; nothing new is
    /// dispatched until resumed.
    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let mut state = entry.state.write().await;
            state.transition(TaskStatus::Paused, Actor::Operator)?;
        }
        let _ = entry.pause_tx.send(true);
        olog!("task {} paused", id.short());
        Ok(())
    }

    /// Resume a paused task.
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let mut state = entry.state.write().await;
            state.transition(TaskStatus::Executing, Actor::Operator)?;
        }
        let _ = entry.pause_tx.send(false);
        olog!("task {} resumed", id.short());
        Ok(())
    }

    /// Wait for the task's execution driver to finish, then return the
    /// final snapshot.
    ///
    /// If execution never started (the task is still gated, failed in
    /// planning, or was rejected) the current snapshot is returned
    /// immediately.
    pub async fn wait(&self, id: &TaskId) -> Result<Task> {
        let entry = self.entry(id).await?;
        let handle = entry.driver.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(err) => return Err(Error::TaskJoin(err.to_string())),
            }
        }
        let state = entry.state.read().await;
        Ok(state.task().clone())
    }

    async fn entry(&self, id: &TaskId) -> Result<Arc<TaskEntry>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Planning pipeline: created -> planning -> (gate | approved | failed).
    async fn plan(&self, entry: Arc<TaskEntry>) {
        let snapshot = {
            let mut state = entry.state.write().await;
            if state.transition(TaskStatus::Planning, Actor::System).is_err() {
                return;
            }
            state.task().clone()
        };
        let task_id = snapshot.id;

        let planned = match self.planner.plan(&snapshot).await {
            Ok(proposal) => {
                let summary = proposal.summary.clone();
                proposal
                    .into_steps(self.config.max_steps)
                    .map(|steps| (summary, steps))
            }
            Err(err) => Err(err),
        };

        match planned {
            Ok((summary, steps)) => {
                let gated = {
                    let mut state = entry.state.write().await;
                    let task = state.task_mut();
                    task.steps = steps;
                    task.plan_summary = Some(summary);
                    state.task().requires_approval()
                };

                if gated {
                    self.enter_awaiting_approval(entry, task_id).await;
                } else {
                    let approved = {
                        let mut state = entry.state.write().await;
                        state.transition(TaskStatus::Approved, Actor::System).is_ok()
                    };
                    if approved {
                        olog!("task {} auto-approved", task_id.short());
                        self.start_execution(entry).await;
                    }
                }
            }
            Err(err) => {
                {
                    let mut state = entry.state.write().await;
                    state.task_mut().error = Some(err.to_string());
                    let _ = state.transition(TaskStatus::Failed, Actor::System);
                }
                olog_warn!("task {} planning failed: {}", task_id.short(), err);
                send_logged(
                    self.notifier.as_ref(),
                    task_id,
                    EventKind::TaskFailed,
                    serde_json::json!({ "error": err.to_string() }),
                )
                .await;
            }
        }
    }

    /// Enter the approval gate: notify once and arm the escalation timer.
    async fn enter_awaiting_approval(&self, entry: Arc<TaskEntry>, task_id: TaskId) {
        let payload = {
            let mut state = entry.state.write().await;
            if state
                .transition(TaskStatus::AwaitingApproval, Actor::System)
                .is_err()
            {
                return;
            }
            let task = state.task();
            serde_json::json!({
                "summary": task.plan_summary.clone(),
                "steps": task.steps.len(),
                "max_risk": task.max_risk().to_string(),
            })
        };

        let epoch = entry.approval_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        olog!("task {} awaiting approval", task_id.short());
        send_logged(
            self.notifier.as_ref(),
            task_id,
            EventKind::ApprovalRequested,
            payload,
        )
        .await;
        self.arm_escalation(entry, task_id, epoch);
    }

    /// Arm the escalation timer for the current awaiting_approval period.
    ///
    /// The timer is measured against wall-clock entry time and re-armed on
    /// each re-entry; a timer from a previous period sees a newer epoch
    /// and stands down.
    fn arm_escalation(&self, entry: Arc<TaskEntry>, task_id: TaskId, epoch: u64) {
        let timeout = self.config.approval_timeout;
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = entry.cancel.cancelled() => return,
            }

            let escalated = {
                let mut state = entry.state.write().await;
                if entry.approval_epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                if state.status() != TaskStatus::AwaitingApproval {
                    return;
                }
                state
                    .transition(TaskStatus::Escalated, Actor::Timeout)
                    .is_ok()
            };

            if escalated {
                olog_warn!("task {} approval timed out, escalating", task_id.short());
                send_logged(
                    notifier.as_ref(),
                    task_id,
                    EventKind::Escalated,
                    serde_json::json!({ "timeout_secs": timeout.as_secs() }),
                )
                .await;
            }
        });
    }

    /// Dispatch execution: approved -> executing, then hand the task to a
    /// step scheduler.
    async fn start_execution(&self, entry: Arc<TaskEntry>) {
        let started = {
            let mut state = entry.state.write().await;
            state.transition(TaskStatus::Executing, Actor::System).is_ok()
        };
        if !started {
            return;
        }

        let scheduler = StepScheduler::new(
            Arc::clone(&entry.state),
            Arc::clone(&self.executor),
            Arc::clone(&self.notifier),
            entry.cancel.clone(),
            entry.pause_rx.clone(),
            self.config.max_concurrency,
        );
        let handle = tokio::spawn(scheduler.run());
        *entry.driver.lock().await = Some(handle);
    }
}
