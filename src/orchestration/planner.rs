//! Planning seam and the built-in template planner.
//!
//! The lifecycle manager consumes plans through the `Planner` trait; a
//! plan is a proposal whose steps reference each other by index. The
//! manager validates the proposal (step count limit, dependency bounds,
//! acyclicity) before accepting it into the task, so a misbehaving
//! planner can never put an invalid graph into execution.
//!
//! `TemplatePlanner` is the default implementation: deterministic
//! per-task-type step templates with a reachability preamble, risk-flagged
//! mutating steps, and a verification postamble.

use async_trait::async_trait;

use crate::core::{FailurePolicy, RiskLevel, Step, StepAction, StepDag, StepId, Task, TaskType};
use crate::error::{Error, Result};

/// One proposed step; dependencies reference other proposals by index.
#[derive(Debug, Clone)]
pub struct StepProposal {
    /// Human-readable description of the step.
    pub description: String,
    /// The action the step performs.
    pub action: StepAction,
    /// Indices of proposals this step depends on.
    pub depends_on: Vec<usize>,
    /// Risk classification.
    pub risk_level: RiskLevel,
    /// Failure policy.
    pub failure_policy: FailurePolicy,
}

impl StepProposal {
    /// Create a proposal with no dependencies, low risk, abort policy.
    pub fn new(description: &str, action: StepAction) -> Self {
        Self {
            description: description.to_string(),
            action,
            depends_on: Vec::new(),
            risk_level: RiskLevel::Low,
            failure_policy: FailurePolicy::Abort,
        }
    }

    /// Set dependency indices.
    pub fn depends_on(mut self, deps: Vec<usize>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Set the risk level.
    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    /// Set the failure policy.
    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// An ordered plan proposal produced by a planner.
#[derive(Debug, Clone)]
pub struct PlanProposal {
    /// One-line summary of the plan.
    pub summary: String,
    /// Proposed steps in planning order.
    pub steps: Vec<StepProposal>,
}

impl PlanProposal {
    /// Validate the proposal and convert it into concrete steps.
    ///
    /// # Errors
    /// Returns `Error::Planning` when the plan is empty, exceeds
    /// `max_steps`, references an out-of-range dependency, or forms a
    /// cycle.
    pub fn into_steps(self, max_steps: usize) -> Result<Vec<Step>> {
        if self.steps.is_empty() {
            return Err(Error::Planning("planner produced an empty plan".to_string()));
        }
        if self.steps.len() > max_steps {
            return Err(Error::Planning(format!(
                "plan has {} steps, limit is {}",
                self.steps.len(),
                max_steps
            )));
        }

        let ids: Vec<StepId> = (0..self.steps.len()).map(|_| StepId::new()).collect();
        let mut steps = Vec::with_capacity(self.steps.len());

        for (i, proposal) in self.steps.into_iter().enumerate() {
            let mut deps = Vec::with_capacity(proposal.depends_on.len());
            for dep in &proposal.depends_on {
                let id = ids.get(*dep).ok_or_else(|| {
                    Error::Planning(format!(
                        "step {} depends on out-of-range index {}",
                        i, dep
                    ))
                })?;
                deps.push(*id);
            }

            let mut step = Step::new(&proposal.description, proposal.action)
                .with_risk(proposal.risk_level)
                .with_policy(proposal.failure_policy)
                .with_depends_on(deps);
            step.id = ids[i];
            steps.push(step);
        }

        // Acyclicity check covers self- and cross-references.
        StepDag::build(&steps)?;

        Ok(steps)
    }
}

/// Produces step plans for tasks.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a plan proposal for the task.
    ///
    /// # Errors
    /// Returns `Error::Planning` when no valid plan can be produced for
    /// the task's type and parameters.
    async fn plan(&self, task: &Task) -> Result<PlanProposal>;
}

/// Deterministic per-task-type planner.
///
/// Each template opens with a reachability probe, flags mutating steps at
/// medium or high risk with the abort policy, and closes with a
/// verification step. Optional collection steps carry the skip_dependents
/// policy so a single failed probe does not sink the whole task.
#[derive(Debug, Clone, Default)]
pub struct TemplatePlanner;

impl TemplatePlanner {
    /// Create a new template planner.
    pub fn new() -> Self {
        Self
    }

    fn target_host(task: &Task) -> Option<String> {
        task.parameters
            .get("hostname")
            .or_else(|| task.parameters.get("host"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn param_str(task: &Task, key: &str, default: &str) -> String {
        task.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| default.to_string())
    }

    fn probe_step(task: &Task) -> StepProposal {
        match Self::target_host(task) {
            Some(host) => StepProposal::new(
                "confirm target host is reachable",
                StepAction::ShellCommand {
                    command: "ping".to_string(),
                    args: vec!["-c".to_string(), "1".to_string(), host],
                },
            ),
            None => StepProposal::new(
                "confirm local host is responsive",
                StepAction::ShellCommand {
                    command: "uptime".to_string(),
                    args: vec![],
                },
            ),
        }
    }

    fn shell(command: &str, args: &[&str]) -> StepAction {
        StepAction::ShellCommand {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn diagnose_plan(task: &Task) -> PlanProposal {
        PlanProposal {
            summary: format!("diagnostic sweep: {}", task.description),
            steps: vec![
                Self::probe_step(task),
                StepProposal::new("collect system inventory", Self::shell("uname", &["-a"]))
                    .depends_on(vec![0])
                    .policy(FailurePolicy::SkipDependents),
                StepProposal::new("collect disk usage", Self::shell("df", &["-h"]))
                    .depends_on(vec![0])
                    .policy(FailurePolicy::SkipDependents),
                StepProposal::new("collect memory usage", Self::shell("free", &["-m"]))
                    .depends_on(vec![0])
                    .policy(FailurePolicy::SkipDependents),
                StepProposal::new(
                    "collect kernel log tail",
                    Self::shell("sh", &["-c", "dmesg | tail -n 50"]),
                )
                .depends_on(vec![0])
                .policy(FailurePolicy::SkipDependents),
                StepProposal::new("report load after collection", Self::shell("uptime", &[]))
                    .depends_on(vec![1, 2, 3, 4]),
            ],
        }
    }

    fn configure_plan(task: &Task) -> PlanProposal {
        let host = Self::target_host(task).unwrap_or_else(|| "localhost".to_string());
        let template = Self::param_str(task, "template", "service.conf.j2");
        let target = Self::param_str(task, "target", "/etc/service.conf");

        PlanProposal {
            summary: format!("configuration change: {}", task.description),
            steps: vec![
                Self::probe_step(task),
                StepProposal::new(
                    "back up current configuration",
                    StepAction::RemoteApiCall {
                        endpoint: format!("https://{}/api/config/backup", host),
                        method: "POST".to_string(),
                        payload: serde_json::json!({ "target": target.clone() }),
                    },
                )
                .depends_on(vec![0])
                .risk(RiskLevel::Medium),
                StepProposal::new(
                    "apply configuration template",
                    StepAction::ConfigTemplateApply { template, target },
                )
                .depends_on(vec![1])
                .risk(RiskLevel::High),
                StepProposal::new(
                    "verify service health",
                    StepAction::RemoteApiCall {
                        endpoint: format!("https://{}/api/health", host),
                        method: "GET".to_string(),
                        payload: serde_json::json!({}),
                    },
                )
                .depends_on(vec![2])
                .risk(RiskLevel::Medium),
            ],
        }
    }

    fn maintenance_plan(task: &Task) -> PlanProposal {
        PlanProposal {
            summary: format!("maintenance window: {}", task.description),
            steps: vec![
                Self::probe_step(task),
                StepProposal::new(
                    "rotate system logs",
                    Self::shell("logrotate", &["-f", "/etc/logrotate.conf"]),
                )
                .depends_on(vec![0])
                .policy(FailurePolicy::SkipDependents),
                StepProposal::new(
                    "clean package cache",
                    Self::shell("sh", &["-c", "apt-get clean || yum clean all"]),
                )
                .depends_on(vec![0])
                .policy(FailurePolicy::SkipDependents),
                StepProposal::new(
                    "apply pending security updates",
                    Self::shell("sh", &["-c", "apt-get -y upgrade"]),
                )
                .depends_on(vec![0])
                .risk(RiskLevel::Medium),
                StepProposal::new("verify host health after maintenance", Self::shell("uptime", &[]))
                    .depends_on(vec![1, 2, 3]),
            ],
        }
    }

    fn provision_plan(task: &Task) -> Result<PlanProposal> {
        let host = Self::target_host(task).ok_or_else(|| {
            Error::Planning("server_provision requires a 'hostname' parameter".to_string())
        })?;
        let profile = Self::param_str(task, "profile", "baseline");

        Ok(PlanProposal {
            summary: format!("provision {} with profile {}", host, profile),
            steps: vec![
                StepProposal::new(
                    "allocate address and inventory record",
                    StepAction::RemoteApiCall {
                        endpoint: "https://ipam.internal/api/allocate".to_string(),
                        method: "POST".to_string(),
                        payload: serde_json::json!({ "hostname": host.clone() }),
                    },
                )
                .risk(RiskLevel::Medium),
                StepProposal::new(
                    "install base image",
                    StepAction::RemoteApiCall {
                        endpoint: format!("https://deploy.internal/api/hosts/{}/image", host),
                        method: "POST".to_string(),
                        payload: serde_json::json!({ "profile": profile.clone() }),
                    },
                )
                .depends_on(vec![0])
                .risk(RiskLevel::High),
                StepProposal::new(
                    "apply baseline configuration",
                    StepAction::ConfigTemplateApply {
                        template: format!("{}.conf.j2", profile),
                        target: format!("{}:/etc/baseline.conf", host),
                    },
                )
                .depends_on(vec![1])
                .risk(RiskLevel::High),
                StepProposal::new(
                    "verify provisioned host",
                    StepAction::RemoteApiCall {
                        endpoint: format!("https://{}/api/health", host),
                        method: "GET".to_string(),
                        payload: serde_json::json!({}),
                    },
                )
                .depends_on(vec![2])
                .risk(RiskLevel::Medium),
            ],
        })
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    async fn plan(&self, task: &Task) -> Result<PlanProposal> {
        match task.task_type {
            TaskType::SystemDiagnose => Ok(Self::diagnose_plan(task)),
            TaskType::ServerConfigure => Ok(Self::configure_plan(task)),
            TaskType::SystemMaintenance => Ok(Self::maintenance_plan(task)),
            TaskType::ServerProvision => Self::provision_plan(task),
        }
    }
}
