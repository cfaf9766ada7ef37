//! Execution integration tests.
//!
//! Covers step dispatch ordering against the dependency DAG, the two
//! failure policies, the concurrency cap, pause/resume, and cancellation
//! mid-execution.

use std::sync::Arc;
use std::time::Duration;

use opsflow::core::{
    AutonomyLevel, FailurePolicy, RiskLevel, StepStatus, TaskStatus,
};
use opsflow::orchestration::{Notifier, PlanProposal};

use crate::fixtures::{
    manager_with, proposal_step, submit, test_config, wait_for_status, FixedPlanner,
    RecordingNotifier, ScriptedExecutor,
};

fn fan_out_plan() -> PlanProposal {
    // a -> b, a -> c
    PlanProposal {
        summary: "fan out".to_string(),
        steps: vec![
            proposal_step("a", vec![], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("b", vec![0], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("c", vec![0], RiskLevel::Low, FailurePolicy::Abort),
        ],
    }
}

/// Scenario: B fails with policy abort -> C is skipped, the task ends
/// failed, and A remains succeeded in the record.
#[tokio::test]
async fn test_abort_policy_scenario() {
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder().fail_on("b").build();
    let manager = manager_with(
        FixedPlanner::ok(fan_out_plan()),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        // concurrency 1 keeps c undispatched when b fails
        test_config(5_000, 1),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_ref().unwrap().contains("'b'"));

    let step = |name: &str| task.steps.iter().find(|s| s.description == name).unwrap();
    assert_eq!(step("a").status, StepStatus::Succeeded);
    assert!(matches!(step("b").status, StepStatus::Failed { .. }));
    assert_eq!(step("c").status, StepStatus::Skipped);
}

/// A step only starts once all of its dependencies have finished.
#[tokio::test]
async fn test_dependency_order_is_respected() {
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder()
        .delay_on("a", Duration::from_millis(40))
        .build();
    let manager = manager_with(
        FixedPlanner::ok(fan_out_plan()),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);

    let events = executor.events();
    let position = |what: &str, desc: &str| {
        events
            .iter()
            .position(|(w, d)| *w == what && d == desc)
            .unwrap()
    };

    // b and c must start only after a finished
    assert!(position("finish", "a") < position("start", "b"));
    assert!(position("finish", "a") < position("start", "c"));
}

/// skip_dependents absorbs the failure: transitive dependents are
/// skipped, independent work continues, the task still succeeds.
#[tokio::test]
async fn test_skip_dependents_policy_scenario() {
    let plan = PlanProposal {
        summary: "optional probe".to_string(),
        steps: vec![
            proposal_step("probe", vec![], RiskLevel::Low, FailurePolicy::SkipDependents),
            proposal_step("analyze", vec![0], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("report", vec![1], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("inventory", vec![], RiskLevel::Low, FailurePolicy::Abort),
        ],
    };
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder().fail_on("probe").build();
    let manager = manager_with(
        FixedPlanner::ok(plan),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(task.error.is_none());

    let step = |name: &str| task.steps.iter().find(|s| s.description == name).unwrap();
    assert!(matches!(step("probe").status, StepStatus::Failed { .. }));
    assert_eq!(step("analyze").status, StepStatus::Skipped);
    assert_eq!(step("report").status, StepStatus::Skipped);
    assert_eq!(step("inventory").status, StepStatus::Succeeded);
}

/// The per-task concurrency cap bounds in-flight steps.
#[tokio::test]
async fn test_concurrency_cap() {
    let plan = PlanProposal {
        summary: "parallel collectors".to_string(),
        steps: (0..6)
            .map(|i| {
                proposal_step(
                    &format!("collector-{}", i),
                    vec![],
                    RiskLevel::Low,
                    FailurePolicy::Abort,
                )
            })
            .collect(),
    };
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder()
        .default_delay(Duration::from_millis(25))
        .build();
    let manager = manager_with(
        FixedPlanner::ok(plan),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 2),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    let task = manager.wait(&id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(executor.peak_concurrency() <= 2);
    assert_eq!(executor.finished().len(), 6);
}

/// Pause lets in-flight steps finish but blocks new dispatch; resume
/// picks the plan back up.
#[tokio::test]
async fn test_pause_blocks_dispatch_until_resume() {
    let plan = PlanProposal {
        summary: "chain".to_string(),
        steps: vec![
            proposal_step("first", vec![], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("second", vec![0], RiskLevel::Low, FailurePolicy::Abort),
        ],
    };
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder()
        .default_delay(Duration::from_millis(50))
        .build();
    let manager = manager_with(
        FixedPlanner::ok(plan),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    manager.pause(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().status, TaskStatus::Paused);

    // first (already in flight) finishes; second must stay pending
    tokio::time::sleep(Duration::from_millis(150)).await;
    let task = manager.get(&id).await.unwrap();
    let step = |name: &str| task.steps.iter().find(|s| s.description == name).unwrap();
    assert_eq!(step("first").status, StepStatus::Succeeded);
    assert_eq!(step("second").status, StepStatus::Pending);

    manager.resume(&id).await.unwrap();
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);

    let pauses: Vec<TaskStatus> = task.history.iter().map(|h| h.to).collect();
    assert!(pauses.contains(&TaskStatus::Paused));
}

/// Cancelling an executing task signals in-flight steps and preserves
/// already-recorded outcomes.
#[tokio::test]
async fn test_cancel_mid_execution() {
    let plan = PlanProposal {
        summary: "slow chain".to_string(),
        steps: vec![
            proposal_step("quick", vec![], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("slow", vec![0], RiskLevel::Low, FailurePolicy::Abort),
        ],
    };
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder()
        .delay_on("slow", Duration::from_secs(10))
        .build();
    let manager = manager_with(
        FixedPlanner::ok(plan),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;

    // wait until the slow step is in flight
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if executor.started().contains(&"slow".to_string()) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "slow step never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let start = std::time::Instant::now();
    manager.cancel(&id).await.unwrap();
    let task = manager.wait(&id).await.unwrap();

    // the cancel drained promptly instead of waiting out the 10s step
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(task.status, TaskStatus::Cancelled);

    let step = |name: &str| task.steps.iter().find(|s| s.description == name).unwrap();
    assert_eq!(step("quick").status, StepStatus::Succeeded);
    assert!(matches!(step("slow").status, StepStatus::Failed { .. }));

    // no terminal success/failure notification after an operator cancel
    let kinds = notifier.kinds_for(&id);
    assert!(!kinds.contains(&opsflow::orchestration::EventKind::TaskSucceeded));
    assert!(!kinds.contains(&opsflow::orchestration::EventKind::TaskFailed));
}

/// Cancelling from paused is legal and ends the task.
#[tokio::test]
async fn test_cancel_from_paused() {
    let plan = PlanProposal {
        summary: "chain".to_string(),
        steps: vec![
            proposal_step("first", vec![], RiskLevel::Low, FailurePolicy::Abort),
            proposal_step("second", vec![0], RiskLevel::Low, FailurePolicy::Abort),
        ],
    };
    let notifier = RecordingNotifier::new();
    let executor = ScriptedExecutor::builder()
        .default_delay(Duration::from_millis(30))
        .build();
    let manager = manager_with(
        FixedPlanner::ok(plan),
        Arc::clone(&executor) as Arc<dyn opsflow::orchestration::Executor>,
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    manager.pause(&id).await.unwrap();
    manager.cancel(&id).await.unwrap();

    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    wait_for_status(&manager, &id, TaskStatus::Cancelled, Duration::from_secs(1)).await;
}
