//! Approval gate and escalation integration tests.
//!
//! Covers the documented guided flow: awaiting_approval on plan
//! acceptance, escalation exactly once at timeout expiry, explicit
//! resolution from the escalated state, and invalid-transition rejection
//! for operator calls made from the wrong state.

use std::sync::Arc;
use std::time::Duration;

use opsflow::core::{AutonomyLevel, TaskStatus};
use opsflow::error::Error;
use opsflow::orchestration::{EventKind, Notifier};

use crate::fixtures::{
    low_risk_plan, manager_with, submit, test_config, wait_for_status, FixedPlanner,
    RecordingNotifier, ScriptedExecutor,
};

/// Scenario: guided task reaches awaiting_approval, escalates after the
/// timeout with no response, then reject() cancels it.
#[tokio::test]
async fn test_guided_timeout_escalation_then_reject() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        test_config(60, 4),
    );

    let id = submit(&manager, AutonomyLevel::Guided).await;
    assert_eq!(
        manager.get(&id).await.unwrap().status,
        TaskStatus::AwaitingApproval
    );

    wait_for_status(&manager, &id, TaskStatus::Escalated, Duration::from_secs(2)).await;

    // escalation does not self-resolve
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.get(&id).await.unwrap().status, TaskStatus::Escalated);

    manager.reject(&id).await.unwrap();
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    assert_eq!(
        notifier.kinds_for(&id),
        vec![EventKind::ApprovalRequested, EventKind::Escalated]
    );
}

/// Escalation fires at most once per continuous awaiting period.
#[tokio::test]
async fn test_escalation_fires_once() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        test_config(40, 4),
    );

    let id = submit(&manager, AutonomyLevel::Guided).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let escalations = notifier
        .kinds_for(&id)
        .iter()
        .filter(|k| **k == EventKind::Escalated)
        .count();
    assert_eq!(escalations, 1);
}

/// An approval arriving before the timeout wins; the armed timer stands
/// down without escalating.
#[tokio::test]
async fn test_prompt_approval_prevents_escalation() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        test_config(80, 4),
    );

    let id = submit(&manager, AutonomyLevel::Guided).await;
    manager.approve(&id).await.unwrap();
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);

    // let the original timer expire; it must not fire on a resolved gate
    tokio::time::sleep(Duration::from_millis(180)).await;
    assert!(!notifier.kinds_for(&id).contains(&EventKind::Escalated));
    assert_eq!(manager.get(&id).await.unwrap().status, TaskStatus::Succeeded);
}

/// Approval is legal from the escalated state and execution proceeds.
#[tokio::test]
async fn test_approve_after_escalation() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        notifier as Arc<dyn Notifier>,
        test_config(40, 4),
    );

    let id = submit(&manager, AutonomyLevel::Guided).await;
    wait_for_status(&manager, &id, TaskStatus::Escalated, Duration::from_secs(2)).await;

    manager.approve(&id).await.unwrap();
    let task = manager.wait(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
}

/// approve() on a task that is not waiting for a gate fails with
/// InvalidTransition and leaves the state unchanged.
#[tokio::test]
async fn test_approve_wrong_state_is_invalid_transition() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    let final_task = manager.wait(&id).await.unwrap();
    assert_eq!(final_task.status, TaskStatus::Succeeded);

    let err = manager.approve(&id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.history.len(), final_task.history.len());
}

/// A second approval of the same task is rejected; the audit history
/// records a single approval.
#[tokio::test]
async fn test_double_approval_rejected() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::new(),
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::Guided).await;
    manager.approve(&id).await.unwrap();
    assert!(matches!(
        manager.approve(&id).await.unwrap_err(),
        Error::InvalidTransition { .. }
    ));

    let task = manager.wait(&id).await.unwrap();
    let approvals = task
        .history
        .iter()
        .filter(|h| h.to == TaskStatus::Approved)
        .count();
    assert_eq!(approvals, 1);
}

/// reject() is only legal while the task waits for a gate.
#[tokio::test]
async fn test_reject_wrong_state_is_invalid_transition() {
    let notifier = RecordingNotifier::new();
    let manager = manager_with(
        FixedPlanner::ok(low_risk_plan()),
        ScriptedExecutor::builder()
            .default_delay(Duration::from_millis(100))
            .build(),
        notifier as Arc<dyn Notifier>,
        test_config(5_000, 4),
    );

    let id = submit(&manager, AutonomyLevel::FullyAutonomous).await;
    assert_eq!(manager.get(&id).await.unwrap().status, TaskStatus::Executing);

    let err = manager.reject(&id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(manager.get(&id).await.unwrap().status, TaskStatus::Executing);

    manager.cancel(&id).await.unwrap();
}
