//! Notification seam for approval requests, escalations, and terminal
//! events.
//!
//! Delivery is best-effort: a notifier failure is logged by the caller and
//! never blocks a state transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::TaskId;
use crate::error::Result;
use crate::olog;

/// The events that produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The task entered awaiting_approval.
    ApprovalRequested,
    /// The approval timed out and a higher-tier contact is needed.
    Escalated,
    /// The task succeeded.
    TaskSucceeded,
    /// The task failed.
    TaskFailed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ApprovalRequested => write!(f, "approval_requested"),
            EventKind::Escalated => write!(f, "escalated"),
            EventKind::TaskSucceeded => write!(f, "task_succeeded"),
            EventKind::TaskFailed => write!(f, "task_failed"),
        }
    }
}

/// Delivers task event notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification. Best-effort delivery.
    async fn send(&self, task_id: TaskId, kind: EventKind, payload: serde_json::Value)
        -> Result<()>;
}

/// Send a notification, logging (not propagating) any failure.
///
/// Delivery failures must never block a state transition.
pub async fn send_logged(
    notifier: &dyn Notifier,
    task_id: TaskId,
    kind: EventKind,
    payload: serde_json::Value,
) {
    if let Err(err) = notifier.send(task_id, kind, payload).await {
        crate::olog_warn!(
            "notification {} for task {} failed: {}",
            kind,
            task_id.short(),
            err
        );
    }
}

/// Notifier that writes events to the structured log.
///
/// Escalations route to the escalation contact when one is configured,
/// everything else to the primary contact.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    primary_contact: Option<String>,
    escalation_contact: Option<String>,
}

impl LogNotifier {
    /// Create a notifier with the given contacts.
    pub fn new(primary_contact: Option<String>, escalation_contact: Option<String>) -> Self {
        Self {
            primary_contact,
            escalation_contact,
        }
    }

    fn contact_for(&self, kind: EventKind) -> &str {
        let contact = match kind {
            EventKind::Escalated => self
                .escalation_contact
                .as_deref()
                .or(self.primary_contact.as_deref()),
            _ => self.primary_contact.as_deref(),
        };
        contact.unwrap_or("(unconfigured)")
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        task_id: TaskId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        olog!(
            "notify [{}] task={} contact={} payload={}",
            kind,
            task_id.short(),
            self.contact_for(kind),
            payload
        );
        Ok(())
    }
}
