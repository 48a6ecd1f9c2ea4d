//! Side channels the engine notifies after a successful operation. Both are
//! fire-and-forget: a failing sink is logged and never fails the request.

use std::sync::Mutex;

use serde::Serialize;

use mdlog_core::{AppendId, FileId, KeyId, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub workspace_id: WorkspaceId,
    pub key_id: Option<KeyId>,
    pub action: String,
    pub target: String,
    pub at_unix: i64,
}

pub trait AuditSink: Send + Sync {
    fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Task and claim lifecycle notifications (webhook payloads).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TaskCreated {
        workspace_id: WorkspaceId,
        file_id: FileId,
        task_id: AppendId,
        author: String,
    },
    ClaimAccepted {
        workspace_id: WorkspaceId,
        file_id: FileId,
        task_id: AppendId,
        claim_id: AppendId,
        author: String,
        expires_at: Option<i64>,
    },
    ClaimRenewed {
        workspace_id: WorkspaceId,
        file_id: FileId,
        claim_id: AppendId,
        author: String,
        expires_at: Option<i64>,
    },
    ClaimCompleted {
        workspace_id: WorkspaceId,
        file_id: FileId,
        claim_id: AppendId,
        author: String,
    },
    ClaimCancelled {
        workspace_id: WorkspaceId,
        file_id: FileId,
        claim_id: AppendId,
        author: String,
    },
    ClaimBlocked {
        workspace_id: WorkspaceId,
        file_id: FileId,
        claim_id: AppendId,
        author: String,
        reason: Option<String>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskCreated { .. } => "task.created",
            LifecycleEvent::ClaimAccepted { .. } => "claim.accepted",
            LifecycleEvent::ClaimRenewed { .. } => "claim.renewed",
            LifecycleEvent::ClaimCompleted { .. } => "claim.completed",
            LifecycleEvent::ClaimCancelled { .. } => "claim.cancelled",
            LifecycleEvent::ClaimBlocked { .. } => "claim.blocked",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

/// Default sink: structured log lines via `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        tracing::info!(
            target: "mdlog::audit",
            workspace = %entry.workspace_id,
            key = ?entry.key_id.as_ref().map(KeyId::as_str),
            action = %entry.action,
            target_ref = %entry.target,
            "audit"
        );
        Ok(())
    }
}

impl EventSink for TracingSink {
    fn dispatch(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "mdlog::events", event = event.name(), %payload, "lifecycle event");
        Ok(())
    }
}

/// Keeps everything it receives. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingSink {
    actions: Mutex<Vec<AuditEntry>>,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<AuditEntry> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for RecordingSink {
    fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.actions
            .lock()
            .map_err(|_| anyhow::anyhow!("audit recorder poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

impl EventSink for RecordingSink {
    fn dispatch(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event recorder poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
