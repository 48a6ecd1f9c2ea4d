use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_at_unix: i64,
    pub last_activity_unix: i64,
}

/// A markdown document owning one append log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub workspace_id: WorkspaceId,
    pub path: String,
    pub created_at_unix: i64,
}

/// Immutable log entry. Never updated or deleted once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Append {
    pub file_id: FileId,
    pub append_id: AppendId,
    pub ty: AppendType,
    pub author: String,
    pub content: Option<String>,
    /// The append this one targets: a claim's task, a response's claim, ...
    pub reference: Option<AppendId>,
    /// Advisory, set once at creation.
    pub status: Option<String>,
    pub expires_at_unix: Option<i64>,
    pub priority: Priority,
    pub labels: Vec<String>,
    pub due_at_unix: Option<i64>,
    pub created_at_unix: i64,
}

/// An append before the sequencer has given it an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppend {
    pub ty: AppendType,
    pub author: String,
    pub content: Option<String>,
    pub reference: Option<AppendId>,
    pub status: Option<String>,
    pub expires_at_unix: Option<i64>,
    pub priority: Priority,
    pub labels: Vec<String>,
    pub due_at_unix: Option<i64>,
}

impl NewAppend {
    pub fn new(ty: AppendType, author: impl Into<String>) -> Self {
        Self {
            ty,
            author: author.into(),
            content: None,
            reference: None,
            status: None,
            expires_at_unix: None,
            priority: Priority::default(),
            labels: vec![],
            due_at_unix: None,
        }
    }

    pub fn with_reference(mut self, reference: AppendId) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content;
        self
    }

    pub fn into_append(self, file_id: FileId, append_id: AppendId, created_at_unix: i64) -> Append {
        Append {
            file_id,
            append_id,
            ty: self.ty,
            author: self.author,
            content: self.content,
            reference: self.reference,
            status: self.status,
            expires_at_unix: self.expires_at_unix,
            priority: self.priority,
            labels: self.labels,
            due_at_unix: self.due_at_unix,
            created_at_unix,
        }
    }
}

/// Stored capability key. The plaintext token is never kept, only its hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub workspace_id: WorkspaceId,
    pub key_hash: String,
    pub name: Option<String>,
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: Option<String>,
    pub bound_author: Option<String>,
    pub allowed_types: Option<Vec<AppendType>>,
    pub wip_limit: Option<u32>,
    pub created_by: Option<KeyId>,
    pub created_at_unix: i64,
    pub expires_at_unix: Option<i64>,
    pub revoked_at_unix: Option<i64>,
    pub last_used_at_unix: Option<i64>,
}

/// Key metadata safe to show back to a key holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub id: KeyId,
    pub name: Option<String>,
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: Option<String>,
    pub bound_author: Option<String>,
    pub allowed_types: Option<Vec<AppendType>>,
    pub wip_limit: Option<u32>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

impl From<&KeyRecord> for KeySummary {
    fn from(k: &KeyRecord) -> Self {
        Self {
            id: k.id.clone(),
            name: k.name.clone(),
            permission: k.permission,
            scope_type: k.scope_type,
            scope_path: k.scope_path.clone(),
            bound_author: k.bound_author.clone(),
            allowed_types: k.allowed_types.clone(),
            wip_limit: k.wip_limit,
            created_at: k.created_at_unix,
            expires_at: k.expires_at_unix,
            revoked_at: k.revoked_at_unix,
            last_used_at: k.last_used_at_unix,
        }
    }
}

/// Per-agent liveness row. Informational only, never used for authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub workspace_id: WorkspaceId,
    pub author: String,
    pub status: HeartbeatStatus,
    pub last_seen_unix: i64,
    pub current_task: Option<String>,
}
