use serde::Serialize;

use mdlog_core::{
    Append, AppendId, AppendType, ClaimHistory, ClaimState, FileId, KeySummary, Priority, Workspace,
};

/// How a caller names a file: by id, or by its `.md` path in the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileRef {
    Id(FileId),
    Path(String),
}

impl FileRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.ends_with(".md") || raw.contains('/') {
            FileRef::Path(raw.to_string())
        } else {
            FileRef::Id(FileId::from_str(raw))
        }
    }
}

/// Wire form of one append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendView {
    pub id: AppendId,
    pub file_id: FileId,
    #[serde(rename = "type")]
    pub ty: AppendType,
    pub author: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<AppendId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<i64>,
    /// Set when an idempotent retry returned an earlier append.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl AppendView {
    pub fn new(append: Append, replayed: bool) -> Self {
        Self {
            id: append.append_id,
            file_id: append.file_id,
            ty: append.ty,
            author: append.author,
            ts: append.created_at_unix,
            content: append.content,
            reference: append.reference,
            status: append.status,
            expires_at: append.expires_at_unix,
            priority: append.priority,
            labels: append.labels,
            due_at: append.due_at_unix,
            replayed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub status: ClaimState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}

/// `{ok:true, claim:{status, expiresInSeconds?}, appendId}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub ok: bool,
    pub claim: ClaimView,
    pub append_id: AppendId,
}

impl ClaimReceipt {
    pub fn new(history: &ClaimHistory, append_id: AppendId, now_unix: i64) -> Self {
        let status = history.state(now_unix);
        Self {
            ok: true,
            claim: ClaimView {
                status,
                expires_in_seconds: (!status.is_terminal())
                    .then(|| history.expires_in_secs(now_unix))
                    .flatten(),
            },
            append_id,
        }
    }
}

/// A freshly minted key. `token` is the only time the secret is shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MintedKey {
    pub key: KeySummary,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Bootstrap {
    pub workspace: Workspace,
    pub root: MintedKey,
}
