use crate::{ids::*, types::NewAppend};

/// State transitions a claim holder can request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimMutation {
    Renew { expires_at_unix: i64 },
    Complete,
    Cancel,
    Block,
}

impl ClaimMutation {
    pub fn name(&self) -> &'static str {
        match self {
            ClaimMutation::Renew { .. } => "renew",
            ClaimMutation::Complete => "complete",
            ClaimMutation::Cancel => "cancel",
            ClaimMutation::Block => "block",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationRequest {
    pub mutation: ClaimMutation,
    pub author: String,
    /// Response body, cancel reason or block reason.
    pub content: Option<String>,
    /// Write-level keys may act on claims they do not own.
    pub admin_override: bool,
}

/// A claim submission for the race resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    pub workspace_id: WorkspaceId,
    pub task_id: AppendId,
    pub draft: NewAppend,
    /// Live claims the author may already hold before this one is refused.
    pub wip_limit: Option<u32>,
}
