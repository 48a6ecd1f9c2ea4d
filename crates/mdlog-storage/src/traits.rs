use mdlog_core::{
    Append, AppendId, AppendOutcome, ClaimOutcome, ClaimRequest, FileId, FileRecord, Heartbeat,
    Idempotency, KeyId, KeyRecord, LogSnapshot, MutationOutcome, MutationRequest, NewAppend,
    Workspace, WorkspaceId,
};

/// The store contract. Every method that writes an append is one atomic
/// step: id allocation, idempotency lookup and any race check commit
/// together or not at all.
pub trait Storage: Send + Sync {
    fn create_workspace(&self, workspace: &Workspace) -> anyhow::Result<()>;
    fn get_workspace(&self, id: &WorkspaceId) -> anyhow::Result<Option<Workspace>>;

    /// Returns `false` when the workspace already has a file at that path.
    fn create_file(&self, file: &FileRecord) -> anyhow::Result<bool>;
    fn get_file(&self, id: &FileId) -> anyhow::Result<Option<FileRecord>>;
    fn find_file_by_path(&self, workspace_id: &WorkspaceId, path: &str) -> anyhow::Result<Option<FileRecord>>;
    fn list_files(&self, workspace_id: &WorkspaceId) -> anyhow::Result<Vec<FileRecord>>;

    /// Sequence a plain append (task, comment, vote, ...).
    fn insert_append(
        &self,
        file_id: &FileId,
        draft: &NewAppend,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<AppendOutcome>;

    /// Check-then-insert for a claim: the race check, the WIP count and the
    /// insert happen in one indivisible step.
    fn submit_claim(
        &self,
        file_id: &FileId,
        request: &ClaimRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<ClaimOutcome>;

    /// Validate a renew/complete/cancel/block against the claim's history
    /// and append the resulting record.
    fn mutate_claim(
        &self,
        file_id: &FileId,
        claim_id: AppendId,
        request: &MutationRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<MutationOutcome>;

    fn get_append(&self, file_id: &FileId, append_id: AppendId) -> anyhow::Result<Option<Append>>;
    fn list_appends(&self, file_id: &FileId) -> anyhow::Result<Vec<Append>>;

    /// One consistent read of a workspace, optionally limited to files under `folder`.
    fn load_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        folder: Option<&str>,
        now_unix: i64,
    ) -> anyhow::Result<LogSnapshot>;

    fn insert_key(&self, key: &KeyRecord) -> anyhow::Result<()>;
    fn lookup_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<KeyRecord>>;
    fn get_key(&self, id: &KeyId) -> anyhow::Result<Option<KeyRecord>>;
    /// Sets `revoked_at` once. Returns `false` if the key is unknown in this workspace.
    fn revoke_key(&self, workspace_id: &WorkspaceId, id: &KeyId, now_unix: i64) -> anyhow::Result<bool>;
    /// Best effort; losing an update is fine.
    fn touch_key(&self, id: &KeyId, now_unix: i64) -> anyhow::Result<()>;
    fn list_keys(&self, workspace_id: &WorkspaceId) -> anyhow::Result<Vec<KeyRecord>>;

    fn upsert_heartbeat(&self, heartbeat: &Heartbeat) -> anyhow::Result<()>;

    /// Drop idempotency records that expired at or before `now_unix`.
    fn purge_idempotency(&self, now_unix: i64) -> anyhow::Result<usize>;
}
