use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use mdlog_core::{
    is_sub_path, Append, AppendId, AppendOutcome, ClaimOutcome, ClaimRequest, FileId, FileRecord,
    Heartbeat, Idempotency, KeyId, KeyRecord, LogSnapshot, MutationOutcome, MutationRequest,
    NewAppend, StoredIdempotency, Workspace, WorkspaceId,
};

use crate::decide::*;
use crate::error::StorageError;
use crate::traits::Storage;

/// In-memory storage for tests and embedding. Not durable; one mutex makes
/// every operation atomic.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    workspaces: HashMap<WorkspaceId, Workspace>,
    files: HashMap<FileId, FileRecord>,
    logs: HashMap<FileId, Vec<Append>>,
    keys: HashMap<KeyId, KeyRecord>,
    heartbeats: HashMap<(WorkspaceId, String), Heartbeat>,
    idempotency: HashMap<(FileId, String), StoredIdempotency>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::Poisoned.into())
    }
}

impl Inner {
    fn file(&self, file_id: &FileId) -> anyhow::Result<&FileRecord> {
        self.files
            .get(file_id)
            .ok_or_else(|| StorageError::UnknownFile(file_id.clone()).into())
    }

    fn log(&self, file_id: &FileId) -> &[Append] {
        self.logs.get(file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn replay(&self, file_id: &FileId, idem: Option<&Idempotency>, now_unix: i64) -> Replay {
        let Some(idem) = idem else {
            return Replay::Fresh;
        };
        let stored = self.idempotency.get(&(file_id.clone(), idem.key.clone()));
        check_idempotency(stored, idem, now_unix)
    }

    fn find(&self, file_id: &FileId, append_id: AppendId) -> Option<Append> {
        self.log(file_id).iter().find(|a| a.append_id == append_id).cloned()
    }

    /// Sequence `draft`, record its idempotency key and bump workspace activity.
    fn push(&mut self, file_id: &FileId, draft: NewAppend, idem: Option<&Idempotency>, now_unix: i64) -> anyhow::Result<Append> {
        let workspace_id = self.file(file_id)?.workspace_id.clone();
        let log = self.logs.entry(file_id.clone()).or_default();
        let append = draft.into_append(file_id.clone(), next_append_id(log.as_slice()), now_unix);
        log.push(append.clone());

        if let Some(idem) = idem {
            self.idempotency.insert(
                (file_id.clone(), idem.key.clone()),
                StoredIdempotency {
                    key: idem.key.clone(),
                    author: idem.author.clone(),
                    fingerprint: idem.fingerprint.clone(),
                    append_id: append.append_id,
                    expires_at_unix: idem.expires_at_unix,
                },
            );
        }
        if let Some(ws) = self.workspaces.get_mut(&workspace_id) {
            ws.last_activity_unix = now_unix;
        }
        Ok(append)
    }

    fn held_claims(&self, workspace_id: &WorkspaceId, author: &str, now_unix: i64) -> u32 {
        let logs = self
            .files
            .values()
            .filter(|f| &f.workspace_id == workspace_id)
            .map(|f| self.log(&f.id));
        live_claims_in(logs, author, now_unix)
    }
}

impl Storage for InMemoryStorage {
    fn create_workspace(&self, workspace: &Workspace) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    fn get_workspace(&self, id: &WorkspaceId) -> anyhow::Result<Option<Workspace>> {
        Ok(self.lock()?.workspaces.get(id).cloned())
    }

    fn create_file(&self, file: &FileRecord) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        if !inner.workspaces.contains_key(&file.workspace_id) {
            return Err(StorageError::UnknownWorkspace(file.workspace_id.clone()).into());
        }
        let taken = inner
            .files
            .values()
            .any(|f| f.workspace_id == file.workspace_id && f.path == file.path);
        if taken {
            return Ok(false);
        }
        inner.files.insert(file.id.clone(), file.clone());
        Ok(true)
    }

    fn get_file(&self, id: &FileId) -> anyhow::Result<Option<FileRecord>> {
        Ok(self.lock()?.files.get(id).cloned())
    }

    fn find_file_by_path(&self, workspace_id: &WorkspaceId, path: &str) -> anyhow::Result<Option<FileRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .files
            .values()
            .find(|f| &f.workspace_id == workspace_id && f.path == path)
            .cloned())
    }

    fn list_files(&self, workspace_id: &WorkspaceId) -> anyhow::Result<Vec<FileRecord>> {
        let inner = self.lock()?;
        let mut files: Vec<FileRecord> = inner
            .files
            .values()
            .filter(|f| &f.workspace_id == workspace_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn insert_append(
        &self,
        file_id: &FileId,
        draft: &NewAppend,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<AppendOutcome> {
        let mut inner = self.lock()?;
        inner.file(file_id)?;
        match inner.replay(file_id, idempotency, now_unix) {
            Replay::Conflict => return Ok(AppendOutcome::IdempotencyConflict),
            Replay::Existing(id) => {
                return Ok(inner
                    .find(file_id, id)
                    .map_or(AppendOutcome::IdempotencyConflict, AppendOutcome::Replayed));
            }
            Replay::Fresh => {}
        }
        if !reference_exists(inner.log(file_id), draft) {
            return Ok(AppendOutcome::ReferenceNotFound);
        }
        let append = inner.push(file_id, draft.clone(), idempotency, now_unix)?;
        Ok(AppendOutcome::Created(append))
    }

    fn submit_claim(
        &self,
        file_id: &FileId,
        request: &ClaimRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<ClaimOutcome> {
        let mut inner = self.lock()?;
        inner.file(file_id)?;
        match inner.replay(file_id, idempotency, now_unix) {
            Replay::Conflict => return Ok(ClaimOutcome::IdempotencyConflict),
            Replay::Existing(id) => {
                return Ok(inner
                    .find(file_id, id)
                    .map_or(ClaimOutcome::IdempotencyConflict, ClaimOutcome::Replayed));
            }
            Replay::Fresh => {}
        }
        let held = request
            .wip_limit
            .map(|_| inner.held_claims(&request.workspace_id, &request.draft.author, now_unix));
        let draft = match decide_claim_request(inner.log(file_id), request, held, now_unix) {
            Ok(draft) => draft,
            Err(outcome) => return Ok(outcome),
        };
        let append = inner.push(file_id, draft, idempotency, now_unix)?;
        Ok(ClaimOutcome::Accepted(append))
    }

    fn mutate_claim(
        &self,
        file_id: &FileId,
        claim_id: AppendId,
        request: &MutationRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> anyhow::Result<MutationOutcome> {
        let mut inner = self.lock()?;
        inner.file(file_id)?;
        match inner.replay(file_id, idempotency, now_unix) {
            Replay::Conflict => return Ok(MutationOutcome::IdempotencyConflict),
            Replay::Existing(id) => return Ok(replayed_mutation(inner.log(file_id), claim_id, id)),
            Replay::Fresh => {}
        }
        let (draft, history) = match decide_mutation(inner.log(file_id), claim_id, request, now_unix) {
            Ok(planned) => planned,
            Err(outcome) => return Ok(outcome),
        };
        let append = inner.push(file_id, draft, idempotency, now_unix)?;
        Ok(MutationOutcome::Applied {
            history: history.with_followup(append.clone()),
            append,
        })
    }

    fn get_append(&self, file_id: &FileId, append_id: AppendId) -> anyhow::Result<Option<Append>> {
        Ok(self.lock()?.find(file_id, append_id))
    }

    fn list_appends(&self, file_id: &FileId) -> anyhow::Result<Vec<Append>> {
        Ok(self.lock()?.log(file_id).to_vec())
    }

    fn load_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        folder: Option<&str>,
        now_unix: i64,
    ) -> anyhow::Result<LogSnapshot> {
        let inner = self.lock()?;
        let mut files: Vec<FileRecord> = inner
            .files
            .values()
            .filter(|f| &f.workspace_id == workspace_id)
            .filter(|f| folder.map_or(true, |dir| is_sub_path(dir, &f.path)))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let appends = files
            .iter()
            .flat_map(|f| inner.log(&f.id).iter().cloned())
            .collect();
        let mut heartbeats: Vec<Heartbeat> = inner
            .heartbeats
            .values()
            .filter(|h| &h.workspace_id == workspace_id)
            .cloned()
            .collect();
        heartbeats.sort_by(|a, b| a.author.cmp(&b.author));

        Ok(LogSnapshot {
            now_unix,
            workspace_id: workspace_id.clone(),
            files,
            appends,
            heartbeats,
        })
    }

    fn insert_key(&self, key: &KeyRecord) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn lookup_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<KeyRecord>> {
        let inner = self.lock()?;
        Ok(inner.keys.values().find(|k| k.key_hash == key_hash).cloned())
    }

    fn get_key(&self, id: &KeyId) -> anyhow::Result<Option<KeyRecord>> {
        Ok(self.lock()?.keys.get(id).cloned())
    }

    fn revoke_key(&self, workspace_id: &WorkspaceId, id: &KeyId, now_unix: i64) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        match inner.keys.get_mut(id) {
            Some(key) if &key.workspace_id == workspace_id => {
                key.revoked_at_unix.get_or_insert(now_unix);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn touch_key(&self, id: &KeyId, now_unix: i64) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if let Some(key) = inner.keys.get_mut(id) {
            key.last_used_at_unix = Some(now_unix);
        }
        Ok(())
    }

    fn list_keys(&self, workspace_id: &WorkspaceId) -> anyhow::Result<Vec<KeyRecord>> {
        let inner = self.lock()?;
        let mut keys: Vec<KeyRecord> = inner
            .keys
            .values()
            .filter(|k| &k.workspace_id == workspace_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| (a.created_at_unix, &a.id).cmp(&(b.created_at_unix, &b.id)));
        Ok(keys)
    }

    fn upsert_heartbeat(&self, heartbeat: &Heartbeat) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.heartbeats.insert(
            (heartbeat.workspace_id.clone(), heartbeat.author.clone()),
            heartbeat.clone(),
        );
        Ok(())
    }

    fn purge_idempotency(&self, now_unix: i64) -> anyhow::Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.idempotency.len();
        inner.idempotency.retain(|_, r| r.expires_at_unix > now_unix);
        Ok(before - inner.idempotency.len())
    }
}
