use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use mdlog_core::{
    Append, AppendId, AppendOutcome, ClaimOutcome, ClaimRequest, FileId, FileRecord, Heartbeat,
    Idempotency, KeyId, KeyRecord, LogSnapshot, MutationOutcome, MutationRequest, NewAppend,
    StoredIdempotency, Workspace, WorkspaceId,
};
use mdlog_storage::{
    check_idempotency, decide_claim_request, decide_mutation, live_claims_in, replayed_mutation,
    Replay, Storage, StorageError,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::rows::{self, escape_like, APPEND_COLUMNS, KEY_COLUMNS};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. Several instances (or processes) may share one
/// database file: every append runs in a `BEGIN IMMEDIATE` transaction, so
/// id allocation and claim races are serialized by SQLite's write lock.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned.into())
    }
}

fn require_file(conn: &Connection, file_id: &FileId) -> Result<FileRecord> {
    conn.query_row(
        "SELECT id, workspace_id, path, created_at FROM files WHERE id=?1",
        params![file_id.as_str()],
        rows::file,
    )
    .optional()?
    .ok_or_else(|| StorageError::UnknownFile(file_id.clone()).into())
}

fn file_log(conn: &Connection, file_id: &FileId) -> Result<Vec<Append>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPEND_COLUMNS} FROM appends WHERE file_id=?1 ORDER BY append_id"
    ))?;
    let rows = stmt.query_map(params![file_id.as_str()], rows::append)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn find_append(conn: &Connection, file_id: &FileId, append_id: AppendId) -> Result<Option<Append>> {
    Ok(conn
        .query_row(
            &format!("SELECT {APPEND_COLUMNS} FROM appends WHERE file_id=?1 AND append_id=?2"),
            params![file_id.as_str(), append_id],
            rows::append,
        )
        .optional()?)
}

fn replay(conn: &Connection, file_id: &FileId, idem: Option<&Idempotency>, now_unix: i64) -> Result<Replay> {
    let Some(idem) = idem else {
        return Ok(Replay::Fresh);
    };
    let stored: Option<StoredIdempotency> = conn
        .query_row(
            "SELECT key, author, fingerprint, append_id, expires_at FROM idempotency WHERE file_id=?1 AND key=?2",
            params![file_id.as_str(), idem.key],
            rows::idempotency,
        )
        .optional()?;
    Ok(check_idempotency(stored.as_ref(), idem, now_unix))
}

/// Allocate the next id for the file and write the append. Must run inside
/// an immediate transaction.
fn push(
    conn: &Connection,
    file: &FileRecord,
    draft: NewAppend,
    idem: Option<&Idempotency>,
    now_unix: i64,
) -> Result<Append> {
    let next: AppendId = conn.query_row(
        "SELECT COALESCE(MAX(append_id), 0) + 1 FROM appends WHERE file_id=?1",
        params![file.id.as_str()],
        |r| r.get(0),
    )?;
    let append = draft.into_append(file.id.clone(), next, now_unix);
    let labels = serde_json::to_string(&append.labels)?;
    conn.execute(
        &format!(
            "INSERT INTO appends({APPEND_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            append.file_id.as_str(),
            append.append_id,
            append.ty.as_str(),
            append.author,
            append.content,
            append.reference,
            append.status,
            append.expires_at_unix,
            append.priority.as_str(),
            labels,
            append.due_at_unix,
            append.created_at_unix
        ],
    )?;

    if let Some(idem) = idem {
        conn.execute(
            "INSERT OR REPLACE INTO idempotency(file_id, key, author, fingerprint, append_id, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.id.as_str(),
                idem.key,
                idem.author,
                idem.fingerprint,
                append.append_id,
                idem.expires_at_unix
            ],
        )?;
    }
    conn.execute(
        "UPDATE workspaces SET last_activity_at=?1 WHERE id=?2",
        params![now_unix, file.workspace_id.as_str()],
    )?;
    Ok(append)
}

/// Live claims held by `author` across every file of the workspace.
fn held_claims(conn: &Connection, workspace_id: &WorkspaceId, author: &str, now_unix: i64) -> Result<u32> {
    let cols = APPEND_COLUMNS
        .split(", ")
        .map(|c| format!("a.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {cols} FROM appends a JOIN files f ON f.id = a.file_id
         WHERE f.workspace_id=?1 AND a.ty IN ('claim', 'renew', 'block', 'response', 'cancel')
         ORDER BY a.file_id, a.append_id"
    ))?;
    let rows = stmt.query_map(params![workspace_id.as_str()], rows::append)?;
    let mut logs: BTreeMap<FileId, Vec<Append>> = BTreeMap::new();
    for row in rows {
        let append = row?;
        logs.entry(append.file_id.clone()).or_default().push(append);
    }
    Ok(live_claims_in(logs.values().map(Vec::as_slice), author, now_unix))
}

impl Storage for SqliteStorage {
    fn create_workspace(&self, workspace: &Workspace) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workspaces(id, name, created_at, last_activity_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                workspace.id.as_str(),
                workspace.name,
                workspace.created_at_unix,
                workspace.last_activity_unix
            ],
        )?;
        Ok(())
    }

    fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name, created_at, last_activity_at FROM workspaces WHERE id=?1",
                params![id.as_str()],
                rows::workspace,
            )
            .optional()?)
    }

    fn create_file(&self, file: &FileRecord) -> Result<bool> {
        let conn = self.lock()?;
        let known: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE id=?1)",
            params![file.workspace_id.as_str()],
            |r| r.get(0),
        )?;
        if !known {
            return Err(StorageError::UnknownWorkspace(file.workspace_id.clone()).into());
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO files(id, workspace_id, path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![file.id.as_str(), file.workspace_id.as_str(), file.path, file.created_at_unix],
        )?;
        Ok(inserted == 1)
    }

    fn get_file(&self, id: &FileId) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, workspace_id, path, created_at FROM files WHERE id=?1",
                params![id.as_str()],
                rows::file,
            )
            .optional()?)
    }

    fn find_file_by_path(&self, workspace_id: &WorkspaceId, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, workspace_id, path, created_at FROM files WHERE workspace_id=?1 AND path=?2",
                params![workspace_id.as_str(), path],
                rows::file,
            )
            .optional()?)
    }

    fn list_files(&self, workspace_id: &WorkspaceId) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, workspace_id, path, created_at FROM files WHERE workspace_id=?1 ORDER BY path")?;
        let rows = stmt.query_map(params![workspace_id.as_str()], rows::file)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_append(
        &self,
        file_id: &FileId,
        draft: &NewAppend,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> Result<AppendOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let file = require_file(&tx, file_id)?;

        let outcome = match replay(&tx, file_id, idempotency, now_unix)? {
            Replay::Conflict => AppendOutcome::IdempotencyConflict,
            Replay::Existing(id) => find_append(&tx, file_id, id)?
                .map_or(AppendOutcome::IdempotencyConflict, AppendOutcome::Replayed),
            Replay::Fresh => {
                let dangling = match draft.reference {
                    Some(r) => find_append(&tx, file_id, r)?.is_none(),
                    None => false,
                };
                if dangling {
                    AppendOutcome::ReferenceNotFound
                } else {
                    AppendOutcome::Created(push(&tx, &file, draft.clone(), idempotency, now_unix)?)
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn submit_claim(
        &self,
        file_id: &FileId,
        request: &ClaimRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let file = require_file(&tx, file_id)?;

        let outcome = match replay(&tx, file_id, idempotency, now_unix)? {
            Replay::Conflict => ClaimOutcome::IdempotencyConflict,
            Replay::Existing(id) => find_append(&tx, file_id, id)?
                .map_or(ClaimOutcome::IdempotencyConflict, ClaimOutcome::Replayed),
            Replay::Fresh => {
                let log = file_log(&tx, file_id)?;
                let held = match request.wip_limit {
                    Some(_) => Some(held_claims(&tx, &file.workspace_id, &request.draft.author, now_unix)?),
                    None => None,
                };
                match decide_claim_request(&log, request, held, now_unix) {
                    Ok(draft) => ClaimOutcome::Accepted(push(&tx, &file, draft, idempotency, now_unix)?),
                    Err(rejected) => rejected,
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn mutate_claim(
        &self,
        file_id: &FileId,
        claim_id: AppendId,
        request: &MutationRequest,
        idempotency: Option<&Idempotency>,
        now_unix: i64,
    ) -> Result<MutationOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let file = require_file(&tx, file_id)?;

        let outcome = match replay(&tx, file_id, idempotency, now_unix)? {
            Replay::Conflict => MutationOutcome::IdempotencyConflict,
            Replay::Existing(id) => replayed_mutation(&file_log(&tx, file_id)?, claim_id, id),
            Replay::Fresh => {
                let log = file_log(&tx, file_id)?;
                match decide_mutation(&log, claim_id, request, now_unix) {
                    Ok((draft, history)) => {
                        let append = push(&tx, &file, draft, idempotency, now_unix)?;
                        MutationOutcome::Applied {
                            history: history.with_followup(append.clone()),
                            append,
                        }
                    }
                    Err(rejected) => rejected,
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn get_append(&self, file_id: &FileId, append_id: AppendId) -> Result<Option<Append>> {
        let conn = self.lock()?;
        find_append(&conn, file_id, append_id)
    }

    fn list_appends(&self, file_id: &FileId) -> Result<Vec<Append>> {
        let conn = self.lock()?;
        file_log(&conn, file_id)
    }

    fn load_snapshot(&self, workspace_id: &WorkspaceId, folder: Option<&str>, now_unix: i64) -> Result<LogSnapshot> {
        let mut conn = self.lock()?;
        // One read transaction so the files, appends and heartbeats agree.
        let tx = conn.transaction()?;

        let (folder_exact, folder_like) = match folder {
            Some(dir) => (Some(dir.to_string()), Some(format!("{}/%", escape_like(dir)))),
            None => (None, None),
        };
        let files = {
            let mut stmt = tx.prepare(
                "SELECT id, workspace_id, path, created_at FROM files
                 WHERE workspace_id=?1 AND (?2 IS NULL OR path=?2 OR path LIKE ?3 ESCAPE '\\')
                 ORDER BY path",
            )?;
            let rows = stmt.query_map(params![workspace_id.as_str(), folder_exact, folder_like], rows::file)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut appends = vec![];
        for file in &files {
            appends.extend(file_log(&tx, &file.id)?);
        }

        let heartbeats = {
            let mut stmt = tx.prepare(
                "SELECT workspace_id, author, status, last_seen, current_task FROM heartbeats
                 WHERE workspace_id=?1 ORDER BY author",
            )?;
            let rows = stmt.query_map(params![workspace_id.as_str()], rows::heartbeat)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        Ok(LogSnapshot {
            now_unix,
            workspace_id: workspace_id.clone(),
            files,
            appends,
            heartbeats,
        })
    }

    fn insert_key(&self, key: &KeyRecord) -> Result<()> {
        let conn = self.lock()?;
        let allowed = key.allowed_types.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            &format!(
                "INSERT INTO keys({KEY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                key.id.as_str(),
                key.workspace_id.as_str(),
                key.key_hash,
                key.name,
                key.permission.as_str(),
                key.scope_type.as_str(),
                key.scope_path,
                key.bound_author,
                allowed,
                key.wip_limit,
                key.created_by.as_ref().map(KeyId::as_str),
                key.created_at_unix,
                key.expires_at_unix,
                key.revoked_at_unix,
                key.last_used_at_unix
            ],
        )?;
        Ok(())
    }

    fn lookup_key_by_hash(&self, key_hash: &str) -> Result<Option<KeyRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM keys WHERE key_hash=?1"),
                params![key_hash],
                rows::key,
            )
            .optional()?)
    }

    fn get_key(&self, id: &KeyId) -> Result<Option<KeyRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM keys WHERE id=?1"),
                params![id.as_str()],
                rows::key,
            )
            .optional()?)
    }

    fn revoke_key(&self, workspace_id: &WorkspaceId, id: &KeyId, now_unix: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE keys SET revoked_at=COALESCE(revoked_at, ?1) WHERE id=?2 AND workspace_id=?3",
            params![now_unix, id.as_str(), workspace_id.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn touch_key(&self, id: &KeyId, now_unix: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE keys SET last_used_at=?1 WHERE id=?2", params![now_unix, id.as_str()])?;
        Ok(())
    }

    fn list_keys(&self, workspace_id: &WorkspaceId) -> Result<Vec<KeyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM keys WHERE workspace_id=?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![workspace_id.as_str()], rows::key)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn upsert_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO heartbeats(workspace_id, author, status, last_seen, current_task)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workspace_id, author) DO UPDATE SET
               status=excluded.status, last_seen=excluded.last_seen, current_task=excluded.current_task",
            params![
                heartbeat.workspace_id.as_str(),
                heartbeat.author,
                heartbeat.status.as_str(),
                heartbeat.last_seen_unix,
                heartbeat.current_task
            ],
        )?;
        Ok(())
    }

    fn purge_idempotency(&self, now_unix: i64) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM idempotency WHERE expires_at <= ?1", params![now_unix])?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired idempotency records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdlog_core::{AppendType, ClaimMutation, ErrorCode, HeartbeatStatus, Permission, ScopeType};
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000;

    fn seeded(store: &SqliteStorage) -> (WorkspaceId, FileId) {
        let ws = Workspace {
            id: WorkspaceId::new(),
            name: "team".into(),
            created_at_unix: NOW,
            last_activity_unix: NOW,
        };
        store.create_workspace(&ws).unwrap();
        let file = FileRecord {
            id: FileId::new(),
            workspace_id: ws.id.clone(),
            path: "ops/board.md".into(),
            created_at_unix: NOW,
        };
        assert!(store.create_file(&file).unwrap());
        (ws.id, file.id)
    }

    fn task(store: &SqliteStorage, file: &FileId) -> Append {
        let mut draft = NewAppend::new(AppendType::Task, "lead").with_content(Some("ship it".into()));
        draft.labels = vec!["ops".into(), "urgent".into()];
        draft.priority = mdlog_core::Priority::High;
        match store.insert_append(file, &draft, None, NOW).unwrap() {
            AppendOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn claim(ws: &WorkspaceId, task_id: AppendId, author: &str, expires: i64) -> ClaimRequest {
        let mut draft = NewAppend::new(AppendType::Claim, author);
        draft.expires_at_unix = Some(expires);
        ClaimRequest {
            workspace_id: ws.clone(),
            task_id,
            draft,
            wip_limit: None,
        }
    }

    #[test]
    fn sqlite_open_and_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/mdlog.db");
        let _ = SqliteStorage::open(&db_path).unwrap();
        // Reopening re-applies the idempotent schema.
        let _ = SqliteStorage::open(&db_path).unwrap();
    }

    #[test]
    fn append_round_trips_every_column() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (_, file) = seeded(&store);
        let created = task(&store, &file);
        assert_eq!(created.append_id, 1);
        assert_eq!(store.get_append(&file, 1).unwrap(), Some(created));
    }

    #[test]
    fn claim_is_exclusive_until_expiry() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (ws, file) = seeded(&store);
        let t = task(&store, &file).append_id;

        let first = store.submit_claim(&file, &claim(&ws, t, "alice", NOW + 60), None, NOW).unwrap();
        assert!(matches!(first, ClaimOutcome::Accepted(ref c) if c.status.as_deref() == Some("active")));
        let second = store.submit_claim(&file, &claim(&ws, t, "bob", NOW + 60), None, NOW).unwrap();
        assert!(matches!(second, ClaimOutcome::AlreadyClaimed { .. }));
        let later = store.submit_claim(&file, &claim(&ws, t, "bob", NOW + 600), None, NOW + 60).unwrap();
        assert!(matches!(later, ClaimOutcome::Accepted(_)));
    }

    #[test]
    fn expired_claim_renews_then_completes() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (ws, file) = seeded(&store);
        let t = task(&store, &file).append_id;
        let ClaimOutcome::Accepted(c) = store.submit_claim(&file, &claim(&ws, t, "alice", NOW + 10), None, NOW).unwrap() else {
            panic!("claim refused");
        };

        let renew = MutationRequest {
            mutation: ClaimMutation::Renew { expires_at_unix: NOW + 500 },
            author: "alice".into(),
            content: None,
            admin_override: false,
        };
        let MutationOutcome::Applied { history, .. } =
            store.mutate_claim(&file, c.append_id, &renew, None, NOW + 100).unwrap()
        else {
            panic!("renew refused");
        };
        assert_eq!(history.state(NOW + 100), mdlog_core::ClaimState::Active);
        assert_eq!(history.expires_in_secs(NOW + 100), Some(400));

        let complete = MutationRequest {
            mutation: ClaimMutation::Complete,
            ..renew.clone()
        };
        assert!(matches!(
            store.mutate_claim(&file, c.append_id, &complete, None, NOW + 101).unwrap(),
            MutationOutcome::Applied { .. }
        ));
        for m in [renew, complete] {
            match store.mutate_claim(&file, c.append_id, &m, None, NOW + 102).unwrap() {
                MutationOutcome::Rejected(err) => assert_eq!(err.code, ErrorCode::InvalidRequest),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn folder_filter_treats_like_wildcards_literally() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (ws, _) = seeded(&store);
        for path in ["o_s/a.md", "opsx/b.md", "100%/c.md"] {
            store
                .create_file(&FileRecord {
                    id: FileId::new(),
                    workspace_id: ws.clone(),
                    path: path.into(),
                    created_at_unix: NOW,
                })
                .unwrap();
        }
        let paths = |folder: &str| -> Vec<String> {
            store
                .load_snapshot(&ws, Some(folder), NOW)
                .unwrap()
                .files
                .into_iter()
                .map(|f| f.path)
                .collect()
        };
        assert_eq!(paths("ops"), vec!["ops/board.md".to_string()]);
        assert_eq!(paths("o_s"), vec!["o_s/a.md".to_string()]);
        assert_eq!(paths("100%"), vec!["100%/c.md".to_string()]);
        assert!(paths("%").is_empty());
    }

    #[test]
    fn keys_persist_and_revoke() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (ws, _) = seeded(&store);
        let key = KeyRecord {
            id: KeyId::new(),
            workspace_id: ws.clone(),
            key_hash: "abc".into(),
            name: Some("ci".into()),
            permission: Permission::Append,
            scope_type: ScopeType::Folder,
            scope_path: Some("ops".into()),
            bound_author: Some("ci-bot".into()),
            allowed_types: Some(vec![AppendType::Claim, AppendType::Response]),
            wip_limit: Some(2),
            created_by: None,
            created_at_unix: NOW,
            expires_at_unix: Some(NOW + 3_600),
            revoked_at_unix: None,
            last_used_at_unix: None,
        };
        store.insert_key(&key).unwrap();
        assert_eq!(store.lookup_key_by_hash("abc").unwrap(), Some(key.clone()));

        store.touch_key(&key.id, NOW + 1).unwrap();
        assert!(store.revoke_key(&ws, &key.id, NOW + 2).unwrap());
        let stored = store.get_key(&key.id).unwrap().unwrap();
        assert_eq!(stored.last_used_at_unix, Some(NOW + 1));
        assert_eq!(stored.revoked_at_unix, Some(NOW + 2));
        assert_eq!(store.list_keys(&ws).unwrap().len(), 1);
    }

    #[test]
    fn heartbeat_upserts() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("mdlog.db")).unwrap();
        let (ws, _) = seeded(&store);
        for (status, seen) in [(HeartbeatStatus::Busy, NOW), (HeartbeatStatus::Idle, NOW + 30)] {
            store
                .upsert_heartbeat(&Heartbeat {
                    workspace_id: ws.clone(),
                    author: "alice".into(),
                    status,
                    last_seen_unix: seen,
                    current_task: Some("ops/board.md#1".into()),
                })
                .unwrap();
        }
        let hb = store.load_snapshot(&ws, None, NOW).unwrap().heartbeats;
        assert_eq!(hb.len(), 1);
        assert_eq!(hb[0].status, HeartbeatStatus::Idle);
        assert_eq!(hb[0].last_seen_unix, NOW + 30);
    }
}
