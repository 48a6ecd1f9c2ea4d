//! Row <-> record mapping.

use mdlog_core::{
    Append, AppendType, FileId, FileRecord, Heartbeat, HeartbeatStatus, KeyId, KeyRecord,
    Permission, Priority, ScopeType, StoredIdempotency, Workspace, WorkspaceId,
};
use rusqlite::types::Type;
use rusqlite::Row;

pub const APPEND_COLUMNS: &str =
    "file_id, append_id, ty, author, content, ref, status, expires_at, priority, labels_json, due_at, created_at";

pub const KEY_COLUMNS: &str = "id, workspace_id, key_hash, name, permission, scope_type, scope_path, bound_author, \
     allowed_types_json, wip_limit, created_by, created_at, expires_at, revoked_at, last_used_at";

fn parse_col<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unexpected value {raw:?}").into())
    })
}

fn json_col<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn workspace(r: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::from_str(r.get::<_, String>(0)?),
        name: r.get(1)?,
        created_at_unix: r.get(2)?,
        last_activity_unix: r.get(3)?,
    })
}

pub fn file(r: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: FileId::from_str(r.get::<_, String>(0)?),
        workspace_id: WorkspaceId::from_str(r.get::<_, String>(1)?),
        path: r.get(2)?,
        created_at_unix: r.get(3)?,
    })
}

pub fn append(r: &Row<'_>) -> rusqlite::Result<Append> {
    let labels: String = r.get(9)?;
    Ok(Append {
        file_id: FileId::from_str(r.get::<_, String>(0)?),
        append_id: r.get(1)?,
        ty: parse_col(2, r.get(2)?, AppendType::parse)?,
        author: r.get(3)?,
        content: r.get(4)?,
        reference: r.get(5)?,
        status: r.get(6)?,
        expires_at_unix: r.get(7)?,
        priority: parse_col(8, r.get(8)?, Priority::parse)?,
        labels: json_col(9, &labels)?,
        due_at_unix: r.get(10)?,
        created_at_unix: r.get(11)?,
    })
}

pub fn key(r: &Row<'_>) -> rusqlite::Result<KeyRecord> {
    let allowed: Option<String> = r.get(8)?;
    Ok(KeyRecord {
        id: KeyId::from_str(r.get::<_, String>(0)?),
        workspace_id: WorkspaceId::from_str(r.get::<_, String>(1)?),
        key_hash: r.get(2)?,
        name: r.get(3)?,
        permission: parse_col(4, r.get(4)?, Permission::parse)?,
        scope_type: parse_col(5, r.get(5)?, ScopeType::parse)?,
        scope_path: r.get(6)?,
        bound_author: r.get(7)?,
        allowed_types: allowed.as_deref().map(|raw| json_col(8, raw)).transpose()?,
        wip_limit: r.get(9)?,
        created_by: r.get::<_, Option<String>>(10)?.map(KeyId::from_str),
        created_at_unix: r.get(11)?,
        expires_at_unix: r.get(12)?,
        revoked_at_unix: r.get(13)?,
        last_used_at_unix: r.get(14)?,
    })
}

pub fn heartbeat(r: &Row<'_>) -> rusqlite::Result<Heartbeat> {
    Ok(Heartbeat {
        workspace_id: WorkspaceId::from_str(r.get::<_, String>(0)?),
        author: r.get(1)?,
        status: parse_col(2, r.get(2)?, HeartbeatStatus::parse)?,
        last_seen_unix: r.get(3)?,
        current_task: r.get(4)?,
    })
}

pub fn idempotency(r: &Row<'_>) -> rusqlite::Result<StoredIdempotency> {
    Ok(StoredIdempotency {
        key: r.get(0)?,
        author: r.get(1)?,
        fingerprint: r.get(2)?,
        append_id: r.get(3)?,
        expires_at_unix: r.get(4)?,
    })
}

/// Escape `%`, `_` and the escape char itself for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
