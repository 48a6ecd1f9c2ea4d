use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{ids::AppendId, model::*, types::NewAppend};

/// Default lifetime of an idempotency record.
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: i64 = 24 * 60 * 60;

const MAX_KEY_LEN: usize = 128;

/// Client-supplied dedup token, bound to the author and declared intent of the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Idempotency {
    pub key: String,
    pub author: String,
    pub fingerprint: String,
    pub expires_at_unix: i64,
}

impl Idempotency {
    pub fn for_append(key: &str, draft: &NewAppend, now_unix: i64, ttl_secs: i64) -> Self {
        Self {
            key: key.to_string(),
            author: draft.author.clone(),
            fingerprint: fingerprint(draft),
            expires_at_unix: now_unix + ttl_secs,
        }
    }

    /// Does a stored record describe the same request as this one?
    pub fn matches(&self, stored: &StoredIdempotency) -> bool {
        stored.author == self.author && stored.fingerprint == self.fingerprint
    }
}

/// Idempotency row as kept by a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredIdempotency {
    pub key: String,
    pub author: String,
    pub fingerprint: String,
    pub append_id: AppendId,
    pub expires_at_unix: i64,
}

pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.chars().all(|c| c.is_ascii_graphic())
}

#[derive(Serialize)]
struct Intent<'a> {
    ty: AppendType,
    content: Option<&'a str>,
    reference: Option<AppendId>,
    priority: Priority,
    labels: &'a [String],
    due_at_unix: Option<i64>,
}

/// Hash of type + content fields. Time-derived fields (lease deadline) are
/// left out so a retry minutes later still matches.
pub fn fingerprint(draft: &NewAppend) -> String {
    let intent = Intent {
        ty: draft.ty,
        content: draft.content.as_deref(),
        reference: draft.reference,
        priority: draft.priority,
        labels: &draft.labels,
        due_at_unix: draft.due_at_unix,
    };
    let bytes = serde_json::to_vec(&intent).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}
