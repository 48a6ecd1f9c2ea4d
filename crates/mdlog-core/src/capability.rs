//! Capability keys: token format, hash lookup, authorization and the
//! rules that keep a minted key from ever exceeding its parent.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::{Error, ErrorCode},
    ids::*,
    model::*,
    path::{is_sub_path, validate_file_path, validate_folder},
    types::KeyRecord,
};

pub const TOKEN_PREFIX: &str = "mdl_";
const TOKEN_SECRET_LEN: usize = 64;

/// Fresh bearer token: `mdl_` + 64 lowercase hex chars (256 random bits).
pub fn generate_token() -> String {
    format!(
        "{TOKEN_PREFIX}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

pub fn is_well_formed_token(token: &str) -> bool {
    token.strip_prefix(TOKEN_PREFIX).is_some_and(|secret| {
        secret.len() == TOKEN_SECRET_LEN
            && secret.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Pull a token from an `Authorization: Bearer ...` header, falling back to a
/// key embedded in the request URL.
pub fn token_from_request<'a>(authorization: Option<&'a str>, url_key: Option<&'a str>) -> Option<&'a str> {
    authorization
        .and_then(|h| {
            let h = h.trim();
            h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| url_key.map(str::trim).filter(|t| !t.is_empty()))
}

/// Who a validated key speaks for and what it may touch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key_id: KeyId,
    pub workspace_id: WorkspaceId,
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: Option<String>,
    pub bound_author: Option<String>,
    pub allowed_types: Option<Vec<AppendType>>,
    pub wip_limit: Option<u32>,
    pub expires_at_unix: Option<i64>,
}

impl Identity {
    pub fn from_record(key: &KeyRecord) -> Self {
        Self {
            key_id: key.id.clone(),
            workspace_id: key.workspace_id.clone(),
            permission: key.permission,
            scope_type: key.scope_type,
            scope_path: key.scope_path.clone(),
            bound_author: key.bound_author.clone(),
            allowed_types: key.allowed_types.clone(),
            wip_limit: key.wip_limit,
            expires_at_unix: key.expires_at_unix,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permission == Permission::Write
    }

    pub fn require(&self, min: Permission) -> Result<(), Error> {
        if self.permission < min {
            return Err(Error::permission_denied(format!(
                "{} permission required, key has {}",
                min.as_str(),
                self.permission.as_str()
            )));
        }
        Ok(())
    }

    pub fn covers_path(&self, path: &str) -> bool {
        match (self.scope_type, self.scope_path.as_deref()) {
            (ScopeType::Workspace, None) => true,
            (ScopeType::Workspace, Some(root)) | (ScopeType::Folder, Some(root)) => is_sub_path(root, path),
            (ScopeType::File, Some(file)) => file == path,
            (_, None) => false,
        }
    }

    pub fn check_author(&self, author: &str) -> Result<(), Error> {
        match &self.bound_author {
            Some(bound) if bound != author => Err(Error::new(
                ErrorCode::AuthorMismatch,
                format!("key is bound to author {bound}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_type(&self, ty: AppendType) -> Result<(), Error> {
        match &self.allowed_types {
            Some(allowed) if !allowed.contains(&ty) => Err(Error::permission_denied(format!(
                "key may not write {} appends",
                ty.as_str()
            ))),
            _ => Ok(()),
        }
    }
}

/// Resolve a bearer token to an identity.
///
/// Malformed and unknown tokens produce the same `INVALID_KEY`; `lookup`
/// is only consulted for well-formed tokens.
pub fn authorize<F>(token: &str, min: Option<Permission>, now_unix: i64, lookup: F) -> Result<Identity, Error>
where
    F: FnOnce(&str) -> anyhow::Result<Option<KeyRecord>>,
{
    let token = token.trim();
    if !is_well_formed_token(token) {
        return Err(Error::invalid_key());
    }
    let record = lookup(&hash_token(token))
        .map_err(Error::internal)?
        .ok_or_else(Error::invalid_key)?;

    if record.revoked_at_unix.is_some() {
        return Err(Error::new(ErrorCode::KeyRevoked, "key has been revoked"));
    }
    if record.expires_at_unix.is_some_and(|exp| exp <= now_unix) {
        return Err(Error::new(ErrorCode::KeyExpired, "key has expired"));
    }

    let identity = Identity::from_record(&record);
    if let Some(min) = min {
        identity.require(min)?;
    }
    Ok(identity)
}

/// Parameters for minting a key from an existing one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintKeyRequest {
    pub name: Option<String>,
    pub permission: Option<Permission>,
    pub scope_type: Option<ScopeType>,
    pub scope_path: Option<String>,
    pub bound_author: Option<String>,
    pub allowed_types: Option<Vec<AppendType>>,
    pub wip_limit: Option<u32>,
    pub expires_at_unix: Option<i64>,
}

/// Fully resolved scope of a key about to be minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedScope {
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: Option<String>,
    pub bound_author: Option<String>,
    pub allowed_types: Option<Vec<AppendType>>,
    pub wip_limit: Option<u32>,
    pub expires_at_unix: Option<i64>,
}

/// Check a mint request against its parent and fill in inherited fields.
/// No dimension of the child may be wider than the parent's.
pub fn resolve_mint(parent: &Identity, req: &MintKeyRequest, now_unix: i64) -> Result<ResolvedScope, Error> {
    let permission = req.permission.unwrap_or(parent.permission);
    if permission > parent.permission {
        return Err(Error::permission_denied(format!(
            "cannot mint a {} key from a {} key",
            permission.as_str(),
            parent.permission.as_str()
        )));
    }
    parent.require(Permission::Write)?;

    let scope_type = req.scope_type.unwrap_or(parent.scope_type);
    if scope_type < parent.scope_type {
        return Err(Error::permission_denied("scope type cannot be wider than the minting key's"));
    }

    let scope_path = match (scope_type, &req.scope_path) {
        (ScopeType::Workspace, Some(_)) => {
            return Err(Error::invalid_request("workspace-scoped keys take no scope path"));
        }
        (ScopeType::Workspace, None) => None,
        (ScopeType::Folder, Some(p)) => Some(validate_folder(p)?),
        (ScopeType::File, Some(p)) => Some(validate_file_path(p)?),
        (_, None) if parent.scope_type == scope_type => parent.scope_path.clone(),
        (_, None) => {
            return Err(Error::invalid_request(format!(
                "{} scope requires a scope path",
                scope_type.as_str()
            )));
        }
    };
    if let (Some(_), Some(child_path)) = (&parent.scope_path, &scope_path) {
        if !parent.covers_path(child_path) {
            return Err(Error::permission_denied("scope path must stay within the minting key's scope"));
        }
    }

    let bound_author = match (&parent.bound_author, &req.bound_author) {
        (Some(p), Some(c)) if p != c => {
            return Err(Error::permission_denied("bound author cannot be changed"));
        }
        (Some(p), _) => Some(p.clone()),
        (None, c) => c.clone(),
    };
    if let Some(author) = &bound_author {
        validate_author(author)?;
    }

    let allowed_types = match (&parent.allowed_types, &req.allowed_types) {
        (Some(p), Some(c)) => {
            if c.iter().any(|t| !p.contains(t)) {
                return Err(Error::permission_denied("allowed types must be a subset of the minting key's"));
            }
            Some(c.clone())
        }
        (Some(p), None) => Some(p.clone()),
        (None, c) => c.clone(),
    };

    let wip_limit = match (parent.wip_limit, req.wip_limit) {
        (Some(p), Some(c)) if c > p => {
            return Err(Error::permission_denied("wip limit cannot exceed the minting key's"));
        }
        (Some(p), None) => Some(p),
        (_, c) => c,
    };
    if wip_limit == Some(0) {
        return Err(Error::invalid_request("wip limit must be at least 1"));
    }

    if req.expires_at_unix.is_some_and(|e| e <= now_unix) {
        return Err(Error::invalid_request("expiry must be in the future"));
    }
    let expires_at_unix = match (parent.expires_at_unix, req.expires_at_unix) {
        (Some(p), Some(c)) if c > p => {
            return Err(Error::permission_denied("key cannot outlive the minting key"));
        }
        (Some(p), None) => Some(p),
        (_, c) => c,
    };

    Ok(ResolvedScope {
        permission,
        scope_type,
        scope_path,
        bound_author,
        allowed_types,
        wip_limit,
        expires_at_unix,
    })
}

const MAX_AUTHOR_LEN: usize = 64;

/// Agent names: 1-64 chars of `[A-Za-z0-9_.@-]`.
pub fn validate_author(author: &str) -> Result<(), Error> {
    let ok = !author.is_empty()
        && author.len() <= MAX_AUTHOR_LEN
        && author
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'));
    if !ok {
        return Err(Error::invalid_request(format!("invalid author {author:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, permission: Permission) -> KeyRecord {
        KeyRecord {
            id: KeyId::from_str("k1"),
            workspace_id: WorkspaceId::from_str("w1"),
            key_hash: hash_token(token),
            name: None,
            permission,
            scope_type: ScopeType::Workspace,
            scope_path: None,
            bound_author: None,
            allowed_types: None,
            wip_limit: None,
            created_by: None,
            created_at_unix: 0,
            expires_at_unix: None,
            revoked_at_unix: None,
            last_used_at_unix: None,
        }
    }

    fn lookup_one(rec: KeyRecord) -> impl FnOnce(&str) -> anyhow::Result<Option<KeyRecord>> {
        move |hash| Ok((hash == rec.key_hash).then_some(rec))
    }

    fn parent(permission: Permission) -> Identity {
        Identity::from_record(&record(&generate_token(), permission))
    }

    #[test]
    fn generated_tokens_are_well_formed_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert!(is_well_formed_token(&a));
        assert_ne!(a, b);
        assert!(!is_well_formed_token("mdl_short"));
        assert!(!is_well_formed_token(&a.to_uppercase()));
        assert!(!is_well_formed_token(&a.replacen("mdl_", "key_", 1)));
    }

    #[test]
    fn malformed_and_unknown_tokens_look_identical() {
        let malformed = authorize("garbage", None, 0, |_| Ok(None)).unwrap_err();
        let unknown = authorize(&generate_token(), None, 0, |_| Ok(None)).unwrap_err();
        assert_eq!(malformed, unknown);
        assert_eq!(malformed.code, ErrorCode::InvalidKey);
    }

    #[test]
    fn malformed_token_never_reaches_lookup() {
        let err = authorize("nope", None, 0, |_| panic!("lookup called")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
    }

    #[test]
    fn revoked_then_expired_then_permission() {
        let token = generate_token();
        let mut rec = record(&token, Permission::Append);
        rec.revoked_at_unix = Some(5);
        rec.expires_at_unix = Some(1);
        let err = authorize(&token, None, 10, lookup_one(rec.clone())).unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyRevoked);

        rec.revoked_at_unix = None;
        let err = authorize(&token, None, 10, lookup_one(rec.clone())).unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyExpired);

        rec.expires_at_unix = Some(100);
        let err = authorize(&token, Some(Permission::Write), 10, lookup_one(rec.clone())).unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);

        let id = authorize(&token, Some(Permission::Append), 10, lookup_one(rec)).unwrap();
        assert_eq!(id.permission, Permission::Append);
    }

    #[test]
    fn lookup_failure_is_internal() {
        let err = authorize(&generate_token(), None, 0, |_| Err(anyhow::anyhow!("db locked"))).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[test]
    fn bearer_header_wins_over_url_key() {
        assert_eq!(token_from_request(Some("Bearer abc"), Some("url")), Some("abc"));
        assert_eq!(token_from_request(Some("Basic zzz"), Some("url")), Some("url"));
        assert_eq!(token_from_request(None, Some("  ")), None);
    }

    #[test]
    fn escalation_is_rejected() {
        let req = MintKeyRequest {
            permission: Some(Permission::Write),
            ..Default::default()
        };
        for p in [Permission::Read, Permission::Append] {
            let err = resolve_mint(&parent(p), &req, 0).unwrap_err();
            assert_eq!(err.code, ErrorCode::PermissionDenied);
        }
        let req = MintKeyRequest {
            permission: Some(Permission::Append),
            ..Default::default()
        };
        assert_eq!(resolve_mint(&parent(Permission::Read), &req, 0).unwrap_err().code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn minting_needs_write() {
        let req = MintKeyRequest {
            permission: Some(Permission::Read),
            ..Default::default()
        };
        assert_eq!(resolve_mint(&parent(Permission::Append), &req, 0).unwrap_err().code, ErrorCode::PermissionDenied);
        assert_eq!(resolve_mint(&parent(Permission::Write), &req, 0).unwrap().permission, Permission::Read);
    }

    #[test]
    fn scope_path_cannot_widen() {
        let mut p = parent(Permission::Write);
        p.scope_type = ScopeType::Folder;
        p.scope_path = Some("projects/alpha".into());

        let inside = MintKeyRequest {
            scope_type: Some(ScopeType::File),
            scope_path: Some("projects/alpha/tasks.md".into()),
            ..Default::default()
        };
        let scope = resolve_mint(&p, &inside, 0).unwrap();
        assert_eq!(scope.scope_path.as_deref(), Some("projects/alpha/tasks.md"));

        let sibling = MintKeyRequest {
            scope_path: Some("projects/beta".into()),
            ..Default::default()
        };
        assert_eq!(resolve_mint(&p, &sibling, 0).unwrap_err().code, ErrorCode::PermissionDenied);

        let wider = MintKeyRequest {
            scope_type: Some(ScopeType::Workspace),
            ..Default::default()
        };
        assert_eq!(resolve_mint(&p, &wider, 0).unwrap_err().code, ErrorCode::PermissionDenied);

        let inherited = resolve_mint(&p, &MintKeyRequest::default(), 0).unwrap();
        assert_eq!(inherited.scope_path.as_deref(), Some("projects/alpha"));
    }

    #[test]
    fn file_scope_mints_only_its_own_file() {
        let mut p = parent(Permission::Write);
        p.scope_type = ScopeType::File;
        p.scope_path = Some("ops/a.md".into());

        let nested = MintKeyRequest {
            scope_path: Some("ops/a.md/other.md".into()),
            ..Default::default()
        };
        assert_eq!(resolve_mint(&p, &nested, 0).unwrap_err().code, ErrorCode::PermissionDenied);

        let same = MintKeyRequest {
            scope_path: Some("ops/a.md".into()),
            permission: Some(Permission::Read),
            ..Default::default()
        };
        let scope = resolve_mint(&p, &same, 0).unwrap();
        assert_eq!(scope.scope_type, ScopeType::File);
        assert_eq!(scope.scope_path.as_deref(), Some("ops/a.md"));

        let child = Identity {
            scope_type: scope.scope_type,
            scope_path: scope.scope_path.clone(),
            ..p.clone()
        };
        assert!(child.covers_path("ops/a.md"));
        assert!(!child.covers_path("ops/a.md/other.md"));
    }

    #[test]
    fn author_types_wip_and_expiry_cannot_widen() {
        let mut p = parent(Permission::Write);
        p.bound_author = Some("alice".into());
        p.allowed_types = Some(vec![AppendType::Claim, AppendType::Response]);
        p.wip_limit = Some(2);
        p.expires_at_unix = Some(1_000);

        let err = resolve_mint(&p, &MintKeyRequest { bound_author: Some("bob".into()), ..Default::default() }, 0);
        assert_eq!(err.unwrap_err().code, ErrorCode::PermissionDenied);

        let err = resolve_mint(&p, &MintKeyRequest { allowed_types: Some(vec![AppendType::Task]), ..Default::default() }, 0);
        assert_eq!(err.unwrap_err().code, ErrorCode::PermissionDenied);

        let err = resolve_mint(&p, &MintKeyRequest { wip_limit: Some(3), ..Default::default() }, 0);
        assert_eq!(err.unwrap_err().code, ErrorCode::PermissionDenied);

        let err = resolve_mint(&p, &MintKeyRequest { expires_at_unix: Some(2_000), ..Default::default() }, 0);
        assert_eq!(err.unwrap_err().code, ErrorCode::PermissionDenied);

        let child = resolve_mint(&p, &MintKeyRequest::default(), 0).unwrap();
        assert_eq!(child.bound_author.as_deref(), Some("alice"));
        assert_eq!(child.allowed_types, p.allowed_types);
        assert_eq!(child.wip_limit, Some(2));
        assert_eq!(child.expires_at_unix, Some(1_000));
    }

    #[test]
    fn identity_scope_checks() {
        let mut id = parent(Permission::Append);
        id.scope_type = ScopeType::Folder;
        id.scope_path = Some("ops".into());
        assert!(id.covers_path("ops/board.md"));
        assert!(!id.covers_path("ops2/board.md"));

        id.scope_type = ScopeType::File;
        id.scope_path = Some("ops/board.md".into());
        assert!(id.covers_path("ops/board.md"));
        assert!(!id.covers_path("ops/other.md"));

        id.bound_author = Some("alice".into());
        assert_eq!(id.check_author("bob").unwrap_err().code, ErrorCode::AuthorMismatch);
        assert!(id.check_author("alice").is_ok());

        id.allowed_types = Some(vec![AppendType::Comment]);
        assert_eq!(id.check_type(AppendType::Claim).unwrap_err().code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn author_names() {
        assert!(validate_author("agent-7.build@ci").is_ok());
        assert!(validate_author("").is_err());
        assert!(validate_author("robert'); DROP TABLE").is_err());
    }
}
