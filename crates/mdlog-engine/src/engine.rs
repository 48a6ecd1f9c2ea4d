use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use mdlog_core::capability::authorize as check_token;
use mdlog_core::{
    claim_histories, generate_token, hash_token, is_valid_key, project, resolve_mint,
    token_from_request, validate_author, validate_file_path, validate_folder, Append, AppendId,
    AppendOutcome, AppendType, Board, BoardFilters, ClaimHistory, ClaimMutation, ClaimOutcome,
    ClaimRequest, Clock, Error, ErrorCode, FileId, FileRecord, Heartbeat, HeartbeatStatus,
    Idempotency, Identity, KeyId, KeyRecord, KeySummary, MintKeyRequest, MutationOutcome,
    MutationRequest, NewAppend, Permission, Priority, ScopeType, SystemClock, Workspace,
    WorkspaceId,
};
use mdlog_storage::Storage;
use mdlog_storage_sqlite::SqliteStorage;

use crate::{
    config::Config,
    receipts::*,
    sinks::{AuditEntry, AuditSink, EventSink, LifecycleEvent, TracingSink},
};

const MAX_CONTENT_BYTES: usize = 64 * 1024;
const MAX_LABELS: usize = 32;
const MAX_LABEL_LEN: usize = 64;
const MAX_NAME_LEN: usize = 128;

/// Input for the generic append operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendRequest {
    pub ty: AppendType,
    pub author: String,
    pub content: Option<String>,
    /// Task id for claims, claim id for lifecycle appends, any append otherwise.
    pub reference: Option<AppendId>,
    pub priority: Option<Priority>,
    pub labels: Vec<String>,
    pub due_at_unix: Option<i64>,
    /// Lease length for claims and renewals.
    pub lease_seconds: Option<i64>,
    pub idempotency_key: Option<String>,
}

impl AppendRequest {
    pub fn new(ty: AppendType, author: impl Into<String>) -> Self {
        Self {
            ty,
            author: author.into(),
            content: None,
            reference: None,
            priority: None,
            labels: vec![],
            due_at_unix: None,
            lease_seconds: None,
            idempotency_key: None,
        }
    }
}

struct MutationInput<'a> {
    claim_id: AppendId,
    mutation: ClaimMutation,
    author: &'a str,
    content: Option<String>,
    idempotency_key: Option<&'a str>,
}

struct Mutated {
    append: Append,
    history: ClaimHistory,
    replayed: bool,
}

/// Request shell: authorizes, validates, calls the store, and reports
/// side effects. Holds no state of its own between calls.
pub struct Engine {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventSink>,
    cfg: Config,
}

fn store<T>(result: anyhow::Result<T>) -> Result<T, Error> {
    result.map_err(|err| {
        error!(error = ?err, "store operation failed");
        Error::internal(err)
    })
}

fn idempotency_conflict() -> Error {
    Error::invalid_request("idempotency key was already used for a different request")
}

fn validate_body(content: Option<&str>, labels: &[String]) -> Result<(), Error> {
    if content.is_some_and(|c| c.len() > MAX_CONTENT_BYTES) {
        return Err(Error::invalid_request(format!("content exceeds {MAX_CONTENT_BYTES} bytes")));
    }
    if labels.len() > MAX_LABELS {
        return Err(Error::invalid_request(format!("at most {MAX_LABELS} labels")));
    }
    if let Some(bad) = labels
        .iter()
        .find(|l| l.trim().is_empty() || l.len() > MAX_LABEL_LEN)
    {
        return Err(Error::invalid_request(format!("invalid label {bad:?}")));
    }
    Ok(())
}

fn validate_name(name: Option<&str>) -> Result<(), Error> {
    match name {
        Some(n) if n.trim().is_empty() || n.len() > MAX_NAME_LEN => {
            Err(Error::invalid_request(format!("name must be 1-{MAX_NAME_LEN} characters")))
        }
        _ => Ok(()),
    }
}

/// Does `identity` reach at least as far as `key`? Used for managing other keys.
fn covers_key(identity: &Identity, key: &KeyRecord) -> bool {
    if key.workspace_id != identity.workspace_id || key.scope_type < identity.scope_type {
        return false;
    }
    match (&identity.scope_path, &key.scope_path) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(_), Some(path)) => identity.covers_path(path),
    }
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, cfg: Config) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingSink),
            events: Arc::new(TracingSink),
            cfg,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Open the SQLite-backed engine for a project root, writing a default
    /// config on first use.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let cfg_path = Config::config_path(root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default();
            cfg.save_to(&cfg_path)?;
            cfg
        };
        let storage = SqliteStorage::open(&cfg.db_path(root))?;
        Ok(Self::new(Arc::new(storage), cfg))
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    fn audit(&self, workspace_id: &WorkspaceId, key_id: Option<&KeyId>, action: &str, target: String) {
        let entry = AuditEntry {
            workspace_id: workspace_id.clone(),
            key_id: key_id.cloned(),
            action: action.to_string(),
            target,
            at_unix: self.now(),
        };
        if let Err(err) = self.audit.log_action(&entry) {
            warn!(action, error = ?err, "audit sink failed");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Err(err) = self.events.dispatch(&event) {
            warn!(event = event.name(), error = ?err, "event sink failed");
        }
    }

    /// Best effort; runs off the request path and may be lost.
    fn touch_key(&self, key_id: KeyId, now_unix: i64) {
        let storage = Arc::clone(&self.storage);
        std::thread::spawn(move || {
            if let Err(err) = storage.touch_key(&key_id, now_unix) {
                warn!(key = %key_id, error = ?err, "could not record key use");
            }
        });
    }

    fn idempotency(&self, key: Option<&str>, intent: &NewAppend, now_unix: i64) -> Result<Option<Idempotency>, Error> {
        let Some(key) = key else {
            return Ok(None);
        };
        if !is_valid_key(key) {
            return Err(Error::invalid_request("idempotency key must be 1-128 printable characters"));
        }
        Ok(Some(Idempotency::for_append(
            key,
            intent,
            now_unix,
            self.cfg.idempotency.ttl_seconds,
        )))
    }

    // ----- capability keys -----

    /// Resolve a bearer token. The specific key-layer code is kept here;
    /// use [`Error::public`] before putting it on the wire.
    pub fn authorize(&self, token: &str, min: Option<Permission>) -> Result<Identity, Error> {
        let now = self.now();
        let result = check_token(token, min, now, |hash| self.storage.lookup_key_by_hash(hash));
        match &result {
            Ok(identity) => self.touch_key(identity.key_id.clone(), now),
            Err(err) if err.code == ErrorCode::Internal => error!("key lookup failed"),
            Err(err) => debug!(code = %err.code, "key rejected"),
        }
        result
    }

    /// Take the token from an `Authorization` header or, failing that, the URL.
    pub fn authorize_request(
        &self,
        authorization: Option<&str>,
        url_key: Option<&str>,
        min: Option<Permission>,
    ) -> Result<Identity, Error> {
        let token = token_from_request(authorization, url_key)
            .ok_or_else(|| Error::new(ErrorCode::Unauthorized, "missing key"))?;
        self.authorize(token, min)
    }

    /// Create a workspace and its root key. The returned token is the only
    /// copy of the secret.
    pub fn bootstrap_workspace(&self, name: &str) -> Result<Bootstrap, Error> {
        validate_name(Some(name))?;
        let now = self.now();
        let workspace = Workspace {
            id: WorkspaceId::new(),
            name: name.trim().to_string(),
            created_at_unix: now,
            last_activity_unix: now,
        };
        store(self.storage.create_workspace(&workspace))?;

        let token = generate_token();
        let key = KeyRecord {
            id: KeyId::new(),
            workspace_id: workspace.id.clone(),
            key_hash: hash_token(&token),
            name: Some("root".to_string()),
            permission: Permission::Write,
            scope_type: ScopeType::Workspace,
            scope_path: None,
            bound_author: None,
            allowed_types: None,
            wip_limit: None,
            created_by: None,
            created_at_unix: now,
            expires_at_unix: None,
            revoked_at_unix: None,
            last_used_at_unix: None,
        };
        store(self.storage.insert_key(&key))?;

        info!(workspace = %workspace.id, "workspace created");
        self.audit(&workspace.id, Some(&key.id), "workspace.create", workspace.name.clone());
        Ok(Bootstrap {
            workspace,
            root: MintedKey {
                key: KeySummary::from(&key),
                token,
            },
        })
    }

    /// Mint a key narrower than or equal to `identity`. Nothing is stored
    /// unless every scope check passes.
    pub fn mint_key(&self, identity: &Identity, request: &MintKeyRequest) -> Result<MintedKey, Error> {
        let now = self.now();
        validate_name(request.name.as_deref())?;
        let scope = resolve_mint(identity, request, now).inspect_err(|err| {
            debug!(code = %err.code, key = %identity.key_id, "mint refused");
        })?;

        let token = generate_token();
        let key = KeyRecord {
            id: KeyId::new(),
            workspace_id: identity.workspace_id.clone(),
            key_hash: hash_token(&token),
            name: request.name.clone(),
            permission: scope.permission,
            scope_type: scope.scope_type,
            scope_path: scope.scope_path,
            bound_author: scope.bound_author,
            allowed_types: scope.allowed_types,
            wip_limit: scope.wip_limit,
            created_by: Some(identity.key_id.clone()),
            created_at_unix: now,
            expires_at_unix: scope.expires_at_unix,
            revoked_at_unix: None,
            last_used_at_unix: None,
        };
        store(self.storage.insert_key(&key))?;

        info!(key = %key.id, parent = %identity.key_id, permission = key.permission.as_str(), "key minted");
        self.audit(&identity.workspace_id, Some(&identity.key_id), "key.mint", key.id.to_string());
        Ok(MintedKey {
            key: KeySummary::from(&key),
            token,
        })
    }

    pub fn revoke_key(&self, identity: &Identity, key_id: &KeyId) -> Result<KeySummary, Error> {
        identity.require(Permission::Write)?;
        let target = store(self.storage.get_key(key_id))?
            .filter(|k| k.workspace_id == identity.workspace_id)
            .ok_or_else(|| Error::invalid_request(format!("unknown key {key_id}")))?;
        if !covers_key(identity, &target) {
            return Err(Error::permission_denied("key is outside this key's scope"));
        }

        store(self.storage.revoke_key(&identity.workspace_id, key_id, self.now()))?;
        let revoked = store(self.storage.get_key(key_id))?.unwrap_or(target);

        info!(key = %key_id, by = %identity.key_id, "key revoked");
        self.audit(&identity.workspace_id, Some(&identity.key_id), "key.revoke", key_id.to_string());
        Ok(KeySummary::from(&revoked))
    }

    pub fn list_keys(&self, identity: &Identity) -> Result<Vec<KeySummary>, Error> {
        identity.require(Permission::Write)?;
        let keys = store(self.storage.list_keys(&identity.workspace_id))?;
        Ok(keys
            .iter()
            .filter(|k| covers_key(identity, k))
            .map(KeySummary::from)
            .collect())
    }

    // ----- files -----

    pub fn create_file(&self, identity: &Identity, path: &str) -> Result<FileRecord, Error> {
        identity.require(Permission::Write)?;
        let path = validate_file_path(path)?;
        if !identity.covers_path(&path) {
            return Err(Error::permission_denied("path is outside this key's scope"));
        }
        let file = FileRecord {
            id: FileId::new(),
            workspace_id: identity.workspace_id.clone(),
            path,
            created_at_unix: self.now(),
        };
        if !store(self.storage.create_file(&file))? {
            return Err(Error::invalid_request("file already exists").with_details(json!({ "path": file.path })));
        }
        info!(file = %file.id, path = %file.path, "file created");
        self.audit(&identity.workspace_id, Some(&identity.key_id), "file.create", file.path.clone());
        Ok(file)
    }

    /// Files outside the key's scope are reported exactly like missing ones.
    pub fn resolve_file(&self, identity: &Identity, file: &FileRef) -> Result<FileRecord, Error> {
        let found = match file {
            FileRef::Id(id) => store(self.storage.get_file(id))?,
            FileRef::Path(path) => {
                let path = validate_file_path(path)?;
                store(self.storage.find_file_by_path(&identity.workspace_id, &path))?
            }
        };
        found
            .filter(|f| f.workspace_id == identity.workspace_id && identity.covers_path(&f.path))
            .ok_or_else(Error::file_not_found)
    }

    pub fn list_files(&self, identity: &Identity) -> Result<Vec<FileRecord>, Error> {
        identity.require(Permission::Read)?;
        let files = store(self.storage.list_files(&identity.workspace_id))?;
        Ok(files.into_iter().filter(|f| identity.covers_path(&f.path)).collect())
    }

    // ----- appends -----

    /// Generic append. Claims go through the race resolver, lifecycle types
    /// through their mutation handler, everything else straight to the sequencer.
    pub fn append(&self, identity: &Identity, file: &FileRef, request: AppendRequest) -> Result<AppendView, Error> {
        identity.require(Permission::Append)?;
        validate_author(&request.author)?;
        identity.check_author(&request.author)?;
        identity.check_type(request.ty)?;
        validate_body(request.content.as_deref(), &request.labels)?;
        let file = self.resolve_file(identity, file)?;

        let target = || {
            request
                .reference
                .ok_or_else(|| Error::invalid_request(format!("{} append requires ref", request.ty.as_str())))
        };
        let mutation = match request.ty {
            AppendType::Claim => {
                let (append, replayed) = self.claim_in(identity, &file, target()?, &request)?;
                return Ok(AppendView::new(append, replayed));
            }
            AppendType::Task | AppendType::Comment | AppendType::Vote => {
                return self.sequence(identity, &file, request);
            }
            AppendType::Renew => ClaimMutation::Renew {
                expires_at_unix: self.cfg.leases.deadline(self.now(), request.lease_seconds)?,
            },
            AppendType::Response => ClaimMutation::Complete,
            AppendType::Cancel => ClaimMutation::Cancel,
            AppendType::Block => ClaimMutation::Block,
        };
        let done = self.mutate_in(
            identity,
            &file,
            MutationInput {
                claim_id: target()?,
                mutation,
                author: &request.author,
                content: request.content.clone(),
                idempotency_key: request.idempotency_key.as_deref(),
            },
        )?;
        Ok(AppendView::new(done.append, done.replayed))
    }

    fn sequence(&self, identity: &Identity, file: &FileRecord, request: AppendRequest) -> Result<AppendView, Error> {
        let now = self.now();
        let draft = NewAppend {
            ty: request.ty,
            author: request.author,
            content: request.content,
            reference: request.reference,
            status: None,
            expires_at_unix: None,
            priority: request.priority.unwrap_or_default(),
            labels: request.labels,
            due_at_unix: request.due_at_unix,
        };
        let idem = self.idempotency(request.idempotency_key.as_deref(), &draft, now)?;

        match store(self.storage.insert_append(&file.id, &draft, idem.as_ref(), now))? {
            AppendOutcome::Created(append) => {
                info!(file = %file.id, id = append.append_id, ty = append.ty.as_str(), "append created");
                if append.ty == AppendType::Task {
                    self.emit(LifecycleEvent::TaskCreated {
                        workspace_id: identity.workspace_id.clone(),
                        file_id: file.id.clone(),
                        task_id: append.append_id,
                        author: append.author.clone(),
                    });
                }
                self.audit(
                    &identity.workspace_id,
                    Some(&identity.key_id),
                    &format!("append.{}", append.ty.as_str()),
                    format!("{}#{}", file.path, append.append_id),
                );
                Ok(AppendView::new(append, false))
            }
            AppendOutcome::Replayed(append) => Ok(AppendView::new(append, true)),
            AppendOutcome::ReferenceNotFound => Err(Error::append_not_found(draft.reference.unwrap_or_default())),
            AppendOutcome::IdempotencyConflict => Err(idempotency_conflict()),
        }
    }

    // ----- claims -----

    fn claim_in(
        &self,
        identity: &Identity,
        file: &FileRecord,
        task_id: AppendId,
        request: &AppendRequest,
    ) -> Result<(Append, bool), Error> {
        let now = self.now();
        let mut draft = NewAppend::new(AppendType::Claim, request.author.clone())
            .with_reference(task_id)
            .with_content(request.content.clone());
        draft.expires_at_unix = Some(self.cfg.leases.deadline(now, request.lease_seconds)?);
        let idem = self.idempotency(request.idempotency_key.as_deref(), &draft, now)?;
        let claim = ClaimRequest {
            workspace_id: identity.workspace_id.clone(),
            task_id,
            draft,
            wip_limit: identity.wip_limit,
        };

        match store(self.storage.submit_claim(&file.id, &claim, idem.as_ref(), now))? {
            ClaimOutcome::Accepted(append) => {
                info!(file = %file.id, task = task_id, claim = append.append_id, author = %append.author, "claim accepted");
                self.emit(LifecycleEvent::ClaimAccepted {
                    workspace_id: identity.workspace_id.clone(),
                    file_id: file.id.clone(),
                    task_id,
                    claim_id: append.append_id,
                    author: append.author.clone(),
                    expires_at: append.expires_at_unix,
                });
                self.audit(
                    &identity.workspace_id,
                    Some(&identity.key_id),
                    "claim.accept",
                    format!("{}#{}", file.path, append.append_id),
                );
                Ok((append, false))
            }
            ClaimOutcome::Replayed(append) => Ok((append, true)),
            ClaimOutcome::AlreadyClaimed { holder } => {
                debug!(file = %file.id, task = task_id, holder = %holder.author, "claim lost race");
                Err(Error::new(
                    ErrorCode::AlreadyClaimed,
                    format!("task {task_id} is already claimed by {}", holder.author),
                )
                .with_details(json!({
                    "taskId": task_id,
                    "claimId": holder.append_id,
                    "claimedBy": holder.author,
                })))
            }
            ClaimOutcome::TaskNotFound => Err(Error::append_not_found(task_id)),
            ClaimOutcome::TaskCompleted => Err(Error::invalid_request(format!("task {task_id} is already completed"))
                .with_details(json!({ "taskId": task_id, "status": "completed" }))),
            ClaimOutcome::WipLimitExceeded { held } => Err(Error::new(
                ErrorCode::WipLimitExceeded,
                format!("{} already holds {held} active claims", request.author),
            )
            .with_details(json!({ "held": held, "limit": identity.wip_limit }))),
            ClaimOutcome::IdempotencyConflict => Err(idempotency_conflict()),
        }
    }

    /// Claim `task_id` for `author` with a lease of `lease_seconds` (config default if `None`).
    pub fn submit_claim(
        &self,
        identity: &Identity,
        file: &FileRef,
        task_id: AppendId,
        author: &str,
        lease_seconds: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<ClaimReceipt, Error> {
        let request = AppendRequest {
            reference: Some(task_id),
            lease_seconds,
            idempotency_key: idempotency_key.map(str::to_string),
            ..AppendRequest::new(AppendType::Claim, author)
        };
        identity.require(Permission::Append)?;
        validate_author(author)?;
        identity.check_author(author)?;
        identity.check_type(AppendType::Claim)?;
        let file = self.resolve_file(identity, file)?;

        let (append, replayed) = self.claim_in(identity, &file, task_id, &request)?;
        let now = self.now();
        let history = if replayed {
            let log = store(self.storage.list_appends(&file.id))?;
            claim_histories(&log)
                .remove(&append.append_id)
                .unwrap_or_else(|| ClaimHistory::new(append.clone()))
        } else {
            ClaimHistory::new(append.clone())
        };
        Ok(ClaimReceipt::new(&history, append.append_id, now))
    }

    fn mutate_in(&self, identity: &Identity, file: &FileRecord, input: MutationInput<'_>) -> Result<Mutated, Error> {
        let ty = match input.mutation {
            ClaimMutation::Renew { .. } => AppendType::Renew,
            ClaimMutation::Complete => AppendType::Response,
            ClaimMutation::Cancel => AppendType::Cancel,
            ClaimMutation::Block => AppendType::Block,
        };
        identity.require(Permission::Append)?;
        validate_author(input.author)?;
        identity.check_author(input.author)?;
        identity.check_type(ty)?;
        validate_body(input.content.as_deref(), &[])?;

        let now = self.now();
        let intent = NewAppend::new(ty, input.author)
            .with_reference(input.claim_id)
            .with_content(input.content.clone());
        let idem = self.idempotency(input.idempotency_key, &intent, now)?;
        let verb = input.mutation.name();
        let request = MutationRequest {
            mutation: input.mutation,
            author: input.author.to_string(),
            content: input.content,
            admin_override: identity.is_admin(),
        };

        match store(self.storage.mutate_claim(&file.id, input.claim_id, &request, idem.as_ref(), now))? {
            MutationOutcome::Applied { append, history } => {
                info!(file = %file.id, claim = input.claim_id, id = append.append_id, verb, "claim updated");
                self.emit(self.lifecycle_event(identity, file, &append));
                self.audit(
                    &identity.workspace_id,
                    Some(&identity.key_id),
                    &format!("claim.{verb}"),
                    format!("{}#{}", file.path, input.claim_id),
                );
                Ok(Mutated {
                    append,
                    history,
                    replayed: false,
                })
            }
            MutationOutcome::Replayed { append, history } => Ok(Mutated {
                append,
                history,
                replayed: true,
            }),
            MutationOutcome::ClaimNotFound => Err(Error::append_not_found(input.claim_id)),
            MutationOutcome::Rejected(err) => {
                debug!(file = %file.id, claim = input.claim_id, verb, code = %err.code, "claim update refused");
                Err(err)
            }
            MutationOutcome::IdempotencyConflict => Err(idempotency_conflict()),
        }
    }

    fn lifecycle_event(&self, identity: &Identity, file: &FileRecord, append: &Append) -> LifecycleEvent {
        let workspace_id = identity.workspace_id.clone();
        let file_id = file.id.clone();
        let claim_id = append.reference.unwrap_or_default();
        let author = append.author.clone();
        match append.ty {
            AppendType::Renew => LifecycleEvent::ClaimRenewed {
                workspace_id,
                file_id,
                claim_id,
                author,
                expires_at: append.expires_at_unix,
            },
            AppendType::Block => LifecycleEvent::ClaimBlocked {
                workspace_id,
                file_id,
                claim_id,
                author,
                reason: append.content.clone(),
            },
            AppendType::Cancel => LifecycleEvent::ClaimCancelled {
                workspace_id,
                file_id,
                claim_id,
                author,
            },
            _ => LifecycleEvent::ClaimCompleted {
                workspace_id,
                file_id,
                claim_id,
                author,
            },
        }
    }

    fn mutate(
        &self,
        identity: &Identity,
        file: &FileRef,
        input: MutationInput<'_>,
    ) -> Result<ClaimReceipt, Error> {
        identity.require(Permission::Append)?;
        let file = self.resolve_file(identity, file)?;
        let done = self.mutate_in(identity, &file, input)?;
        Ok(ClaimReceipt::new(&done.history, done.append.append_id, self.now()))
    }

    /// Extend the lease. Works on an expired claim as long as nothing
    /// resolved it and no newer claim took the task.
    pub fn renew_claim(
        &self,
        identity: &Identity,
        file: &FileRef,
        claim_id: AppendId,
        author: &str,
        lease_seconds: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<ClaimReceipt, Error> {
        let expires_at_unix = self.cfg.leases.deadline(self.now(), lease_seconds)?;
        self.mutate(
            identity,
            file,
            MutationInput {
                claim_id,
                mutation: ClaimMutation::Renew { expires_at_unix },
                author,
                content: None,
                idempotency_key,
            },
        )
    }

    pub fn complete_claim(
        &self,
        identity: &Identity,
        file: &FileRef,
        claim_id: AppendId,
        author: &str,
        content: Option<String>,
        idempotency_key: Option<&str>,
    ) -> Result<ClaimReceipt, Error> {
        self.mutate(
            identity,
            file,
            MutationInput {
                claim_id,
                mutation: ClaimMutation::Complete,
                author,
                content,
                idempotency_key,
            },
        )
    }

    pub fn cancel_claim(
        &self,
        identity: &Identity,
        file: &FileRef,
        claim_id: AppendId,
        author: &str,
        reason: Option<String>,
        idempotency_key: Option<&str>,
    ) -> Result<ClaimReceipt, Error> {
        self.mutate(
            identity,
            file,
            MutationInput {
                claim_id,
                mutation: ClaimMutation::Cancel,
                author,
                content: reason,
                idempotency_key,
            },
        )
    }

    pub fn block_claim(
        &self,
        identity: &Identity,
        file: &FileRef,
        claim_id: AppendId,
        author: &str,
        reason: String,
        idempotency_key: Option<&str>,
    ) -> Result<ClaimReceipt, Error> {
        self.mutate(
            identity,
            file,
            MutationInput {
                claim_id,
                mutation: ClaimMutation::Block,
                author,
                content: Some(reason),
                idempotency_key,
            },
        )
    }

    // ----- reads and upkeep -----

    /// Live board for the key's scope, recomputed from the log.
    pub fn query_board(&self, identity: &Identity, filters: &BoardFilters) -> Result<Board, Error> {
        identity.require(Permission::Read)?;
        let now = self.now();
        let folder = filters
            .folder
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(validate_folder)
            .transpose()?;
        let mut snapshot = store(self.storage.load_snapshot(&identity.workspace_id, folder.as_deref(), now))?;
        snapshot.retain_files(|f| identity.covers_path(&f.path));
        if identity.scope_path.is_some() {
            snapshot.retain_claimant_heartbeats();
        }
        project(&snapshot, filters, identity.is_admin(), &self.cfg.board.options())
    }

    pub fn heartbeat(
        &self,
        identity: &Identity,
        author: &str,
        status: HeartbeatStatus,
        current_task: Option<String>,
    ) -> Result<Heartbeat, Error> {
        identity.require(Permission::Append)?;
        validate_author(author)?;
        identity.check_author(author)?;
        validate_body(current_task.as_deref(), &[])?;
        let heartbeat = Heartbeat {
            workspace_id: identity.workspace_id.clone(),
            author: author.to_string(),
            status,
            last_seen_unix: self.now(),
            current_task,
        };
        store(self.storage.upsert_heartbeat(&heartbeat))?;
        debug!(author, status = status.as_str(), "heartbeat");
        Ok(heartbeat)
    }

    /// Drop expired idempotency records.
    pub fn purge_idempotency(&self, identity: &Identity) -> Result<usize, Error> {
        identity.require(Permission::Write)?;
        let removed = store(self.storage.purge_idempotency(self.now()))?;
        info!(removed, "idempotency records purged");
        Ok(removed)
    }
}
