use mdlog_core::{
    authorize, claim_histories, current_claim, decide_claim, derive_task_status, generate_token,
    hash_token, plan_mutation, project, resolve_mint, Append, AppendType, BoardFilters,
    BoardOptions, ClaimDecision, ClaimMutation, ErrorCode, FileId, FileRecord, Identity, KeyId,
    KeyRecord, LogSnapshot, MintKeyRequest, MutationRequest, NewAppend, Permission, ScopeType,
    TaskStatus, WorkspaceId,
};

const NOW: i64 = 1_750_000_000;

fn file() -> FileId {
    FileId::from_str("f1")
}

fn append(id: i64, draft: NewAppend) -> Append {
    draft.into_append(file(), id, NOW - 100 + id)
}

fn claim_draft(task: i64, author: &str, expires: i64) -> NewAppend {
    let mut d = NewAppend::new(AppendType::Claim, author).with_reference(task);
    d.expires_at_unix = Some(expires);
    d
}

fn admin_key(token: &str) -> KeyRecord {
    KeyRecord {
        id: KeyId::new(),
        workspace_id: WorkspaceId::from_str("w1"),
        key_hash: hash_token(token),
        name: Some("root".into()),
        permission: Permission::Write,
        scope_type: ScopeType::Workspace,
        scope_path: None,
        bound_author: None,
        allowed_types: None,
        wip_limit: None,
        created_by: None,
        created_at_unix: NOW - 1_000,
        expires_at_unix: None,
        revoked_at_unix: None,
        last_used_at_unix: None,
    }
}

#[test]
fn test_full_claim_lifecycle_through_pure_core() {
    let mut log = vec![append(1, NewAppend::new(AppendType::Task, "lead"))];
    assert_eq!(decide_claim(&log, 1, NOW), ClaimDecision::Accept);
    log.push(append(2, claim_draft(1, "alice", NOW + 900)));

    let decision = decide_claim(&log, 1, NOW);
    assert!(matches!(decision, ClaimDecision::AlreadyClaimed { holder } if holder.author == "alice"));

    let histories = claim_histories(&log);
    let done = plan_mutation(
        &histories[&2],
        &MutationRequest {
            mutation: ClaimMutation::Complete,
            author: "alice".into(),
            content: Some("shipped".into()),
            admin_override: false,
        },
        NOW,
    )
    .unwrap();
    assert_eq!(done.ty, AppendType::Response);
    log.push(append(3, done));

    let histories = claim_histories(&log);
    assert_eq!(derive_task_status(current_claim(&histories, 1), NOW), TaskStatus::Completed);
    assert_eq!(decide_claim(&log, 1, NOW), ClaimDecision::TaskCompleted);
}

#[test]
fn test_stalled_task_is_reclaimable_and_old_claim_loses_renewal() {
    let mut log = vec![
        append(1, NewAppend::new(AppendType::Task, "lead")),
        append(2, claim_draft(1, "alice", NOW - 1)),
    ];
    let h = claim_histories(&log);
    assert_eq!(derive_task_status(current_claim(&h, 1), NOW), TaskStatus::Stalled);
    assert_eq!(decide_claim(&log, 1, NOW), ClaimDecision::Accept);

    log.push(append(3, claim_draft(1, "bob", NOW + 600)));
    let h = claim_histories(&log);
    let err = plan_mutation(
        &h[&2],
        &MutationRequest {
            mutation: ClaimMutation::Renew { expires_at_unix: NOW + 900 },
            author: "alice".into(),
            content: None,
            admin_override: false,
        },
        NOW,
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyClaimed);
    assert_eq!(err.details.unwrap()["supersededBy"], 3);
}

#[test]
fn test_minted_key_authorizes_within_narrowed_scope() {
    let root_token = generate_token();
    let root = authorize(&root_token, Some(Permission::Write), NOW, |hash| {
        Ok(Some(admin_key(&root_token)).filter(|k| k.key_hash == hash))
    })
    .unwrap();

    let scope = resolve_mint(
        &root,
        &MintKeyRequest {
            permission: Some(Permission::Append),
            scope_type: Some(ScopeType::Folder),
            scope_path: Some("ops".into()),
            bound_author: Some("alice".into()),
            ..Default::default()
        },
        NOW,
    )
    .unwrap();

    let child = Identity {
        key_id: KeyId::new(),
        workspace_id: root.workspace_id.clone(),
        permission: scope.permission,
        scope_type: scope.scope_type,
        scope_path: scope.scope_path.clone(),
        bound_author: scope.bound_author.clone(),
        allowed_types: scope.allowed_types.clone(),
        wip_limit: scope.wip_limit,
        expires_at_unix: scope.expires_at_unix,
    };
    assert!(child.covers_path("ops/board.md"));
    assert!(!child.covers_path("opsx/board.md"));
    assert_eq!(child.check_author("bob").unwrap_err().code, ErrorCode::AuthorMismatch);

    let escalate = resolve_mint(
        &child,
        &MintKeyRequest {
            permission: Some(Permission::Write),
            ..Default::default()
        },
        NOW,
    )
    .unwrap_err();
    assert_eq!(escalate.code, ErrorCode::PermissionDenied);
}

#[test]
fn test_unknown_token_and_garbage_token_look_the_same() {
    let unknown = authorize(&generate_token(), None, NOW, |_| Ok(None)).unwrap_err();
    let garbage = authorize("not-a-key", None, NOW, |_| Ok(None)).unwrap_err();
    assert_eq!(unknown.body(), garbage.body());
}

#[test]
fn test_board_projection_matches_log() {
    let mut appends = vec![
        append(1, NewAppend::new(AppendType::Task, "lead")),
        append(2, NewAppend::new(AppendType::Task, "lead")),
        append(3, claim_draft(1, "alice", NOW + 300)),
    ];
    appends.push(append(4, NewAppend::new(AppendType::Comment, "bob").with_reference(1)));
    let snapshot = LogSnapshot {
        now_unix: NOW,
        workspace_id: WorkspaceId::from_str("w1"),
        files: vec![FileRecord {
            id: file(),
            workspace_id: WorkspaceId::from_str("w1"),
            path: "ops/board.md".into(),
            created_at_unix: NOW - 500,
        }],
        appends,
        heartbeats: vec![],
    };

    let board = project(&snapshot, &BoardFilters::default(), false, &BoardOptions::default()).unwrap();
    assert_eq!(board.summary.total, 2);
    assert_eq!(board.summary.claimed, 1);
    assert_eq!(board.summary.pending, 1);
    assert_eq!(board.tasks[0].claimed_by.as_deref(), Some("alice"));
    assert_eq!(board.tasks[0].expires_in_seconds, Some(300));
    assert_eq!(board.claims.len(), 1);
    assert_eq!(board.workload["alice"].active_claims, 1);

    let json = serde_json::to_value(&board).unwrap();
    assert_eq!(json["tasks"][0]["claimedBy"], "alice");
    assert!(json["tasks"][1].get("claimedBy").is_none());
    assert_eq!(json["pagination"]["hasMore"], false);
}
