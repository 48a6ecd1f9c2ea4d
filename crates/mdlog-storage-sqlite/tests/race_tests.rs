//! Concurrency properties with one connection per thread on a shared file,
//! the way separate processes would hit the same database.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use mdlog_core::{
    AppendOutcome, AppendType, ClaimOutcome, ClaimRequest, FileId, FileRecord, Idempotency,
    NewAppend, Workspace, WorkspaceId,
};
use mdlog_storage::Storage;
use mdlog_storage_sqlite::SqliteStorage;
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000;
const WORKERS: usize = 8;

fn seed(db: &Path) -> (WorkspaceId, FileId) {
    let store = SqliteStorage::open(db).unwrap();
    let ws = Workspace {
        id: WorkspaceId::new(),
        name: "race".into(),
        created_at_unix: NOW,
        last_activity_unix: NOW,
    };
    store.create_workspace(&ws).unwrap();
    let file = FileRecord {
        id: FileId::new(),
        workspace_id: ws.id.clone(),
        path: "board.md".into(),
        created_at_unix: NOW,
    };
    store.create_file(&file).unwrap();
    (ws.id, file.id)
}

fn run_workers<T, F>(db: &Path, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, &SqliteStorage) -> T + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let db: PathBuf = db.to_path_buf();
            let work = Arc::clone(&work);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = SqliteStorage::open(&db).unwrap();
                barrier.wait();
                work(i, &store)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn exactly_one_claim_wins_across_connections() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("mdlog.db");
    let (ws, file) = seed(&db);
    let task = {
        let store = SqliteStorage::open(&db).unwrap();
        match store
            .insert_append(&file, &NewAppend::new(AppendType::Task, "lead"), None, NOW)
            .unwrap()
        {
            AppendOutcome::Created(a) => a.append_id,
            other => panic!("unexpected {other:?}"),
        }
    };

    let outcomes = run_workers(&db, move |i, store| {
        let mut draft = NewAppend::new(AppendType::Claim, format!("agent-{i}"));
        draft.expires_at_unix = Some(NOW + 900);
        let request = ClaimRequest {
            workspace_id: ws.clone(),
            task_id: task,
            draft,
            wip_limit: None,
        };
        store.submit_claim(&file, &request, None, NOW).unwrap()
    });

    let accepted = outcomes.iter().filter(|o| matches!(o, ClaimOutcome::Accepted(_))).count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::AlreadyClaimed { .. }))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(rejected, WORKERS - 1);
}

#[test]
fn concurrent_appends_form_a_permutation() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("mdlog.db");
    let (_, file) = seed(&db);

    let reader = file.clone();
    let ids = run_workers(&db, move |i, store| {
        let draft = NewAppend::new(AppendType::Comment, format!("agent-{i}"));
        match store.insert_append(&file, &draft, None, NOW).unwrap() {
            AppendOutcome::Created(a) => a.append_id,
            other => panic!("unexpected {other:?}"),
        }
    });

    let ids: BTreeSet<i64> = ids.into_iter().collect();
    assert_eq!(ids, (1..=WORKERS as i64).collect());
    let store = SqliteStorage::open(&db).unwrap();
    let log: Vec<i64> = store.list_appends(&reader).unwrap().iter().map(|a| a.append_id).collect();
    assert_eq!(log, (1..=WORKERS as i64).collect::<Vec<_>>());
}

#[test]
fn concurrent_retries_share_one_append() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("mdlog.db");
    let (_, file) = seed(&db);
    let draft = NewAppend::new(AppendType::Task, "lead").with_content(Some("triage inbox".into()));
    let idem = Idempotency::for_append("retry-42", &draft, NOW, 86_400);

    let reader = file.clone();
    let ids = run_workers(&db, move |_, store| {
        match store.insert_append(&file, &draft, Some(&idem), NOW).unwrap() {
            AppendOutcome::Created(a) | AppendOutcome::Replayed(a) => a.append_id,
            other => panic!("unexpected {other:?}"),
        }
    });

    assert_eq!(ids.into_iter().collect::<BTreeSet<_>>().len(), 1);
    let store = SqliteStorage::open(&db).unwrap();
    assert_eq!(store.list_appends(&reader).unwrap().len(), 1);
}
