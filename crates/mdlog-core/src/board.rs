//! Board projector: folds a workspace snapshot into tasks, live claims,
//! agent liveness and workload. Recomputed from the log on every call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    clock::start_of_day_unix,
    error::Error,
    ids::*,
    lease::{claim_histories, current_claim, derive_task_status, ClaimHistory},
    model::*,
    path::{is_sub_path, validate_folder},
    snapshot::LogSnapshot,
    types::*,
};

pub const DEFAULT_STALE_AFTER_SECS: i64 = 5 * 60;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFilters {
    /// Comma-separated task statuses.
    pub status: Option<String>,
    pub agent: Option<String>,
    /// Comma-separated priorities.
    pub priority: Option<String>,
    pub folder: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardOptions {
    pub stale_after_secs: i64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            default_limit: 50,
            max_limit: 200,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoardSummary {
    pub total: u32,
    pub pending: u32,
    pub claimed: u32,
    pub blocked: u32,
    pub stalled: u32,
    pub completed: u32,
    pub cancelled: u32,
}

impl BoardSummary {
    fn count(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Claimed => self.claimed += 1,
            TaskStatus::Blocked => self.blocked += 1,
            TaskStatus::Stalled => self.stalled += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub file_id: FileId,
    pub path: String,
    pub id: AppendId,
    pub author: String,
    pub content: Option<String>,
    pub priority: Priority,
    pub labels: Vec<String>,
    pub due_at: Option<i64>,
    pub created_at: i64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<AppendId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEntry {
    pub file_id: FileId,
    pub path: String,
    pub claim_id: AppendId,
    pub task_id: Option<AppendId>,
    pub author: String,
    pub status: ClaimState,
    pub expires_at: Option<i64>,
    pub expires_in_seconds: Option<i64>,
    pub created_at: i64,
    /// Only present for admin viewers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_force_expire: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub author: String,
    pub status: AgentStatus,
    pub last_seen: Option<i64>,
    pub current_task: Option<String>,
    pub active_claims: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub active_claims: u32,
    pub completed_today: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: usize,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Board {
    pub summary: BoardSummary,
    pub tasks: Vec<TaskEntry>,
    pub claims: Vec<ClaimEntry>,
    pub agents: Vec<AgentEntry>,
    pub workload: BTreeMap<String, Workload>,
    pub pagination: Pagination,
}

/// Position of a task in board order: `(created_at, file_id, append_id)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TaskKey(i64, FileId, AppendId);

impl TaskKey {
    fn encode(&self) -> String {
        hex::encode(format!("c1:{}:{}:{}", self.0, self.1, self.2))
    }

    fn decode(cursor: &str) -> Option<Self> {
        let raw = String::from_utf8(hex::decode(cursor.trim()).ok()?).ok()?;
        let mut parts = raw.strip_prefix("c1:")?.splitn(3, ':');
        let created = parts.next()?.parse().ok()?;
        let file = FileId::from_str(parts.next()?);
        let append = parts.next()?.parse().ok()?;
        Some(Self(created, file, append))
    }
}

/// Parse a comma list, keeping only recognised values. `None` means "no
/// filter"; `Some(empty)` means nothing can match.
fn parse_list<T: Ord>(raw: Option<&str>, parse: fn(&str) -> Option<T>) -> Option<BTreeSet<T>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    Some(raw.split(',').filter_map(|p| parse(p.trim())).collect())
}

fn agent_status(hb: &Heartbeat, now_unix: i64, stale_after_secs: i64) -> AgentStatus {
    if now_unix - hb.last_seen_unix > stale_after_secs {
        AgentStatus::Stale
    } else if hb.status == HeartbeatStatus::Busy {
        AgentStatus::Busy
    } else {
        AgentStatus::Idle
    }
}

pub fn project(
    snapshot: &LogSnapshot,
    filters: &BoardFilters,
    is_admin: bool,
    opts: &BoardOptions,
) -> Result<Board, Error> {
    let now = snapshot.now_unix;
    let folder = filters
        .folder
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(validate_folder)
        .transpose()?;
    let statuses = parse_list(filters.status.as_deref(), TaskStatus::parse);
    let priorities = parse_list(filters.priority.as_deref(), Priority::parse);
    let agent = filters.agent.as_deref().map(str::trim).filter(|a| !a.is_empty());
    let after = match filters.cursor.as_deref() {
        Some(c) => Some(TaskKey::decode(c).ok_or_else(|| Error::invalid_request("invalid cursor"))?),
        None => None,
    };
    let limit = filters
        .limit
        .unwrap_or(opts.default_limit)
        .clamp(1, opts.max_limit.max(1));

    let paths: BTreeMap<&FileId, &str> = snapshot
        .files
        .iter()
        .filter(|f| folder.as_deref().map_or(true, |dir| is_sub_path(dir, &f.path)))
        .map(|f| (&f.id, f.path.as_str()))
        .collect();

    let mut summary = BoardSummary::default();
    let mut matching: Vec<(TaskKey, TaskEntry)> = vec![];
    let mut claims: Vec<ClaimEntry> = vec![];
    let mut live_by_author: BTreeMap<String, u32> = BTreeMap::new();
    let mut completed_today: BTreeMap<String, u32> = BTreeMap::new();
    let today = start_of_day_unix(now);

    for (file_id, log) in snapshot.logs_by_file() {
        let Some(path) = paths.get(&file_id).copied() else {
            continue;
        };
        let histories = claim_histories(&log);

        for h in histories.values() {
            if h.is_live(now) {
                *live_by_author.entry(h.claim.author.clone()).or_default() += 1;
            }
            if let Some(done) = h.terminal().filter(|t| t.ty == AppendType::Response) {
                if done.created_at_unix >= today {
                    *completed_today.entry(h.claim.author.clone()).or_default() += 1;
                }
            }
            if h.terminal().is_none() && h.superseded_by.is_none() {
                if agent.map_or(true, |a| a == h.claim.author) {
                    claims.push(claim_entry(h, path, now, is_admin));
                }
            }
        }

        for task in log.iter().filter(|a| a.ty == AppendType::Task) {
            let current = current_claim(&histories, task.append_id);
            let status = derive_task_status(current, now);
            summary.count(status);

            if statuses.as_ref().is_some_and(|s| !s.contains(&status)) {
                continue;
            }
            if priorities.as_ref().is_some_and(|p| !p.contains(&task.priority)) {
                continue;
            }
            if let Some(agent) = agent {
                if current.map(|c| c.claim.author.as_str()) != Some(agent) {
                    continue;
                }
            }
            let key = TaskKey(task.created_at_unix, file_id.clone(), task.append_id);
            matching.push((key, task_entry(task, path, status, current, now)));
        }
    }

    matching.sort_by(|a, b| a.0.cmp(&b.0));
    let total = matching.len();
    let mut remaining: Vec<(TaskKey, TaskEntry)> = matching
        .into_iter()
        .filter(|(k, _)| after.as_ref().map_or(true, |c| k > c))
        .collect();
    let has_more = remaining.len() > limit;
    remaining.truncate(limit);
    let next_cursor = if has_more {
        remaining.last().map(|(k, _)| k.encode())
    } else {
        None
    };
    let tasks = remaining.into_iter().map(|(_, t)| t).collect();

    claims.sort_by(|a, b| (a.created_at, &a.file_id, a.claim_id).cmp(&(b.created_at, &b.file_id, b.claim_id)));

    let mut agents: BTreeMap<String, AgentEntry> = BTreeMap::new();
    for hb in &snapshot.heartbeats {
        agents.insert(
            hb.author.clone(),
            AgentEntry {
                author: hb.author.clone(),
                status: agent_status(hb, now, opts.stale_after_secs),
                last_seen: Some(hb.last_seen_unix),
                current_task: hb.current_task.clone(),
                active_claims: 0,
            },
        );
    }
    for (author, count) in &live_by_author {
        agents
            .entry(author.clone())
            .or_insert_with(|| AgentEntry {
                author: author.clone(),
                status: AgentStatus::Idle,
                last_seen: None,
                current_task: None,
                active_claims: 0,
            })
            .active_claims = *count;
    }

    let mut workload: BTreeMap<String, Workload> = BTreeMap::new();
    for author in agents.keys().chain(completed_today.keys()) {
        workload.insert(
            author.clone(),
            Workload {
                active_claims: live_by_author.get(author).copied().unwrap_or(0),
                completed_today: completed_today.get(author).copied().unwrap_or(0),
            },
        );
    }

    Ok(Board {
        summary,
        tasks,
        claims,
        agents: agents.into_values().collect(),
        workload,
        pagination: Pagination {
            limit,
            next_cursor,
            has_more,
            total,
        },
    })
}

fn claim_entry(h: &ClaimHistory, path: &str, now: i64, is_admin: bool) -> ClaimEntry {
    ClaimEntry {
        file_id: h.claim.file_id.clone(),
        path: path.to_string(),
        claim_id: h.claim_id(),
        task_id: h.task_id(),
        author: h.claim.author.clone(),
        status: h.state(now),
        expires_at: h.deadline(),
        expires_in_seconds: h.expires_in_secs(now),
        created_at: h.claim.created_at_unix,
        can_force_expire: is_admin.then_some(true),
    }
}

fn task_entry(
    task: &Append,
    path: &str,
    status: TaskStatus,
    current: Option<&ClaimHistory>,
    now: i64,
) -> TaskEntry {
    let holder = current.filter(|_| {
        matches!(status, TaskStatus::Claimed | TaskStatus::Blocked | TaskStatus::Stalled)
    });
    TaskEntry {
        file_id: task.file_id.clone(),
        path: path.to_string(),
        id: task.append_id,
        author: task.author.clone(),
        content: task.content.clone(),
        priority: task.priority,
        labels: task.labels.clone(),
        due_at: task.due_at_unix,
        created_at: task.created_at_unix,
        status,
        claimed_by: holder.map(|h| h.claim.author.clone()),
        claim_id: holder.map(|h| h.claim_id()),
        expires_in_seconds: holder.and_then(|h| h.expires_in_secs(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    struct Log {
        file: FileId,
        next: AppendId,
        appends: Vec<Append>,
    }

    impl Log {
        fn new(file: &str) -> Self {
            Self {
                file: FileId::from_str(file),
                next: 1,
                appends: vec![],
            }
        }

        fn push(&mut self, draft: NewAppend, ts: i64) -> AppendId {
            let id = self.next;
            self.next += 1;
            self.appends.push(draft.into_append(self.file.clone(), id, ts));
            id
        }

        fn task(&mut self, priority: Priority, ts: i64) -> AppendId {
            let mut d = NewAppend::new(AppendType::Task, "lead").with_content(Some("do it".into()));
            d.priority = priority;
            self.push(d, ts)
        }

        fn claim(&mut self, task: AppendId, author: &str, expires: i64) -> AppendId {
            let mut d = NewAppend::new(AppendType::Claim, author).with_reference(task);
            d.expires_at_unix = Some(expires);
            self.push(d, NOW - 10)
        }

        fn resolve(&mut self, ty: AppendType, claim: AppendId, author: &str) -> AppendId {
            self.push(NewAppend::new(ty, author).with_reference(claim), NOW - 5)
        }
    }

    fn snapshot(logs: Vec<(&str, Log)>, heartbeats: Vec<Heartbeat>) -> LogSnapshot {
        let mut snap = LogSnapshot {
            now_unix: NOW,
            workspace_id: WorkspaceId::from_str("w"),
            heartbeats,
            ..Default::default()
        };
        for (path, log) in logs {
            snap.files.push(FileRecord {
                id: log.file.clone(),
                workspace_id: snap.workspace_id.clone(),
                path: path.to_string(),
                created_at_unix: 0,
            });
            snap.appends.extend(log.appends);
        }
        snap
    }

    fn heartbeat(author: &str, status: HeartbeatStatus, last_seen: i64) -> Heartbeat {
        Heartbeat {
            workspace_id: WorkspaceId::from_str("w"),
            author: author.into(),
            status,
            last_seen_unix: last_seen,
            current_task: None,
        }
    }

    fn board(snap: &LogSnapshot, filters: BoardFilters) -> Board {
        project(snap, &filters, false, &BoardOptions::default()).unwrap()
    }

    #[test]
    fn summary_counts_every_derived_status() {
        let mut log = Log::new("f1");
        let _pending = log.task(Priority::Medium, 1);
        let claimed = log.task(Priority::Medium, 2);
        let stalled = log.task(Priority::Medium, 3);
        let done = log.task(Priority::Medium, 4);
        let cancelled = log.task(Priority::Medium, 5);
        let blocked = log.task(Priority::Medium, 6);
        log.claim(claimed, "a", NOW + 60);
        log.claim(stalled, "b", NOW - 1);
        let c = log.claim(done, "a", NOW + 60);
        log.resolve(AppendType::Response, c, "a");
        let c = log.claim(cancelled, "b", NOW + 60);
        log.resolve(AppendType::Cancel, c, "b");
        let c = log.claim(blocked, "a", NOW + 60);
        log.resolve(AppendType::Block, c, "a");

        let b = board(&snapshot(vec![("board.md", log)], vec![]), BoardFilters::default());
        assert_eq!(
            b.summary,
            BoardSummary {
                total: 6,
                pending: 1,
                claimed: 1,
                blocked: 1,
                stalled: 1,
                completed: 1,
                cancelled: 1
            }
        );
    }

    #[test]
    fn resolved_claims_leave_the_board() {
        let mut log = Log::new("f1");
        let t1 = log.task(Priority::High, 1);
        let t2 = log.task(Priority::High, 2);
        let c1 = log.claim(t1, "alice", NOW + 60);
        let c2 = log.claim(t2, "alice", NOW + 60);
        log.resolve(AppendType::Response, c1, "alice");
        log.resolve(AppendType::Cancel, c2, "alice");

        let b = board(&snapshot(vec![("board.md", log)], vec![]), BoardFilters::default());
        assert!(b.claims.is_empty());
        assert_eq!(b.workload["alice"].active_claims, 0);
        assert_eq!(b.workload["alice"].completed_today, 1);
        assert!(b.tasks.iter().all(|t| t.status != TaskStatus::Claimed));
        assert!(b.tasks.iter().all(|t| t.claimed_by.is_none()));
    }

    #[test]
    fn superseded_claims_are_not_listed() {
        let mut log = Log::new("f1");
        let t = log.task(Priority::Medium, 1);
        log.claim(t, "a", NOW - 100);
        let fresh = log.claim(t, "b", NOW + 100);

        let b = board(&snapshot(vec![("board.md", log)], vec![]), BoardFilters::default());
        assert_eq!(b.claims.len(), 1);
        assert_eq!(b.claims[0].claim_id, fresh);
        assert_eq!(b.tasks[0].claimed_by.as_deref(), Some("b"));
        assert!(!b.workload.contains_key("a"));
    }

    #[test]
    fn can_force_expire_only_for_admins() {
        let mut log = Log::new("f1");
        let t = log.task(Priority::Medium, 1);
        log.claim(t, "a", NOW + 100);
        let snap = snapshot(vec![("board.md", log)], vec![]);
        let opts = BoardOptions::default();

        let viewer = project(&snap, &BoardFilters::default(), false, &opts).unwrap();
        assert_eq!(viewer.claims[0].can_force_expire, None);
        let json = serde_json::to_value(&viewer.claims[0]).unwrap();
        assert!(json.get("canForceExpire").is_none());

        let admin = project(&snap, &BoardFilters::default(), true, &opts).unwrap();
        assert_eq!(admin.claims[0].can_force_expire, Some(true));
    }

    #[test]
    fn filters_by_status_priority_agent_and_folder() {
        let mut ops = Log::new("f1");
        let hi = ops.task(Priority::High, 1);
        let _lo = ops.task(Priority::Low, 2);
        ops.claim(hi, "alice", NOW + 60);
        let mut docs = Log::new("f2");
        docs.task(Priority::High, 3);
        let snap = snapshot(vec![("ops/board.md", ops), ("docs/board.md", docs)], vec![]);

        let b = board(&snap, BoardFilters { status: Some("claimed".into()), ..Default::default() });
        assert_eq!(b.tasks.len(), 1);
        assert_eq!(b.tasks[0].id, hi);

        let b = board(&snap, BoardFilters { priority: Some("high, critical".into()), ..Default::default() });
        assert_eq!(b.tasks.len(), 2);

        let b = board(&snap, BoardFilters { agent: Some("alice".into()), ..Default::default() });
        assert_eq!(b.tasks.len(), 1);
        assert_eq!(b.claims.len(), 1);

        let b = board(&snap, BoardFilters { folder: Some("docs".into()), ..Default::default() });
        assert_eq!(b.tasks.len(), 1);
        assert_eq!(b.tasks[0].path, "docs/board.md");
        assert_eq!(b.summary.total, 1);
    }

    #[test]
    fn hostile_priority_filter_only_narrows() {
        let mut log = Log::new("f1");
        log.task(Priority::High, 1);
        log.task(Priority::Low, 2);
        let snap = snapshot(vec![("board.md", log)], vec![]);

        for hostile in ["' OR 1=1 --", "high'; DROP TABLE appends; --", "%", "high,%' --", "\0"] {
            let b = board(&snap, BoardFilters { priority: Some(hostile.into()), ..Default::default() });
            assert!(b.tasks.len() <= 1, "{hostile}");
            assert_eq!(b.summary.total, 2);
        }
        let b = board(&snap, BoardFilters { priority: Some("high,' OR 1=1".into()), ..Default::default() });
        assert_eq!(b.tasks.len(), 1);
    }

    #[test]
    fn cursor_pagination_walks_every_task_once() {
        let mut log = Log::new("f1");
        for ts in 0..7 {
            log.task(Priority::Medium, ts);
        }
        let snap = snapshot(vec![("board.md", log)], vec![]);

        let mut seen = vec![];
        let mut cursor = None;
        loop {
            let b = board(&snap, BoardFilters { limit: Some(3), cursor: cursor.clone(), ..Default::default() });
            assert_eq!(b.pagination.total, 7);
            seen.extend(b.tasks.iter().map(|t| t.id));
            if !b.pagination.has_more {
                assert!(b.pagination.next_cursor.is_none());
                break;
            }
            cursor = b.pagination.next_cursor;
        }
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn bad_cursor_is_invalid_request() {
        let snap = snapshot(vec![], vec![]);
        let err = project(
            &snap,
            &BoardFilters { cursor: Some("zz".into()), ..Default::default() },
            false,
            &BoardOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidRequest);
    }

    #[test]
    fn agents_merge_heartbeats_and_claims() {
        let mut log = Log::new("f1");
        let t = log.task(Priority::Medium, 1);
        log.claim(t, "carol", NOW + 60);
        let snap = snapshot(
            vec![("board.md", log)],
            vec![
                heartbeat("alice", HeartbeatStatus::Busy, NOW - 10),
                heartbeat("bob", HeartbeatStatus::Busy, NOW - 3_600),
                heartbeat("dave", HeartbeatStatus::Idle, NOW - 5),
            ],
        );
        let b = board(&snap, BoardFilters::default());
        let status: BTreeMap<_, _> = b.agents.iter().map(|a| (a.author.as_str(), a.status)).collect();
        assert_eq!(status["alice"], AgentStatus::Busy);
        assert_eq!(status["bob"], AgentStatus::Stale);
        assert_eq!(status["dave"], AgentStatus::Idle);
        assert_eq!(status["carol"], AgentStatus::Idle);
        assert_eq!(b.workload["carol"].active_claims, 1);
        assert_eq!(b.agents.iter().find(|a| a.author == "carol").unwrap().active_claims, 1);
    }
}
