//! Lease and claim state machine.
//!
//! A claim is `active -> {completed, cancelled}` (terminal) and may pick up
//! `blocked` on the way. Expiry is not a write: it is read off the lease
//! deadline against `now`, so an expired claim can still be renewed,
//! cancelled, or superseded by a new claim on the same task.

use std::collections::BTreeMap;

use serde_json::json;

use crate::{
    commands::*,
    error::{Error, ErrorCode},
    ids::AppendId,
    model::*,
    types::{Append, NewAppend},
};

pub const DEFAULT_LEASE_SECS: i64 = 15 * 60;

/// A claim together with every lifecycle append that references it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimHistory {
    pub claim: Append,
    /// Renew/block/response/cancel appends referencing the claim, in log order.
    pub followups: Vec<Append>,
    /// A later claim accepted on the same task.
    pub superseded_by: Option<AppendId>,
}

impl ClaimHistory {
    pub fn new(claim: Append) -> Self {
        Self {
            claim,
            followups: vec![],
            superseded_by: None,
        }
    }

    pub fn claim_id(&self) -> AppendId {
        self.claim.append_id
    }

    pub fn task_id(&self) -> Option<AppendId> {
        self.claim.reference
    }

    /// Latest lease deadline across the claim and its renewals.
    pub fn deadline(&self) -> Option<i64> {
        self.followups
            .iter()
            .filter(|a| a.ty == AppendType::Renew)
            .filter_map(|a| a.expires_at_unix)
            .chain(self.claim.expires_at_unix)
            .max()
    }

    pub fn terminal(&self) -> Option<&Append> {
        self.followups.iter().find(|a| a.ty.is_terminal())
    }

    pub fn is_blocked(&self) -> bool {
        self.followups.iter().any(|a| a.ty == AppendType::Block)
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.deadline().is_some_and(|d| d <= now_unix)
    }

    pub fn expires_in_secs(&self, now_unix: i64) -> Option<i64> {
        self.deadline().map(|d| (d - now_unix).max(0))
    }

    pub fn state(&self, now_unix: i64) -> ClaimState {
        match self.terminal().map(|a| a.ty) {
            Some(AppendType::Response) => ClaimState::Completed,
            Some(_) => ClaimState::Cancelled,
            None if self.is_expired(now_unix) => ClaimState::Expired,
            None if self.is_blocked() => ClaimState::Blocked,
            None => ClaimState::Active,
        }
    }

    /// Does this claim keep other agents off its task right now?
    pub fn holds_task(&self, now_unix: i64) -> bool {
        self.terminal().is_none() && !self.is_expired(now_unix)
    }

    /// Unresolved, unexpired and still the current claim of its task.
    pub fn is_live(&self, now_unix: i64) -> bool {
        self.superseded_by.is_none() && self.holds_task(now_unix)
    }

    pub fn with_followup(mut self, append: Append) -> Self {
        self.followups.push(append);
        self
    }
}

/// Group one file's log into claim histories keyed by claim id.
pub fn claim_histories(log: &[Append]) -> BTreeMap<AppendId, ClaimHistory> {
    let mut ordered: Vec<&Append> = log.iter().collect();
    ordered.sort_by_key(|a| a.append_id);

    let mut histories: BTreeMap<AppendId, ClaimHistory> = BTreeMap::new();
    let mut current_by_task: BTreeMap<AppendId, AppendId> = BTreeMap::new();

    for append in ordered {
        match append.ty {
            AppendType::Claim => {
                if let Some(task_id) = append.reference {
                    if let Some(previous) = current_by_task.insert(task_id, append.append_id) {
                        if let Some(h) = histories.get_mut(&previous) {
                            h.superseded_by = Some(append.append_id);
                        }
                    }
                }
                histories.insert(append.append_id, ClaimHistory::new(append.clone()));
            }
            AppendType::Renew | AppendType::Block | AppendType::Response | AppendType::Cancel => {
                if let Some(h) = append.reference.and_then(|r| histories.get_mut(&r)) {
                    h.followups.push(append.clone());
                }
            }
            _ => {}
        }
    }
    histories
}

/// The claim with the highest id on `task_id`, if any.
pub fn current_claim(
    histories: &BTreeMap<AppendId, ClaimHistory>,
    task_id: AppendId,
) -> Option<&ClaimHistory> {
    histories
        .values()
        .filter(|h| h.task_id() == Some(task_id))
        .max_by_key(|h| h.claim_id())
}

/// Task status from its current claim, most specific rule first.
pub fn derive_task_status(current: Option<&ClaimHistory>, now_unix: i64) -> TaskStatus {
    let Some(claim) = current else {
        return TaskStatus::Pending;
    };
    match claim.state(now_unix) {
        ClaimState::Cancelled => TaskStatus::Cancelled,
        ClaimState::Completed => TaskStatus::Completed,
        ClaimState::Blocked => TaskStatus::Blocked,
        ClaimState::Active => TaskStatus::Claimed,
        ClaimState::Expired => TaskStatus::Stalled,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimDecision {
    Accept,
    TaskNotFound,
    TaskCompleted,
    AlreadyClaimed { holder: Append },
}

/// Race check for a new claim on `task_id`, evaluated against one file's log.
/// The caller must run this and the insert as one indivisible step.
pub fn decide_claim(log: &[Append], task_id: AppendId, now_unix: i64) -> ClaimDecision {
    let is_task = log
        .iter()
        .any(|a| a.append_id == task_id && a.ty == AppendType::Task);
    if !is_task {
        return ClaimDecision::TaskNotFound;
    }

    let histories = claim_histories(log);
    if let Some(holder) = histories
        .values()
        .filter(|h| h.task_id() == Some(task_id))
        .find(|h| h.holds_task(now_unix))
    {
        return ClaimDecision::AlreadyClaimed {
            holder: holder.claim.clone(),
        };
    }
    if current_claim(&histories, task_id).is_some_and(|h| h.state(now_unix) == ClaimState::Completed) {
        return ClaimDecision::TaskCompleted;
    }
    ClaimDecision::Accept
}

/// Live claims held by `author` in one file's log.
pub fn live_claims_by_author(log: &[Append], author: &str, now_unix: i64) -> u32 {
    claim_histories(log)
        .values()
        .filter(|h| h.claim.author == author && h.is_live(now_unix))
        .count() as u32
}

fn rejection(code: ErrorCode, message: String, history: &ClaimHistory, now_unix: i64) -> Error {
    Error::new(code, message).with_details(json!({
        "claimId": history.claim_id(),
        "status": history.state(now_unix).as_str(),
    }))
}

/// Validate a requested transition and produce the append that records it.
pub fn plan_mutation(
    history: &ClaimHistory,
    request: &MutationRequest,
    now_unix: i64,
) -> Result<NewAppend, Error> {
    let claim_id = history.claim_id();
    let verb = request.mutation.name();

    if !request.admin_override && request.author != history.claim.author {
        return Err(Error::new(
            ErrorCode::AuthorMismatch,
            format!("claim {claim_id} belongs to {}", history.claim.author),
        ));
    }

    if let Some(terminal) = history.terminal() {
        return Err(rejection(
            ErrorCode::InvalidRequest,
            format!("cannot {verb} claim {claim_id}: already resolved by append {}", terminal.append_id),
            history,
            now_unix,
        ));
    }

    let base = NewAppend::new(AppendType::Response, request.author.clone())
        .with_reference(claim_id)
        .with_content(request.content.clone());

    match &request.mutation {
        ClaimMutation::Renew { expires_at_unix } => {
            if let Some(newer) = history.superseded_by {
                return Err(Error::new(
                    ErrorCode::AlreadyClaimed,
                    format!("cannot renew claim {claim_id}: task was claimed again by append {newer}"),
                )
                .with_details(json!({"claimId": claim_id, "supersededBy": newer})));
            }
            if *expires_at_unix <= now_unix {
                return Err(Error::invalid_request("renewal must extend the lease into the future"));
            }
            Ok(NewAppend {
                ty: AppendType::Renew,
                expires_at_unix: Some(*expires_at_unix),
                ..base
            })
        }
        ClaimMutation::Complete => {
            if history.is_expired(now_unix) {
                return Err(rejection(
                    ErrorCode::InvalidRequest,
                    format!("cannot complete claim {claim_id}: lease expired"),
                    history,
                    now_unix,
                ));
            }
            Ok(base)
        }
        ClaimMutation::Cancel => Ok(NewAppend {
            ty: AppendType::Cancel,
            ..base
        }),
        ClaimMutation::Block => {
            if history.is_expired(now_unix) {
                return Err(rejection(
                    ErrorCode::InvalidRequest,
                    format!("cannot block claim {claim_id}: lease expired"),
                    history,
                    now_unix,
                ));
            }
            if request.content.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return Err(Error::invalid_request("block requires a reason"));
            }
            Ok(NewAppend {
                ty: AppendType::Block,
                ..base
            })
        }
    }
}
