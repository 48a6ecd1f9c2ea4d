//! Decision steps every backend runs inside its atomic section. The backend
//! supplies the log it read under its lock or transaction; these functions
//! decide, the backend writes.

use mdlog_core::{
    claim_histories, decide_claim, plan_mutation, Append, AppendId, AppendType, ClaimDecision,
    ClaimHistory, ClaimOutcome, ClaimRequest, Idempotency, MutationOutcome, MutationRequest,
    NewAppend, StoredIdempotency,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replay {
    /// No live record under this key.
    Fresh,
    /// Same author and intent as before: hand back the earlier append.
    Existing(AppendId),
    Conflict,
}

pub fn check_idempotency(stored: Option<&StoredIdempotency>, request: &Idempotency, now_unix: i64) -> Replay {
    match stored {
        Some(s) if s.expires_at_unix > now_unix => {
            if request.matches(s) {
                Replay::Existing(s.append_id)
            } else {
                Replay::Conflict
            }
        }
        _ => Replay::Fresh,
    }
}

pub fn next_append_id(log: &[Append]) -> AppendId {
    log.iter().map(|a| a.append_id).max().unwrap_or(0) + 1
}

/// A referenced append must already exist in the same file.
pub fn reference_exists(log: &[Append], draft: &NewAppend) -> bool {
    draft
        .reference
        .map_or(true, |r| log.iter().any(|a| a.append_id == r))
}

/// Race check plus WIP limit for a claim. `held` is the author's live claim
/// count across the workspace and only needs to be supplied when the request
/// carries a WIP limit.
pub fn decide_claim_request(
    log: &[Append],
    request: &ClaimRequest,
    held: Option<u32>,
    now_unix: i64,
) -> Result<NewAppend, ClaimOutcome> {
    match decide_claim(log, request.task_id, now_unix) {
        ClaimDecision::Accept => {}
        ClaimDecision::TaskNotFound => return Err(ClaimOutcome::TaskNotFound),
        ClaimDecision::TaskCompleted => return Err(ClaimOutcome::TaskCompleted),
        ClaimDecision::AlreadyClaimed { holder } => return Err(ClaimOutcome::AlreadyClaimed { holder }),
    }

    if let (Some(limit), Some(held)) = (request.wip_limit, held) {
        if held >= limit {
            return Err(ClaimOutcome::WipLimitExceeded { held });
        }
    }

    Ok(NewAppend {
        ty: AppendType::Claim,
        reference: Some(request.task_id),
        status: Some("active".to_string()),
        ..request.draft.clone()
    })
}

/// Look up the claim and plan the transition.
pub fn decide_mutation(
    log: &[Append],
    claim_id: AppendId,
    request: &MutationRequest,
    now_unix: i64,
) -> Result<(NewAppend, ClaimHistory), MutationOutcome> {
    let mut histories = claim_histories(log);
    let Some(history) = histories.remove(&claim_id) else {
        return Err(MutationOutcome::ClaimNotFound);
    };
    match plan_mutation(&history, request, now_unix) {
        Ok(draft) => Ok((draft, history)),
        Err(err) => Err(MutationOutcome::Rejected(err)),
    }
}

/// Rebuild the outcome of an earlier, idempotently replayed mutation.
pub fn replayed_mutation(log: &[Append], claim_id: AppendId, append_id: AppendId) -> MutationOutcome {
    let append = log.iter().find(|a| a.append_id == append_id).cloned();
    match (append, claim_histories(log).remove(&claim_id)) {
        (Some(append), Some(history)) => MutationOutcome::Replayed { append, history },
        _ => MutationOutcome::IdempotencyConflict,
    }
}

/// Live claims held by `author` across several file logs.
pub fn live_claims_in<'a, I>(logs: I, author: &str, now_unix: i64) -> u32
where
    I: IntoIterator<Item = &'a [Append]>,
{
    logs.into_iter()
        .map(|log| mdlog_core::live_claims_by_author(log, author, now_unix))
        .sum()
}
