use crate::{error::Error, lease::ClaimHistory, types::Append};

/// Result of a plain append through the sequencer.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    Created(Append),
    /// Idempotent retry: the earlier append, unchanged.
    Replayed(Append),
    ReferenceNotFound,
    /// Key reused with a different author or payload.
    IdempotencyConflict,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    Accepted(Append),
    Replayed(Append),
    AlreadyClaimed { holder: Append },
    TaskNotFound,
    TaskCompleted,
    WipLimitExceeded { held: u32 },
    IdempotencyConflict,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Applied { append: Append, history: ClaimHistory },
    Replayed { append: Append, history: ClaimHistory },
    ClaimNotFound,
    Rejected(Error),
    IdempotencyConflict,
}
