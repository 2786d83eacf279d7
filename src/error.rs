use thiserror::Error;

use crate::models::EntityKind;

/// Every failure that crosses the orchestrator boundary is one of these;
/// raw transport or driver errors never leak upward.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Local or remote validation failure. Recoverable, shown inline.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient transport failure. The optimistic state has been
    /// reverted; the caller may retry.
    #[error("network failure: {0}")]
    Network(String),

    /// Remote state diverged from what the mutation assumed (for example
    /// a concurrent delete). Optimistic state reverted, affected cache
    /// entries marked stale so the next read fetches fresh data.
    #[error("remote state diverged: {0}")]
    Conflict(String),

    /// Session is no longer valid. Propagated to the session collaborator
    /// rather than retried here.
    #[error("session invalid: {0}")]
    Auth(String),

    /// The entity vanished remotely. The cache entry is purged rather
    /// than reverted since there is nothing to revert to.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i32 },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
