use thiserror::Error;

/// Failures raised while appending to the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The entry cannot be legally applied on top of its key's history.
    /// Only a CREATE on a key that already exists triggers this today.
    #[error("modification sn={sn} on key {id} cannot be applied")]
    DroppedModification { sn: u64, id: u64 },

    /// The entry lies past the end of the log; entries from `from` onward
    /// must be fetched from the leader first.
    #[error("log gap detected, entries missing from sn={from}")]
    GapDetected { from: u64 },
}

/// Errors surfaced by node operations, mapped onto HTTP responses by the
/// server module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node is disabled")]
    Disabled,

    #[error("stale term {received}, current term is {current}")]
    StaleTerm { received: u64, current: u64 },

    #[error("not the leader, current leader is {leader}")]
    NotLeader { leader: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("could not catch up from sn={from} after {attempts} attempts")]
    CatchUpExhausted { from: u64, attempts: usize },
}
