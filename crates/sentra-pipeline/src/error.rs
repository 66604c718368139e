use sentra_db::DbError;
use thiserror::Error;
use uuid::Uuid;

use crate::run::TransitionError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("job run {0} not found")]
    NotFound(Uuid),

    /// The run is no longer in a state that allows the requested write,
    /// typically because it was terminated by someone else.
    #[error("job run {run_id} rejected transition: {reason}")]
    Rejected { run_id: Uuid, reason: String },

    #[error("ledger row is corrupt: {0}")]
    Corrupt(String),

    #[error("signal payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Db(DbError),
}

impl LedgerError {
    pub(crate) fn rejected(run_id: Uuid, err: &TransitionError) -> Self {
        LedgerError::Rejected {
            run_id,
            reason: err.to_string(),
        }
    }
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidJobRunTransition { run_id, expected } => LedgerError::Rejected {
                run_id,
                reason: format!("expected {expected}"),
            },
            other => LedgerError::Db(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A ledger write failed; the run has been marked `failed` if possible.
    #[error("run ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The run was terminated while in flight and its results were dropped.
    #[error("job run {run_id} was terminated externally; results discarded")]
    Discarded { run_id: Uuid },

    #[error("job run {run_id} exceeded its {after_secs}s deadline")]
    DeadlineExceeded { run_id: Uuid, after_secs: u64 },
}
