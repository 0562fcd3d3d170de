use crate::models::ExclusionReason;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an evaluation run.
///
/// Run-level variants abort the run. `MissingRanking` and `Timeout` describe
/// per-user failures; the evaluator records them as exclusions instead of
/// returning them.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error(
        "invalid split at cutoff {cutoff}: {train} train / {test} test interactions out of {total}"
    )]
    InvalidSplit {
        cutoff: DateTime<Utc>,
        total: usize,
        train: usize,
        test: usize,
    },

    #[error("ranking capability returned no usable items for user {user_id}")]
    MissingRanking { user_id: String },

    #[error("ranking for user {user_id} exceeded {limit:?}")]
    Timeout { user_id: String, limit: Duration },

    #[error("ranking capability failed for user {user_id}: {message}")]
    Ranker { user_id: String, message: String },

    #[error("invalid record at line {line}: {reason}")]
    DataValidation { line: usize, reason: String },

    #[error(
        "no eligible users at cutoff {cutoff}: {users_total} users, {excluded} excluded ({train} train / {test} test interactions)"
    )]
    NoEligibleUsers {
        cutoff: DateTime<Utc>,
        users_total: usize,
        excluded: usize,
        train: usize,
        test: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("run aborted after {completed} users ({remaining} not started)")]
    Aborted { completed: usize, remaining: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    /// The exclusion a per-user failure maps to; `None` for run-level errors.
    pub fn exclusion_reason(&self) -> Option<ExclusionReason> {
        match self {
            EvalError::MissingRanking { .. } => Some(ExclusionReason::MissingRanking),
            EvalError::Timeout { .. } => Some(ExclusionReason::Timeout),
            EvalError::Ranker { .. } => Some(ExclusionReason::RankerError),
            _ => None,
        }
    }
}
