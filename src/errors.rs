//! Typed error taxonomy for the review service.
//!
//! `ReviewError` is the single closed set of failure kinds the core returns.
//! The transport layer switches on the variant (or on [`ReviewError::code`])
//! and never inspects message text.
//!
//! - `NotFound`: a referenced entity is absent
//! - conflict family (`TeamExists`, `PrExists`, `PrMerged`, `NotAssigned`,
//!   `NoCandidate`): the request is invalid given current state
//! - `InvalidRequest`: malformed input
//! - `Internal`: store or infrastructure failure, opaque to callers

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Team '{name}' already exists")]
    TeamExists { name: String },

    #[error("Pull request '{id}' already exists")]
    PrExists { id: String },

    #[error("Pull request '{id}' is already merged")]
    PrMerged { id: String },

    #[error("User '{user_id}' is not assigned to pull request '{pr_id}'")]
    NotAssigned { pr_id: String, user_id: String },

    #[error("No active replacement candidate for pull request '{pr_id}'")]
    NoCandidate { pr_id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ReviewError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable wire code for this failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::TeamExists { .. } => "TEAM_EXISTS",
            Self::PrExists { .. } => "PR_EXISTS",
            Self::PrMerged { .. } => "PR_MERGED",
            Self::NotAssigned { .. } => "NOT_ASSIGNED",
            Self::NoCandidate { .. } => "NO_CANDIDATE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// True for the state-conflict family.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::TeamExists { .. }
                | Self::PrExists { .. }
                | Self::PrMerged { .. }
                | Self::NotAssigned { .. }
                | Self::NoCandidate { .. }
        )
    }
}

impl From<rusqlite::Error> for ReviewError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("Database error"))
    }
}

/// True when a SQLite error is a primary-key violation.
pub fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
