//! Pull request lifecycle: creation with reviewer assignment, merge, and
//! reviewer reassignment.
//!
//! Each operation is one store transaction. The `*_in` functions hold the
//! decision logic and are generic over the store contracts so they can run
//! against any transaction that implements them; [`PullRequestLifecycle`]
//! wraps them in a `DbHandle::write` call.
//!
//! ```text
//!   OPEN ──merge──▶ MERGED ──merge──▶ MERGED (merged_at unchanged)
//!    │
//!    └─reassign─▶ OPEN (one reviewer swapped)
//! ```

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::ReviewError;

use super::db::DbHandle;
use super::directory::TeamDirectory;
use super::models::{PrStatus, PullRequest};
use super::selector::{select_reviewer, select_reviewers};
use super::store::PersistentStore;
use super::workload::WorkloadOracle;

/// Reviewers assigned to a new pull request when enough candidates exist.
pub const REVIEWERS_PER_PR: usize = 2;

fn reread<S: PersistentStore>(store: &S, pr_id: &str) -> Result<PullRequest, ReviewError> {
    store.get_pr(pr_id)?.ok_or_else(|| {
        anyhow::anyhow!("Pull request '{}' vanished inside its transaction", pr_id).into()
    })
}

/// Create an `OPEN` pull request and assign up to [`REVIEWERS_PER_PR`]
/// least-loaded active teammates of the author.
pub fn create_in<S>(
    store: &S,
    pr_id: &str,
    pr_name: &str,
    author_id: &str,
    now: DateTime<Utc>,
) -> Result<PullRequest, ReviewError>
where
    S: PersistentStore + TeamDirectory + WorkloadOracle,
{
    if store.pr_exists(pr_id)? {
        return Err(ReviewError::PrExists {
            id: pr_id.to_string(),
        });
    }

    let author = store.get_user(author_id)?;
    let candidates: Vec<String> = store
        .active_candidates(&author.team_name, &[author.user_id.clone()])?
        .into_iter()
        .map(|u| u.user_id)
        .collect();
    let load = store.workload(&candidates)?;
    let reviewers = select_reviewers(&candidates, &load, REVIEWERS_PER_PR);

    let pr = PullRequest {
        pull_request_id: pr_id.to_string(),
        pull_request_name: pr_name.to_string(),
        author_id: author.user_id,
        status: PrStatus::Open,
        assigned_reviewers: reviewers,
        created_at: now,
        merged_at: None,
    };
    store.insert_pr(&pr)?;
    reread(store, pr_id)
}

/// Move a pull request to `MERGED`. Merging twice is a no-op that returns
/// the pull request with its original merge time.
pub fn merge_in<S: PersistentStore>(
    store: &S,
    pr_id: &str,
    now: DateTime<Utc>,
) -> Result<PullRequest, ReviewError> {
    store
        .mark_merged(pr_id, now)?
        .ok_or_else(|| ReviewError::not_found("Pull request", pr_id))
}

/// Replace `old_reviewer` on an open pull request with the least-loaded
/// active member of the old reviewer's team who is neither the author nor
/// already assigned. Returns the updated pull request and the new id.
pub fn reassign_in<S>(
    store: &S,
    pr_id: &str,
    old_reviewer: &str,
    now: DateTime<Utc>,
) -> Result<(PullRequest, String), ReviewError>
where
    S: PersistentStore + TeamDirectory + WorkloadOracle,
{
    let pr = store
        .get_pr(pr_id)?
        .ok_or_else(|| ReviewError::not_found("Pull request", pr_id))?;
    if pr.is_merged() {
        return Err(ReviewError::PrMerged {
            id: pr_id.to_string(),
        });
    }

    let old = store.get_user(old_reviewer)?;
    if !pr.has_reviewer(old_reviewer) {
        return Err(ReviewError::NotAssigned {
            pr_id: pr_id.to_string(),
            user_id: old_reviewer.to_string(),
        });
    }

    let mut exclude = pr.assigned_reviewers.clone();
    exclude.push(pr.author_id.clone());
    let candidates: Vec<String> = store
        .active_candidates(&old.team_name, &exclude)?
        .into_iter()
        .map(|u| u.user_id)
        .collect();
    let load = store.workload(&candidates)?;
    let Some(new_reviewer) = select_reviewer(&candidates, &load) else {
        return Err(ReviewError::NoCandidate {
            pr_id: pr_id.to_string(),
        });
    };

    if !store.replace_reviewer(pr_id, old_reviewer, &new_reviewer, now)? {
        return Err(ReviewError::NotAssigned {
            pr_id: pr_id.to_string(),
            user_id: old_reviewer.to_string(),
        });
    }

    Ok((reread(store, pr_id)?, new_reviewer))
}

/// Async entry point for pull request operations.
#[derive(Clone)]
pub struct PullRequestLifecycle {
    db: DbHandle,
}

impl PullRequestLifecycle {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn create_pull_request(
        &self,
        pr_id: &str,
        pr_name: &str,
        author_id: &str,
    ) -> Result<PullRequest, ReviewError> {
        let (id, name, author) = (pr_id.to_string(), pr_name.to_string(), author_id.to_string());
        let result = self
            .db
            .write(move |tx| create_in(tx, &id, &name, &author, Utc::now()))
            .await;

        match &result {
            Ok(pr) => info!(
                pr_id = %pr.pull_request_id,
                author_id = %pr.author_id,
                reviewers = ?pr.assigned_reviewers,
                "Pull request created"
            ),
            Err(e) => warn!(pr_id, author_id, code = e.code(), "Pull request creation rejected"),
        }
        result
    }

    pub async fn merge_pull_request(&self, pr_id: &str) -> Result<PullRequest, ReviewError> {
        let id = pr_id.to_string();
        let result = self
            .db
            .write(move |tx| merge_in(tx, &id, Utc::now()))
            .await;

        match &result {
            Ok(pr) => info!(pr_id, merged_at = ?pr.merged_at, "Pull request merged"),
            Err(e) => warn!(pr_id, code = e.code(), "Pull request merge rejected"),
        }
        result
    }

    pub async fn reassign_reviewer(
        &self,
        pr_id: &str,
        old_reviewer: &str,
    ) -> Result<(PullRequest, String), ReviewError> {
        let (id, old) = (pr_id.to_string(), old_reviewer.to_string());
        let result = self
            .db
            .write(move |tx| reassign_in(tx, &id, &old, Utc::now()))
            .await;

        match &result {
            Ok((_, new_reviewer)) => info!(
                pr_id,
                old_reviewer,
                new_reviewer = %new_reviewer,
                "Reviewer reassigned"
            ),
            Err(e) => warn!(pr_id, old_reviewer, code = e.code(), "Reviewer reassignment rejected"),
        }
        result
    }
}
