//! Persistence contract consumed by the lifecycle and roster.
//!
//! Every method runs inside the transaction of the implementing value, so a
//! sequence of calls made within one `ReviewDb::transaction` closure commits
//! or rolls back as a unit.

use chrono::{DateTime, Utc};

use crate::errors::ReviewError;

use super::models::{NewTeam, PullRequest, PullRequestShort, Team, User};

pub trait PersistentStore {
    // ── Teams and users ──────────────────────────────────────────────

    fn team_exists(&self, team_name: &str) -> Result<bool, ReviewError>;

    /// Insert the team row and upsert every member into it. A member that
    /// already belongs to another team is moved. Fails `TeamExists` on a
    /// duplicate team name.
    fn insert_team(&self, team: &NewTeam, now: DateTime<Utc>) -> Result<Team, ReviewError>;

    fn get_team(&self, team_name: &str) -> Result<Option<Team>, ReviewError>;

    /// Returns `None` when the user does not exist.
    fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, ReviewError>;

    /// Pull requests on which `user_id` is a reviewer, newest first.
    fn reviews_for_user(&self, user_id: &str) -> Result<Vec<PullRequestShort>, ReviewError>;

    // ── Pull requests ────────────────────────────────────────────────

    fn pr_exists(&self, pr_id: &str) -> Result<bool, ReviewError>;

    fn get_pr(&self, pr_id: &str) -> Result<Option<PullRequest>, ReviewError>;

    /// Insert the pull request row and one assignment row per reviewer.
    /// Fails `PrExists` if the id is taken.
    fn insert_pr(&self, pr: &PullRequest) -> Result<(), ReviewError>;

    /// Set status to `MERGED`. The merge time is only written the first
    /// time; later calls leave it as is. Returns `None` if the id is unknown.
    fn mark_merged(
        &self,
        pr_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PullRequest>, ReviewError>;

    /// Swap `old_reviewer` for `new_reviewer` only if the `(pr_id,
    /// old_reviewer)` assignment still exists. Returns whether a row changed.
    fn replace_reviewer(
        &self,
        pr_id: &str,
        old_reviewer: &str,
        new_reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReviewError>;
}
