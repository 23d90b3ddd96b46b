//! Team directory: read-only user and membership lookups.

use crate::errors::ReviewError;

use super::models::User;

/// Lookups of users and team activity, scoped to one store transaction.
pub trait TeamDirectory {
    /// Fetch a user with their owning team. Fails `NotFound` if absent.
    fn get_user(&self, user_id: &str) -> Result<User, ReviewError>;

    /// Active members of `team_name` whose id is not in `exclude`.
    ///
    /// Order is unspecified. Ranking is the selector's job.
    fn active_candidates(&self, team_name: &str, exclude: &[String])
    -> Result<Vec<User>, ReviewError>;
}
