//! Team and user administration.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;

use crate::errors::ReviewError;

use super::db::DbHandle;
use super::models::{NewTeam, PullRequestShort, Team, User};
use super::store::PersistentStore;

/// Check a team payload before it reaches the store.
pub fn validate_team(team: &NewTeam) -> Result<(), ReviewError> {
    if team.team_name.trim().is_empty() {
        return Err(ReviewError::InvalidRequest(
            "team_name must not be empty".into(),
        ));
    }
    if team.members.is_empty() {
        return Err(ReviewError::InvalidRequest(format!(
            "team '{}' must have at least one member",
            team.team_name
        )));
    }

    let mut seen = HashSet::new();
    for member in &team.members {
        if member.user_id.trim().is_empty() {
            return Err(ReviewError::InvalidRequest(
                "member user_id must not be empty".into(),
            ));
        }
        if member.username.trim().is_empty() {
            return Err(ReviewError::InvalidRequest(format!(
                "member '{}' has an empty username",
                member.user_id
            )));
        }
        if !seen.insert(member.user_id.as_str()) {
            return Err(ReviewError::InvalidRequest(format!(
                "member '{}' is listed twice",
                member.user_id
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct Roster {
    db: DbHandle,
}

impl Roster {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Create a team and upsert its members. Members already in another
    /// team move to this one.
    pub async fn create_team(&self, team: NewTeam) -> Result<Team, ReviewError> {
        validate_team(&team)?;
        let created = self
            .db
            .write(move |tx| {
                if tx.team_exists(&team.team_name)? {
                    return Err(ReviewError::TeamExists {
                        name: team.team_name.clone(),
                    });
                }
                tx.insert_team(&team, Utc::now())
            })
            .await?;
        info!(
            team_name = %created.team_name,
            members = created.members.len(),
            "Team created"
        );
        Ok(created)
    }

    pub async fn get_team(&self, team_name: &str) -> Result<Team, ReviewError> {
        let name = team_name.to_string();
        self.db
            .read(move |tx| {
                tx.get_team(&name)?
                    .ok_or_else(|| ReviewError::not_found("Team", name.as_str()))
            })
            .await
    }

    pub async fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<User, ReviewError> {
        let id = user_id.to_string();
        let user = self
            .db
            .write(move |tx| {
                tx.set_user_active(&id, is_active, Utc::now())?
                    .ok_or_else(|| ReviewError::not_found("User", id.as_str()))
            })
            .await?;
        info!(user_id, is_active, team_name = %user.team_name, "User activity updated");
        Ok(user)
    }

    /// Pull requests the user reviews, newest first. An unknown user simply
    /// has no reviews.
    pub async fn user_reviews(&self, user_id: &str) -> Result<Vec<PullRequestShort>, ReviewError> {
        let id = user_id.to_string();
        self.db.read(move |tx| tx.reviews_for_user(&id)).await
    }
}
