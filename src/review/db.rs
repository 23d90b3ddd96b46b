use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter,
};
use tracing::debug;

use crate::errors::{ReviewError, is_primary_key_violation};

use super::directory::TeamDirectory;
use super::models::*;
use super::store::PersistentStore;
use super::workload::WorkloadOracle;

const SCHEMA_VERSION: i64 = 1;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(10_000);

const GATE_PENDING: u8 = 0;
const GATE_COMMITTING: u8 = 1;
const GATE_ABANDONED: u8 = 2;

/// Decides, once, whether a `DbHandle` call commits or is abandoned.
///
/// The blocking task claims the gate right before `COMMIT`; the async side
/// claims it when `call_timeout` expires. Whichever claim lands first wins,
/// so a caller that was told "timed out" never sees its write persist.
#[derive(Clone, Default)]
pub(crate) struct CallGate(Arc<AtomicU8>);

impl CallGate {
    fn begin_commit(&self) -> bool {
        self.0
            .compare_exchange(GATE_PENDING, GATE_COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(GATE_PENDING, GATE_ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::Acquire) == GATE_ABANDONED
    }
}

fn abandoned_error() -> ReviewError {
    ReviewError::Internal(anyhow::anyhow!(
        "DB call abandoned after timeout; transaction rolled back"
    ))
}

/// Async-safe handle to the review database.
///
/// Wraps `ReviewDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. Every call is bounded by
/// `call_timeout`. On expiry the call is abandoned: the blocking task
/// skips its work if it has not reached the lock yet, and otherwise rolls
/// its transaction back instead of committing. A call that already began
/// committing is awaited and reports its real outcome.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ReviewDb>>,
    call_timeout: Duration,
}

impl DbHandle {
    pub fn new(db: ReviewDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run a closure with exclusive access to the database on a blocking
    /// thread. All data passed into `f` must be owned (`'static`). `f` gets
    /// the call's gate and must hand it to any transaction it commits.
    async fn call<F, R>(&self, f: F) -> Result<R, ReviewError>
    where
        F: FnOnce(&mut ReviewDb, &CallGate) -> Result<R, ReviewError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        let gate = CallGate::default();
        let task_gate = gate.clone();
        let mut task = tokio::task::spawn_blocking(move || -> Result<R, ReviewError> {
            let mut guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            if task_gate.is_abandoned() {
                return Err(abandoned_error());
            }
            f(&mut guard, &task_gate)
        });

        match tokio::time::timeout(self.call_timeout, &mut task).await {
            Ok(joined) => joined.context("DB task panicked")?,
            Err(_) if gate.abandon() => Err(ReviewError::Internal(anyhow::anyhow!(
                "DB call timed out after {} ms",
                self.call_timeout.as_millis()
            ))),
            // Already committing; the outcome is moments away.
            Err(_) => task.await.context("DB task panicked")?,
        }
    }

    /// Run `f` inside a write transaction (`BEGIN IMMEDIATE`).
    pub async fn write<F, R>(&self, f: F) -> Result<R, ReviewError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<R, ReviewError> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |db, gate| db.run(TransactionBehavior::Immediate, Some(gate), f))
            .await
    }

    /// Run `f` inside a read transaction (`BEGIN DEFERRED`).
    pub async fn read<F, R>(&self, f: F) -> Result<R, ReviewError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<R, ReviewError> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |db, gate| db.run(TransactionBehavior::Deferred, Some(gate), f))
            .await
    }
}

pub struct ReviewDb {
    conn: Connection,
}

impl ReviewDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to set journal mode")?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            anyhow::bail!(
                "SQLite kept journal mode '{}' for {}; WAL is required",
                journal_mode,
                path.display()
            );
        }

        let db = Self { conn };
        db.init(busy_timeout)?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init(DEFAULT_BUSY_TIMEOUT)?;
        Ok(db)
    }

    fn init(&self, busy_timeout: Duration) -> Result<()> {
        self.conn
            .busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS teams (
                    team_name TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT PRIMARY KEY,
                    username TEXT NOT NULL,
                    team_name TEXT NOT NULL REFERENCES teams(team_name),
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    pull_request_id TEXT PRIMARY KEY,
                    pull_request_name TEXT NOT NULL,
                    author_id TEXT NOT NULL REFERENCES users(user_id),
                    status TEXT NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'MERGED')),
                    created_at TEXT NOT NULL,
                    merged_at TEXT
                );

                CREATE TABLE IF NOT EXISTS pull_request_reviewers (
                    pr_id TEXT NOT NULL REFERENCES pull_requests(pull_request_id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(user_id),
                    assigned_at TEXT NOT NULL,
                    PRIMARY KEY (pr_id, user_id)
                );

                CREATE INDEX IF NOT EXISTS idx_users_team ON users(team_name, is_active);
                CREATE INDEX IF NOT EXISTS idx_reviewers_user ON pull_request_reviewers(user_id);
                CREATE INDEX IF NOT EXISTS idx_pull_requests_status ON pull_requests(status);
                ",
            )
            .context("Failed to create tables")?;

        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("Failed to stamp schema version")?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read schema version")
    }

    /// Run `f` in a `BEGIN IMMEDIATE` transaction. The write lock is held
    /// from the first statement, so a read-decide-write sequence in `f`
    /// cannot interleave with another writer. Commits if `f` returns `Ok`;
    /// otherwise the transaction is dropped and rolled back.
    pub fn transaction<F, R>(&mut self, f: F) -> Result<R, ReviewError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<R, ReviewError>,
    {
        self.run(TransactionBehavior::Immediate, None, f)
    }

    /// Run `f` in a deferred (read) transaction for a consistent snapshot.
    pub fn read<F, R>(&mut self, f: F) -> Result<R, ReviewError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<R, ReviewError>,
    {
        self.run(TransactionBehavior::Deferred, None, f)
    }

    fn run<F, R>(
        &mut self,
        behavior: TransactionBehavior,
        gate: Option<&CallGate>,
        f: F,
    ) -> Result<R, ReviewError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<R, ReviewError>,
    {
        let tx = self.conn.transaction_with_behavior(behavior)?;
        let store = StoreTx { tx };
        let out = f(&store)?;
        if gate.is_some_and(|g| !g.begin_commit()) {
            // Dropping `store` rolls the transaction back.
            return Err(abandoned_error());
        }
        store.tx.commit()?;
        Ok(out)
    }
}

/// A live store transaction. Implements the persistence, directory and
/// workload contracts against the rows visible inside the transaction.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        team_name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

struct PullRequestRow {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

impl PullRequestRow {
    fn into_pull_request(self, assigned_reviewers: Vec<String>) -> Result<PullRequest, ReviewError> {
        let status = self
            .status
            .parse::<PrStatus>()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(PullRequest {
            pull_request_id: self.pull_request_id,
            pull_request_name: self.pull_request_name,
            author_id: self.author_id,
            status,
            assigned_reviewers,
            created_at: self.created_at,
            merged_at: self.merged_at,
        })
    }
}

impl StoreTx<'_> {
    fn reviewer_ids(&self, pr_id: &str) -> Result<Vec<String>, ReviewError> {
        // rowid order keeps a replaced reviewer in its original slot.
        let mut stmt = self.tx.prepare(
            "SELECT user_id FROM pull_request_reviewers WHERE pr_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![pr_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn get_user_opt(&self, user_id: &str) -> Result<Option<User>, ReviewError> {
        let user = self
            .tx
            .query_row(
                "SELECT user_id, username, team_name, is_active, created_at, updated_at
                 FROM users WHERE user_id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}

impl TeamDirectory for StoreTx<'_> {
    fn get_user(&self, user_id: &str) -> Result<User, ReviewError> {
        self.get_user_opt(user_id)?
            .ok_or_else(|| ReviewError::not_found("User", user_id))
    }

    fn active_candidates(
        &self,
        team_name: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, ReviewError> {
        let mut stmt = self.tx.prepare(
            "SELECT user_id, username, team_name, is_active, created_at, updated_at
             FROM users WHERE team_name = ?1 AND is_active = 1",
        )?;
        let rows = stmt.query_map(params![team_name], user_from_row)?;
        let mut users = Vec::new();
        for row in rows {
            let user = row?;
            if !exclude.contains(&user.user_id) {
                users.push(user);
            }
        }
        Ok(users)
    }
}

impl WorkloadOracle for StoreTx<'_> {
    fn workload(&self, user_ids: &[String]) -> Result<HashMap<String, u32>, ReviewError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut load: HashMap<String, u32> =
            user_ids.iter().map(|id| (id.clone(), 0)).collect();

        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let sql = format!(
            "SELECT r.user_id, COUNT(*)
             FROM pull_request_reviewers r
             JOIN pull_requests p ON p.pull_request_id = r.pr_id
             WHERE p.status = 'OPEN' AND r.user_id IN ({})
             GROUP BY r.user_id",
            placeholders
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(user_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        for row in rows {
            let (user_id, count) = row?;
            load.insert(user_id, count);
        }
        Ok(load)
    }
}

impl PersistentStore for StoreTx<'_> {
    fn team_exists(&self, team_name: &str) -> Result<bool, ReviewError> {
        let exists: bool = self.tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM teams WHERE team_name = ?1)",
            params![team_name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn insert_team(&self, team: &NewTeam, now: DateTime<Utc>) -> Result<Team, ReviewError> {
        match self.tx.execute(
            "INSERT INTO teams (team_name, created_at) VALUES (?1, ?2)",
            params![team.team_name, now],
        ) {
            Ok(_) => {}
            Err(e) if is_primary_key_violation(&e) => {
                return Err(ReviewError::TeamExists {
                    name: team.team_name.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut upsert = self.tx.prepare(
            "INSERT INTO users (user_id, username, team_name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (user_id) DO UPDATE SET
                 username = excluded.username,
                 team_name = excluded.team_name,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )?;
        for member in &team.members {
            upsert.execute(params![
                member.user_id,
                member.username,
                team.team_name,
                member.is_active,
                now
            ])?;
        }

        self.get_team(&team.team_name)?
            .ok_or_else(|| anyhow::anyhow!("Team not found after insert").into())
    }

    fn get_team(&self, team_name: &str) -> Result<Option<Team>, ReviewError> {
        let created_at: Option<DateTime<Utc>> = self
            .tx
            .query_row(
                "SELECT created_at FROM teams WHERE team_name = ?1",
                params![team_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(created_at) = created_at else {
            return Ok(None);
        };

        let mut stmt = self.tx.prepare(
            "SELECT user_id, username, is_active FROM users
             WHERE team_name = ?1 ORDER BY username, user_id",
        )?;
        let rows = stmt.query_map(params![team_name], |row| {
            Ok(TeamMember {
                user_id: row.get(0)?,
                username: row.get(1)?,
                is_active: row.get(2)?,
            })
        })?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }

        Ok(Some(Team {
            team_name: team_name.to_string(),
            members,
            created_at,
        }))
    }

    fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, ReviewError> {
        let changed = self.tx.execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![is_active, now, user_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_user_opt(user_id)
    }

    fn reviews_for_user(&self, user_id: &str) -> Result<Vec<PullRequestShort>, ReviewError> {
        let mut stmt = self.tx.prepare(
            "SELECT p.pull_request_id, p.pull_request_name, p.author_id, p.status
             FROM pull_requests p
             JOIN pull_request_reviewers r ON r.pr_id = p.pull_request_id
             WHERE r.user_id = ?1
             ORDER BY p.created_at DESC, p.pull_request_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut prs = Vec::new();
        for row in rows {
            let (pull_request_id, pull_request_name, author_id, status) = row?;
            prs.push(PullRequestShort {
                pull_request_id,
                pull_request_name,
                author_id,
                status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            });
        }
        Ok(prs)
    }

    fn pr_exists(&self, pr_id: &str) -> Result<bool, ReviewError> {
        let exists: bool = self.tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM pull_requests WHERE pull_request_id = ?1)",
            params![pr_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn get_pr(&self, pr_id: &str) -> Result<Option<PullRequest>, ReviewError> {
        let row = self
            .tx
            .query_row(
                "SELECT pull_request_id, pull_request_name, author_id, status, created_at, merged_at
                 FROM pull_requests WHERE pull_request_id = ?1",
                params![pr_id],
                |row| {
                    Ok(PullRequestRow {
                        pull_request_id: row.get(0)?,
                        pull_request_name: row.get(1)?,
                        author_id: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                        merged_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        match row {
            Some(row) => {
                let reviewers = self.reviewer_ids(pr_id)?;
                Ok(Some(row.into_pull_request(reviewers)?))
            }
            None => Ok(None),
        }
    }

    fn insert_pr(&self, pr: &PullRequest) -> Result<(), ReviewError> {
        match self.tx.execute(
            "INSERT INTO pull_requests
                 (pull_request_id, pull_request_name, author_id, status, created_at, merged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pr.pull_request_id,
                pr.pull_request_name,
                pr.author_id,
                pr.status.as_str(),
                pr.created_at,
                pr.merged_at
            ],
        ) {
            Ok(_) => {}
            Err(e) if is_primary_key_violation(&e) => {
                return Err(ReviewError::PrExists {
                    id: pr.pull_request_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut stmt = self.tx.prepare(
            "INSERT INTO pull_request_reviewers (pr_id, user_id, assigned_at) VALUES (?1, ?2, ?3)",
        )?;
        for reviewer in &pr.assigned_reviewers {
            stmt.execute(params![pr.pull_request_id, reviewer, pr.created_at])?;
        }
        debug!(
            pr_id = %pr.pull_request_id,
            reviewers = pr.assigned_reviewers.len(),
            "Inserted pull request rows"
        );
        Ok(())
    }

    fn mark_merged(
        &self,
        pr_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PullRequest>, ReviewError> {
        let changed = self.tx.execute(
            "UPDATE pull_requests
             SET status = 'MERGED', merged_at = COALESCE(merged_at, ?1)
             WHERE pull_request_id = ?2",
            params![now, pr_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_pr(pr_id)
    }

    fn replace_reviewer(
        &self,
        pr_id: &str,
        old_reviewer: &str,
        new_reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReviewError> {
        let changed = self.tx.execute(
            "UPDATE pull_request_reviewers
             SET user_id = ?1, assigned_at = ?2
             WHERE pr_id = ?3 AND user_id = ?4",
            params![new_reviewer, now, pr_id, old_reviewer],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, name: &str) -> TeamMember {
        TeamMember {
            user_id: id.to_string(),
            username: name.to_string(),
            is_active: true,
        }
    }

    fn team(name: &str, members: Vec<TeamMember>) -> NewTeam {
        NewTeam {
            team_name: name.to_string(),
            members,
        }
    }

    fn open_pr(id: &str, author: &str, reviewers: &[&str]) -> PullRequest {
        PullRequest {
            pull_request_id: id.to_string(),
            pull_request_name: format!("{} title", id),
            author_id: author.to_string(),
            status: PrStatus::Open,
            assigned_reviewers: reviewers.iter().map(|r| r.to_string()).collect(),
            created_at: Utc::now(),
            merged_at: None,
        }
    }

    fn seeded() -> ReviewDb {
        let mut db = ReviewDb::new_in_memory().unwrap();
        db.transaction(|tx| {
            tx.insert_team(
                &team(
                    "backend",
                    vec![member("a", "Alice"), member("b", "Bob"), member("c", "Carol")],
                ),
                Utc::now(),
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = ReviewDb::new_in_memory()?;
        assert_eq!(db.schema_version()?, SCHEMA_VERSION);

        let tables: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        assert_eq!(
            tables,
            vec!["pull_request_reviewers", "pull_requests", "teams", "users"]
        );
        Ok(())
    }

    #[test]
    fn test_open_file_database_twice_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("review.db");
        {
            let mut db = ReviewDb::open(&path, DEFAULT_BUSY_TIMEOUT)?;
            db.transaction(|tx| tx.insert_team(&team("t", vec![member("u", "U")]), Utc::now()))?;
        }
        let mut db = ReviewDb::open(&path, DEFAULT_BUSY_TIMEOUT)?;
        let found = db.read(|tx| tx.get_team("t"))?;
        assert!(found.is_some());
        Ok(())
    }

    #[test]
    fn test_insert_team_and_get_team_orders_members_by_name() {
        let mut db = ReviewDb::new_in_memory().unwrap();
        let created = db
            .transaction(|tx| {
                tx.insert_team(
                    &team("ops", vec![member("z", "Zed"), member("m", "Amy")]),
                    Utc::now(),
                )
            })
            .unwrap();
        let names: Vec<&str> = created.members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Zed"]);
    }

    #[test]
    fn test_insert_duplicate_team_is_team_exists() {
        let mut db = seeded();
        let err = db
            .transaction(|tx| tx.insert_team(&team("backend", vec![]), Utc::now()))
            .unwrap_err();
        assert!(matches!(err, ReviewError::TeamExists { .. }));
    }

    #[test]
    fn test_member_moves_between_teams() {
        let mut db = seeded();
        db.transaction(|tx| tx.insert_team(&team("frontend", vec![member("c", "Carol Z")]), Utc::now()))
            .unwrap();
        let (backend, user) = db
            .read(|tx| Ok((tx.get_team("backend")?.unwrap(), tx.get_user("c")?)))
            .unwrap();
        assert!(backend.members.iter().all(|m| m.user_id != "c"));
        assert_eq!(user.team_name, "frontend");
        assert_eq!(user.username, "Carol Z");
    }

    #[test]
    fn test_set_user_active_missing_user_is_none() {
        let mut db = seeded();
        let out = db
            .transaction(|tx| tx.set_user_active("ghost", false, Utc::now()))
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_insert_pr_with_reviewers_and_read_back() {
        let mut db = seeded();
        db.transaction(|tx| tx.insert_pr(&open_pr("p1", "a", &["c", "b"])))
            .unwrap();
        let pr = db.read(|tx| tx.get_pr("p1")).unwrap().unwrap();
        assert_eq!(pr.status, PrStatus::Open);
        assert_eq!(pr.assigned_reviewers, vec!["c", "b"]);
        assert!(pr.merged_at.is_none());
    }

    #[test]
    fn test_insert_duplicate_pr_is_pr_exists() {
        let mut db = seeded();
        db.transaction(|tx| tx.insert_pr(&open_pr("p1", "a", &[])))
            .unwrap();
        let err = db
            .transaction(|tx| tx.insert_pr(&open_pr("p1", "b", &["c"])))
            .unwrap_err();
        assert!(matches!(err, ReviewError::PrExists { .. }));
    }

    #[test]
    fn test_failed_transaction_leaves_no_partial_pr() {
        let mut db = seeded();
        // Second reviewer row references an unknown user, so the FK check fails
        // after the pull request row was already written.
        let err = db
            .transaction(|tx| tx.insert_pr(&open_pr("p1", "a", &["b", "nobody"])))
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal(_)));
        let exists = db.read(|tx| tx.pr_exists("p1")).unwrap();
        assert!(!exists);
    }

    #[test]
    fn test_mark_merged_keeps_first_merge_time() {
        let mut db = seeded();
        db.transaction(|tx| tx.insert_pr(&open_pr("p1", "a", &["b"])))
            .unwrap();
        let first = db
            .transaction(|tx| tx.mark_merged("p1", Utc::now()))
            .unwrap()
            .unwrap();
        let later = first.merged_at.unwrap() + chrono::Duration::hours(1);
        let second = db
            .transaction(move |tx| tx.mark_merged("p1", later))
            .unwrap()
            .unwrap();
        assert_eq!(second.status, PrStatus::Merged);
        assert_eq!(first.merged_at, second.merged_at);
    }

    #[test]
    fn test_mark_merged_unknown_is_none() {
        let mut db = seeded();
        let out = db.transaction(|tx| tx.mark_merged("nope", Utc::now())).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_replace_reviewer_is_conditional() {
        let mut db = seeded();
        db.transaction(|tx| tx.insert_pr(&open_pr("p1", "a", &["b"])))
            .unwrap();
        let swapped = db
            .transaction(|tx| tx.replace_reviewer("p1", "b", "c", Utc::now()))
            .unwrap();
        assert!(swapped);
        let again = db
            .transaction(|tx| tx.replace_reviewer("p1", "b", "c", Utc::now()))
            .unwrap();
        assert!(!again);
        let pr = db.read(|tx| tx.get_pr("p1")).unwrap().unwrap();
        assert_eq!(pr.assigned_reviewers, vec!["c"]);
    }

    #[test]
    fn test_reviews_for_user_newest_first_including_merged() {
        let mut db = seeded();
        let t0 = Utc::now();
        let mut older = open_pr("old", "a", &["b"]);
        older.created_at = t0 - chrono::Duration::minutes(5);
        let mut newer = open_pr("new", "c", &["b"]);
        newer.created_at = t0;
        db.transaction(move |tx| {
            tx.insert_pr(&older)?;
            tx.insert_pr(&newer)?;
            tx.mark_merged("old", t0)?;
            Ok(())
        })
        .unwrap();

        let reviews = db.read(|tx| tx.reviews_for_user("b")).unwrap();
        let ids: Vec<&str> = reviews.iter().map(|r| r.pull_request_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(reviews[1].status, PrStatus::Merged);

        assert!(db.read(|tx| tx.reviews_for_user("a")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_on_blocking_pool() {
        let handle = DbHandle::new(seeded());
        let user = handle.read(|tx| tx.get_user("a")).await.unwrap();
        assert_eq!(user.username, "Alice");
    }

    #[tokio::test]
    async fn test_db_handle_call_times_out_as_internal() {
        let handle = DbHandle::new(seeded()).with_call_timeout(Duration::from_millis(20));
        let err = handle
            .call(|_db, _gate| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal(_)));
        assert!(format!("{:#}", err).contains("timed out"));
    }

    #[test]
    fn test_abandoned_gate_blocks_commit() {
        let mut db = seeded();
        let gate = CallGate::default();
        assert!(gate.abandon());
        let err = db
            .run(TransactionBehavior::Immediate, Some(&gate), |tx| {
                tx.insert_pr(&open_pr("p1", "a", &["b"]))
            })
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal(_)));
        assert!(!db.read(|tx| tx.pr_exists("p1")).unwrap());
    }

    #[test]
    fn test_gate_claimed_for_commit_cannot_be_abandoned() {
        let gate = CallGate::default();
        assert!(gate.begin_commit());
        assert!(!gate.abandon());
        assert!(!gate.is_abandoned());
    }

    #[tokio::test]
    async fn test_timed_out_write_is_rolled_back() {
        let handle = DbHandle::new(seeded()).with_call_timeout(Duration::from_millis(50));
        let err = handle
            .write(|tx| {
                tx.insert_pr(&open_pr("p1", "a", &["b"]))?;
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal(_)));

        // Waits on the mutex until the abandoned task has finished.
        let patient = handle.clone().with_call_timeout(Duration::from_secs(5));
        assert!(!patient.read(|tx| tx.pr_exists("p1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_queued_past_timeout_never_runs() {
        let handle = DbHandle::new(seeded()).with_call_timeout(Duration::from_millis(50));
        let slow = handle.clone().with_call_timeout(Duration::from_secs(5));
        let blocker = tokio::spawn(async move {
            slow.call(|_db, _gate| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = handle
            .write(|tx| tx.insert_pr(&open_pr("p1", "a", &["b"])))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal(_)));
        blocker.await.unwrap().unwrap();

        let patient = handle.clone().with_call_timeout(Duration::from_secs(5));
        assert!(!patient.read(|tx| tx.pr_exists("p1")).await.unwrap());
    }
}
