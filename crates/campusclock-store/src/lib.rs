//! SQLite-backed persistence for users and attempts.
//! Survives restarts, supports concurrent access from the executor tasks.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use campusclock_core::error::{ClockError, Result};
use campusclock_core::types::{Attempt, AttemptStatus, User};

/// Persistence handle. One per process; cheap to share behind an `Arc`.
pub struct ClockStore {
    conn: Mutex<Connection>,
}

impl ClockStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ClockError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ClockError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                id TEXT UNIQUE,                  -- time-ordered uuid, assigned lazily
                password TEXT NOT NULL,          -- encrypted, base64
                email TEXT,
                auto_clock INTEGER NOT NULL DEFAULT 0,
                cookie TEXT,                     -- serialized jar snapshot
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attempts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_at TEXT NOT NULL,
                executed_at TEXT,
                message TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_user ON attempts(user_id);
         ",
        )
        .map_err(|e| ClockError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ClockError::Store(format!("Connection lock poisoned: {e}")))
    }

    // ─── Users ────────────────────────────────────────────────

    /// Register a user. The password must already be sealed by the vault.
    pub fn add_user(
        &self,
        username: &str,
        sealed_password: &str,
        email: Option<&str>,
        auto_clock: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, password, email, auto_clock, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![username, sealed_password, email, auto_clock as i32, now],
        )
        .map_err(|e| ClockError::Store(format!("Add user: {e}")))?;
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT username, id, password, email, auto_clock, cookie
                 FROM users WHERE username = ?1",
            )
            .map_err(|e| ClockError::Store(format!("Get user: {e}")))?;
        let user = stmt
            .query_row(rusqlite::params![username], row_to_user)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(ClockError::Store(format!("Get user: {e}"))),
            })?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.query_users("SELECT username, id, password, email, auto_clock, cookie FROM users ORDER BY created_at")
    }

    /// Users opted into the daily scheduler.
    pub fn opted_in_users(&self) -> Result<Vec<User>> {
        self.query_users(
            "SELECT username, id, password, email, auto_clock, cookie
             FROM users WHERE auto_clock = 1 ORDER BY created_at",
        )
    }

    fn query_users(&self, sql: &str) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ClockError::Store(format!("List users: {e}")))?;
        let rows = stmt
            .query_map([], row_to_user)
            .map_err(|e| ClockError::Store(format!("List users: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a user; attempts cascade with it.
    pub fn remove_user(&self, username: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM users WHERE username = ?1", [username])
            .map_err(|e| ClockError::Store(format!("Remove user: {e}")))?;
        Ok(n > 0)
    }

    pub fn set_auto_clock(&self, username: &str, on: bool) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE users SET auto_clock = ?1, updated_at = ?2 WHERE username = ?3",
                rusqlite::params![on as i32, Utc::now().to_rfc3339(), username],
            )
            .map_err(|e| ClockError::Store(format!("Set auto_clock: {e}")))?;
        Ok(n > 0)
    }

    /// Return the user's stable id, assigning a fresh time-ordered one on
    /// first use. Never reassigns.
    pub fn ensure_user_id(&self, username: &str) -> Result<String> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .map_err(|e| ClockError::Store(format!("Ensure id: {e}")))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "UPDATE users SET id = ?1, updated_at = ?2 WHERE username = ?3 AND id IS NULL",
            rusqlite::params![id, Utc::now().to_rfc3339(), username],
        )
        .map_err(|e| ClockError::Store(format!("Ensure id: {e}")))?;
        // A concurrent assign may have won; read back the durable value.
        conn.query_row(
            "SELECT id FROM users WHERE username = ?1",
            [username],
            |row| row.get(0),
        )
        .map_err(|e| ClockError::Store(format!("Ensure id: {e}")))
    }

    /// Persist a cookie-jar snapshot. One write, last writer wins.
    pub fn save_cookie(&self, username: &str, snapshot: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET cookie = ?1, updated_at = ?2 WHERE username = ?3",
            rusqlite::params![snapshot, Utc::now().to_rfc3339(), username],
        )
        .map_err(|e| ClockError::Store(format!("Save cookie: {e}")))?;
        Ok(())
    }

    /// Drop the persisted session snapshot (logout).
    pub fn clear_cookie(&self, username: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET cookie = NULL, updated_at = ?1 WHERE username = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), username],
        )
        .map_err(|e| ClockError::Store(format!("Clear cookie: {e}")))?;
        Ok(())
    }

    // ─── Attempts ─────────────────────────────────────────────

    /// Create one pending attempt for the given owner.
    pub fn create_attempt(&self, user_id: &str, scheduled_at: DateTime<Utc>) -> Result<Attempt> {
        let attempt = Attempt {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            status: AttemptStatus::Pending,
            scheduled_at,
            executed_at: None,
            message: None,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attempts (id, user_id, status, scheduled_at, created_at)
             VALUES (?1, ?2, 'pending', ?3, ?4)",
            rusqlite::params![
                attempt.id,
                attempt.user_id,
                attempt.scheduled_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| ClockError::Store(format!("Create attempt: {e}")))?;
        Ok(attempt)
    }

    /// Commit the single pending → terminal transition. Returns false if the
    /// attempt was already terminal (the transition is a no-op then).
    pub fn finish_attempt(
        &self,
        id: &str,
        status: AttemptStatus,
        message: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(ClockError::Store(
                "finish_attempt requires a terminal status".into(),
            ));
        }
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE attempts SET status = ?1, message = ?2, executed_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                rusqlite::params![status.as_str(), message, executed_at.to_rfc3339(), id],
            )
            .map_err(|e| ClockError::Store(format!("Finish attempt: {e}")))?;
        Ok(n > 0)
    }

    pub fn get_attempt(&self, id: &str) -> Result<Option<Attempt>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, status, scheduled_at, executed_at, message
                 FROM attempts WHERE id = ?1",
            )
            .map_err(|e| ClockError::Store(format!("Get attempt: {e}")))?;
        stmt.query_row(rusqlite::params![id], row_to_attempt)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(ClockError::Store(format!("Get attempt: {e}"))),
            })
    }

    pub fn attempts_for_user(&self, user_id: &str) -> Result<Vec<Attempt>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, status, scheduled_at, executed_at, message
                 FROM attempts WHERE user_id = ?1 ORDER BY scheduled_at",
            )
            .map_err(|e| ClockError::Store(format!("List attempts: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], row_to_attempt)
            .map_err(|e| ClockError::Store(format!("List attempts: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        username: row.get(0)?,
        id: row.get(1)?,
        password: row.get(2)?,
        email: row.get(3)?,
        auto_clock: row.get::<_, i32>(4)? != 0,
        cookie: row.get(5)?,
    })
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attempt> {
    let status_str: String = row.get(2)?;
    let scheduled_at_str: String = row.get(3)?;
    let executed_at_str: Option<String> = row.get(4)?;
    Ok(Attempt {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: AttemptStatus::parse(&status_str).unwrap_or(AttemptStatus::Failed),
        scheduled_at: parse_utc(&scheduled_at_str),
        executed_at: executed_at_str.as_deref().map(parse_utc),
        message: row.get(5)?,
    })
}

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}
