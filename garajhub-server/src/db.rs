//! SQLite persistence layer.
//!
//! Stores users, startups, membership requests and admin sessions.
//! One connection behind a mutex: every public method takes the lock once,
//! so each call is atomic with respect to every other call.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, Row, params};
use sha2::{Digest, Sha256};

use crate::moderation::types::{
    MembershipRequest, ProfileField, RequestStatus, Startup, StartupDraft, StartupStatus, Stats,
    StatusFilter, UpsertOutcome, User,
};

const USER_SELECT: &str = "SELECT u.user_id, u.username, u.first_name, u.last_name, u.phone, \
     u.gender, u.birth_date, u.bio, u.joined_at, u.is_admin FROM users u";

const STARTUP_SELECT: &str = "SELECT s.startup_id, s.name, s.description, s.logo, s.group_link, \
     s.owner_id, COALESCE(NULLIF(TRIM(u.first_name || ' ' || u.last_name), ''), u.username, ''), \
     s.status, s.created_at, s.started_at, s.ended_at, s.results, s.views \
     FROM startups s LEFT JOIN users u ON u.user_id = s.owner_id";

const REQUEST_SELECT: &str =
    "SELECT request_id, startup_id, user_id, status, joined_at FROM membership_requests";

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.lock().execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
                user_id     INTEGER PRIMARY KEY,
                username    TEXT NOT NULL DEFAULT '',
                first_name  TEXT NOT NULL DEFAULT '',
                last_name   TEXT NOT NULL DEFAULT '',
                phone       TEXT NOT NULL DEFAULT '',
                gender      TEXT NOT NULL DEFAULT '',
                birth_date  TEXT NOT NULL DEFAULT '',
                bio         TEXT NOT NULL DEFAULT '',
                joined_at   INTEGER NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS startups (
                startup_id  INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                description TEXT NOT NULL,
                logo        TEXT,
                group_link  TEXT NOT NULL,
                owner_id    INTEGER NOT NULL REFERENCES users(user_id),
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  INTEGER NOT NULL,
                started_at  INTEGER,
                ended_at    INTEGER,
                results     TEXT,
                views       INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_startups_owner ON startups(owner_id);
            CREATE INDEX IF NOT EXISTS idx_startups_status ON startups(status, created_at);

            CREATE TABLE IF NOT EXISTS membership_requests (
                request_id  INTEGER PRIMARY KEY AUTOINCREMENT,
                startup_id  INTEGER NOT NULL REFERENCES startups(startup_id),
                user_id     INTEGER NOT NULL REFERENCES users(user_id),
                status      TEXT NOT NULL DEFAULT 'pending',
                joined_at   INTEGER NOT NULL,
                UNIQUE(startup_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS admin_sessions (
                token_hash  TEXT PRIMARY KEY,
                user_id     INTEGER NOT NULL,
                created_at  INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON admin_sessions(expires_at);
            ",
        )
    }

    // ── Users ──────────────────────────────────────────────────────────

    /// Insert the user if unseen. Returns true when a row was created.
    ///
    /// An existing row (e.g. one created by [`Db::set_admin`]) gets its
    /// empty `username`/`first_name` filled in; set names are kept.
    pub fn ensure_user(&self, user_id: i64, username: &str, first_name: &str) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT OR IGNORE INTO users (user_id, username, first_name, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, username, first_name, now()],
        )?;
        if n == 0 {
            conn.execute(
                "UPDATE users SET
                    username = CASE WHEN username = '' THEN ?2 ELSE username END,
                    first_name = CASE WHEN first_name = '' THEN ?3 ELSE first_name END
                 WHERE user_id = ?1",
                params![user_id, username, first_name],
            )?;
        }
        Ok(n > 0)
    }

    pub fn get_user(&self, user_id: i64) -> SqlResult<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{USER_SELECT} WHERE u.user_id = ?1"),
            params![user_id],
            user_from_row,
        )
        .optional()
    }

    /// Set one profile column. Returns false when the user does not exist.
    pub fn update_user_field(&self, user_id: i64, field: ProfileField, value: &str) -> SqlResult<bool> {
        // The column name comes from a closed enum, never from input.
        let sql = format!("UPDATE users SET {} = ?1 WHERE user_id = ?2", field.column());
        let n = self.conn.lock().execute(&sql, params![value, user_id])?;
        Ok(n > 0)
    }

    /// Mark (or unmark) a user as administrator, creating the row if needed.
    pub fn set_admin(&self, user_id: i64, is_admin: bool) -> SqlResult<()> {
        self.conn.lock().execute(
            "INSERT INTO users (user_id, joined_at, is_admin) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET is_admin = excluded.is_admin",
            params![user_id, now(), is_admin],
        )?;
        Ok(())
    }

    pub fn list_all_user_ids(&self) -> SqlResult<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Newest users first, with the total user count.
    pub fn list_users(&self, page: i64, per_page: i64) -> SqlResult<(Vec<User>, i64)> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(&format!(
            "{USER_SELECT} ORDER BY u.joined_at DESC, u.user_id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let users = stmt
            .query_map(params![per_page, offset(page, per_page)], user_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok((users, total))
    }

    pub fn recent_users(&self, limit: i64) -> SqlResult<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{USER_SELECT} ORDER BY u.joined_at DESC, u.user_id DESC LIMIT ?1"
        ))?;
        stmt.query_map(params![limit], user_from_row)?.collect()
    }

    // ── Startups ───────────────────────────────────────────────────────

    /// Insert a new startup in `pending`. Returns its id.
    pub fn create_startup(&self, draft: &StartupDraft) -> SqlResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO startups (name, description, logo, group_link, owner_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                draft.name.trim(),
                draft.description.trim(),
                draft.logo,
                draft.group_link.trim(),
                draft.owner_id,
                StartupStatus::Pending,
                now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_startup(&self, startup_id: i64) -> SqlResult<Option<Startup>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{STARTUP_SELECT} WHERE s.startup_id = ?1"),
            params![startup_id],
            startup_from_row,
        )
        .optional()
    }

    pub fn list_startups_by_owner(&self, owner_id: i64) -> SqlResult<Vec<Startup>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{STARTUP_SELECT} WHERE s.owner_id = ?1 ORDER BY s.created_at DESC, s.startup_id DESC"
        ))?;
        stmt.query_map(params![owner_id], startup_from_row)?.collect()
    }

    /// One page of startups matching `filter`, newest first, plus the match count.
    pub fn list_startups(
        &self,
        filter: StatusFilter,
        page: i64,
        per_page: i64,
    ) -> SqlResult<(Vec<Startup>, i64)> {
        let status = match filter {
            StatusFilter::All => None,
            StatusFilter::Only(status) => Some(status),
        };
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM startups WHERE (?1 IS NULL OR status = ?1)",
            params![status],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "{STARTUP_SELECT} WHERE (?1 IS NULL OR s.status = ?1)
             ORDER BY s.created_at DESC, s.startup_id DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let startups = stmt
            .query_map(params![status, per_page, offset(page, per_page)], startup_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok((startups, total))
    }

    pub fn recent_startups(&self, limit: i64) -> SqlResult<Vec<Startup>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{STARTUP_SELECT} ORDER BY s.created_at DESC, s.startup_id DESC LIMIT ?1"
        ))?;
        stmt.query_map(params![limit], startup_from_row)?.collect()
    }

    /// Move a startup from `from` to `to` if and only if it is still in `from`.
    ///
    /// Entering `active` stamps `started_at`; entering `completed` stamps
    /// `ended_at`. `results` is stored when given. Returns false when the
    /// row was not in `from` (or does not exist), in which case nothing changed.
    pub fn transition_startup(
        &self,
        startup_id: i64,
        from: StartupStatus,
        to: StartupStatus,
        results: Option<&str>,
    ) -> SqlResult<bool> {
        let n = self.conn.lock().execute(
            "UPDATE startups SET
                status = ?3,
                started_at = CASE WHEN ?3 = 'active' THEN ?4 ELSE started_at END,
                ended_at = CASE WHEN ?3 = 'completed' THEN ?4 ELSE ended_at END,
                results = COALESCE(?5, results)
             WHERE startup_id = ?1 AND status = ?2",
            params![startup_id, from, to, now(), results],
        )?;
        Ok(n > 0)
    }

    pub fn increment_views(&self, startup_id: i64) -> SqlResult<()> {
        self.conn.lock().execute(
            "UPDATE startups SET views = views + 1 WHERE startup_id = ?1",
            params![startup_id],
        )?;
        Ok(())
    }

    // ── Membership requests ────────────────────────────────────────────

    /// Create the (startup, user) join request, or report what already exists.
    ///
    /// Runs in one transaction under the connection lock, so concurrent
    /// attempts for the same pair serialize: exactly one sees `Created`.
    /// A resolved request is put back to `pending` only when `reopen` is set.
    pub fn upsert_membership_request(
        &self,
        startup_id: i64,
        user_id: i64,
        reopen: bool,
    ) -> SqlResult<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                &format!("{REQUEST_SELECT} WHERE startup_id = ?1 AND user_id = ?2"),
                params![startup_id, user_id],
                request_from_row,
            )
            .optional()?;

        let outcome = match existing {
            None => {
                let joined_at = now();
                tx.execute(
                    "INSERT INTO membership_requests (startup_id, user_id, status, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![startup_id, user_id, RequestStatus::Pending, joined_at],
                )?;
                UpsertOutcome::Created(MembershipRequest {
                    request_id: tx.last_insert_rowid(),
                    startup_id,
                    user_id,
                    status: RequestStatus::Pending,
                    joined_at: from_unix(joined_at),
                })
            }
            Some(req) if req.status == RequestStatus::Pending => UpsertOutcome::AlreadyPending(req),
            Some(req) if reopen => {
                let joined_at = now();
                tx.execute(
                    "UPDATE membership_requests SET status = ?2, joined_at = ?3 WHERE request_id = ?1",
                    params![req.request_id, RequestStatus::Pending, joined_at],
                )?;
                UpsertOutcome::Reopened(MembershipRequest {
                    status: RequestStatus::Pending,
                    joined_at: from_unix(joined_at),
                    ..req
                })
            }
            Some(req) => UpsertOutcome::Resolved(req),
        };
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_membership_request(&self, request_id: i64) -> SqlResult<Option<MembershipRequest>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{REQUEST_SELECT} WHERE request_id = ?1"),
            params![request_id],
            request_from_row,
        )
        .optional()
    }

    pub fn find_membership_request(
        &self,
        startup_id: i64,
        user_id: i64,
    ) -> SqlResult<Option<MembershipRequest>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{REQUEST_SELECT} WHERE startup_id = ?1 AND user_id = ?2"),
            params![startup_id, user_id],
            request_from_row,
        )
        .optional()
    }

    /// Resolve a pending request. Returns false if it was not pending.
    pub fn resolve_membership_request(&self, request_id: i64, status: RequestStatus) -> SqlResult<bool> {
        let n = self.conn.lock().execute(
            "UPDATE membership_requests SET status = ?2 WHERE request_id = ?1 AND status = 'pending'",
            params![request_id, status],
        )?;
        Ok(n > 0)
    }

    pub fn count_accepted(&self, startup_id: i64) -> SqlResult<i64> {
        self.conn.lock().query_row(
            "SELECT COUNT(*) FROM membership_requests WHERE startup_id = ?1 AND status = 'accepted'",
            params![startup_id],
            |row| row.get(0),
        )
    }

    /// Users with an accepted request for the startup, in acceptance order.
    pub fn list_members(&self, startup_id: i64) -> SqlResult<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{USER_SELECT} JOIN membership_requests m ON m.user_id = u.user_id
             WHERE m.startup_id = ?1 AND m.status = 'accepted'
             ORDER BY m.joined_at, m.request_id"
        ))?;
        stmt.query_map(params![startup_id], user_from_row)?.collect()
    }

    // ── Admin sessions ─────────────────────────────────────────────────

    /// Issue a session token valid for `ttl`. Only its SHA-256 is stored.
    pub fn create_session(&self, user_id: i64, ttl: Duration) -> SqlResult<String> {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let created = now();
        let expires = created + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        self.conn.lock().execute(
            "INSERT INTO admin_sessions (token_hash, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![token_hash(&token), user_id, created, expires],
        )?;
        Ok(token)
    }

    /// The session's user, or `None` if the token is unknown or expired.
    pub fn validate_session(&self, token: &str) -> SqlResult<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id FROM admin_sessions WHERE token_hash = ?1 AND expires_at > ?2",
            params![token_hash(token), now()],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn delete_session(&self, token: &str) -> SqlResult<bool> {
        let n = self.conn.lock().execute(
            "DELETE FROM admin_sessions WHERE token_hash = ?1",
            params![token_hash(token)],
        )?;
        Ok(n > 0)
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn purge_expired_sessions(&self) -> SqlResult<usize> {
        self.conn.lock().execute(
            "DELETE FROM admin_sessions WHERE expires_at <= ?1",
            params![now()],
        )
    }

    // ── Dashboard ──────────────────────────────────────────────────────

    pub fn statistics(&self) -> SqlResult<Stats> {
        self.conn.lock().query_row(
            "SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM startups),
                (SELECT COUNT(*) FROM startups WHERE status = 'pending'),
                (SELECT COUNT(*) FROM startups WHERE status = 'active'),
                (SELECT COUNT(*) FROM startups WHERE status = 'completed'),
                (SELECT COUNT(*) FROM startups WHERE status = 'rejected'),
                (SELECT COUNT(*) FROM membership_requests),
                (SELECT COUNT(*) FROM membership_requests WHERE status = 'pending'),
                (SELECT COUNT(*) FROM membership_requests WHERE status = 'accepted')",
            [],
            |row| {
                Ok(Stats {
                    total_users: row.get(0)?,
                    total_startups: row.get(1)?,
                    pending_startups: row.get(2)?,
                    active_startups: row.get(3)?,
                    completed_startups: row.get(4)?,
                    rejected_startups: row.get(5)?,
                    total_requests: row.get(6)?,
                    pending_requests: row.get(7)?,
                    accepted_members: row.get(8)?,
                })
            },
        )
    }
}

// ── Row mapping ────────────────────────────────────────────────────────

fn now() -> i64 {
    Utc::now().timestamp()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Row offset of a 1-based page. Saturates, so a page far past the end
/// reads as empty instead of overflowing.
fn offset(page: i64, per_page: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(per_page.max(0))
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn user_from_row(row: &Row<'_>) -> SqlResult<User> {
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        gender: row.get(5)?,
        birth_date: row.get(6)?,
        bio: row.get(7)?,
        joined_at: from_unix(row.get(8)?),
        is_admin: row.get(9)?,
    })
}

fn startup_from_row(row: &Row<'_>) -> SqlResult<Startup> {
    Ok(Startup {
        startup_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        logo: row.get(3)?,
        group_link: row.get(4)?,
        owner_id: row.get(5)?,
        owner_name: row.get(6)?,
        status: row.get(7)?,
        created_at: from_unix(row.get(8)?),
        started_at: row.get::<_, Option<i64>>(9)?.map(from_unix),
        ended_at: row.get::<_, Option<i64>>(10)?.map(from_unix),
        results: row.get(11)?,
        views: row.get(12)?,
    })
}

fn request_from_row(row: &Row<'_>) -> SqlResult<MembershipRequest> {
    Ok(MembershipRequest {
        request_id: row.get(0)?,
        startup_id: row.get(1)?,
        user_id: row.get(2)?,
        status: row.get(3)?,
        joined_at: from_unix(row.get(4)?),
    })
}

impl ToSql for StartupStatus {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StartupStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for RequestStatus {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RequestStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}
