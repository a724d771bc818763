//! Web Session Manager.
//!
//! Browser sessions are rows in `user_sessions` keyed by the SHA-256 of a
//! random cookie token. The raw token only ever exists in the cookie.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::auth::error::AuthError;
use crate::auth::token::{hash_token, random_token};
use crate::auth::users::{USER_COLUMNS, User, user_from_row};
use crate::clock::Clock;
use crate::db::Database;

/// Random bytes in a session token.
const SESSION_TOKEN_BYTES: usize = 32;

/// Client details recorded alongside a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

/// Stored session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// A freshly minted session. `token` goes into the cookie and nowhere else.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of validating a session cookie.
#[derive(Debug, Clone)]
pub enum SessionState {
    Authenticated { user: User, session: Session },
    /// `clear_cookie` is set when a cookie was presented but is no longer
    /// valid, so the caller should expire it.
    Anonymous { clear_cookie: bool },
}

/// Issues, validates, touches and revokes browser sessions.
#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    touch_after: Duration,
}

impl SessionManager {
    pub fn new(db: Database, clock: Arc<dyn Clock>, ttl: Duration, touch_after: Duration) -> Self {
        Self {
            db,
            clock,
            ttl,
            touch_after,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a session for `user`. Only the token hash is stored.
    pub fn create_session(&self, user: &User, meta: &RequestMeta) -> Result<IssuedSession, AuthError> {
        let token = random_token(SESSION_TOKEN_BYTES)?;
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_sessions (user_id, token_hash, expires_at, created_at, last_seen_at, ip, user_agent) \
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)",
                params![
                    user.id,
                    hash_token(&token),
                    expires_at,
                    now,
                    non_empty(&meta.ip),
                    non_empty(&meta.user_agent),
                ],
            )
        })?;

        tracing::info!(user_id = user.id, ip = %meta.ip, "Session created");
        Ok(IssuedSession { token, expires_at })
    }

    /// Resolve a raw cookie value to a user.
    ///
    /// Unknown, revoked and expired sessions come back as anonymous with
    /// `clear_cookie` set. Dead rows are deleted on the way.
    pub fn validate(&self, raw_token: &str) -> Result<SessionState, AuthError> {
        if raw_token.trim().is_empty() {
            return Ok(SessionState::Anonymous {
                clear_cookie: false,
            });
        }

        let token_hash = hash_token(raw_token);
        let Some((session, user)) = find_session_and_user(&self.db, &token_hash)? else {
            return Ok(SessionState::Anonymous { clear_cookie: true });
        };

        let now = self.clock.now();
        if session.is_revoked() || session.is_expired(now) {
            delete_session_by_hash(&self.db, &token_hash)?;
            tracing::debug!(session_id = session.id, user_id = user.id, "Dropped stale session");
            return Ok(SessionState::Anonymous { clear_cookie: true });
        }

        Ok(SessionState::Authenticated { user, session })
    }

    /// Whether `last_seen_at` is old enough to be worth a write.
    pub fn needs_touch(&self, session: &Session) -> bool {
        self.clock.now() - session.last_seen_at >= self.touch_after
    }

    /// Record activity on a session.
    pub fn touch(&self, session_id: i64) -> Result<(), AuthError> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE user_sessions SET last_seen_at = ?2 WHERE id = ?1",
                params![session_id, now],
            )
        })?;
        Ok(())
    }

    /// Best-effort `last_seen_at` update off the request path.
    ///
    /// Failures are logged and dropped. Without a tokio runtime the touch is
    /// skipped.
    pub fn touch_in_background(&self, session: &Session) {
        if !self.needs_touch(session) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = self.clone();
        let session_id = session.id;
        handle.spawn_blocking(move || {
            if let Err(e) = manager.touch(session_id) {
                tracing::warn!(session_id, error = %e, "Failed to touch session");
            }
        });
    }

    /// Delete the session behind `raw_token`. Absent or unknown tokens are a no-op.
    pub fn logout(&self, raw_token: Option<&str>) -> Result<(), AuthError> {
        let Some(raw) = raw_token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        let deleted = delete_session_by_hash(&self.db, &hash_token(raw))?;
        if deleted > 0 {
            tracing::info!("Session logged out");
        }
        Ok(())
    }

    /// Remove expired and revoked rows. Returns the number deleted.
    pub fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let deleted = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM user_sessions WHERE expires_at <= ?1 OR revoked_at IS NOT NULL",
                params![now],
            )
        })?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Look up a session and its user by token hash.
pub fn find_session_and_user(
    db: &Database,
    token_hash: &str,
) -> Result<Option<(Session, User)>, AuthError> {
    let found = db.with_conn(|conn| {
        conn.query_row(
            &format!(
                "SELECT s.id, s.user_id, s.token_hash, s.expires_at, s.created_at, s.last_seen_at, \
                 coalesce(s.ip, ''), coalesce(s.user_agent, ''), s.revoked_at, {USER_COLUMNS} \
                 FROM user_sessions s JOIN users u ON u.id = s.user_id \
                 WHERE s.token_hash = ?1"
            ),
            params![token_hash.trim()],
            |row| {
                let session = Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    token_hash: row.get(2)?,
                    expires_at: row.get(3)?,
                    created_at: row.get(4)?,
                    last_seen_at: row.get(5)?,
                    ip: row.get(6)?,
                    user_agent: row.get(7)?,
                    revoked_at: row.get(8)?,
                };
                Ok((session, user_from_row(row, 9)?))
            },
        )
        .optional()
    })?;
    Ok(found)
}

/// Delete a session by token hash. Returns the number of rows removed.
pub fn delete_session_by_hash(db: &Database, token_hash: &str) -> Result<usize, AuthError> {
    let deleted = db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM user_sessions WHERE token_hash = ?1",
            params![token_hash.trim()],
        )
    })?;
    Ok(deleted)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
