use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension, Row, params};
use serde::Serialize;

use crate::auth::error::AuthError;
use crate::auth::social::SocialProfile;
use crate::db::Database;

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    /// Lower-cased. Empty when the account has no email.
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider account linked to a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub provider_user_id: String,
    pub provider_email: String,
    pub provider_name: String,
    pub provider_handle: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const USER_COLUMNS: &str = "u.id, coalesce(u.email, ''), u.display_name, coalesce(u.avatar_url, ''), u.created_at, u.updated_at";

/// Map a row selected with [`USER_COLUMNS`] starting at `offset`.
pub(crate) fn user_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        email: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        avatar_url: row.get(offset + 3)?,
        created_at: row.get(offset + 4)?,
        updated_at: row.get(offset + 5)?,
    })
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Find the user linked to `(provider, provider_user_id)`.
pub fn find_by_identity(
    db: &Database,
    provider: &str,
    provider_user_id: &str,
) -> Result<Option<User>, AuthError> {
    let provider = provider.trim().to_lowercase();
    let provider_user_id = provider_user_id.trim();
    let user = db.with_conn(|conn| {
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS} FROM user_identities ui \
                 JOIN users u ON u.id = ui.user_id \
                 WHERE ui.provider = ?1 AND ui.provider_user_id = ?2"
            ),
            params![provider, provider_user_id],
            |row| user_from_row(row, 0),
        )
        .optional()
    })?;
    Ok(user)
}

/// Find a user by email (case-insensitive). A blank email never matches.
pub fn find_by_email(db: &Database, email: &str) -> Result<Option<User>, AuthError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Ok(None);
    }
    let user = db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1"),
            params![email],
            |row| user_from_row(row, 0),
        )
        .optional()
    })?;
    Ok(user)
}

/// Get a single user by ID.
pub fn find_by_id(db: &Database, user_id: i64) -> Result<User, AuthError> {
    db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
            params![user_id],
            |row| user_from_row(row, 0),
        )
        .optional()
    })?
    .ok_or_else(|| AuthError::NotFound(format!("user {user_id} not found")))
}

/// All identities linked to a user, ordered by provider.
pub fn list_identities(db: &Database, user_id: i64) -> Result<Vec<Identity>, AuthError> {
    let identities = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, provider, provider_user_id, coalesce(provider_email, ''), \
             coalesce(provider_name, ''), coalesce(provider_handle, ''), coalesce(avatar_url, ''), \
             created_at, updated_at \
             FROM user_identities WHERE user_id = ?1 ORDER BY provider ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Identity {
                id: row.get(0)?,
                user_id: row.get(1)?,
                provider: row.get(2)?,
                provider_user_id: row.get(3)?,
                provider_email: row.get(4)?,
                provider_name: row.get(5)?,
                provider_handle: row.get(6)?,
                avatar_url: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(identities)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Create a user and its first identity in one transaction.
///
/// Only a verified email is stored on the user. Unique violations raised by
/// the inserts map to `EmailConflict` / `IdentityConflict`, which covers a
/// concurrent sign-in racing between the check and the insert.
pub fn create_user_with_identity(
    db: &Database,
    profile: &SocialProfile,
    now: DateTime<Utc>,
) -> Result<User, AuthError> {
    profile.validate()?;

    let email = profile.verified_email().map(str::to_lowercase);
    let display_name = display_name_for(profile);
    let avatar_url = non_empty(&profile.avatar_url);

    let user = db.with_tx(|tx| -> Result<User, AuthError> {
        if let Some(email) = email.as_deref() {
            let existing: Option<i64> = tx
                .query_row("SELECT id FROM users WHERE email = ?1", params![email], |row| {
                    row.get(0)
                })
                .optional()?;
            if existing.is_some() {
                return Err(AuthError::EmailConflict);
            }
        }

        tx.execute(
            "INSERT INTO users (email, display_name, avatar_url, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![email, display_name, avatar_url, now],
        )
        .map_err(|e| map_unique(e, AuthError::EmailConflict))?;
        let user_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO user_identities (user_id, provider, provider_user_id, provider_email, \
             provider_name, provider_handle, avatar_url, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                user_id,
                profile.provider.as_str(),
                profile.provider_user_id.trim(),
                non_empty(&profile.email.to_lowercase()),
                non_empty(&profile.name),
                profile.username.as_deref().and_then(non_empty),
                avatar_url,
                now,
            ],
        )
        .map_err(|e| map_unique(e, AuthError::IdentityConflict))?;

        let user = tx.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
            params![user_id],
            |row| user_from_row(row, 0),
        )?;
        Ok(user)
    })?;

    tracing::info!(
        user_id = user.id,
        provider = %profile.provider,
        "User created from social profile"
    );
    Ok(user)
}

/// Refresh a user and its identity for `profile.provider` from fresh claims.
///
/// Display name and avatar on the user are only overwritten with non-empty
/// values. The identity's provider fields mirror the profile as-is.
pub fn update_user_from_profile(
    db: &Database,
    user_id: i64,
    profile: &SocialProfile,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    db.with_tx(|tx| -> Result<(), AuthError> {
        tx.execute(
            "UPDATE users SET \
               display_name = coalesce(?2, display_name), \
               avatar_url = coalesce(?3, avatar_url), \
               updated_at = ?4 \
             WHERE id = ?1",
            params![user_id, non_empty(&profile.name), non_empty(&profile.avatar_url), now],
        )?;
        tx.execute(
            "UPDATE user_identities SET \
               provider_email = ?3, provider_name = ?4, provider_handle = ?5, \
               avatar_url = ?6, updated_at = ?7 \
             WHERE user_id = ?1 AND provider = ?2",
            params![
                user_id,
                profile.provider.as_str(),
                non_empty(&profile.email.to_lowercase()),
                non_empty(&profile.name),
                profile.username.as_deref().and_then(non_empty),
                non_empty(&profile.avatar_url),
                now,
            ],
        )?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Map a verified social profile to a local user.
///
/// 1. Known identity: refresh the user from the profile and return it.
/// 2. Unknown identity whose verified email already belongs to a user:
///    `EmailConflict`. Accounts are never merged across providers.
/// 3. Otherwise create the user and identity together.
pub fn find_or_create_social_user(
    db: &Database,
    profile: &SocialProfile,
    now: DateTime<Utc>,
) -> Result<User, AuthError> {
    profile.validate()?;

    if let Some(existing) = find_by_identity(db, profile.provider.as_str(), &profile.provider_user_id)? {
        update_user_from_profile(db, existing.id, profile, now)?;
        tracing::debug!(user_id = existing.id, provider = %profile.provider, "Existing identity signed in");
        return find_by_id(db, existing.id);
    }

    if let Some(email) = profile.verified_email() {
        if let Some(owner) = find_by_email(db, email)? {
            tracing::warn!(
                user_id = owner.id,
                provider = %profile.provider,
                "Sign-in rejected: email belongs to another account"
            );
            return Err(AuthError::EmailConflict);
        }
    }

    create_user_with_identity(db, profile, now)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn display_name_for(profile: &SocialProfile) -> String {
    [Some(profile.name.as_str()), profile.username.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("User")
        .to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Turn a UNIQUE constraint failure into `conflict`; pass anything else on.
fn map_unique(err: rusqlite::Error, conflict: AuthError) -> AuthError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if code.code == ErrorCode::ConstraintViolation {
            return conflict;
        }
    }
    err.into()
}
