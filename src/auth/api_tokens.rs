//! API Token Manager.
//!
//! Login hands out a pair: a short-lived HS256 access token that is verified
//! without touching the database, and a long-lived opaque refresh token whose
//! hash is stored in `api_refresh_tokens`. Every refresh token descended from
//! one login shares a family id. Rotating a token retires it; presenting a
//! retired, revoked or expired token again revokes the whole family.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;
use crate::auth::token::{hash_token, random_token};
use crate::clock::Clock;
use crate::db::Database;

/// Random bytes in a family id.
const FAMILY_ID_BYTES: usize = 20;
/// Random bytes in a refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;
/// Random bytes in an access token `jti`.
const JTI_BYTES: usize = 20;

pub const DEFAULT_ACCESS_TTL: Duration = Duration::minutes(10);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::days(30);

// =============================================================================
// Access tokens
// =============================================================================

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    /// Refresh-token family the access token was minted under.
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

/// The caller behind a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPrincipal {
    pub user_id: i64,
    pub family_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens.
pub struct AccessTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl AccessTokenCodec {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::NotConfigured(
                "api access token secret is not set".to_string(),
            ));
        }
        let ttl = if ttl <= Duration::zero() {
            DEFAULT_ACCESS_TTL
        } else {
            ttl
        };

        // Expiry is checked against the injected clock, not the system time.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign an access token for `user_id` bound to `family_id`.
    pub fn issue(
        &self,
        user_id: i64,
        family_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        if user_id <= 0 {
            return Err(AuthError::InvalidInput("user id must be positive".to_string()));
        }
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            sid: family_id.trim().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: random_token(JTI_BYTES)?,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("sign access token: {e}")))?;
        Ok((token, expires_at))
    }

    /// Verify signature, algorithm, issuer, audience and expiry.
    ///
    /// A token is expired once `now >= exp`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<ApiPrincipal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Unauthorized("missing access token".to_string()));
        }
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::Unauthorized(format!("invalid access token: {e}")))?;
        let claims = data.claims;

        if now.timestamp() >= claims.exp {
            return Err(AuthError::Unauthorized("access token expired".to_string()));
        }
        let user_id: i64 = claims
            .sub
            .trim()
            .parse()
            .map_err(|_| AuthError::Unauthorized("invalid access token subject".to_string()))?;
        if user_id <= 0 {
            return Err(AuthError::Unauthorized("invalid access token subject".to_string()));
        }
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Unauthorized("invalid access token expiry".to_string()))?;

        Ok(ApiPrincipal {
            user_id,
            family_id: claims.sid,
            expires_at,
        })
    }
}

// =============================================================================
// Revoked-family blocklist
// =============================================================================

/// Families revoked by reuse detection, remembered for one access-token TTL.
///
/// Access tokens are otherwise stateless, so without this an access token
/// minted before the reuse would stay valid until it expires.
pub struct RevokedFamilies {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RevokedFamilies {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, family_id: &str) {
        let until = self.clock.now() + self.ttl;
        self.lock().insert(family_id.to_string(), until);
    }

    pub fn contains(&self, family_id: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .get(family_id)
            .is_some_and(|until| now < *until)
    }

    /// Forget entries whose access tokens have all expired.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, until| now < *until);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Refresh tokens
// =============================================================================

/// Stored refresh-token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub family_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<i64>,
}

impl RefreshTokenRecord {
    /// Revoked, already rotated, or expired. Presenting such a token is reuse.
    pub fn is_spent(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_some() || self.replaced_by_token_id.is_some() || now >= self.expires_at
    }
}

/// Credentials returned at login and on every refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub user_id: i64,
    pub family_id: String,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// What happened to the presented token inside the rotation transaction.
enum Rotation {
    Unknown,
    Reused { family_id: String },
    Rotated {
        user_id: i64,
        family_id: String,
        access_token: String,
        access_expires_at: DateTime<Utc>,
    },
}

/// Issues, rotates and revokes API credentials.
pub struct ApiTokenManager {
    db: Database,
    clock: Arc<dyn Clock>,
    codec: AccessTokenCodec,
    refresh_ttl: Duration,
    revoked: RevokedFamilies,
}

impl std::fmt::Debug for ApiTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenManager")
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl ApiTokenManager {
    pub fn new(db: Database, clock: Arc<dyn Clock>, codec: AccessTokenCodec, refresh_ttl: Duration) -> Self {
        let refresh_ttl = if refresh_ttl <= Duration::zero() {
            DEFAULT_REFRESH_TTL
        } else {
            refresh_ttl
        };
        let revoked = RevokedFamilies::new(codec.ttl(), clock.clone());
        Self {
            db,
            clock,
            codec,
            refresh_ttl,
            revoked,
        }
    }

    /// Start a new family for `user_id` and return its first pair.
    pub fn issue_token_pair(&self, user_id: i64) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let family_id = random_token(FAMILY_ID_BYTES)?;
        let refresh_token = random_token(REFRESH_TOKEN_BYTES)?;
        let refresh_expires_at = now + self.refresh_ttl;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_refresh_tokens (user_id, family_id, token_hash, expires_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, family_id, hash_token(&refresh_token), refresh_expires_at, now],
            )
        })?;

        let (access_token, access_expires_at) = self.codec.issue(user_id, &family_id, now)?;
        tracing::info!(user_id, family_id = %family_id, "API token family started");
        Ok(TokenPair {
            user_id,
            family_id,
            access_token,
            access_token_expires_at: access_expires_at,
            refresh_token,
            refresh_token_expires_at: refresh_expires_at,
        })
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The lookup and both writes run in one IMMEDIATE transaction, so two
    /// concurrent rotations of the same token serialize and the loser sees a
    /// spent token. A spent token revokes its family, blocklists it for
    /// access tokens, and fails with `TokenReuse`.
    pub fn rotate(&self, raw_refresh_token: &str) -> Result<TokenPair, AuthError> {
        if raw_refresh_token.trim().is_empty() {
            return Err(AuthError::Unauthorized("missing refresh token".to_string()));
        }
        let now = self.clock.now();
        let old_hash = hash_token(raw_refresh_token);
        let new_refresh_token = random_token(REFRESH_TOKEN_BYTES)?;
        let new_hash = hash_token(&new_refresh_token);
        let refresh_expires_at = now + self.refresh_ttl;

        let outcome = self.db.with_tx(|tx| -> Result<Rotation, AuthError> {
            let Some(current) = select_by_hash(tx, &old_hash)? else {
                return Ok(Rotation::Unknown);
            };

            if current.is_spent(now) {
                // Commit the family revocation; this is not a rollback path.
                tx.execute(
                    "UPDATE api_refresh_tokens SET revoked_at = coalesce(revoked_at, ?2) WHERE family_id = ?1",
                    params![current.family_id, now],
                )?;
                return Ok(Rotation::Reused {
                    family_id: current.family_id,
                });
            }

            tx.execute(
                "INSERT INTO api_refresh_tokens (user_id, family_id, token_hash, expires_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![current.user_id, current.family_id, new_hash, refresh_expires_at, now],
            )?;
            let new_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE api_refresh_tokens SET last_used_at = ?2, revoked_at = ?2, replaced_by_token_id = ?3 \
                 WHERE id = ?1",
                params![current.id, now, new_id],
            )?;
            // Signed before commit so a codec failure rolls the rotation back.
            let (access_token, access_expires_at) =
                self.codec.issue(current.user_id, &current.family_id, now)?;
            Ok(Rotation::Rotated {
                user_id: current.user_id,
                family_id: current.family_id,
                access_token,
                access_expires_at,
            })
        })?;

        match outcome {
            Rotation::Unknown => Err(AuthError::Unauthorized("unknown refresh token".to_string())),
            Rotation::Reused { family_id } => {
                self.revoked.insert(&family_id);
                tracing::warn!(family_id = %family_id, "Refresh token reuse detected, family revoked");
                Err(AuthError::TokenReuse { family_id })
            }
            Rotation::Rotated {
                user_id,
                family_id,
                access_token,
                access_expires_at,
            } => {
                tracing::debug!(user_id, family_id = %family_id, "Refresh token rotated");
                Ok(TokenPair {
                    user_id,
                    family_id,
                    access_token,
                    access_token_expires_at: access_expires_at,
                    refresh_token: new_refresh_token,
                    refresh_token_expires_at: refresh_expires_at,
                })
            }
        }
    }

    /// Revoke every live token in a family and blocklist its access tokens.
    /// Idempotent; returns rows changed.
    pub fn revoke_family(&self, family_id: &str) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE api_refresh_tokens SET revoked_at = ?2 WHERE family_id = ?1 AND revoked_at IS NULL",
                params![family_id.trim(), now],
            )
        })?;
        self.revoked.insert(family_id.trim());
        if changed > 0 {
            tracing::info!(family_id = %family_id, revoked = changed, "Token family revoked");
        }
        Ok(changed)
    }

    /// Revoke the single token behind `raw_refresh_token` (logout). Unknown
    /// or blank tokens are a no-op.
    pub fn revoke_token(&self, raw_refresh_token: &str) -> Result<(), AuthError> {
        if raw_refresh_token.trim().is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE api_refresh_tokens SET revoked_at = coalesce(revoked_at, ?2) WHERE token_hash = ?1",
                params![hash_token(raw_refresh_token), now],
            )
        })?;
        Ok(())
    }

    pub fn get_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let record = self.db.with_conn(|conn| select_by_hash(conn, token_hash.trim()))?;
        Ok(record)
    }

    /// Verify an access token and reject families revoked by reuse detection.
    pub fn validate_access(&self, token: &str) -> Result<ApiPrincipal, AuthError> {
        let principal = self.codec.verify(token, self.clock.now())?;
        if self.revoked.contains(&principal.family_id) {
            return Err(AuthError::Unauthorized("token family revoked".to_string()));
        }
        Ok(principal)
    }

    pub fn revoked_families(&self) -> &RevokedFamilies {
        &self.revoked
    }

    /// Delete rows that expired more than one refresh TTL ago.
    ///
    /// Recently expired rows are kept so a replayed token still trips reuse
    /// detection instead of reading as unknown.
    pub fn purge_expired(&self) -> Result<usize, AuthError> {
        let cutoff = self.clock.now() - self.refresh_ttl;
        let deleted = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM api_refresh_tokens WHERE expires_at <= ?1",
                params![cutoff],
            )
        })?;
        Ok(deleted)
    }
}

fn select_by_hash(
    conn: &rusqlite::Connection,
    token_hash: &str,
) -> rusqlite::Result<Option<RefreshTokenRecord>> {
    conn.query_row(
        "SELECT id, user_id, family_id, token_hash, expires_at, created_at, last_used_at, revoked_at, replaced_by_token_id \
         FROM api_refresh_tokens WHERE token_hash = ?1",
        params![token_hash],
        |row| {
            Ok(RefreshTokenRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                family_id: row.get(2)?,
                token_hash: row.get(3)?,
                expires_at: row.get(4)?,
                created_at: row.get(5)?,
                last_used_at: row.get(6)?,
                revoked_at: row.get(7)?,
                replaced_by_token_id: row.get(8)?,
            })
        },
    )
    .optional()
}
