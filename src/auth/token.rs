//! Token codec.
//!
//! - Opaque random tokens (session cookies, refresh tokens, OAuth state, PKCE
//!   verifiers, CSRF tokens), base64url encoded without padding
//! - SHA-256 hex digests used as storage/lookup keys for those tokens
//! - PKCE S256 challenge derivation
//! - Constant-time comparison for security decisions

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::auth::error::AuthError;

/// Default number of random bytes when a caller passes zero.
const DEFAULT_TOKEN_BYTES: usize = 32;

/// PKCE challenge method constant.
pub const PKCE_METHOD: &str = "S256";

/// Return `n` bytes from the operating system CSPRNG, base64url encoded.
///
/// Fails only when the OS entropy source does.
pub fn random_token(n: usize) -> Result<String, AuthError> {
    let n = if n == 0 { DEFAULT_TOKEN_BYTES } else { n };
    let mut raw = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| AuthError::Internal(format!("entropy source failure: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// SHA-256 digest of a token, returned as a hex string.
///
/// Surrounding whitespace is ignored so a token copied with a trailing newline
/// still resolves to the same row.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the S256 challenge from a verifier.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(hash)
}

/// Constant-time string equality. Empty values never match.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
