//! In-memory tracker for pending OAuth authorization requests.
//!
//! Each record maps an unguessable `state` value to the provider, the PKCE
//! verifier (never sent to the browser) and the post-login redirect target.
//! Records are single-use and short-lived. They live in process memory only,
//! so a restart invalidates every in-flight login.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::auth::error::AuthError;
use crate::auth::social::Provider;
use crate::auth::token::random_token;
use crate::clock::Clock;

/// Random bytes in a state value.
const STATE_BYTES: usize = 24;
/// Random bytes in a PKCE verifier (43 chars once encoded, the RFC 7636 minimum).
const VERIFIER_BYTES: usize = 32;
/// Default lifetime of a pending flow.
pub const DEFAULT_FLOW_TTL: Duration = Duration::minutes(6);

/// A pending authorization request.
#[derive(Debug, Clone)]
pub struct OAuthFlowRecord {
    pub state: String,
    pub provider: Provider,
    pub code_verifier: String,
    pub redirect_to: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthFlowRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-local store of pending flows.
pub struct OAuthFlowStore {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    flows: Mutex<HashMap<String, OAuthFlowRecord>>,
}

impl OAuthFlowStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = if ttl <= Duration::zero() {
            DEFAULT_FLOW_TTL
        } else {
            ttl
        };
        Self {
            ttl,
            clock,
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Start a flow: fresh state + verifier, stored until `now + ttl`.
    pub fn create(&self, provider: Provider, redirect_to: &str) -> Result<OAuthFlowRecord, AuthError> {
        let now = self.clock.now();
        let state = random_token(STATE_BYTES)?;
        let code_verifier = random_token(VERIFIER_BYTES)?;
        let record = OAuthFlowRecord {
            state: state.clone(),
            provider,
            code_verifier,
            redirect_to: redirect_to.to_string(),
            expires_at: now + self.ttl,
        };

        let mut flows = self.lock();
        sweep_locked(&mut flows, now);
        flows.insert(state, record.clone());
        tracing::debug!(provider = %provider, pending = flows.len(), "OAuth flow created");
        Ok(record)
    }

    /// Take the flow for `state`.
    ///
    /// The record is removed before it is validated, so a state value can be
    /// presented at most once even when validation fails. A provider mismatch
    /// or an expired record is reported as `NotFound`, same as a missing one.
    pub fn consume(&self, state: &str, provider: Provider) -> Result<OAuthFlowRecord, AuthError> {
        let now = self.clock.now();
        let mut flows = self.lock();
        sweep_locked(&mut flows, now);

        let record = flows
            .remove(state)
            .ok_or_else(|| AuthError::NotFound("oauth flow not found".to_string()))?;
        if record.provider != provider || record.is_expired(now) {
            tracing::warn!(
                expected = %record.provider,
                presented = %provider,
                "OAuth flow rejected on consume"
            );
            return Err(AuthError::NotFound("oauth flow not found".to_string()));
        }
        Ok(record)
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut flows = self.lock();
        sweep_locked(&mut flows, now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OAuthFlowRecord>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sweep_locked(flows: &mut HashMap<String, OAuthFlowRecord>, now: DateTime<Utc>) -> usize {
    let before = flows.len();
    flows.retain(|_, record| !record.is_expired(now));
    before - flows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::code_challenge;
    use crate::clock::ManualClock;

    fn store() -> (OAuthFlowStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (OAuthFlowStore::new(DEFAULT_FLOW_TTL, clock.clone()), clock)
    }

    #[test]
    fn test_create_and_consume() {
        let (flows, _clock) = store();
        let record = flows.create(Provider::Google, "/account").unwrap();
        assert!(!record.state.is_empty());
        assert_ne!(record.state, record.code_verifier);
        assert_eq!(code_challenge(&record.code_verifier).len(), 43);

        let consumed = flows.consume(&record.state, Provider::Google).unwrap();
        assert_eq!(consumed.code_verifier, record.code_verifier);
        assert_eq!(consumed.redirect_to, "/account");
        assert!(flows.is_empty());
    }

    #[test]
    fn test_consume_twice_fails() {
        let (flows, _clock) = store();
        let record = flows.create(Provider::Github, "/").unwrap();
        flows.consume(&record.state, Provider::Github).unwrap();
        let err = flows.consume(&record.state, Provider::Github).unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[test]
    fn test_provider_mismatch_is_not_found_and_burns_state() {
        let (flows, _clock) = store();
        let record = flows.create(Provider::Google, "/").unwrap();

        let err = flows.consume(&record.state, Provider::Github).unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));

        // The state was consumed by the failed attempt.
        let err = flows.consume(&record.state, Provider::Google).unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[test]
    fn test_expired_flow_is_not_found() {
        let (flows, clock) = store();
        let record = flows.create(Provider::Google, "/").unwrap();
        clock.advance(DEFAULT_FLOW_TTL + Duration::seconds(1));
        let err = flows.consume(&record.state, Provider::Google).unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[test]
    fn test_flow_valid_just_before_expiry() {
        let (flows, clock) = store();
        let record = flows.create(Provider::Google, "/").unwrap();
        clock.advance(DEFAULT_FLOW_TTL - Duration::seconds(1));
        assert!(flows.consume(&record.state, Provider::Google).is_ok());
    }

    #[test]
    fn test_unknown_state_is_not_found() {
        let (flows, _clock) = store();
        let err = flows.consume("nope", Provider::Google).unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[test]
    fn test_create_sweeps_expired() {
        let (flows, clock) = store();
        flows.create(Provider::Google, "/").unwrap();
        flows.create(Provider::Github, "/").unwrap();
        clock.advance(Duration::minutes(7));
        flows.create(Provider::Google, "/").unwrap();
        assert_eq!(flows.len(), 1);
    }

    #[test]
    fn test_sweep_counts_removed() {
        let (flows, clock) = store();
        flows.create(Provider::Google, "/").unwrap();
        flows.create(Provider::Google, "/").unwrap();
        assert_eq!(flows.sweep(), 0);
        clock.advance(Duration::minutes(10));
        assert_eq!(flows.sweep(), 2);
    }

    #[test]
    fn test_non_positive_ttl_falls_back_to_default() {
        let clock = Arc::new(ManualClock::default());
        let flows = OAuthFlowStore::new(Duration::zero(), clock.clone());
        let record = flows.create(Provider::Google, "/").unwrap();
        assert_eq!(record.expires_at, clock.now() + DEFAULT_FLOW_TTL);
    }
}
