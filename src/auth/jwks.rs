// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS (plain HTTP only for loopback, see `config`)
//! - Keys are cached with a configurable TTL
//! - Stale cache is used on fetch failure (fail-open for availability)
//! - After a failed fetch, requests skip the provider until a retry delay
//!   passes; the stale set is served meanwhile
//! - Refreshes triggered by an unknown `kid` are limited to one per
//!   `miss_refresh_interval`
//! - Verification fails closed: no matching key means `KeyNotFound`
//!
//! ## Concurrency
//!
//! The cached set sits behind an `Arc` that is swapped whole on a successful
//! fetch, so readers see either the old or the new set. Refreshes are
//! serialised by `refresh_lock`; a caller that waited while another caller
//! finished an attempt reuses that result instead of fetching again. Only the
//! scheduled refresh (`force_refresh`) always fetches. The fetch
//! itself runs on a detached task holding the lock, so a dropped request
//! never cancels a refresh half-way.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::instrument;

use super::error::ValidationFailure;

/// Default JWKS cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default upper bound on a single JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default minimum gap between refreshes triggered by an unknown `kid`.
pub const DEFAULT_MISS_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Longest wait before retrying the provider after a failed fetch. Shorter
/// cache TTLs shorten it.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Why a JWKS fetch produced no new key set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySetFetchError {
    #[error("JWKS request failed: {0}")]
    Transport(String),
    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),
    #[error("JWKS response could not be decoded: {0}")]
    Decode(String),
    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("JWKS contained no usable signing keys")]
    Empty,
}

/// Why a single JWK was left out of the key set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnusableKey {
    #[error("key has no kid")]
    MissingKeyId,
    #[error("key is not a signing key")]
    NotForSigning,
    #[error("symmetric keys are not accepted from a JWKS")]
    Symmetric,
    #[error("unsupported key algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid key material: {0}")]
    InvalidMaterial(String),
    #[error("unparseable JWK: {0}")]
    Unparseable(String),
}

/// Raw JWKS document. Keys stay untyped so one odd entry cannot poison the set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkDocument {
    pub keys: Vec<serde_json::Value>,
}

/// A public key usable for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Convert a JWK into a verification key.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, UnusableKey> {
        let kid = jwk
            .common
            .key_id
            .clone()
            .filter(|kid| !kid.is_empty())
            .ok_or(UnusableKey::MissingKeyId)?;

        if let Some(key_use) = &jwk.common.public_key_use {
            if *key_use != PublicKeyUse::Signature {
                return Err(UnusableKey::NotForSigning);
            }
        }

        let (decoding_key, algorithm) = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => {
                let algorithm = match jwk.common.key_algorithm {
                    None | Some(KeyAlgorithm::RS256) => Algorithm::RS256,
                    Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                    Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                    Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                    Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                    Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                    Some(_) => return Err(UnusableKey::UnsupportedAlgorithm),
                };
                let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                    .map_err(|e| UnusableKey::InvalidMaterial(e.to_string()))?;
                (key, algorithm)
            }
            AlgorithmParameters::EllipticCurve(ec) => {
                let algorithm = match (jwk.common.key_algorithm, &ec.curve) {
                    (Some(KeyAlgorithm::ES256), EllipticCurve::P256)
                    | (None, EllipticCurve::P256) => Algorithm::ES256,
                    (Some(KeyAlgorithm::ES384), EllipticCurve::P384)
                    | (None, EllipticCurve::P384) => Algorithm::ES384,
                    _ => return Err(UnusableKey::UnsupportedAlgorithm),
                };
                let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                    .map_err(|e| UnusableKey::InvalidMaterial(e.to_string()))?;
                (key, algorithm)
            }
            AlgorithmParameters::OctetKeyPair(okp) => {
                match (jwk.common.key_algorithm, &okp.curve) {
                    (None | Some(KeyAlgorithm::EdDSA), EllipticCurve::Ed25519) => {}
                    _ => return Err(UnusableKey::UnsupportedAlgorithm),
                }
                let key = DecodingKey::from_ed_components(&okp.x)
                    .map_err(|e| UnusableKey::InvalidMaterial(e.to_string()))?;
                (key, Algorithm::EdDSA)
            }
            AlgorithmParameters::OctetKey(_) => return Err(UnusableKey::Symmetric),
            #[allow(unreachable_patterns)]
            _ => return Err(UnusableKey::UnsupportedAlgorithm),
        };

        Ok(Self {
            kid,
            algorithm,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// An immutable snapshot of the provider's signing keys.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    fetched_at: Instant,
    refresh_after: Instant,
}

impl SigningKeySet {
    /// Build a key set from a JWKS document, skipping unusable entries.
    ///
    /// # Errors
    ///
    /// `KeySetFetchError::Empty` if no entry is usable.
    pub fn from_document(document: &JwkDocument, ttl: Duration) -> Result<Self, KeySetFetchError> {
        let mut keys = HashMap::with_capacity(document.keys.len());
        for value in &document.keys {
            let parsed = serde_json::from_value::<Jwk>(value.clone())
                .map_err(|e| UnusableKey::Unparseable(e.to_string()))
                .and_then(|jwk| VerificationKey::from_jwk(&jwk));
            match parsed {
                Ok(key) => {
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Err(reason) => {
                    let kid = value.get("kid").and_then(|k| k.as_str()).unwrap_or("<none>");
                    tracing::warn!(target: "auth.jwks", kid, %reason, "Skipping JWKS entry");
                }
            }
        }

        if keys.is_empty() {
            return Err(KeySetFetchError::Empty);
        }

        let fetched_at = Instant::now();
        Ok(Self {
            keys,
            fetched_at,
            refresh_after: fetched_at + ttl,
        })
    }

    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    /// Key ids in sorted order.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.refresh_after
    }
}

/// Where key sets come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<JwkDocument, KeySetFetchError>;

    /// Short description for logs (usually the URL).
    fn describe(&self) -> &str;
}

/// Fetches the JWKS document from the identity provider over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    jwks_url: String,
    client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for the given JWKS endpoint.
    ///
    /// # Arguments
    /// - `jwks_url`: e.g. `https://login.microsoftonline.com/<tenant>/discovery/v2.0/keys`
    /// - `timeout`: per-request timeout of the HTTP client
    pub fn new(jwks_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self {
            jwks_url: jwks_url.into(),
            client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkDocument, KeySetFetchError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| KeySetFetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeySetFetchError::Status(response.status().as_u16()));
        }

        response
            .json::<JwkDocument>()
            .await
            .map_err(|e| KeySetFetchError::Decode(e.to_string()))
    }

    fn describe(&self) -> &str {
        &self.jwks_url
    }
}

/// What made a caller ask for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Empty or stale cache, or an explicit warm-up.
    Load,
    /// A fresh cache that lacks the requested `kid`.
    UnknownKey,
}

/// The most recent failed attempt; cleared by a successful fetch.
#[derive(Debug, Clone)]
struct FailedFetch {
    error: KeySetFetchError,
    retry_at: Instant,
}

/// State only touched while holding the refresh lock.
#[derive(Debug, Default)]
struct RefreshState {
    last_miss_refresh: Option<Instant>,
}

struct Inner {
    source: Arc<dyn KeySetSource>,
    cache: RwLock<Option<Arc<SigningKeySet>>>,
    refresh_lock: Arc<Mutex<RefreshState>>,
    /// Number of completed fetch attempts, successful or not.
    attempts: AtomicU64,
    last_failure: RwLock<Option<FailedFetch>>,
    cache_ttl: Duration,
    fetch_timeout: Duration,
    miss_refresh_interval: Duration,
}

impl Inner {
    async fn fetch_and_store(&self) -> Result<usize, KeySetFetchError> {
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(KeySetFetchError::Timeout(self.fetch_timeout)),
        }
        .and_then(|document| SigningKeySet::from_document(&document, self.cache_ttl));

        match fetched {
            Ok(set) => {
                let key_count = set.len();
                *self.cache.write().await = Some(Arc::new(set));
                *self.last_failure.write().await = None;
                tracing::info!(
                    target: "auth.jwks",
                    source = self.source.describe(),
                    key_count,
                    "JWKS cache refreshed"
                );
                Ok(key_count)
            }
            Err(e) => {
                if self.cache.read().await.is_some() {
                    tracing::warn!(target: "auth.jwks", source = self.source.describe(), error = %e, "JWKS refresh failed, serving cached keys");
                } else {
                    tracing::error!(target: "auth.jwks", source = self.source.describe(), error = %e, "JWKS fetch failed and no keys are cached");
                }
                *self.last_failure.write().await = Some(FailedFetch {
                    error: e.clone(),
                    retry_at: Instant::now() + self.cache_ttl.min(MAX_RETRY_DELAY),
                });
                Err(e)
            }
        }
    }

    async fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.cache.read().await.clone()
    }

    /// The last fetch error while its retry delay has not yet passed.
    async fn retry_pending(&self, now: Instant) -> Option<KeySetFetchError> {
        self.last_failure
            .read()
            .await
            .as_ref()
            .filter(|failure| now < failure.retry_at)
            .map(|failure| failure.error.clone())
    }

    /// Result of the most recent attempt, as seen by a caller that did not run it.
    async fn last_outcome(&self) -> Result<usize, KeySetFetchError> {
        if let Some(failure) = self.last_failure.read().await.as_ref() {
            return Err(failure.error.clone());
        }
        match self.snapshot().await {
            Some(set) => Ok(set.len()),
            None => Err(KeySetFetchError::Empty),
        }
    }
}

/// Resolves key ids to verification keys, caching the provider's key set.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct KeyResolver {
    inner: Arc<Inner>,
}

impl KeyResolver {
    /// Create a resolver over any key set source.
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache: RwLock::new(None),
                refresh_lock: Arc::new(Mutex::new(RefreshState::default())),
                attempts: AtomicU64::new(0),
                last_failure: RwLock::new(None),
                cache_ttl: DEFAULT_CACHE_TTL,
                fetch_timeout: DEFAULT_FETCH_TIMEOUT,
                miss_refresh_interval: DEFAULT_MISS_REFRESH_INTERVAL,
            }),
        }
    }

    /// Create a resolver that fetches from a JWKS URL.
    pub fn from_url(jwks_url: impl Into<String>, fetch_timeout: Duration) -> Self {
        Self::new(Arc::new(HttpKeySetSource::new(jwks_url, fetch_timeout)))
            .with_fetch_timeout(fetch_timeout)
    }

    /// Set the cache TTL. Only valid before the resolver is shared.
    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        self.reconfigure(|inner| inner.cache_ttl = ttl)
    }

    /// Set the fetch timeout. Only valid before the resolver is shared.
    pub fn with_fetch_timeout(self, timeout: Duration) -> Self {
        self.reconfigure(|inner| inner.fetch_timeout = timeout)
    }

    /// Set the minimum gap between refreshes caused by an unknown `kid`.
    /// Zero refreshes on every miss. Only valid before the resolver is shared.
    pub fn with_miss_refresh_interval(self, interval: Duration) -> Self {
        self.reconfigure(|inner| inner.miss_refresh_interval = interval)
    }

    fn reconfigure(self, apply: impl FnOnce(&mut Inner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(shared) => {
                tracing::warn!(target: "auth.jwks", "Resolver already shared, configuration change ignored");
                Self { inner: shared }
            }
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        self.inner.cache_ttl
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.inner.fetch_timeout
    }

    pub fn miss_refresh_interval(&self) -> Duration {
        self.inner.miss_refresh_interval
    }

    /// Resolve a key id to a verification key.
    ///
    /// Serves from cache while fresh. A cold, stale, or missing-key cache
    /// triggers one coalesced refresh; if that fails the last good set is
    /// used, and later callers skip the provider until the retry delay has
    /// passed.
    ///
    /// # Errors
    ///
    /// `ValidationFailure::KeyNotFound` if no usable set contains `kid`.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<VerificationKey>, ValidationFailure> {
        let mut trigger = Trigger::Load;
        if let Some(set) = self.inner.snapshot().await {
            if !set.is_stale(Instant::now()) {
                if let Some(key) = set.get(kid) {
                    tracing::debug!(target: "auth.jwks", "JWKS cache hit");
                    return Ok(key);
                }
                tracing::debug!(target: "auth.jwks", "Key not found in JWKS cache, refreshing");
                trigger = Trigger::UnknownKey;
            }
        }

        if let Err(e) = self.refresh_coalesced(trigger).await {
            tracing::debug!(target: "auth.jwks", error = %e, "No new key set, using cached keys");
        }
        match self.inner.snapshot().await.and_then(|set| set.get(kid)) {
            Some(key) => Ok(key),
            None => {
                tracing::warn!(target: "auth.jwks", "Key not found in JWKS after refresh");
                Err(ValidationFailure::KeyNotFound)
            }
        }
    }

    /// Fetch unless a recent failure is still backing off, another caller
    /// completed an attempt while we waited for the lock, or an unknown-key
    /// refresh ran too recently.
    async fn refresh_coalesced(&self, trigger: Trigger) -> Result<usize, KeySetFetchError> {
        let seen = self.inner.attempts.load(Ordering::Acquire);
        if let Some(error) = self.inner.retry_pending(Instant::now()).await {
            tracing::debug!(target: "auth.jwks", "JWKS provider failed recently, not retrying yet");
            return Err(error);
        }

        let mut guard = Arc::clone(&self.inner.refresh_lock).lock_owned().await;
        if self.inner.attempts.load(Ordering::Acquire) != seen {
            drop(guard);
            return self.inner.last_outcome().await;
        }

        if trigger == Trigger::UnknownKey {
            let now = Instant::now();
            let throttled = guard
                .last_miss_refresh
                .is_some_and(|last| now.duration_since(last) < self.inner.miss_refresh_interval);
            if throttled {
                drop(guard);
                tracing::debug!(target: "auth.jwks", "Unknown-key refresh throttled");
                return self.inner.last_outcome().await;
            }
            guard.last_miss_refresh = Some(now);
        }

        self.run_attempt(guard).await
    }

    async fn run_attempt(
        &self,
        guard: OwnedMutexGuard<RefreshState>,
    ) -> Result<usize, KeySetFetchError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = inner.fetch_and_store().await;
            inner.attempts.fetch_add(1, Ordering::AcqRel);
            outcome
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(target: "auth.jwks", error = %e, "JWKS refresh task failed");
                Err(KeySetFetchError::Transport(e.to_string()))
            }
        }
    }

    /// Fetch the key set now, waiting behind any in-flight refresh.
    ///
    /// Used by the scheduled refresher; ignores the retry delay and does not
    /// coalesce.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the cached set is left unchanged.
    pub async fn force_refresh(&self) -> Result<usize, KeySetFetchError> {
        let guard = Arc::clone(&self.inner.refresh_lock).lock_owned().await;
        self.run_attempt(guard).await
    }

    /// Populate the cache before serving traffic.
    ///
    /// Concurrent calls share one fetch. While a failed fetch is backing
    /// off, returns its error without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. The resolver stays usable; `resolve` retries
    /// once the retry delay has passed.
    pub async fn warm_up(&self) -> Result<usize, KeySetFetchError> {
        self.refresh_coalesced(Trigger::Load).await
    }

    /// The currently cached set, fresh or stale.
    pub async fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.inner.snapshot().await
    }

    /// Check if JWKS is currently cached and within its TTL.
    pub async fn is_cached(&self) -> bool {
        self.inner
            .snapshot()
            .await
            .is_some_and(|set| !set.is_stale(Instant::now()))
    }

    /// Number of fetch attempts completed so far.
    pub fn fetch_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("source", &self.inner.source.describe())
            .field("cache_ttl", &self.inner.cache_ttl)
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{ScriptedSource, TestSigner};

    #[test]
    fn jwk_document_deserialization() {
        let json = r#"{
            "keys": [
                {"kty": "OKP", "kid": "key-1", "crv": "Ed25519", "x": "AAAA"},
                {"kty": "weird", "kid": "key-2"}
            ]
        }"#;
        let document: JwkDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.keys.len(), 2);
    }

    #[test]
    fn key_set_skips_unusable_entries() {
        let signer = TestSigner::new(1, "good");
        let document = JwkDocument {
            keys: vec![
                signer.jwk_json(),
                serde_json::json!({"kty": "oct", "kid": "secret", "k": "c2VjcmV0"}),
                serde_json::json!({"kty": "OKP", "crv": "Ed25519", "x": "AAAA"}),
                serde_json::json!({"kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB"}),
                serde_json::json!({"kty": "nonsense", "kid": "junk"}),
            ],
        };

        let set = SigningKeySet::from_document(&document, DEFAULT_CACHE_TTL).unwrap();
        assert_eq!(set.key_ids(), vec!["good"]);
        assert_eq!(set.get("good").unwrap().algorithm(), Algorithm::EdDSA);
    }

    #[test]
    fn key_set_without_usable_keys_is_an_error() {
        let document = JwkDocument {
            keys: vec![serde_json::json!({"kty": "oct", "kid": "secret", "k": "c2VjcmV0"})],
        };
        let err = SigningKeySet::from_document(&document, DEFAULT_CACHE_TTL).unwrap_err();
        assert_eq!(err, KeySetFetchError::Empty);
    }

    #[test]
    fn zero_ttl_set_is_immediately_stale() {
        let signer = TestSigner::new(1, "k");
        let document = JwkDocument {
            keys: vec![signer.jwk_json()],
        };
        let set = SigningKeySet::from_document(&document, Duration::ZERO).unwrap();
        assert!(set.is_stale(Instant::now()));
    }

    #[test]
    fn custom_cache_ttl() {
        let resolver = KeyResolver::from_url(
            "https://example.com/.well-known/jwks.json",
            Duration::from_secs(3),
        )
        .with_cache_ttl(Duration::from_secs(60))
        .with_miss_refresh_interval(Duration::from_secs(5));
        assert_eq!(resolver.cache_ttl(), Duration::from_secs(60));
        assert_eq!(resolver.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(resolver.miss_refresh_interval(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        let resolver = KeyResolver::new(ScriptedSource::unreachable());
        assert!(!resolver.is_cached().await);
        assert!(resolver.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn resolve_fetches_once_then_serves_from_cache() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver = KeyResolver::new(source.clone());

        let key = resolver.resolve("key-1").await.unwrap();
        assert_eq!(key.kid(), "key-1");
        resolver.resolve("key-1").await.unwrap();

        assert_eq!(source.fetch_count(), 1);
        assert!(resolver.is_cached().await);
    }

    #[tokio::test]
    async fn unknown_kid_triggers_refresh_and_picks_up_rotated_key() {
        let old = TestSigner::new(1, "old");
        let new = TestSigner::new(2, "new");
        let source = ScriptedSource::serving(vec![old.jwk_json()]);
        let resolver = KeyResolver::new(source.clone());
        resolver.warm_up().await.unwrap();

        source.set_keys(vec![old.jwk_json(), new.jwk_json()]);
        let key = resolver.resolve("new").await.unwrap();

        assert_eq!(key.kid(), "new");
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unknown_kid_after_refresh_is_key_not_found() {
        let signer = TestSigner::new(1, "key-1");
        let resolver = KeyResolver::new(ScriptedSource::serving(vec![signer.jwk_json()]));

        let result = resolver.resolve("other").await;
        assert_eq!(result.unwrap_err(), ValidationFailure::KeyNotFound);
    }

    #[tokio::test]
    async fn cold_cache_with_unreachable_provider_is_key_not_found() {
        let resolver = KeyResolver::new(ScriptedSource::unreachable());
        let result = resolver.resolve("key-1").await;
        assert_eq!(result.unwrap_err(), ValidationFailure::KeyNotFound);
        assert!(resolver.warm_up().await.is_err());
    }

    #[tokio::test]
    async fn stale_cache_is_served_when_refresh_fails() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver = KeyResolver::new(source.clone()).with_cache_ttl(Duration::ZERO);
        resolver.warm_up().await.unwrap();

        source.fail_with(KeySetFetchError::Status(503));
        let key = resolver.resolve("key-1").await.unwrap();

        assert_eq!(key.kid(), "key-1");
        assert_eq!(source.fetch_count(), 2);
        assert!(!resolver.is_cached().await);
    }

    #[tokio::test]
    async fn refresh_with_no_usable_keys_keeps_previous_set() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver = KeyResolver::new(source.clone());
        resolver.warm_up().await.unwrap();

        source.set_keys(vec![serde_json::json!({"kty": "oct", "kid": "x", "k": "eA"})]);
        assert_eq!(resolver.force_refresh().await, Err(KeySetFetchError::Empty));

        let set = resolver.snapshot().await.unwrap();
        assert_eq!(set.key_ids(), vec!["key-1"]);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::delayed(vec![signer.jwk_json()], Duration::from_millis(500));
        let resolver = KeyResolver::new(source).with_fetch_timeout(Duration::from_millis(20));

        let err = resolver.warm_up().await.unwrap_err();
        assert_eq!(err, KeySetFetchError::Timeout(Duration::from_millis(20)));
        assert_eq!(
            resolver.resolve("key-1").await.unwrap_err(),
            ValidationFailure::KeyNotFound
        );
    }

    #[tokio::test]
    async fn concurrent_cold_resolves_share_one_fetch() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::delayed(vec![signer.jwk_json()], Duration::from_millis(50));
        let resolver = KeyResolver::new(source.clone());

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("key-1").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_warm_ups_share_one_fetch() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::delayed(vec![signer.jwk_json()], Duration::from_millis(50));
        let resolver = KeyResolver::new(source.clone());

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.warm_up().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(1));
        }

        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_serves_stale_keys_without_refetching() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver = KeyResolver::new(source.clone()).with_cache_ttl(Duration::from_millis(100));
        resolver.warm_up().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        source.fail_with(KeySetFetchError::Status(503));
        for _ in 0..10 {
            assert_eq!(resolver.resolve("key-1").await.unwrap().kid(), "key-1");
        }
        assert_eq!(source.fetch_count(), 2);

        // Once the retry delay has passed the provider is tried again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        source.set_keys(vec![signer.jwk_json()]);
        resolver.resolve("key-1").await.unwrap();
        assert_eq!(source.fetch_count(), 3);
        assert!(resolver.is_cached().await);
    }

    #[tokio::test]
    async fn cold_cache_backs_off_after_failed_fetch() {
        let source = ScriptedSource::unreachable();
        let resolver = KeyResolver::new(source.clone());

        for _ in 0..5 {
            assert_eq!(
                resolver.resolve("key-1").await.unwrap_err(),
                ValidationFailure::KeyNotFound
            );
        }
        assert!(resolver.warm_up().await.is_err());
        assert_eq!(source.fetch_count(), 1);

        // The scheduled refresh still reaches the provider.
        assert!(resolver.force_refresh().await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_are_rate_limited() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver =
            KeyResolver::new(source.clone()).with_miss_refresh_interval(Duration::from_secs(60));
        resolver.warm_up().await.unwrap();

        for i in 0..50 {
            let result = resolver.resolve(&format!("random-{i}")).await;
            assert_eq!(result.unwrap_err(), ValidationFailure::KeyNotFound);
        }

        assert_eq!(source.fetch_count(), 2);
        assert!(resolver.resolve("key-1").await.is_ok());
    }

    #[tokio::test]
    async fn zero_miss_interval_refreshes_on_every_unknown_kid() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::serving(vec![signer.jwk_json()]);
        let resolver = KeyResolver::new(source.clone()).with_miss_refresh_interval(Duration::ZERO);
        resolver.warm_up().await.unwrap();

        for i in 0..3 {
            assert!(resolver.resolve(&format!("random-{i}")).await.is_err());
        }
        assert_eq!(source.fetch_count(), 4);
    }

    #[tokio::test]
    async fn concurrent_callers_with_a_rotated_kid_share_the_miss_refresh() {
        let old = TestSigner::new(1, "old");
        let new = TestSigner::new(2, "new");
        let source = ScriptedSource::delayed(vec![old.jwk_json()], Duration::from_millis(50));
        let resolver =
            KeyResolver::new(source.clone()).with_miss_refresh_interval(Duration::from_secs(60));
        resolver.warm_up().await.unwrap();

        source.set_keys(vec![old.jwk_json(), new.jwk_json()]);
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("new").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().kid(), "new");
        }

        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_refresh() {
        let signer = TestSigner::new(1, "key-1");
        let source = ScriptedSource::delayed(vec![signer.jwk_json()], Duration::from_millis(50));
        let resolver = KeyResolver::new(source.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(5), resolver.resolve("key-1")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(resolver.is_cached().await);
        assert_eq!(source.fetch_count(), 1);
    }
}
