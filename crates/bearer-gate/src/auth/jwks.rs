//! JWKS fetching and caching
//!
//! The key set lives in an immutable [`KeySnapshot`] that [`SigningKeyStore`]
//! swaps atomically. Readers never lock; refreshes are serialized through a
//! single async mutex so that concurrent cache misses share one fetch.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::config::AuthConfig;
use super::discovery::MetadataClient;
use super::error::{AuthError, Result};

/// JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
    /// Key type (RSA, EC, OKP)
    pub kty: String,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// Key usage
    #[serde(default)]
    pub r#use: Option<String>,
    // RSA components
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC / OKP components
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Where key sets come from
#[async_trait]
pub trait KeySource: Send + Sync + std::fmt::Debug {
    async fn fetch_key_set(&self) -> Result<JwkSet>;
}

#[async_trait]
impl KeySource for MetadataClient {
    async fn fetch_key_set(&self) -> Result<JwkSet> {
        Self::fetch_key_set(self).await
    }
}

#[derive(Clone)]
struct JwkEntry {
    key: DecodingKey,
    algorithm: Algorithm,
}

impl std::fmt::Debug for JwkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkEntry")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Result of looking a key up in a snapshot
enum Lookup {
    /// Verification candidates, in snapshot order
    Found(Vec<DecodingKey>),
    /// The key id exists but is bound to another algorithm
    AlgorithmMismatch,
    Missing,
}

/// Immutable key set installed by one successful refresh
#[derive(Debug)]
pub struct KeySnapshot {
    keys: BTreeMap<String, JwkEntry>,
    unnamed: Vec<JwkEntry>,
    fetched_at: Instant,
}

impl KeySnapshot {
    /// Decode every usable signing key; unusable entries are skipped.
    pub fn from_jwk_set(set: &JwkSet) -> Self {
        let mut keys = BTreeMap::new();
        let mut unnamed = Vec::new();

        for jwk in &set.keys {
            match decode_jwk(jwk) {
                Ok(Some((key, algorithm))) => {
                    let entry = JwkEntry { key, algorithm };
                    if let Some(kid) = &jwk.kid {
                        keys.insert(kid.clone(), entry);
                    } else {
                        unnamed.push(entry);
                    }
                }
                Ok(None) => {}
                Err(reason) => {
                    tracing::warn!(kid = ?jwk.kid, reason = %reason, "Skipping malformed JWK");
                }
            }
        }

        Self {
            keys,
            unnamed,
            fetched_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len() + self.unnamed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// A `kid` selects exactly one key. Without one, every key bound to
    /// `alg` is a candidate: unnamed keys first, then by key id.
    fn find(&self, kid: Option<&str>, alg: Algorithm) -> Lookup {
        if let Some(kid) = kid {
            return match self.keys.get(kid) {
                Some(entry) if entry.algorithm == alg => Lookup::Found(vec![entry.key.clone()]),
                Some(_) => Lookup::AlgorithmMismatch,
                None => Lookup::Missing,
            };
        }

        let candidates: Vec<DecodingKey> = self
            .unnamed
            .iter()
            .chain(self.keys.values())
            .filter(|entry| entry.algorithm == alg)
            .map(|entry| entry.key.clone())
            .collect();

        if candidates.is_empty() {
            Lookup::Missing
        } else {
            Lookup::Found(candidates)
        }
    }
}

fn decode_jwk(jwk: &Jwk) -> std::result::Result<Option<(DecodingKey, Algorithm)>, String> {
    if jwk.r#use.as_deref().is_some_and(|u| u != "sig") {
        return Ok(None);
    }

    let alg = match jwk.alg.as_deref() {
        Some(name) => match Algorithm::from_str(name) {
            Ok(alg) if is_asymmetric(alg) => alg,
            _ => {
                tracing::debug!(kid = ?jwk.kid, alg = name, "Skipping key with unsupported algorithm");
                return Ok(None);
            }
        },
        // Infer from key type
        None => match (jwk.kty.as_str(), jwk.crv.as_deref()) {
            ("RSA", _) => Algorithm::RS256,
            ("EC", Some("P-256")) => Algorithm::ES256,
            ("EC", Some("P-384")) => Algorithm::ES384,
            ("OKP", Some("Ed25519")) => Algorithm::EdDSA,
            _ => return Ok(None),
        },
    };

    let key = match jwk.kty.as_str() {
        "RSA" if is_rsa(alg) => {
            let n = jwk.n.as_deref().ok_or("missing 'n' in RSA key")?;
            let e = jwk.e.as_deref().ok_or("missing 'e' in RSA key")?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| format!("invalid RSA components: {e}"))?
        }
        "EC" if matches!(alg, Algorithm::ES256 | Algorithm::ES384) => {
            let x = jwk.x.as_deref().ok_or("missing 'x' in EC key")?;
            let y = jwk.y.as_deref().ok_or("missing 'y' in EC key")?;
            DecodingKey::from_ec_components(x, y)
                .map_err(|e| format!("invalid EC components: {e}"))?
        }
        "OKP" if alg == Algorithm::EdDSA => {
            let x = jwk.x.as_deref().ok_or("missing 'x' in OKP key")?;
            DecodingKey::from_ed_components(x)
                .map_err(|e| format!("invalid OKP components: {e}"))?
        }
        other => {
            tracing::debug!(kty = other, alg = ?alg, "Skipping unsupported key type");
            return Ok(None);
        }
    };

    Ok(Some((key, alg)))
}

const fn is_rsa(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

const fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Minimum spacing between background revalidations after a failed refresh
const STALE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct RefreshLedger {
    last_attempt: Option<Instant>,
    last_failed: bool,
}

/// Snapshot handed to a caller together with what it observed
struct View {
    snapshot: Arc<KeySnapshot>,
    epoch: u64,
    /// The snapshot was produced (or a refresh was attempted) for this caller
    refreshed: bool,
}

/// Owner of the signing key set.
///
/// Lookups read the current snapshot lock-free. Refreshes run one at a time;
/// a caller that queued behind a refresh which completed after its own
/// observation reuses that result instead of fetching again.
///
/// A snapshot past its TTL but inside the stale window keeps serving while a
/// background refresh revalidates it. A caller that has to wait for keys (cold
/// start, expired snapshot, unknown key id) waits at most `refresh_wait`; the
/// refresh runs in its own task and completes even when the caller gives up.
pub struct SigningKeyStore {
    snapshot: ArcSwapOption<KeySnapshot>,
    source: Arc<dyn KeySource>,
    refresh_gate: Mutex<RefreshLedger>,
    /// Completed refresh attempts, successful or not
    epoch: AtomicU64,
    /// A background revalidation is in flight
    revalidating: AtomicBool,
    ttl: Duration,
    max_stale: Duration,
    cooldown: Duration,
    refresh_wait: Duration,
}

impl std::fmt::Debug for SigningKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyStore")
            .field("source", &self.source)
            .field("ttl", &self.ttl)
            .field("max_stale", &self.max_stale)
            .field("refresh_wait", &self.refresh_wait)
            .field("keys_count", &self.keys_count())
            .field("refresh_attempts", &self.refresh_attempts())
            .finish_non_exhaustive()
    }
}

impl SigningKeyStore {
    pub fn new(source: Arc<dyn KeySource>, config: &AuthConfig) -> Self {
        Self {
            snapshot: ArcSwapOption::empty(),
            source,
            refresh_gate: Mutex::new(RefreshLedger::default()),
            epoch: AtomicU64::new(0),
            revalidating: AtomicBool::new(false),
            ttl: config.jwks_cache_ttl,
            max_stale: config.jwks_max_stale,
            cooldown: config.key_refresh_cooldown,
            refresh_wait: config.key_refresh_wait,
        }
    }

    /// Resolve the verification key candidates for a token header.
    ///
    /// With a `kid` the result holds exactly one key.
    pub async fn resolve(
        self: &Arc<Self>,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Vec<DecodingKey>> {
        let view = self.usable_snapshot().await?;

        match view.snapshot.find(kid, alg) {
            Lookup::Found(keys) => return Ok(keys),
            Lookup::AlgorithmMismatch => {
                tracing::debug!(kid, alg = ?alg, "Token algorithm does not match key");
                return Err(AuthError::BadSignature);
            }
            Lookup::Missing if view.refreshed => return Err(unknown_key(kid)),
            Lookup::Missing => {}
        }

        tracing::debug!(kid, "Signing key not cached, refreshing key set");
        let snapshot = self.wait_for_refresh(view.epoch).await?;

        match snapshot.find(kid, alg) {
            Lookup::Found(keys) => Ok(keys),
            Lookup::AlgorithmMismatch => Err(AuthError::BadSignature),
            Lookup::Missing => {
                tracing::warn!(kid, "Signing key not found after refresh");
                Err(unknown_key(kid))
            }
        }
    }

    /// Refresh unless another refresh completes first.
    pub async fn refresh(&self) -> Result<Arc<KeySnapshot>> {
        self.refresh_after(self.epoch.load(Ordering::Acquire)).await
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot.load_full()
    }

    #[must_use]
    pub fn keys_count(&self) -> usize {
        self.snapshot.load_full().map_or(0, |s| s.len())
    }

    /// Number of completed refresh attempts since startup
    #[must_use]
    pub fn refresh_attempts(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    async fn usable_snapshot(self: &Arc<Self>) -> Result<View> {
        let epoch = self.epoch.load(Ordering::Acquire);

        if let Some(snapshot) = self.snapshot.load_full() {
            let age = snapshot.age();
            if age < self.ttl {
                return Ok(View {
                    snapshot,
                    epoch,
                    refreshed: false,
                });
            }
            if age < self.ttl + self.max_stale {
                self.revalidate(epoch);
                return Ok(View {
                    snapshot,
                    epoch,
                    refreshed: false,
                });
            }
        }

        let snapshot = self.wait_for_refresh(epoch).await?;
        Ok(View {
            snapshot,
            epoch: self.epoch.load(Ordering::Acquire),
            refreshed: true,
        })
    }

    /// Start a background refresh of a stale snapshot unless one is already
    /// running or the last one failed moments ago.
    fn revalidate(self: &Arc<Self>, observed_epoch: u64) {
        if self.revalidating.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(ledger) = self.refresh_gate.try_lock()
            && ledger.last_failed
            && ledger
                .last_attempt
                .is_some_and(|at| at.elapsed() < STALE_RETRY_INTERVAL)
        {
            self.revalidating.store(false, Ordering::Release);
            return;
        }

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = store.refresh_after(observed_epoch).await;
            store.revalidating.store(false, Ordering::Release);
            if let Err(e) = outcome {
                tracing::warn!(
                    error = %e,
                    "Serving stale key set while identity provider is unavailable"
                );
            }
        });
    }

    /// Run a refresh in its own task and wait for it at most `refresh_wait`.
    async fn wait_for_refresh(self: &Arc<Self>, observed_epoch: u64) -> Result<Arc<KeySnapshot>> {
        let store = Arc::clone(self);
        let refresh = tokio::spawn(async move { store.refresh_after(observed_epoch).await });

        match tokio::time::timeout(self.refresh_wait, refresh).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(AuthError::ProviderUnreachable(format!(
                "key refresh task failed: {e}"
            ))),
            Err(_) => {
                tracing::warn!(
                    wait_ms = self.refresh_wait.as_millis(),
                    "Key refresh still in flight, giving up on it for this request"
                );
                Err(AuthError::ProviderUnreachable(
                    "key refresh did not complete in time".into(),
                ))
            }
        }
    }

    async fn refresh_after(&self, observed_epoch: u64) -> Result<Arc<KeySnapshot>> {
        let mut ledger = self.refresh_gate.lock().await;

        if self.epoch.load(Ordering::Acquire) != observed_epoch {
            tracing::debug!("Reusing key refresh completed while waiting");
            return self.latest(&ledger);
        }

        if let Some(at) = ledger.last_attempt
            && at.elapsed() < self.cooldown
        {
            tracing::debug!("Key refresh suppressed by cooldown");
            return self.latest(&ledger);
        }

        let outcome = self
            .source
            .fetch_key_set()
            .await
            .map(|set| Arc::new(KeySnapshot::from_jwk_set(&set)));

        ledger.last_attempt = Some(Instant::now());
        ledger.last_failed = outcome.is_err();

        match &outcome {
            Ok(snapshot) => {
                self.snapshot.store(Some(Arc::clone(snapshot)));
                tracing::info!(keys_count = snapshot.len(), "JWKS refreshed successfully");
            }
            Err(e) => tracing::warn!(error = %e, "JWKS refresh failed"),
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "metrics")]
        crate::observability::record_jwks_refresh(outcome.is_ok(), self.keys_count());

        outcome
    }

    fn latest(&self, ledger: &RefreshLedger) -> Result<Arc<KeySnapshot>> {
        match self.snapshot.load_full() {
            Some(snapshot) if !ledger.last_failed => Ok(snapshot),
            _ => Err(AuthError::ProviderUnreachable(
                "last key refresh failed".into(),
            )),
        }
    }
}

fn unknown_key(kid: Option<&str>) -> AuthError {
    AuthError::UnknownKey(kid.unwrap_or("<none>").to_owned())
}

/// Background JWKS refresh task builder
pub struct JwksRefreshTask {
    store: Arc<SigningKeyStore>,
    interval: Duration,
}

impl std::fmt::Debug for JwksRefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksRefreshTask")
            .field("store", &self.store)
            .field("interval", &self.interval)
            .finish()
    }
}

impl JwksRefreshTask {
    #[must_use]
    pub const fn new(store: Arc<SigningKeyStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Spawn the refresh loop. The first tick fires immediately and warms the
    /// cache; failures are logged and retried on the next tick.
    pub fn spawn(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.store.refresh().await {
                            tracing::warn!(error = %e, "Background JWKS refresh failed");
                        }
                    }
                    () = shutdown.cancelled() => {
                        tracing::debug!("JWKS refresh task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::*;

    pub(crate) const JWKS_FIXTURE: &str = include_str!("../../tests/fixtures/jwks.json");

    /// In-memory key source that counts fetches
    #[derive(Debug)]
    pub(crate) struct StaticKeySource {
        set: JwkSet,
        fetches: AtomicUsize,
        failing: AtomicBool,
        hanging: AtomicBool,
        delay: Duration,
    }

    impl StaticKeySource {
        pub(crate) fn new(delay: Duration) -> Self {
            Self::with_set(serde_json::from_str(JWKS_FIXTURE).unwrap(), delay)
        }

        pub(crate) fn with_set(set: JwkSet, delay: Duration) -> Self {
            Self {
                set,
                fetches: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                hanging: AtomicBool::new(false),
                delay,
            }
        }

        pub(crate) fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Fetches started while hanging never answer
        pub(crate) fn set_hanging(&self, hanging: bool) {
            self.hanging.store(hanging, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KeySource for StaticKeySource {
        async fn fetch_key_set(&self) -> Result<JwkSet> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hanging.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(AuthError::ProviderUnreachable("HTTP 503".into()));
            }
            Ok(self.set.clone())
        }
    }

    pub(crate) fn test_config() -> AuthConfig {
        AuthConfig::new(
            Url::parse("https://idp.example/realms/demo").unwrap(),
            "my-api",
        )
    }

    fn store_with(source: &Arc<StaticKeySource>, config: &AuthConfig) -> Arc<SigningKeyStore> {
        Arc::new(SigningKeyStore::new(
            Arc::clone(source) as Arc<dyn KeySource>,
            config,
        ))
    }

    /// Fixture set with the second key republished as an RS256 signing key
    pub(crate) fn two_signing_keys() -> JwkSet {
        let mut set: JwkSet = serde_json::from_str(JWKS_FIXTURE).unwrap();
        set.keys[1].kid = Some("next-key".to_string());
        set.keys[1].alg = Some("RS256".to_string());
        set.keys[1].r#use = Some("sig".to_string());
        set
    }

    async fn wait_for_attempts(store: &SigningKeyStore, attempts: u64) {
        for _ in 0..100 {
            if store.refresh_attempts() >= attempts {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("refresh attempts never reached {attempts}");
    }

    #[test]
    fn test_jwk_set_deserialize() {
        let json = r#"{
            "keys": [
                {
                    "kid": "key1",
                    "kty": "RSA",
                    "alg": "RS256",
                    "n": "test_n",
                    "e": "AQAB"
                }
            ]
        }"#;
        let jwks: JwkSet = serde_json::from_str(json).unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, Some("key1".to_string()));
        assert_eq!(jwks.keys[0].kty, "RSA");
    }

    #[test]
    fn test_snapshot_skips_encryption_keys() {
        let set: JwkSet = serde_json::from_str(JWKS_FIXTURE).unwrap();
        assert_eq!(set.keys.len(), 2);

        let snapshot = KeySnapshot::from_jwk_set(&set);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("primary-key"));
        assert!(!snapshot.contains("encryption-key"));
    }

    #[test]
    fn test_snapshot_skips_malformed_and_symmetric_keys() {
        let json = r#"{
            "keys": [
                {"kid": "no-modulus", "kty": "RSA", "alg": "RS256", "e": "AQAB"},
                {"kid": "hmac", "kty": "oct", "alg": "HS256", "k": "c2VjcmV0"},
                {"kid": "ec-no-y", "kty": "EC", "alg": "ES256", "crv": "P-256", "x": "abc"},
                {"kid": "weird", "kty": "RSA", "alg": "none"}
            ]
        }"#;
        let set: JwkSet = serde_json::from_str(json).unwrap();
        let snapshot = KeySnapshot::from_jwk_set(&set);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_decodes_curve_keys() {
        let set: JwkSet =
            serde_json::from_str(include_str!("../../tests/fixtures/curves.json")).unwrap();
        let snapshot = KeySnapshot::from_jwk_set(&set);

        assert_eq!(snapshot.len(), 2);
        assert!(matches!(
            snapshot.find(Some("ec-key"), Algorithm::ES256),
            Lookup::Found(_)
        ));
        assert!(matches!(
            snapshot.find(Some("ed-key"), Algorithm::EdDSA),
            Lookup::Found(_)
        ));
    }

    #[test]
    fn test_snapshot_find_semantics() {
        let set: JwkSet = serde_json::from_str(JWKS_FIXTURE).unwrap();
        let snapshot = KeySnapshot::from_jwk_set(&set);

        assert!(matches!(
            snapshot.find(Some("primary-key"), Algorithm::RS256),
            Lookup::Found(keys) if keys.len() == 1
        ));
        assert!(matches!(
            snapshot.find(Some("primary-key"), Algorithm::RS512),
            Lookup::AlgorithmMismatch
        ));
        assert!(matches!(
            snapshot.find(Some("rotated-away"), Algorithm::RS256),
            Lookup::Missing
        ));
        assert!(matches!(
            snapshot.find(None, Algorithm::RS256),
            Lookup::Found(keys) if keys.len() == 1
        ));
        assert!(matches!(
            snapshot.find(None, Algorithm::ES256),
            Lookup::Missing
        ));
    }

    #[test]
    fn test_find_without_kid_returns_every_matching_key() {
        let snapshot = KeySnapshot::from_jwk_set(&two_signing_keys());

        assert!(matches!(
            snapshot.find(None, Algorithm::RS256),
            Lookup::Found(keys) if keys.len() == 2
        ));
        assert!(matches!(
            snapshot.find(Some("next-key"), Algorithm::RS256),
            Lookup::Found(keys) if keys.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_first_resolve_fetches_once() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let store = store_with(&source, &test_config());

        assert!(store.current().is_none());
        store
            .resolve(Some("primary-key"), Algorithm::RS256)
            .await
            .unwrap();
        store
            .resolve(Some("primary-key"), Algorithm::RS256)
            .await
            .unwrap();

        assert_eq!(source.fetches(), 1);
        assert_eq!(store.refresh_attempts(), 1);
        assert_eq!(store.keys_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_exactly_one_refresh() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let store = store_with(&source, &test_config());
        store.refresh().await.unwrap();
        assert_eq!(source.fetches(), 1);

        let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::UnknownKey(kid)) if kid == "rotated-away"));
        assert_eq!(source.fetches(), 2);

        let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::UnknownKey(_))));
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn test_unknown_kid_on_cold_cache_does_not_refetch() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let store = store_with(&source, &test_config());

        let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::UnknownKey(_))));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_limits_unknown_kid_refreshes() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.key_refresh_cooldown = Duration::from_secs(60);
        let store = store_with(&source, &config);
        store.refresh().await.unwrap();

        for _ in 0..5 {
            let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
            assert!(matches!(result, Err(AuthError::UnknownKey(_))));
        }
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_is_bad_signature() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let store = store_with(&source, &test_config());

        let result = store.resolve(Some("primary-key"), Algorithm::PS256).await;
        assert!(matches!(result, Err(AuthError::BadSignature)));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_collapse_into_one_fetch() {
        let source = Arc::new(StaticKeySource::new(Duration::from_millis(50)));
        let store = store_with(&source, &test_config());

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .resolve(Some("primary-key"), Algorithm::RS256)
                    .await
                    .is_ok()
            });
        }

        while let Some(ok) = tasks.join_next().await {
            assert!(ok.unwrap());
        }
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_collapse_into_one_fetch() {
        let source = Arc::new(StaticKeySource::new(Duration::from_millis(50)));
        source.set_failing(true);
        let store = store_with(&source, &test_config());

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .resolve(Some("primary-key"), Algorithm::RS256)
                    .await
                    .map(|_| ())
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(matches!(
                result.unwrap(),
                Err(AuthError::ProviderUnreachable(_))
            ));
        }
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_provider_outage() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        source.set_failing(true);
        let store = store_with(&source, &test_config());

        let result = store.resolve(Some("primary-key"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));

        source.set_failing(false);
        assert!(
            store
                .resolve(Some("primary-key"), Algorithm::RS256)
                .await
                .is_ok()
        );
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_hanging_provider_bounds_the_wait() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        source.set_hanging(true);
        let mut config = test_config();
        config.key_refresh_wait = Duration::from_millis(100);
        let store = store_with(&source, &config);

        let started = Instant::now();
        let result = store.resolve(Some("primary-key"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        // later callers queue behind the refresh still in flight
        let result = store.resolve(Some("primary-key"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_refresh_still_installs_keys() {
        let source = Arc::new(StaticKeySource::new(Duration::from_millis(200)));
        let mut config = test_config();
        config.key_refresh_wait = Duration::from_millis(20);
        let store = store_with(&source, &config);

        let result = store.resolve(Some("primary-key"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));

        wait_for_attempts(&store, 1).await;
        assert_eq!(store.keys_count(), 1);
        assert!(
            store
                .resolve(Some("primary-key"), Algorithm::RS256)
                .await
                .is_ok()
        );
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refreshed() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.jwks_cache_ttl = Duration::from_millis(20);
        config.jwks_max_stale = Duration::ZERO;
        let store = store_with(&source, &config);

        store
            .resolve(Some("primary-key"), Algorithm::RS256)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store
            .resolve(Some("primary-key"), Algorithm::RS256)
            .await
            .unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_stale_snapshot_revalidates_in_background() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.jwks_cache_ttl = Duration::from_millis(20);
        config.jwks_max_stale = Duration::from_secs(60);
        let store = store_with(&source, &config);

        store.refresh().await.unwrap();
        let first = store.current().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(
            store
                .resolve(Some("primary-key"), Algorithm::RS256)
                .await
                .is_ok()
        );
        wait_for_attempts(&store, 2).await;
        assert!(!Arc::ptr_eq(&first, &store.current().unwrap()));
    }

    #[tokio::test]
    async fn test_stale_snapshot_serves_while_provider_hangs() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.jwks_cache_ttl = Duration::from_millis(20);
        config.jwks_max_stale = Duration::from_secs(60);
        config.key_refresh_wait = Duration::from_millis(100);
        let store = store_with(&source, &config);

        store.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        source.set_hanging(true);

        let started = Instant::now();
        for _ in 0..10 {
            assert!(
                store
                    .resolve(Some("primary-key"), Algorithm::RS256)
                    .await
                    .is_ok()
            );
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        // one revalidation in flight, no pile-up behind it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.fetches(), 2);

        // an unknown key still needs the provider
        let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));
    }

    #[tokio::test]
    async fn test_stale_snapshot_serves_while_provider_fails() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.jwks_cache_ttl = Duration::from_millis(20);
        config.jwks_max_stale = Duration::from_secs(60);
        let store = store_with(&source, &config);

        store.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        source.set_failing(true);

        for _ in 0..3 {
            assert!(
                store
                    .resolve(Some("primary-key"), Algorithm::RS256)
                    .await
                    .is_ok()
            );
        }
        wait_for_attempts(&store, 2).await;

        let result = store.resolve(Some("rotated-away"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));
    }

    #[tokio::test]
    async fn test_stale_snapshot_expires_after_grace_window() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let mut config = test_config();
        config.jwks_cache_ttl = Duration::from_millis(10);
        config.jwks_max_stale = Duration::from_millis(10);
        let store = store_with(&source, &config);

        store.refresh().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        source.set_failing(true);

        let result = store.resolve(Some("primary-key"), Algorithm::RS256).await;
        assert!(matches!(result, Err(AuthError::ProviderUnreachable(_))));
    }

    #[tokio::test]
    async fn test_refresh_task_warms_cache_and_stops() {
        let source = Arc::new(StaticKeySource::new(Duration::ZERO));
        let store = store_with(&source, &test_config());
        let shutdown = CancellationToken::new();

        let handle =
            JwksRefreshTask::new(Arc::clone(&store), Duration::from_secs(3600)).spawn(shutdown.clone());

        for _ in 0..50 {
            if store.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.keys_count(), 1);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(source.fetches(), 1);
    }
}
