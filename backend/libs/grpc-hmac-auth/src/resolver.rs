//! Secret resolution
//!
//! The gate never stores secrets itself. It asks a [`SecretResolver`] for
//! the secret belonging to the key id a caller claims.
//!
//! Contract:
//! - `Ok(Some(secret))` - key id known
//! - `Ok(None)` (or an empty secret) - key id unknown, not an error
//! - `Err(_)` - the resolver malfunctioned (store unreachable, ...)

use crate::config::{HmacServerConfig, SECRETS_ENV};
use crate::context::CallContext;
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Looks up the shared secret for a key id
#[async_trait]
pub trait SecretResolver: Send + Sync + 'static {
    async fn resolve(&self, ctx: &CallContext<'_>, key_id: &str) -> Result<Option<String>>;
}

#[async_trait]
impl<R: SecretResolver + ?Sized> SecretResolver for Arc<R> {
    async fn resolve(&self, ctx: &CallContext<'_>, key_id: &str) -> Result<Option<String>> {
        (**self).resolve(ctx, key_id).await
    }
}

/// Fixed in-memory key id → secret table
#[derive(Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(key_id.into(), secret.into());
        self
    }

    /// Parse `key1:secret1,key2:secret2`
    ///
    /// Entries without a `:` or with an empty key id are skipped. Secrets may
    /// themselves contain `:`; only the first one separates the key id.
    pub fn parse(table: &str) -> Self {
        let secrets = table
            .split(',')
            .filter_map(|entry| entry.trim().split_once(':'))
            .filter(|(key_id, _)| !key_id.is_empty())
            .map(|(key_id, secret)| (key_id.to_string(), secret.to_string()))
            .collect();

        Self { secrets }
    }

    /// Load the table from `HMAC_SECRETS`; an unset variable yields an empty
    /// table, which rejects every key id
    pub fn from_env() -> Self {
        std::env::var(SECRETS_ENV)
            .map(|table| Self::parse(&table))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl std::fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key ids only; secrets stay out of debug output
        f.debug_struct("StaticSecrets")
            .field("key_ids", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            secrets: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(&self, _ctx: &CallContext<'_>, key_id: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(key_id).cloned())
    }
}

/// Adapter turning an async closure into a [`SecretResolver`]
///
/// ```rust
/// use grpc_hmac_auth::FnResolver;
///
/// let resolver = FnResolver::new(|key_id: String| async move {
///     Ok::<_, anyhow::Error>((key_id == "key1").then(|| "secret1".to_string()))
/// });
/// ```
#[derive(Clone)]
pub struct FnResolver<F> {
    f: F,
}

impl<F> FnResolver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> SecretResolver for FnResolver<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>>> + Send,
{
    async fn resolve(&self, _ctx: &CallContext<'_>, key_id: &str) -> Result<Option<String>> {
        (self.f)(key_id.to_string()).await
    }
}

/// TTL cache in front of a slower resolver
///
/// Only hits are cached. Unknown key ids and resolver errors always reach
/// the inner resolver again, so a newly provisioned key works immediately
/// and an outage is never remembered.
pub struct CachedResolver<R> {
    inner: R,
    cache: Cache<String, String>,
}

impl<R: SecretResolver> CachedResolver<R> {
    /// Cache with a 5 minute TTL
    pub fn new(inner: R) -> Self {
        Self::with_ttl(inner, Duration::from_secs(300))
    }

    pub fn from_config(inner: R, config: &HmacServerConfig) -> Self {
        Self::with_ttl(inner, config.secret_cache_ttl())
    }

    /// Cache with a custom TTL (max 1000 entries)
    pub fn with_ttl(inner: R, ttl: Duration) -> Self {
        info!(cache_ttl = ?ttl, "Initialized HMAC secret cache");

        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    /// Drop one key id (e.g. after manual rotation)
    pub async fn invalidate(&self, key_id: &str) {
        self.cache.invalidate(key_id).await;
        info!(key_id = %key_id, "HMAC secret cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        info!("All HMAC secret cache entries invalidated");
    }
}

#[async_trait]
impl<R: SecretResolver> SecretResolver for CachedResolver<R> {
    async fn resolve(&self, ctx: &CallContext<'_>, key_id: &str) -> Result<Option<String>> {
        if let Some(secret) = self.cache.get(key_id).await {
            debug!(key_id = %key_id, "Secret retrieved from cache");
            return Ok(Some(secret));
        }

        let secret = self.inner.resolve(ctx, key_id).await?;
        if let Some(secret) = secret.as_ref().filter(|s| !s.is_empty()) {
            self.cache.insert(key_id.to_string(), secret.clone()).await;
        }

        Ok(secret)
    }
}
