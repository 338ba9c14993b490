//! HMAC authentication configuration loaded from the environment

use crate::error::ResolverFailurePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Key id the client signs with
pub const KEY_ID_ENV: &str = "HMAC_KEY_ID";
/// Secret the client signs with
pub const SECRET_ENV: &str = "HMAC_SECRET";
/// `key1:secret1,key2:secret2` table for [`crate::StaticSecrets::from_env`]
pub const SECRETS_ENV: &str = "HMAC_SECRETS";
/// Comma-separated methods the server does not authenticate
pub const IGNORED_METHODS_ENV: &str = "HMAC_IGNORED_METHODS";
/// Report resolver failures as `Unauthenticated` instead of `Unavailable`
pub const MASK_RESOLVER_ERRORS_ENV: &str = "HMAC_MASK_RESOLVER_ERRORS";
/// TTL of [`crate::CachedResolver`] entries, in seconds
pub const SECRET_CACHE_TTL_ENV: &str = "HMAC_SECRET_CACHE_TTL_SECS";

const DEFAULT_SECRET_CACHE_TTL_SECS: u64 = 300;

/// Client credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct HmacClientConfig {
    pub key_id: String,
    pub secret: String,
}

impl fmt::Debug for HmacClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacClientConfig")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl HmacClientConfig {
    /// Load client credentials from environment variables
    ///
    /// **Environment Variables**:
    /// - `HMAC_KEY_ID`: key id sent with every call (required)
    /// - `HMAC_SECRET`: shared secret used to sign (required)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load client credentials through `lookup` instead of the process
    /// environment
    ///
    /// ## Example
    ///
    /// ```rust
    /// use grpc_hmac_auth::HmacClientConfig;
    ///
    /// let config = HmacClientConfig::from_lookup(|name| match name {
    ///     "HMAC_KEY_ID" => Some("key1".to_string()),
    ///     "HMAC_SECRET" => Some("secret1".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.key_id, "key1");
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_id = lookup(KEY_ID_ENV)
            .filter(|v| !v.is_empty())
            .with_context(|| format!("{} not set", KEY_ID_ENV))?;
        let secret = lookup(SECRET_ENV)
            .filter(|v| !v.is_empty())
            .with_context(|| format!("{} not set", SECRET_ENV))?;

        Ok(Self { key_id, secret })
    }
}

/// Server gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmacServerConfig {
    /// Full method paths exempt from authentication
    pub ignored_methods: Vec<String>,
    /// Collapse resolver failures into `Unauthenticated`
    pub mask_resolver_errors: bool,
    /// TTL for cached secrets in seconds
    pub secret_cache_ttl_secs: u64,
}

impl Default for HmacServerConfig {
    fn default() -> Self {
        Self {
            ignored_methods: Vec::new(),
            mask_resolver_errors: false,
            secret_cache_ttl_secs: DEFAULT_SECRET_CACHE_TTL_SECS,
        }
    }
}

impl HmacServerConfig {
    /// Load gate settings from environment variables; all are optional
    ///
    /// **Environment Variables**:
    /// - `HMAC_IGNORED_METHODS`: e.g. `/grpc.health.v1.Health/Check,/grpc.health.v1.Health/Watch`
    /// - `HMAC_MASK_RESOLVER_ERRORS`: `true` to hide secret store outages (default: false)
    /// - `HMAC_SECRET_CACHE_TTL_SECS`: secret cache TTL (default: 300)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load gate settings through `lookup`; malformed values fall back to
    /// their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ignored_methods = lookup(IGNORED_METHODS_ENV)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mask_resolver_errors = lookup(MASK_RESOLVER_ERRORS_ENV)
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false);

        let secret_cache_ttl_secs = lookup(SECRET_CACHE_TTL_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SECRET_CACHE_TTL_SECS);

        Self {
            ignored_methods,
            mask_resolver_errors,
            secret_cache_ttl_secs,
        }
    }

    /// `Mask` when `mask_resolver_errors` is set, `Surface` otherwise
    pub fn failure_policy(&self) -> ResolverFailurePolicy {
        if self.mask_resolver_errors {
            ResolverFailurePolicy::Mask
        } else {
            ResolverFailurePolicy::Surface
        }
    }

    pub fn secret_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_cache_ttl_secs)
    }
}
