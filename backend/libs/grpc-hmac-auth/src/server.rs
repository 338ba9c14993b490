//! Server-side HMAC gate
//!
//! Verifies the `x-hmac-key-id` / `x-hmac-signature` pair on every incoming
//! call before the call reaches its handler. Methods on the ignore list
//! (health checks, reflection, ...) pass through untouched.

use crate::config::HmacServerConfig;
use crate::context::CallContext;
use crate::error::{AuthError, AuthErrorKind, ResolverFailurePolicy};
use crate::logging::diag;
use crate::message::{canonical_message, method_message};
use crate::resolver::SecretResolver;
use crate::signature::verify;
use crate::{KEY_ID_METADATA, SIGNATURE_METADATA};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};
use tracing::{error, warn};

/// Outcome of a successful admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The method is on the ignore list; no credentials were inspected
    Bypassed,
    /// The signature verified under the secret of `key_id`
    Verified { key_id: String },
}

struct Inner<R> {
    resolver: R,
    ignored: RwLock<HashSet<String>>,
}

/// Server-side interceptor that authenticates calls with HMAC signatures
///
/// Cloning is cheap and clones share the same ignore list, so a handle kept
/// by an admin endpoint can reconfigure a gate already installed in the
/// server.
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_hmac_auth::{HmacServerInterceptor, StaticSecrets};
/// use tower::ServiceBuilder;
///
/// let secrets = StaticSecrets::new().with_secret("key1", "secret1");
/// let gate = HmacServerInterceptor::new(secrets);
/// gate.ignore_methods(["/grpc.health.v1.Health/Check"]);
///
/// let layer = ServiceBuilder::new().layer(gate.layer());
/// // tonic::transport::Server::builder().layer(layer).add_service(...)
/// ```
pub struct HmacServerInterceptor<R> {
    inner: Arc<Inner<R>>,
    failure_policy: ResolverFailurePolicy,
}

impl<R> Clone for HmacServerInterceptor<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            failure_policy: self.failure_policy,
        }
    }
}

impl<R: SecretResolver> HmacServerInterceptor<R> {
    /// Create a gate with an empty ignore list and the default
    /// [`ResolverFailurePolicy::Surface`]
    ///
    /// ## Arguments
    ///
    /// * `resolver` - Source of the secret for each claimed key id
    pub fn new(resolver: R) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                ignored: RwLock::new(HashSet::new()),
            }),
            failure_policy: ResolverFailurePolicy::default(),
        }
    }

    /// Build a gate with the ignore list and failure policy from `config`
    pub fn from_config(resolver: R, config: &HmacServerConfig) -> Self {
        let gate = Self::new(resolver).with_failure_policy(config.failure_policy());
        gate.ignore_methods(config.ignored_methods.iter().cloned());
        gate
    }

    /// Choose how resolver malfunctions are reported to callers
    ///
    /// ## Example
    ///
    /// ```rust
    /// use grpc_hmac_auth::{HmacServerInterceptor, ResolverFailurePolicy, StaticSecrets};
    ///
    /// let gate = HmacServerInterceptor::new(StaticSecrets::new())
    ///     .with_failure_policy(ResolverFailurePolicy::Mask);
    /// assert_eq!(gate.failure_policy(), ResolverFailurePolicy::Mask);
    /// ```
    pub fn with_failure_policy(mut self, policy: ResolverFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Policy currently applied to resolver failures
    pub fn failure_policy(&self) -> ResolverFailurePolicy {
        self.failure_policy
    }

    /// Exempt methods from authentication (full paths, e.g. `/pkg.Service/Method`)
    pub fn ignore_methods<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ignored = self.inner.ignored.write();
        ignored.extend(methods.into_iter().map(Into::into));
    }

    /// Subject every method to authentication again
    pub fn clear_ignored_methods(&self) {
        self.inner.ignored.write().clear();
    }

    /// Whether `method` (full path) bypasses authentication
    pub fn is_ignored(&self, method: &str) -> bool {
        self.inner.ignored.read().contains(method)
    }

    /// Sorted snapshot of the ignore list
    pub fn ignored_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.inner.ignored.read().iter().cloned().collect();
        methods.sort();
        methods
    }

    /// Tower layer authenticating every call by method name only
    pub fn layer(&self) -> HmacServerLayer<R> {
        HmacServerLayer {
            interceptor: self.clone(),
        }
    }

    /// Run the admission checks for one call
    ///
    /// 1. Ignored method → [`Admission::Bypassed`], nothing else is read
    /// 2. Extract signature and key id from `metadata`
    /// 3. Canonicalize `payload` (if known) with `method`
    /// 4. Resolve the secret for the key id, bounded by the call deadline
    /// 5. Verify the signature in constant time
    ///
    /// The returned [`AuthError`] carries the precise reason; map it with
    /// [`AuthError::into_status`] before handing it to the caller.
    pub async fn authenticate<T>(
        &self,
        method: &str,
        metadata: Option<&MetadataMap>,
        payload: Option<&T>,
    ) -> Result<Admission, AuthError>
    where
        T: Serialize + ?Sized,
    {
        if self.is_ignored(method) {
            diag!(method = %method, "ignoring method");
            return Ok(Admission::Bypassed);
        }

        let metadata = metadata.ok_or(AuthErrorKind::MissingMetadata)?;
        let signature =
            first_value(metadata, SIGNATURE_METADATA).ok_or(AuthErrorKind::MissingSignature)?;
        let key_id = first_value(metadata, KEY_ID_METADATA).ok_or(AuthErrorKind::MissingKeyId)?;

        let message = match payload {
            Some(payload) => canonical_message(Some(payload), method)?,
            None => method_message(method),
        };

        let ctx = CallContext::new(method, Some(metadata));
        let secret = self.resolve_secret(&ctx, key_id).await?;

        if !verify(&secret, &message, signature) {
            return Err(AuthErrorKind::SignatureMismatch.into());
        }

        Ok(Admission::Verified {
            key_id: key_id.to_string(),
        })
    }

    async fn resolve_secret(&self, ctx: &CallContext<'_>, key_id: &str) -> Result<String, AuthError> {
        let resolved = if ctx.is_expired() {
            Err(anyhow::anyhow!("call deadline exceeded before secret lookup"))
        } else {
            let lookup = self.inner.resolver.resolve(ctx, key_id);
            match ctx.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, lookup)
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow::anyhow!("call deadline exceeded during secret lookup"))
                    }),
                None => lookup.await,
            }
        };

        match resolved {
            Ok(Some(secret)) if !secret.is_empty() => Ok(secret),
            Ok(_) => {
                diag!(key_id = %key_id, "no secret found for key id");
                Err(AuthErrorKind::UnknownKeyId.into())
            }
            Err(source) => {
                error!(
                    method = %ctx.method,
                    key_id = %key_id,
                    error = %source,
                    "internal error getting secret for key id"
                );
                Err(AuthError::SecretResolution {
                    key_id: key_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Log the internal reason and translate it into the caller-facing status
    pub fn reject(&self, method: &str, err: AuthError) -> Status {
        match &err {
            AuthError::Rejected(kind) => {
                diag!(method = %method, reason = %kind, "auth error");
            }
            AuthError::SecretResolution { .. } => {}
            AuthError::Message(e) => {
                warn!(method = %method, error = %e, "failed to canonicalize request");
            }
        }
        err.into_status(self.failure_policy)
    }

    /// Authenticate a unary request in place, payload included
    pub async fn check_request<T>(&self, method: &str, request: &Request<T>) -> Result<Admission, Status>
    where
        T: Serialize,
    {
        self.authenticate(method, Some(request.metadata()), Some(request.get_ref()))
            .await
            .map_err(|err| self.reject(method, err))
    }

    /// Gate a unary handler: authenticate with the request payload, then run
    /// `handler` with the original request
    pub async fn intercept_unary<T, U, F, Fut>(
        &self,
        method: &str,
        request: Request<T>,
        handler: F,
    ) -> Result<Response<U>, Status>
    where
        T: Serialize,
        F: FnOnce(Request<T>) -> Fut,
        Fut: Future<Output = Result<Response<U>, Status>>,
    {
        self.check_request(method, &request).await?;
        handler(request).await
    }

    /// Gate a streaming handler: the payload is not known when the stream
    /// opens, so only the method name is signed
    pub async fn intercept_streaming<T, U, F, Fut>(
        &self,
        method: &str,
        request: Request<T>,
        handler: F,
    ) -> Result<Response<U>, Status>
    where
        F: FnOnce(Request<T>) -> Fut,
        Fut: Future<Output = Result<Response<U>, Status>>,
    {
        self.authenticate::<()>(method, Some(request.metadata()), None)
            .await
            .map_err(|err| self.reject(method, err))?;
        handler(request).await
    }
}

/// First value of an ASCII metadata entry, `None` if absent, empty or not
/// printable
fn first_value<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Tower layer installing [`HmacServerInterceptor`] in front of a gRPC server
pub struct HmacServerLayer<R> {
    interceptor: HmacServerInterceptor<R>,
}

impl<R> Clone for HmacServerLayer<R> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S, R> Layer<S> for HmacServerLayer<R> {
    type Service = HmacServerService<S, R>;

    fn layer(&self, service: S) -> Self::Service {
        HmacServerService {
            inner: service,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Tower service rejecting unauthenticated calls before they reach `S`
///
/// The request body is still unread at this point, so calls are verified
/// against the method-only canonical message.
pub struct HmacServerService<S, R> {
    inner: S,
    interceptor: HmacServerInterceptor<R>,
}

impl<S: Clone, R> Clone for HmacServerService<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S, R, B> Service<http::Request<B>> for HmacServerService<S, R>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send,
    R: SecretResolver,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // Keep the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            let method = req.uri().path().to_string();
            let metadata = MetadataMap::from_headers(req.headers().clone());

            match interceptor
                .authenticate::<()>(&method, Some(&metadata), None)
                .await
            {
                Ok(_) => inner.call(req).await,
                Err(err) => Ok(interceptor.reject(&method, err).into_http()),
            }
        })
    }
}
