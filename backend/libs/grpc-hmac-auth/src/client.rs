//! Client-side HMAC Interceptor
//!
//! Signs every outgoing gRPC call and attaches the key id and signature as
//! metadata.

use crate::config::HmacClientConfig;
use crate::error::MessageError;
use crate::message::{canonical_message, method_message};
use crate::signature::sign;
use crate::{KEY_ID_METADATA, SIGNATURE_METADATA};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{GrpcMethod, Request, Status};
use tower::{Layer, Service};

/// The two metadata entries authenticating one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMetadata {
    pub key_id: AsciiMetadataValue,
    pub signature: AsciiMetadataValue,
}

impl AuthMetadata {
    /// Insert both entries, replacing any previous values
    pub fn apply(self, metadata: &mut MetadataMap) {
        metadata.insert(KEY_ID_METADATA, self.key_id);
        metadata.insert(SIGNATURE_METADATA, self.signature);
    }
}

/// Client-side interceptor that signs outgoing gRPC calls
///
/// ## Design
///
/// - **Fail-fast**: an unusable key id fails at construction time
/// - **Thread-safe**: cloneable, immutable after construction
/// - **No exemptions**: every call is signed, the server decides what to skip
///
/// Install it on a channel with [`HmacClientInterceptor::layer`], or pass it
/// to a generated client's `with_interceptor`.
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_hmac_auth::HmacClientInterceptor;
/// use tonic::transport::Channel;
/// use tower::ServiceBuilder;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let interceptor = HmacClientInterceptor::new("key1", "secret1")?;
///
/// let channel = Channel::from_static("http://[::1]:50051").connect().await?;
/// let channel = ServiceBuilder::new()
///     .layer(interceptor.layer())
///     .service(channel);
///
/// // let mut client = EchoClient::new(channel);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HmacClientInterceptor {
    key_id: AsciiMetadataValue,
    secret: Arc<str>,
}

impl fmt::Debug for HmacClientInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacClientInterceptor")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl HmacClientInterceptor {
    /// Create a new HMAC client interceptor
    ///
    /// ## Arguments
    ///
    /// * `key_id` - Identifier the server uses to look up the secret
    /// * `secret` - Shared secret the calls are signed with
    ///
    /// ## Errors
    ///
    /// Returns [`MessageError::InvalidKeyId`] if the key id is empty or
    /// cannot travel as an ASCII metadata value.
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Result<Self, MessageError> {
        let key_id = key_id.into();
        if key_id.is_empty() {
            return Err(MessageError::InvalidKeyId(key_id));
        }
        let key_id = AsciiMetadataValue::try_from(key_id.clone())
            .map_err(|_| MessageError::InvalidKeyId(key_id))?;
        let secret: String = secret.into();

        Ok(Self {
            key_id,
            secret: Arc::from(secret),
        })
    }

    /// Create an interceptor from loaded client credentials
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use grpc_hmac_auth::{HmacClientConfig, HmacClientInterceptor};
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = HmacClientConfig::from_env()?;
    /// let interceptor = HmacClientInterceptor::from_config(&config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_config(config: &HmacClientConfig) -> Result<Self, MessageError> {
        Self::new(config.key_id.clone(), config.secret.clone())
    }

    /// Key id sent as `x-hmac-key-id`
    pub fn key_id(&self) -> &AsciiMetadataValue {
        &self.key_id
    }

    /// Compute the metadata for a call to `method` carrying `payload`
    ///
    /// `None` means the payload is not known when the call starts; only the
    /// method name is signed then.
    pub fn auth_metadata<T>(&self, method: &str, payload: Option<&T>) -> Result<AuthMetadata, MessageError>
    where
        T: Serialize + ?Sized,
    {
        let message = canonical_message(payload, method)?;
        Ok(self.metadata_for(&message))
    }

    fn metadata_for(&self, message: &str) -> AuthMetadata {
        let signature = AsciiMetadataValue::try_from(sign(&self.secret, message))
            .expect("base64 output is valid ASCII metadata");

        AuthMetadata {
            key_id: self.key_id.clone(),
            signature,
        }
    }

    /// Sign a unary request, payload included
    ///
    /// A payload that cannot be canonicalized aborts the call here instead of
    /// sending a signature the server can never reproduce.
    pub fn sign_request<T>(&self, method: &str, request: &mut Request<T>) -> Result<(), MessageError>
    where
        T: Serialize,
    {
        let auth = self.auth_metadata(method, Some(request.get_ref()))?;
        auth.apply(request.metadata_mut());
        Ok(())
    }

    /// Sign a streaming request: messages flow after the call opens, so only
    /// the method name is signed
    pub fn sign_streaming_request<T>(&self, method: &str, request: &mut Request<T>) {
        self.metadata_for(&method_message(method))
            .apply(request.metadata_mut());
    }

    /// Tower layer signing every call on a channel
    pub fn layer(&self) -> HmacClientLayer {
        HmacClientLayer {
            interceptor: self.clone(),
        }
    }
}

/// `Client::with_interceptor` integration
///
/// Generated clients record the target method as a [`GrpcMethod`] request
/// extension; only the method path is signed, matching [`HmacClientService`].
impl Interceptor for HmacClientInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let path = request
            .extensions()
            .get::<GrpcMethod>()
            .map(|method| format!("/{}/{}", method.service(), method.method()))
            .ok_or_else(|| Status::internal("gRPC method unknown, cannot sign request"))?;

        self.sign_streaming_request(&path, &mut request);
        Ok(request)
    }
}

/// Tower layer wrapping a channel with [`HmacClientService`]
#[derive(Clone, Debug)]
pub struct HmacClientLayer {
    interceptor: HmacClientInterceptor,
}

impl<S> Layer<S> for HmacClientLayer {
    type Service = HmacClientService<S>;

    fn layer(&self, service: S) -> Self::Service {
        HmacClientService {
            inner: service,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Tower service adding HMAC metadata to every outgoing HTTP/2 request
///
/// Only the encoded body is visible at this level, so the signature covers
/// the method path alone, for unary and streaming calls alike.
#[derive(Clone, Debug)]
pub struct HmacClientService<S> {
    inner: S,
    interceptor: HmacClientInterceptor,
}

impl<S, B> Service<http::Request<B>> for HmacClientService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let (mut parts, body) = req.into_parts();

        let mut metadata = MetadataMap::from_headers(std::mem::take(&mut parts.headers));
        self.interceptor
            .metadata_for(&method_message(parts.uri.path()))
            .apply(&mut metadata);
        parts.headers = metadata.into_headers();

        self.inner.call(http::Request::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Ready;

    #[derive(Serialize)]
    struct EchoRequest {
        field: String,
    }

    fn interceptor() -> HmacClientInterceptor {
        HmacClientInterceptor::new("key1", "secret1").unwrap()
    }

    fn header<'a>(metadata: &'a MetadataMap, key: &str) -> &'a str {
        metadata.get(key).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_new_rejects_bad_key_id() {
        assert!(matches!(
            HmacClientInterceptor::new("", "secret1"),
            Err(MessageError::InvalidKeyId(_))
        ));
        assert!(matches!(
            HmacClientInterceptor::new("key\n1", "secret1"),
            Err(MessageError::InvalidKeyId(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", interceptor());
        assert!(debug.contains("key1"));
        assert!(!debug.contains("secret1"));
    }

    #[test]
    fn test_sign_streaming_request() {
        let mut request = Request::new(());
        interceptor().sign_streaming_request("method1", &mut request);

        assert_eq!(header(request.metadata(), KEY_ID_METADATA), "key1");
        assert_eq!(
            header(request.metadata(), SIGNATURE_METADATA),
            sign("secret1", "method=method1")
        );
    }

    #[test]
    fn test_sign_unary_request() {
        let mut request = Request::new(EchoRequest {
            field: "value".to_string(),
        });
        interceptor().sign_request("method1", &mut request).unwrap();

        let message = canonical_message(Some(request.get_ref()), "method1").unwrap();
        assert_eq!(message, r#"request={"field":"value"};method=method1"#);
        assert_eq!(header(request.metadata(), KEY_ID_METADATA), "key1");
        assert_eq!(
            header(request.metadata(), SIGNATURE_METADATA),
            sign("secret1", &message)
        );
    }

    #[test]
    fn test_sign_request_replaces_stale_values() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(SIGNATURE_METADATA, "stale".parse().unwrap());

        interceptor().sign_streaming_request("method1", &mut request);

        let values: Vec<_> = request.metadata().get_all(SIGNATURE_METADATA).iter().collect();
        assert_eq!(values.len(), 1);
        assert_ne!(values[0].to_str().unwrap(), "stale");
    }

    #[test]
    fn test_sign_request_serialization_error() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], "non-string keys");
        let mut request = Request::new(map);

        let result = interceptor().sign_request("method1", &mut request);
        assert!(matches!(result, Err(MessageError::Serialization(_))));
        assert!(request.metadata().get(SIGNATURE_METADATA).is_none());
    }

    #[test]
    fn test_interceptor_signs_grpc_method() {
        let mut request = Request::new(());
        request
            .extensions_mut()
            .insert(GrpcMethod::new("pkg.Echo", "Ping"));

        let request = Interceptor::call(&mut interceptor(), request).unwrap();

        assert_eq!(header(request.metadata(), KEY_ID_METADATA), "key1");
        assert_eq!(
            header(request.metadata(), SIGNATURE_METADATA),
            sign("secret1", "method=/pkg.Echo/Ping")
        );
    }

    #[test]
    fn test_interceptor_requires_grpc_method() {
        let result = Interceptor::call(&mut interceptor(), Request::new(()));

        let status = result.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[derive(Clone, Default)]
    struct Capture;

    impl Service<http::Request<()>> for Capture {
        type Response = http::HeaderMap;
        type Error = std::convert::Infallible;
        type Future = Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<()>) -> Self::Future {
            std::future::ready(Ok(req.headers().clone()))
        }
    }

    #[tokio::test]
    async fn test_layer_signs_method_path() {
        use tower::ServiceExt;

        let service = interceptor().layer().layer(Capture);
        let request = http::Request::builder()
            .uri("http://localhost/pkg.Echo/Ping")
            .header("te", "trailers")
            .body(())
            .unwrap();

        let headers = service.oneshot(request).await.unwrap();

        assert_eq!(headers.get(KEY_ID_METADATA).unwrap(), "key1");
        assert_eq!(
            headers.get(SIGNATURE_METADATA).unwrap().to_str().unwrap(),
            sign("secret1", "method=/pkg.Echo/Ping")
        );
        assert_eq!(headers.get("te").unwrap(), "trailers");
    }
}
