//! HMAC Request Authentication for gRPC Microservices
//!
//! Callers prove possession of a shared secret by signing every call;
//! callees verify the signature before the call reaches business logic.
//!
//! ## Core Components
//!
//! - **canonical_message**: deterministic `request=<json>;method=<method>` string
//! - **sign / verify**: HMAC-SHA-512/256, base64, constant-time comparison
//! - **HmacClientInterceptor**: attaches `x-hmac-key-id` and `x-hmac-signature`
//! - **HmacServerInterceptor**: resolves the secret for the key id and admits
//!   or rejects the call, with a per-method ignore list
//! - **SecretResolver**: the seam to whatever stores the secrets
//!
//! ## Wire Contract
//!
//! Both metadata entries are plain ASCII. The signature is the standard
//! (padded) base64 encoding of `HMAC-SHA-512/256(secret, canonical_message)`.
//! The tower layers only see the method path, so they sign and verify
//! `method=<path>`; the unary helpers include the request payload.
//!
//! ## Usage Example
//!
//! ### Client Side
//!
//! ```rust,no_run
//! use grpc_hmac_auth::HmacClientInterceptor;
//! use tower::ServiceBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let interceptor = HmacClientInterceptor::new("key1", "secret1")?;
//!
//! let channel = tonic::transport::Channel::from_static("http://[::1]:50051")
//!     .connect()
//!     .await?;
//! let channel = ServiceBuilder::new()
//!     .layer(interceptor.layer())
//!     .service(channel);
//!
//! // let mut client = UserServiceClient::new(channel);
//! # Ok(())
//! # }
//! ```
//!
//! ### Server Side
//!
//! ```rust,no_run
//! use grpc_hmac_auth::{HmacServerConfig, HmacServerInterceptor, StaticSecrets};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = HmacServerInterceptor::from_config(
//!     StaticSecrets::from_env(),
//!     &HmacServerConfig::from_env(),
//! );
//!
//! // tonic::transport::Server::builder()
//! //     .layer(gate.layer())
//! //     .add_service(UserServiceServer::new(service))
//! //     .serve(addr)
//! //     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Guarantees
//!
//! - Every authentication failure is reported as the same `Unauthenticated`
//!   status; the precise reason only reaches local logs
//! - Secret store outages surface as `Unavailable` unless configured otherwise
//! - Secrets and signatures are never logged
//! - No replay protection: the canonical message carries no nonce or timestamp

mod client;
mod config;
mod context;
mod error;
mod finite;
pub mod logging;
mod message;
mod resolver;
mod server;
mod signature;

pub use client::{AuthMetadata, HmacClientInterceptor, HmacClientLayer, HmacClientService};
pub use config::{HmacClientConfig, HmacServerConfig};
pub use context::{parse_grpc_timeout, CallContext};
pub use error::{AuthError, AuthErrorKind, MessageError, ResolverFailurePolicy};
pub use logging::{disable_logging, enable_logging, logging_enabled};
pub use message::{canonical_message, method_message};
pub use resolver::{CachedResolver, FnResolver, SecretResolver, StaticSecrets};
pub use server::{Admission, HmacServerInterceptor, HmacServerLayer, HmacServerService};
pub use signature::{sign, verify};

/// Metadata key carrying the key id
pub const KEY_ID_METADATA: &str = "x-hmac-key-id";

/// Metadata key carrying the base64 signature
pub const SIGNATURE_METADATA: &str = "x-hmac-signature";

// Re-export tonic Status for convenience
pub use tonic::Status;
