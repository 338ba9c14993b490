//! Error types for HMAC authentication
//!
//! Two layers are kept apart: [`AuthError`] carries the precise
//! internal reason a call was rejected (for logs and tests), while
//! [`tonic::Status`] is what the caller sees. The only way from one to the
//! other is [`AuthError::into_status`], which collapses every authentication
//! failure into the same `Unauthenticated` response.

use std::fmt;
use thiserror::Error;
use tonic::Status;

/// Message returned to callers for every authentication failure
pub const UNAUTHENTICATED_MESSAGE: &str = "Unauthenticated";

/// Message returned to callers when the secret store is unavailable
pub const BACKEND_UNAVAILABLE_MESSAGE: &str = "authentication backend unavailable";

/// Errors raised while building the canonical message or client metadata
///
/// These are programming errors on the caller side and never describe an
/// authentication outcome.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The request payload could not be lowered into canonical JSON
    #[error("failed to encode request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configured key id cannot be carried as a gRPC metadata value
    #[error("invalid key id {0:?}: must be printable ASCII")]
    InvalidKeyId(String),
}

impl From<MessageError> for Status {
    fn from(err: MessageError) -> Self {
        Status::internal(err.to_string())
    }
}

/// Internal reason for rejecting a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// The call carries no metadata container at all
    MissingMetadata,
    /// `x-hmac-signature` is absent or empty
    MissingSignature,
    /// `x-hmac-key-id` is absent or empty
    MissingKeyId,
    /// The resolver knows no secret for the claimed key id
    UnknownKeyId,
    /// The supplied signature does not match the expected one
    SignatureMismatch,
    /// The resolver itself failed (store unavailable, deadline exceeded)
    SecretResolutionFailed,
}

impl AuthErrorKind {
    /// Whether this kind is an authentication failure (as opposed to an
    /// infrastructure failure)
    pub fn is_authentication_failure(&self) -> bool {
        !matches!(self, Self::SecretResolutionFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingMetadata => "missing hmac metadata",
            Self::MissingSignature => "missing x-hmac-signature metadata",
            Self::MissingKeyId => "missing x-hmac-key-id metadata",
            Self::UnknownKeyId => "invalid x-hmac-key-id",
            Self::SignatureMismatch => "invalid x-hmac-signature",
            Self::SecretResolutionFailed => "secret resolution failed",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How resolver malfunctions are reported to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolverFailurePolicy {
    /// Report `Unavailable`, so outages are not mistaken for bad credentials
    #[default]
    Surface,
    /// Report the generic `Unauthenticated` response like any auth failure
    Mask,
}

/// Why the server gate refused a call
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials were missing or did not verify
    #[error("{0}")]
    Rejected(AuthErrorKind),

    /// The secret resolver failed for the claimed key id
    #[error("internal error getting secret for key id {key_id}: {source}")]
    SecretResolution {
        key_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The payload could not be canonicalized
    #[error(transparent)]
    Message(#[from] MessageError),
}

impl AuthError {
    /// Internal kind, `None` for canonicalization errors
    pub fn kind(&self) -> Option<AuthErrorKind> {
        match self {
            Self::Rejected(kind) => Some(*kind),
            Self::SecretResolution { .. } => Some(AuthErrorKind::SecretResolutionFailed),
            Self::Message(_) => None,
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        self.kind()
            .map(|kind| kind.is_authentication_failure())
            .unwrap_or(false)
    }

    /// Translate into the status returned to the caller
    ///
    /// Authentication failures never reveal which check failed.
    pub fn into_status(self, policy: ResolverFailurePolicy) -> Status {
        match self {
            Self::Rejected(_) => Status::unauthenticated(UNAUTHENTICATED_MESSAGE),
            Self::SecretResolution { .. } => match policy {
                ResolverFailurePolicy::Surface => {
                    Status::unavailable(BACKEND_UNAVAILABLE_MESSAGE)
                }
                ResolverFailurePolicy::Mask => Status::unauthenticated(UNAUTHENTICATED_MESSAGE),
            },
            Self::Message(err) => err.into(),
        }
    }
}

impl From<AuthErrorKind> for AuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self::Rejected(kind)
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        err.into_status(ResolverFailurePolicy::default())
    }
}
