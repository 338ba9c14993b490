//! Per-call context handed to secret resolvers

use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

/// Header carrying the caller's deadline
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// What the gate knows about the call being authenticated
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Full method path, e.g. `/pkg.Service/Method`
    pub method: &'a str,
    /// Incoming metadata, if the call carried any
    pub metadata: Option<&'a MetadataMap>,
    /// Point after which the caller no longer waits for an answer
    pub deadline: Option<Instant>,
}

impl<'a> CallContext<'a> {
    pub fn new(method: &'a str, metadata: Option<&'a MetadataMap>) -> Self {
        let deadline = metadata
            .and_then(|md| md.get(GRPC_TIMEOUT_HEADER))
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        Self {
            method,
            metadata,
            deadline,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time left before the deadline, `None` without a deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map(|d| d.is_zero()).unwrap_or(false)
    }
}

/// Parse a `grpc-timeout` value (`<1-8 digits><H|M|S|m|u|n>`)
///
/// Malformed values yield `None`, which callers treat as "no deadline".
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn test_parse_grpc_timeout_units() {
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("100m"), Some(Duration::from_millis(100)));
        assert_eq!(parse_grpc_timeout("7u"), Some(Duration::from_micros(7)));
        assert_eq!(parse_grpc_timeout("9n"), Some(Duration::from_nanos(9)));
    }

    #[test]
    fn test_parse_grpc_timeout_malformed() {
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[tokio::test]
    async fn test_context_deadline_from_metadata() {
        let mut metadata = MetadataMap::new();
        metadata.insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("10S"));

        let ctx = CallContext::new("/pkg.Svc/Call", Some(&metadata));
        let remaining = ctx.remaining().expect("deadline should be set");
        assert!(remaining <= Duration::from_secs(10));
        assert!(!ctx.is_expired());
    }

    #[tokio::test]
    async fn test_context_without_deadline() {
        let ctx = CallContext::new("/pkg.Svc/Call", None);
        assert!(ctx.deadline.is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_expires() {
        let ctx = CallContext::new("/pkg.Svc/Call", None)
            .with_deadline(Instant::now() + Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(ctx.is_expired());
    }
}
