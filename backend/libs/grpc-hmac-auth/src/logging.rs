//! Process-wide switch for diagnostic output
//!
//! Diagnostics (which message is being signed, why a call was rejected,
//! which methods are bypassed) are silent by default. Setting
//! `GRPC_HMAC_LOG=true` before the first authenticated call turns them on;
//! `enable_logging` / `disable_logging` flip the switch at runtime.
//!
//! Secrets and signatures are never part of any diagnostic event.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable read once to seed the switch
pub const LOG_ENV_VAR: &str = "GRPC_HMAC_LOG";

static ENABLED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(flag_from_env()));

fn flag_from_env() -> bool {
    std::env::var(LOG_ENV_VAR)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Turn diagnostic output on for the whole process
pub fn enable_logging() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Turn diagnostic output off for the whole process
pub fn disable_logging() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Whether diagnostic events are currently emitted
pub fn logging_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Emit a `tracing::debug!` event only when diagnostics are enabled.
macro_rules! diag {
    ($($arg:tt)+) => {
        if $crate::logging::logging_enabled() {
            ::tracing::debug!(target: "grpc_hmac_auth", $($arg)+);
        }
    };
}

pub(crate) use diag;
