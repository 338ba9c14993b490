//! HMAC-SHA-512/256 signing and constant-time verification

use crate::logging::diag;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha512_256;
use subtle::ConstantTimeEq;

type HmacSha512_256 = Hmac<Sha512_256>;

/// Sign `message` with `secret`, returning the standard base64 encoding of
/// the MAC
pub fn sign(secret: &str, message: &str) -> String {
    diag!(message = %message, "generating signature");

    let mut mac = HmacSha512_256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());

    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check `candidate` against the signature of `message` under `secret`
///
/// The comparison does not short-circuit on the first differing byte.
/// Candidates of the wrong length are rejected without inspecting content.
pub fn verify(secret: &str, message: &str, candidate: &str) -> bool {
    let expected = sign(secret, message);
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}
