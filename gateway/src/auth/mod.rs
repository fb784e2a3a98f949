//! Authentication primitives for the control webhook and carrier endpoints.
//!
//! Three mechanisms live here:
//!
//! 1. **Shared bearer tokens**, compared in constant time. Used by the
//!    control webhook and (with a stricter minimum length) the admin
//!    settings endpoint.
//! 2. **Signed-request envelopes**: HMAC-SHA256 over `timestamp.body`,
//!    with the signature presented as hex or base64 and the timestamp
//!    bounded by a tolerance window.
//! 3. **Carrier request signatures**: HMAC-SHA1 over the request URL plus
//!    the sorted form parameters, base64-encoded, as the telephony
//!    provider computes them.

use std::collections::HashMap;

use base64::prelude::*;
use hmac::{Hmac, Mac};
use ring::constant_time;
use sha2::Sha256;

use crate::errors::auth_error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

/// Minimum length for the admin bearer secret.
pub const ADMIN_SECRET_MIN_LEN: usize = 32;

/// Default tolerance for signed-request timestamps, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Constant-time equality over byte slices.
///
/// Length is checked first; `ring` requires equal-length inputs and the
/// length of a shared secret is not considered sensitive here.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && constant_time::verify_slices_are_equal(a, b).is_ok()
}

/// Extract a bearer token from an `Authorization` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}

/// Verify a bearer token against a shared secret in constant time.
pub fn verify_bearer(presented: &str, expected: &str) -> AuthResult<()> {
    if expected.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials)
    }
}

/// Verify the admin bearer secret. Secrets shorter than
/// [`ADMIN_SECRET_MIN_LEN`] are rejected outright, even if they match.
pub fn verify_admin_bearer(presented: &str, expected: &str) -> AuthResult<()> {
    if expected.len() < ADMIN_SECRET_MIN_LEN {
        return Err(AuthError::InvalidCredentials);
    }
    verify_bearer(presented, expected)
}

/// Verify an HMAC-SHA256 signed-request envelope.
///
/// The signed payload is `"{timestamp}.{body}"`. The signature may be hex
/// or base64 encoded; both are tried. Timestamps further than
/// `tolerance_seconds` from `now_epoch` are rejected before any HMAC work.
pub fn verify_signed_request(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    tolerance_seconds: i64,
    now_epoch: i64,
) -> AuthResult<()> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| AuthError::BadSignature)?;
    if (now_epoch - ts).abs() > tolerance_seconds {
        return Err(AuthError::StaleTimestamp);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::BadSignature)?;
    mac.update(timestamp.trim().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let presented = decode_signature(signature).ok_or(AuthError::BadSignature)?;
    if constant_time_eq(&expected, &presented) {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}

/// Decode a signature presented as hex or (standard) base64.
fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    let trimmed = signature.trim();
    if let Ok(bytes) = hex::decode(trimmed) {
        return Some(bytes);
    }
    BASE64_STANDARD.decode(trimmed).ok()
}

/// Verify a carrier webhook signature.
///
/// The carrier signs `url + concat(sorted form params as key||value)` with
/// HMAC-SHA1 keyed by the account auth token and base64-encodes the digest.
pub fn verify_carrier_signature(
    auth_token: &str,
    url: &str,
    params: &HashMap<String, String>,
    signature: &str,
) -> bool {
    use ring::hmac;

    let mut payload = url.to_string();
    let mut sorted: Vec<(&String, &String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        auth_token.as_bytes(),
    );
    let computed = hmac::sign(&key, payload.as_bytes());
    let computed_b64 = BASE64_STANDARD.encode(computed.as_ref());

    constant_time_eq(computed_b64.as_bytes(), signature.as_bytes())
}
