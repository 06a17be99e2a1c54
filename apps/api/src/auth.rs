//! Request authentication.
//!
//! Tenant authentication is performed upstream by the platform gateway; this
//! core trusts the identity headers it injects (`x-tenant-id`, optional
//! `x-user-id`). Internal service-to-service routes are instead guarded by a
//! timestamped HMAC signature over `method:path:timestamp`.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew for signed internal requests.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Authenticated caller identity, extracted from gateway headers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_tenant = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let tenant_id = raw_tenant
            .parse::<Uuid>()
            .map_err(|_| AppError::BadTenant(format!("'{raw_tenant}' is not a valid tenant id")))?;

        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Uuid>().ok());

        Ok(AuthUser { tenant_id, user_id })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("timestamp is not a unix epoch value")]
    BadTimestamp,

    #[error("timestamp outside the allowed clock skew")]
    Expired,

    #[error("signature is not valid hex")]
    BadEncoding,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies a signed internal request: `signature_hex` must be
/// HMAC-SHA256(`method:path:timestamp`) under the shared secret, and the
/// timestamp must be within the clock-skew window. Comparison is timing-safe.
pub fn verify_internal_signature(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: &str,
    signature_hex: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::BadTimestamp)?;
    if (now_unix - ts).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Expired);
    }

    let signature = decode_hex(signature_hex).ok_or(SignatureError::BadEncoding)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(format!("{method}:{path}:{timestamp}").as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Computes the hex signature for a request. Exposed so tests and internal
/// callers share one definition of the signed message.
#[allow(dead_code)]
pub fn sign_internal_request(secret: &str, method: &str, path: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{method}:{path}:{timestamp}").as_bytes());
    encode_hex(&mac.finalize().into_bytes())
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-internal-secret";

    #[test]
    fn test_valid_signature_verifies() {
        let now = 1_754_500_000;
        let sig = sign_internal_request(SECRET, "POST", "/internal/llm-usage-log", now);
        assert_eq!(
            verify_internal_signature(
                SECRET,
                "POST",
                "/internal/llm-usage-log",
                &now.to_string(),
                &sig,
                now + 10,
            ),
            Ok(())
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let now = 1_754_500_000;
        let sig = sign_internal_request("other-secret", "POST", "/internal/llm-usage-log", now);
        assert_eq!(
            verify_internal_signature(
                SECRET,
                "POST",
                "/internal/llm-usage-log",
                &now.to_string(),
                &sig,
                now,
            ),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_path_is_rejected() {
        let now = 1_754_500_000;
        let sig = sign_internal_request(SECRET, "POST", "/internal/llm-usage-log", now);
        assert_eq!(
            verify_internal_signature(SECRET, "POST", "/internal/other", &now.to_string(), &sig, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let now = 1_754_500_000;
        let then = now - MAX_CLOCK_SKEW_SECS - 1;
        let sig = sign_internal_request(SECRET, "POST", "/internal/llm-usage-log", then);
        assert_eq!(
            verify_internal_signature(
                SECRET,
                "POST",
                "/internal/llm-usage-log",
                &then.to_string(),
                &sig,
                now,
            ),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_future_timestamp_within_skew_is_accepted() {
        let now = 1_754_500_000;
        let ahead = now + MAX_CLOCK_SKEW_SECS - 1;
        let sig = sign_internal_request(SECRET, "POST", "/internal/llm-usage-log", ahead);
        assert_eq!(
            verify_internal_signature(
                SECRET,
                "POST",
                "/internal/llm-usage-log",
                &ahead.to_string(),
                &sig,
                now,
            ),
            Ok(())
        );
    }

    #[test]
    fn test_non_numeric_timestamp_is_rejected() {
        assert_eq!(
            verify_internal_signature(SECRET, "POST", "/x", "yesterday", "abcd", 0),
            Err(SignatureError::BadTimestamp)
        );
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let now = 1_754_500_000;
        assert_eq!(
            verify_internal_signature(SECRET, "POST", "/x", &now.to_string(), "zzzz", now),
            Err(SignatureError::BadEncoding)
        );
        assert_eq!(
            verify_internal_signature(SECRET, "POST", "/x", &now.to_string(), "abc", now),
            Err(SignatureError::BadEncoding)
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = [0x00, 0x7f, 0xff, 0x10];
        assert_eq!(decode_hex(&encode_hex(&bytes)).unwrap(), bytes);
    }
}
