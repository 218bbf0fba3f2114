//! Unverified JWT claim extraction.
//!
//! Tokens handled here were issued to us, not presented to us, so the
//! signature is not checked. Only the expiry is read.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Subset of registered claims we read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnverifiedClaims {
    /// Expiry (seconds since epoch)
    #[serde(default)]
    pub exp: Option<i64>,
}

impl UnverifiedClaims {
    /// `exp` as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Decode the payload segment of a JWT without verifying it.
///
/// Returns `None` when the token is not a three-part JWT with a JSON payload.
#[must_use]
pub fn unverified_claims(token: &str) -> Option<UnverifiedClaims> {
    let mut parts = token.trim().split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    // Some issuers pad their segments
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry of a JWT, if it is one and carries `exp`.
#[must_use]
pub fn unverified_expiry(token: &str) -> Option<DateTime<Utc>> {
    unverified_claims(token)?.expires_at()
}

#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_exp_claim() {
        // GIVEN: a JWT with exp
        let token = encode_unsigned(&json!({"iss": "https://kubernetes.default.svc", "exp": 1_900_000_000}));

        // WHEN: decoded
        let claims = unverified_claims(&token).unwrap();

        // THEN: exp becomes a timestamp
        assert_eq!(
            claims.expires_at().unwrap(),
            DateTime::from_timestamp(1_900_000_000, 0).unwrap()
        );
    }

    #[test]
    fn opaque_tokens_have_no_expiry() {
        assert!(unverified_expiry("ya29.opaque-access-token").is_none());
        assert!(unverified_expiry("a.b").is_none());
        assert!(unverified_expiry("a.b.c.d").is_none());
    }

    #[test]
    fn missing_exp_is_none() {
        let token = encode_unsigned(&json!({"sub": "system:serviceaccount:ai:gateway"}));
        assert!(unverified_expiry(&token).is_none());
    }

    #[test]
    fn malformed_payload_is_none() {
        assert!(unverified_claims("eyJhbGciOiJub25lIn0.!!!.sig").is_none());
    }
}
