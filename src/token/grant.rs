//! OAuth 2.0 token endpoint plumbing shared by the form-encoded grants
//! (client credentials, JWT bearer, RFC 8693 token exchange).

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::{TokenExpiry, jwt};
use crate::{Error, Result};

/// Token endpoint success response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    pub expires_in: Option<i64>,
}

/// `expires_in` is a number per RFC 6749, but some servers send a string.
fn deserialize_expires_in<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl TokenResponse {
    /// Absolute expiry: `now + expires_in` when positive, else the JWT `exp`
    /// claim of the access token. An `expires_in` past the representable
    /// range is an exchange error.
    pub fn into_expiry(self, now: DateTime<Utc>, target: &str) -> Result<TokenExpiry> {
        let expires_at = match self.expires_in {
            Some(secs) if secs > 0 => TimeDelta::try_seconds(secs)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| {
                    Error::exchange(target, format!("expires_in {secs} is out of range"))
                })?,
            _ => jwt::unverified_expiry(&self.access_token).ok_or_else(|| {
                Error::exchange(
                    target,
                    "token response has neither a positive expires_in nor a JWT exp claim",
                )
            })?,
        };
        Ok(TokenExpiry::new(self.access_token, expires_at))
    }
}

/// Send a form-encoded token request and decode the response.
///
/// Non-2xx responses become [`Error::Exchange`] carrying status and body.
pub(crate) async fn post_form(
    request: RequestBuilder,
    form: &[(&str, &str)],
    target: &str,
) -> Result<TokenResponse> {
    let response = request
        .form(form)
        .send()
        .await
        .map_err(|e| Error::exchange(target, format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::exchange(
            target,
            format!("HTTP {status}: {}", body.trim()),
        ));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::exchange(target, format!("invalid token response: {e}")))?;
    if parsed.access_token.is_empty() {
        return Err(Error::exchange(target, "token response has an empty access_token"));
    }
    debug!(target = %target, expires_in = ?parsed.expires_in, "Token endpoint answered");
    Ok(parsed)
}
