//! GCP workload identity federation.
//!
//! Two hops: an RFC 8693 token exchange at GCP STS, then (optionally)
//! `generateAccessToken` on the IAM credentials API to impersonate a service
//! account. The STS request carries the subject token in its body and must
//! not send an `Authorization` header; the impersonation request authenticates
//! with the STS token as bearer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::token::TokenExpiry;
use crate::token::grant;
use crate::transport::Transports;
use crate::{Error, Result};

/// RFC 8693 grant type.
pub const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Scope requested from STS.
pub const STS_SCOPE: &str = "https://www.googleapis.com/auth/iam";
/// Requested token type.
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// Subject token type.
pub const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Scope requested for impersonated tokens.
pub const IMPERSONATION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// STS token exchange.
#[async_trait::async_trait]
pub trait StsExchange: Send + Sync {
    /// Trade `subject_token` for a federated access token for `audience`.
    async fn exchange(&self, subject_token: &str, audience: &str) -> Result<TokenExpiry>;
}

/// Service-account impersonation.
#[async_trait::async_trait]
pub trait ServiceAccountImpersonation: Send + Sync {
    /// Obtain a token for `service_account_email` using `sts_token` as bearer.
    async fn impersonate(&self, sts_token: &str, service_account_email: &str) -> Result<TokenExpiry>;
}

/// HTTP implementation of [`StsExchange`].
pub struct HttpStsExchange {
    transports: Arc<Transports>,
    endpoint: String,
}

impl HttpStsExchange {
    /// Create a client posting to `endpoint`.
    pub fn new(transports: Arc<Transports>, endpoint: impl Into<String>) -> Self {
        Self {
            transports,
            endpoint: endpoint.into(),
        }
    }
}

/// Form fields of the token exchange request.
#[must_use]
pub fn sts_form<'a>(subject_token: &'a str, audience: &'a str) -> [(&'static str, &'a str); 6] {
    [
        ("grant_type", TOKEN_EXCHANGE_GRANT_TYPE),
        ("audience", audience),
        ("scope", STS_SCOPE),
        ("requested_token_type", ACCESS_TOKEN_TYPE),
        ("subject_token", subject_token),
        ("subject_token_type", JWT_TOKEN_TYPE),
    ]
}

#[async_trait::async_trait]
impl StsExchange for HttpStsExchange {
    async fn exchange(&self, subject_token: &str, audience: &str) -> Result<TokenExpiry> {
        debug!(endpoint = %self.endpoint, audience = %audience, "Exchanging token at GCP STS");
        let client = self.transports.gcp.without_auth()?;
        let now = Utc::now();
        let response = grant::post_form(
            client.post(&self.endpoint),
            &sts_form(subject_token, audience),
            audience,
        )
        .await?;
        let token = response.into_expiry(now, audience)?;
        info!(audience = %audience, expires_at = %token.expires_at, "Obtained GCP STS token");
        Ok(token)
    }
}

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: [&'a str; 1],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: DateTime<Utc>,
}

/// HTTP implementation of [`ServiceAccountImpersonation`].
pub struct HttpServiceAccountImpersonation {
    transports: Arc<Transports>,
    base_url: String,
}

impl HttpServiceAccountImpersonation {
    /// Create a client against the IAM credentials API at `base_url`
    /// (e.g. `https://iamcredentials.googleapis.com/v1`).
    pub fn new(transports: Arc<Transports>, base_url: impl Into<String>) -> Self {
        Self {
            transports,
            base_url: base_url.into(),
        }
    }

    fn url(&self, email: &str) -> String {
        format!(
            "{}/projects/-/serviceAccounts/{email}:generateAccessToken",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl ServiceAccountImpersonation for HttpServiceAccountImpersonation {
    async fn impersonate(&self, sts_token: &str, service_account_email: &str) -> Result<TokenExpiry> {
        let url = self.url(service_account_email);
        debug!(url = %url, "Impersonating service account");

        let client = self.transports.gcp.with_bearer(sts_token)?;
        let response = client
            .post(&url)
            .json(&GenerateAccessTokenRequest {
                scope: [IMPERSONATION_SCOPE],
            })
            .send()
            .await
            .map_err(|e| Error::exchange(service_account_email, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::exchange(
                service_account_email,
                format!("HTTP {status}: {}", body.trim()),
            ));
        }

        let parsed: GenerateAccessTokenResponse = response.json().await.map_err(|e| {
            Error::exchange(service_account_email, format!("invalid response: {e}"))
        })?;
        if parsed.access_token.is_empty() {
            return Err(Error::exchange(
                service_account_email,
                "response has an empty accessToken",
            ));
        }

        info!(
            service_account = %service_account_email,
            expires_at = %parsed.expire_time,
            "Obtained impersonated GCP token"
        );
        Ok(TokenExpiry::new(parsed.access_token, parsed.expire_time))
    }
}
