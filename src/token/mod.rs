//! Identity token providers
//!
//! A [`TokenProvider`] yields a bearer token plus its absolute expiry. Every
//! rotator starts from one: the token is either the final credential (Azure,
//! GCP key files) or the subject of a further exchange (AWS STS, GCP STS).
//!
//! Tokens are transient. Providers re-read any referenced secret on each call
//! and never cache token material between calls.

pub mod azure;
pub mod fixed;
pub mod gcp_key;
pub(crate) mod grant;
pub mod jwt;
pub mod oidc;
pub mod service_account;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::policy::{CLIENT_SECRET_KEY, SecretRef};
use crate::store::SecretStore;
use crate::{Error, Result};

pub use azure::{AzureClientSecretTokenProvider, AzureFederatedTokenProvider};
pub use fixed::StaticTokenProvider;
pub use gcp_key::GcpServiceAccountKeyProvider;
pub use oidc::OidcTokenProvider;
pub use service_account::ServiceAccountTokenProvider;

/// A bearer token and when it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenExpiry {
    /// Bearer token
    pub token: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl TokenExpiry {
    /// Pair a token with its expiry.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }
}

impl fmt::Debug for TokenExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExpiry")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh token.
    async fn get_token(&self) -> Result<TokenExpiry>;
}

/// Read the `client-secret` value of a referenced secret.
///
/// A reference without namespace resolves in `default_namespace`.
///
/// # Errors
///
/// Store failures propagate unchanged; a missing or empty value is
/// [`Error::Config`].
pub async fn read_client_secret(
    store: &dyn SecretStore,
    secret: &SecretRef,
    default_namespace: &str,
) -> Result<String> {
    read_secret_value(store, secret, default_namespace, CLIENT_SECRET_KEY).await
}

/// Read one key of a referenced secret as UTF-8.
pub(crate) async fn read_secret_value(
    store: &dyn SecretStore,
    secret: &SecretRef,
    default_namespace: &str,
    key: &str,
) -> Result<String> {
    let namespace = secret.namespace_or(default_namespace);
    let record = store.lookup(namespace, &secret.name).await?;
    match record.get_str(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(_) => Err(Error::Config(format!(
            "secret {namespace}/{} has an empty {key:?} value",
            secret.name
        ))),
        None => Err(Error::Config(format!(
            "secret {namespace}/{} has no {key:?} key",
            secret.name
        ))),
    }
}
