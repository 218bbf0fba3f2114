//! OIDC client-credentials token provider.
//!
//! Each call runs discovery against the issuer, merges the advertised scopes
//! with the configured ones, reads the client secret from the secret store and
//! performs a `client_credentials` grant. Discovery and grant share one fixed
//! client-side deadline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use super::{TokenExpiry, TokenProvider, grant, read_client_secret};
use crate::policy::OidcConfig;
use crate::store::SecretStore;
use crate::{Error, Result};

/// Upper bound on discovery plus token retrieval.
pub const OIDC_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The parts of an OpenID Provider Configuration document we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    #[serde(default)]
    pub issuer: String,
    /// Token endpoint URL
    #[serde(default)]
    pub token_endpoint: String,
    /// Advertised scopes (string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// Some issuers return `"openid profile"` instead of `["openid", "profile"]`.
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match Option::<StringOrVec>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(StringOrVec::String(s)) => Ok(s.split_whitespace().map(String::from).collect()),
        Some(StringOrVec::Vec(v)) => Ok(v),
    }
}

impl ProviderMetadata {
    /// Fetch `{issuer}/.well-known/openid-configuration`.
    ///
    /// # Errors
    ///
    /// Unreachable or non-2xx discovery is an identity-token error; a
    /// document without `issuer` or `token_endpoint` is a configuration error.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Discovering OpenID provider configuration");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::identity(issuer, format!("discovery request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::identity(
                issuer,
                format!("discovery failed: HTTP {}", response.status()),
            ));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::identity(issuer, format!("invalid discovery document: {e}")))?;

        if metadata.issuer.trim().is_empty() {
            return Err(Error::Config(format!(
                "issuer is required in the OIDC provider configuration of {issuer}"
            )));
        }
        if metadata.token_endpoint.trim().is_empty() {
            return Err(Error::Config(format!(
                "token_endpoint is required in the OIDC provider configuration of {issuer}"
            )));
        }
        Ok(metadata)
    }
}

/// Union of configured and advertised scopes, configured first, no duplicates.
#[must_use]
pub fn merge_scopes(configured: &[String], advertised: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    configured
        .iter()
        .chain(advertised)
        .filter(|s| !s.is_empty() && seen.insert(s.as_str()))
        .cloned()
        .collect()
}

/// OIDC client-credentials provider.
pub struct OidcTokenProvider {
    config: OidcConfig,
    namespace: String,
    store: Arc<dyn SecretStore>,
    client: Client,
}

impl OidcTokenProvider {
    /// Create a provider. `namespace` resolves client-secret references that
    /// omit one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(config: OidcConfig, namespace: &str, store: Arc<dyn SecretStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(OIDC_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build OIDC HTTP client: {e}")))?;
        Ok(Self::with_client(config, namespace, store, client))
    }

    /// Create a provider with a caller-supplied HTTP client.
    #[must_use]
    pub fn with_client(
        config: OidcConfig,
        namespace: &str,
        store: Arc<dyn SecretStore>,
        client: Client,
    ) -> Self {
        Self {
            config,
            namespace: namespace.to_string(),
            store,
            client,
        }
    }

    /// Configured issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    async fn fetch(&self) -> Result<TokenExpiry> {
        let metadata = ProviderMetadata::discover(&self.client, &self.config.issuer).await?;
        let token_endpoint = self
            .config
            .token_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&metadata.token_endpoint)
            .to_string();
        let scopes = merge_scopes(&self.config.scopes, &metadata.scopes_supported).join(" ");

        let client_secret =
            read_client_secret(self.store.as_ref(), &self.config.client_secret, &self.namespace)
                .await?;

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        if !scopes.is_empty() {
            form.push(("scope", scopes.as_str()));
        }

        let response =
            grant::post_form(self.client.post(&token_endpoint), &form, &token_endpoint).await?;
        let token = response.into_expiry(Utc::now(), &token_endpoint)?;
        info!(
            issuer = %self.config.issuer,
            expires_at = %token.expires_at,
            "Obtained OIDC token"
        );
        Ok(token)
    }
}

#[async_trait::async_trait]
impl TokenProvider for OidcTokenProvider {
    async fn get_token(&self) -> Result<TokenExpiry> {
        tokio::time::timeout(OIDC_REQUEST_TIMEOUT, self.fetch())
            .await
            .map_err(|_| {
                Error::identity(
                    &self.config.issuer,
                    format!("no token within {}s", OIDC_REQUEST_TIMEOUT.as_secs()),
                )
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_scopes_is_deduplicated_union() {
        // GIVEN: overlapping scope lists
        let configured = vec!["sts".to_string(), "openid".to_string()];
        let advertised = vec!["openid".to_string(), "profile".to_string(), String::new()];

        // WHEN: merged
        let merged = merge_scopes(&configured, &advertised);

        // THEN: union without duplicates or blanks
        assert_eq!(merged, vec!["sts", "openid", "profile"]);
    }

    #[test]
    fn metadata_accepts_space_separated_scopes() {
        let meta: ProviderMetadata = serde_json::from_value(json!({
            "issuer": "https://idp",
            "token_endpoint": "https://idp/token",
            "scopes_supported": "openid profile"
        }))
        .unwrap();
        assert_eq!(meta.scopes_supported, vec!["openid", "profile"]);
    }

    #[test]
    fn metadata_tolerates_missing_scopes() {
        let meta: ProviderMetadata = serde_json::from_value(json!({
            "issuer": "https://idp",
            "token_endpoint": "https://idp/token"
        }))
        .unwrap();
        assert!(meta.scopes_supported.is_empty());
    }
}
