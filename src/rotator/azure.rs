//! Azure rotator: the token provider's access token is the credential.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{Rotator, SecretTarget, truncate_to_seconds};
use crate::policy::ProviderKind;
use crate::store::SecretPayload;
use crate::token::TokenProvider;
use crate::Result;

/// Secret key holding the Azure access token.
pub const AZURE_ACCESS_TOKEN_KEY: &str = "azureAccessToken";

/// Rotates an Azure AD access token for one policy.
pub struct AzureRotator {
    target: SecretTarget,
    token: Arc<dyn TokenProvider>,
}

impl AzureRotator {
    /// Assemble a rotator around a client-secret or federated provider.
    #[must_use]
    pub fn new(target: SecretTarget, token: Arc<dyn TokenProvider>) -> Self {
        Self { target, token }
    }

    async fn rotate_inner(&self) -> Result<DateTime<Utc>> {
        let token = self.token.get_token().await?;
        let expires_at = truncate_to_seconds(token.expires_at);
        let payload: SecretPayload =
            BTreeMap::from([(AZURE_ACCESS_TOKEN_KEY.to_string(), token.token.into_bytes())]);
        self.target.upsert(payload, expires_at).await?;
        Ok(expires_at)
    }
}

#[async_trait::async_trait]
impl Rotator for AzureRotator {
    fn namespace(&self) -> &str {
        self.target.namespace()
    }

    fn policy_name(&self) -> &str {
        self.target.policy_name()
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn pre_rotation_time(&self) -> Result<DateTime<Utc>> {
        self.target
            .pre_rotation_time()
            .await
            .map_err(|e| self.target.context(e))
    }

    async fn rotate(&self) -> Result<DateTime<Utc>> {
        info!(
            namespace = %self.target.namespace(),
            policy = %self.target.policy_name(),
            "Rotating Azure access token"
        );
        self.rotate_inner().await.map_err(|e| self.target.context(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    use crate::rotator::DEFAULT_PRE_ROTATION_WINDOW;
    use crate::store::InMemorySecretStore;
    use crate::token::StaticTokenProvider;

    #[tokio::test]
    async fn stores_token_under_single_key() {
        // GIVEN: a provider returning a 2h token
        let store = Arc::new(InMemorySecretStore::new());
        let target =
            SecretTarget::new("ai", "openai", DEFAULT_PRE_ROTATION_WINDOW, store.clone()).unwrap();
        let expiry = Utc::now() + TimeDelta::hours(2);
        let rotator = AzureRotator::new(target, Arc::new(StaticTokenProvider::new("aad-token", expiry)));

        // WHEN: rotated
        let got = rotator.rotate().await.unwrap();

        // THEN: one key, truncated expiry matching the annotation
        let secret = store.get("ai", "llm-credentials-openai").unwrap();
        assert_eq!(secret.data.len(), 1);
        assert_eq!(secret.get_str(AZURE_ACCESS_TOKEN_KEY), Some("aad-token"));
        assert_eq!(got, truncate_to_seconds(expiry));
        assert_eq!(secret.expires_at().unwrap(), got);
    }

    #[tokio::test]
    async fn provider_failure_writes_nothing() {
        let store = Arc::new(InMemorySecretStore::new());
        let target =
            SecretTarget::new("ai", "openai", DEFAULT_PRE_ROTATION_WINDOW, store.clone()).unwrap();
        let rotator = AzureRotator::new(target, Arc::new(StaticTokenProvider::failing("AADSTS700016")));

        let err = rotator.rotate().await.unwrap_err();

        assert!(err.to_string().contains("AADSTS700016"));
        assert_eq!(store.write_count(), 0);
    }
}
