//! Azure AD token providers.
//!
//! Both flows hit the tenant's v2 token endpoint with a `client_credentials`
//! grant. The client-secret flow authenticates with a secret read from the
//! store; the federated flow presents an OIDC token as a JWT client assertion.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::{TokenExpiry, TokenProvider, grant, read_client_secret};
use crate::policy::SecretRef;
use crate::store::SecretStore;
use crate::transport::{ProxyTransport, Transports};
use crate::Result;

/// Scope requested when the policy names none.
pub const DEFAULT_AZURE_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Tenant, client and scope of an Azure AD token request.
#[derive(Debug, Clone)]
pub struct AzureTokenRequest {
    /// Full v2 token endpoint of the tenant
    pub token_url: String,
    /// Tenant ID (for logging)
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Requested scope
    pub scope: String,
}

/// Client-secret credential flow.
pub struct AzureClientSecretTokenProvider {
    request: AzureTokenRequest,
    client_secret: SecretRef,
    namespace: String,
    store: Arc<dyn SecretStore>,
    transport: Arc<Transports>,
}

impl AzureClientSecretTokenProvider {
    /// Create the provider. The secret is read on each call.
    #[must_use]
    pub fn new(
        request: AzureTokenRequest,
        client_secret: SecretRef,
        namespace: &str,
        store: Arc<dyn SecretStore>,
        transport: Arc<Transports>,
    ) -> Self {
        Self {
            request,
            client_secret,
            namespace: namespace.to_string(),
            store,
            transport,
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for AzureClientSecretTokenProvider {
    async fn get_token(&self) -> Result<TokenExpiry> {
        let secret =
            read_client_secret(self.store.as_ref(), &self.client_secret, &self.namespace).await?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.request.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scope", self.request.scope.as_str()),
        ];
        request_token(&self.transport.azure, &self.request, &form).await
    }
}

/// Federated credential flow: an OIDC token is the client assertion.
pub struct AzureFederatedTokenProvider {
    request: AzureTokenRequest,
    assertion: Arc<dyn TokenProvider>,
    transport: Arc<Transports>,
}

impl AzureFederatedTokenProvider {
    /// Create the provider around an assertion source.
    #[must_use]
    pub fn new(
        request: AzureTokenRequest,
        assertion: Arc<dyn TokenProvider>,
        transport: Arc<Transports>,
    ) -> Self {
        Self {
            request,
            assertion,
            transport,
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for AzureFederatedTokenProvider {
    async fn get_token(&self) -> Result<TokenExpiry> {
        let assertion = self.assertion.get_token().await?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.request.client_id.as_str()),
            ("client_assertion_type", JWT_BEARER_ASSERTION_TYPE),
            ("client_assertion", assertion.token.as_str()),
            ("scope", self.request.scope.as_str()),
        ];
        request_token(&self.transport.azure, &self.request, &form).await
    }
}

async fn request_token(
    transport: &ProxyTransport,
    request: &AzureTokenRequest,
    form: &[(&str, &str)],
) -> Result<TokenExpiry> {
    let client = transport.without_auth()?;
    let response =
        grant::post_form(client.post(&request.token_url), form, &request.token_url).await?;
    let token = response.into_expiry(Utc::now(), &request.token_url)?;
    info!(
        tenant_id = %request.tenant_id,
        client_id = %request.client_id,
        expires_at = %token.expires_at,
        "Obtained Azure AD token"
    );
    Ok(token)
}
