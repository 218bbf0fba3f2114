//! GCP rotator.
//!
//! Federated mode runs up to three hops: base identity token → STS token
//! exchange → optional service-account impersonation. Key-file mode signs a
//! JWT with a stored service-account key and uses the result directly.
//! Either way the secret gets the access token plus the policy's project and
//! region, replacing any previous keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{Rotator, SecretTarget, truncate_to_seconds};
use crate::exchange::{ServiceAccountImpersonation, StsExchange};
use crate::policy::ProviderKind;
use crate::store::SecretPayload;
use crate::token::{TokenExpiry, TokenProvider};
use crate::Result;

/// Secret key holding the access token.
pub const GCP_ACCESS_TOKEN_KEY: &str = "gcpAccessToken";
/// Secret key holding the project name.
pub const GCP_PROJECT_NAME_KEY: &str = "projectName";
/// Secret key holding the region.
pub const GCP_REGION_KEY: &str = "region";

/// Workload identity federation hops.
pub struct GcpFederation {
    /// Subject token source
    pub identity: Arc<dyn TokenProvider>,
    /// STS audience for the pool/provider
    pub audience: String,
    /// STS client
    pub sts: Arc<dyn StsExchange>,
    /// Service account email and client, when impersonating
    pub impersonation: Option<(String, Arc<dyn ServiceAccountImpersonation>)>,
}

/// Where the final access token comes from.
pub enum GcpTokenSource {
    /// STS exchange, optionally followed by impersonation
    Federated(GcpFederation),
    /// Service-account key file
    ServiceAccountKey(Arc<dyn TokenProvider>),
}

/// Rotates a GCP access token for one policy.
pub struct GcpRotator {
    target: SecretTarget,
    project_name: String,
    region: String,
    source: GcpTokenSource,
}

impl GcpRotator {
    /// Assemble a rotator.
    #[must_use]
    pub fn new(
        target: SecretTarget,
        project_name: impl Into<String>,
        region: impl Into<String>,
        source: GcpTokenSource,
    ) -> Self {
        Self {
            target,
            project_name: project_name.into(),
            region: region.into(),
            source,
        }
    }

    async fn access_token(&self) -> Result<TokenExpiry> {
        match &self.source {
            GcpTokenSource::ServiceAccountKey(provider) => provider.get_token().await,
            GcpTokenSource::Federated(federation) => {
                let subject = federation.identity.get_token().await?;
                let sts_token = federation
                    .sts
                    .exchange(&subject.token, &federation.audience)
                    .await?;
                match &federation.impersonation {
                    Some((email, client)) => {
                        debug!(service_account = %email, "Impersonating with STS token");
                        client.impersonate(&sts_token.token, email).await
                    }
                    None => Ok(sts_token),
                }
            }
        }
    }

    async fn rotate_inner(&self) -> Result<DateTime<Utc>> {
        let token = self.access_token().await?;
        let expires_at = truncate_to_seconds(token.expires_at);
        let payload: SecretPayload = BTreeMap::from([
            (GCP_ACCESS_TOKEN_KEY.to_string(), token.token.into_bytes()),
            (
                GCP_PROJECT_NAME_KEY.to_string(),
                self.project_name.clone().into_bytes(),
            ),
            (GCP_REGION_KEY.to_string(), self.region.clone().into_bytes()),
        ]);
        self.target.upsert(payload, expires_at).await?;
        Ok(expires_at)
    }
}

#[async_trait::async_trait]
impl Rotator for GcpRotator {
    fn namespace(&self) -> &str {
        self.target.namespace()
    }

    fn policy_name(&self) -> &str {
        self.target.policy_name()
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gcp
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
            project = %self.project_name,
            "Rotating GCP access token"
        );
        self.rotate_inner().await.map_err(|e| self.target.context(e))
    }
}
