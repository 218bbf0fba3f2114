//! Rotator construction from policies.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{
    AwsRotator, AzureRotator, CredentialRotator, GcpFederation, GcpRotator, GcpTokenSource,
    SecretTarget,
};
use crate::config::EndpointConfig;
use crate::exchange::{
    HttpServiceAccountImpersonation, HttpStsClient, HttpStsExchange, ServiceAccountImpersonation,
    StsExchange, WebIdentityExchange,
};
use crate::policy::{
    AzureCredentials, CredentialPolicy, GcpCredentials, IdentitySource, ProviderCredentials,
};
use crate::store::SecretStore;
use crate::token::azure::{AzureTokenRequest, DEFAULT_AZURE_SCOPE};
use crate::token::{
    AzureClientSecretTokenProvider, AzureFederatedTokenProvider, GcpServiceAccountKeyProvider,
    OidcTokenProvider, ServiceAccountTokenProvider, TokenProvider,
};
use crate::transport::Transports;
use crate::{Error, Result};

/// Shared collaborators handed to every rotator.
#[derive(Clone)]
pub struct RotatorDeps {
    /// Secret store
    pub store: Arc<dyn SecretStore>,
    /// Process-wide transports
    pub transports: Arc<Transports>,
    /// Provider endpoints
    pub endpoints: EndpointConfig,
    /// Pre-rotation window
    pub pre_rotation_window: Duration,
    /// AWS STS client; defaults to HTTP against `endpoints.aws_sts`
    pub aws_sts: Option<Arc<dyn WebIdentityExchange>>,
    /// GCP STS client; defaults to HTTP against `endpoints.gcp_sts`
    pub gcp_sts: Option<Arc<dyn StsExchange>>,
    /// GCP impersonation client; defaults to HTTP against `endpoints.gcp_iam_credentials`
    pub gcp_impersonation: Option<Arc<dyn ServiceAccountImpersonation>>,
}

impl RotatorDeps {
    /// Dependencies using the real HTTP exchanges.
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretStore>,
        transports: Arc<Transports>,
        endpoints: EndpointConfig,
        pre_rotation_window: Duration,
    ) -> Self {
        Self {
            store,
            transports,
            endpoints,
            pre_rotation_window,
            aws_sts: None,
            gcp_sts: None,
            gcp_impersonation: None,
        }
    }

    fn aws_sts(&self) -> Arc<dyn WebIdentityExchange> {
        self.aws_sts.clone().unwrap_or_else(|| {
            Arc::new(HttpStsClient::new(
                self.transports.clone(),
                self.endpoints.clone(),
            ))
        })
    }

    fn gcp_sts(&self) -> Arc<dyn StsExchange> {
        self.gcp_sts.clone().unwrap_or_else(|| {
            Arc::new(HttpStsExchange::new(
                self.transports.clone(),
                self.endpoints.gcp_sts.clone(),
            ))
        })
    }

    fn gcp_impersonation(&self) -> Arc<dyn ServiceAccountImpersonation> {
        self.gcp_impersonation.clone().unwrap_or_else(|| {
            Arc::new(HttpServiceAccountImpersonation::new(
                self.transports.clone(),
                self.endpoints.gcp_iam_credentials.clone(),
            ))
        })
    }

    fn identity(&self, source: &IdentitySource, namespace: &str) -> Result<Arc<dyn TokenProvider>> {
        Ok(match source {
            IdentitySource::Oidc(oidc) => Arc::new(OidcTokenProvider::new(
                oidc.clone(),
                namespace,
                self.store.clone(),
            )?),
            IdentitySource::ServiceAccountToken { path } => {
                Arc::new(ServiceAccountTokenProvider::new(path.clone()))
            }
        })
    }
}

/// Build the rotator for a policy.
///
/// Returns `Ok(None)` for API-key policies, which have nothing to rotate.
///
/// # Errors
///
/// Returns [`Error::Config`] when the policy is incomplete.
pub fn build_rotator(
    policy: &CredentialPolicy,
    deps: &RotatorDeps,
) -> Result<Option<CredentialRotator>> {
    policy.validate()?;

    let target = || {
        SecretTarget::new(
            &policy.namespace,
            &policy.name,
            deps.pre_rotation_window,
            deps.store.clone(),
        )
    };

    let rotator = match &policy.provider {
        ProviderCredentials::ApiKey(_) => {
            debug!(namespace = %policy.namespace, policy = %policy.name, "API key policy, nothing to rotate");
            return Ok(None);
        }
        ProviderCredentials::Aws(aws) => CredentialRotator::Aws(AwsRotator::new(
            target()?,
            aws.region.clone(),
            aws.role_arn.clone(),
            deps.identity(&aws.identity, &policy.namespace)?,
            deps.aws_sts(),
        )),
        ProviderCredentials::Azure(azure) => CredentialRotator::Azure(AzureRotator::new(
            target()?,
            azure_provider(azure, &policy.namespace, deps)?,
        )),
        ProviderCredentials::Gcp(gcp) => CredentialRotator::Gcp(GcpRotator::new(
            target()?,
            gcp.project_name.clone(),
            gcp.region.clone(),
            gcp_source(gcp, &policy.namespace, deps)?,
        )),
    };
    Ok(Some(rotator))
}

fn azure_provider(
    azure: &AzureCredentials,
    namespace: &str,
    deps: &RotatorDeps,
) -> Result<Arc<dyn TokenProvider>> {
    let request = AzureTokenRequest {
        token_url: deps.endpoints.azure_token_url(&azure.tenant_id),
        tenant_id: azure.tenant_id.clone(),
        client_id: azure.client_id.clone(),
        scope: azure
            .scope
            .clone()
            .unwrap_or_else(|| DEFAULT_AZURE_SCOPE.to_string()),
    };

    match (&azure.client_secret_ref, &azure.oidc) {
        (Some(secret), None) => Ok(Arc::new(AzureClientSecretTokenProvider::new(
            request,
            secret.clone(),
            namespace,
            deps.store.clone(),
            deps.transports.clone(),
        ))),
        (None, Some(oidc)) => {
            let assertion = Arc::new(OidcTokenProvider::new(
                oidc.clone(),
                namespace,
                deps.store.clone(),
            )?);
            Ok(Arc::new(AzureFederatedTokenProvider::new(
                request,
                assertion,
                deps.transports.clone(),
            )))
        }
        _ => Err(Error::Config(
            "exactly one of azure client_secret_ref or oidc must be set".to_string(),
        )),
    }
}

fn gcp_source(gcp: &GcpCredentials, namespace: &str, deps: &RotatorDeps) -> Result<GcpTokenSource> {
    match (&gcp.workload_identity_federation, &gcp.credentials_file) {
        (Some(wif), None) => Ok(GcpTokenSource::Federated(GcpFederation {
            identity: deps.identity(&wif.identity, namespace)?,
            audience: wif.audience(),
            sts: deps.gcp_sts(),
            impersonation: wif
                .service_account_impersonation
                .as_ref()
                .map(|imp| (imp.email(&gcp.project_name), deps.gcp_impersonation())),
        })),
        (None, Some(key_ref)) => Ok(GcpTokenSource::ServiceAccountKey(Arc::new(
            GcpServiceAccountKeyProvider::new(
                key_ref.clone(),
                namespace,
                deps.store.clone(),
                deps.transports.clone(),
            ),
        ))),
        _ => Err(Error::Config(
            "exactly one of gcp workload_identity_federation or credentials_file must be set"
                .to_string(),
        )),
    }
}
