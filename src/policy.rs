//! Credential policies
//!
//! A policy names the secret to maintain (namespace + name) and carries the
//! provider-specific federation parameters used to mint its credentials.
//! Policies are read from configuration and are immutable for the lifetime of
//! a rotator.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Key holding a client secret in a referenced secret (OIDC and Azure).
pub const CLIENT_SECRET_KEY: &str = "client-secret";

/// Key holding a GCP service-account key JSON in a referenced secret.
pub const GCP_SERVICE_ACCOUNT_KEY: &str = "service_account.json";

/// One credential to keep fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPolicy {
    /// Namespace of the policy and of the secret it maintains
    pub namespace: String,
    /// Policy name; the secret name is derived from it
    pub name: String,
    /// Provider discriminator plus federation parameters
    pub provider: ProviderCredentials,
}

/// Provider-specific federation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderCredentials {
    /// AWS STS `AssumeRoleWithWebIdentity`
    Aws(AwsCredentials),
    /// Azure AD access token
    Azure(AzureCredentials),
    /// GCP workload identity federation or service-account key
    Gcp(GcpCredentials),
    /// Static API key; nothing to rotate
    ApiKey(ApiKeyCredentials),
}

/// Provider discriminator without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// AWS
    Aws,
    /// Azure
    Azure,
    /// GCP
    Gcp,
    /// API key
    ApiKey,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::ApiKey => "api_key",
        })
    }
}

impl ProviderCredentials {
    /// Discriminator of this provider.
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Aws(_) => ProviderKind::Aws,
            Self::Azure(_) => ProviderKind::Azure,
            Self::Gcp(_) => ProviderKind::Gcp,
            Self::ApiKey(_) => ProviderKind::ApiKey,
        }
    }
}

/// AWS federation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    /// STS region, also written into the credentials profile
    pub region: String,
    /// IAM role to assume
    pub role_arn: String,
    /// Source of the web identity token
    pub identity: IdentitySource,
}

/// Azure AD parameters. Exactly one of `client_secret_ref` and `oidc` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureCredentials {
    /// Directory (tenant) ID
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Secret holding the client secret under `client-secret`
    #[serde(default)]
    pub client_secret_ref: Option<SecretRef>,
    /// OIDC provider whose token is presented as a client assertion
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
    /// Requested scope; defaults to the Cognitive Services scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// GCP parameters. Exactly one of `workload_identity_federation` and
/// `credentials_file` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpCredentials {
    /// Project the credential is used in; also builds impersonation emails
    pub project_name: String,
    /// Region passed through to consumers
    pub region: String,
    /// Federation through GCP STS
    #[serde(default)]
    pub workload_identity_federation: Option<GcpWorkloadIdentityFederation>,
    /// Secret holding a service-account key under `service_account.json`
    #[serde(default)]
    pub credentials_file: Option<SecretRef>,
}

/// Workload identity pool and provider to exchange against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpWorkloadIdentityFederation {
    /// Project ID owning the pool (numeric or string form, as configured in GCP)
    pub project_id: String,
    /// Workload identity pool name
    pub workload_identity_pool_name: String,
    /// Workload identity provider name within the pool
    pub workload_identity_provider_name: String,
    /// Source of the subject token
    pub identity: IdentitySource,
    /// Optional service account to impersonate after the STS exchange
    #[serde(default)]
    pub service_account_impersonation: Option<GcpServiceAccountImpersonation>,
}

impl GcpWorkloadIdentityFederation {
    /// STS audience for this pool/provider pair.
    #[must_use]
    pub fn audience(&self) -> String {
        format!(
            "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            self.project_id, self.workload_identity_pool_name, self.workload_identity_provider_name
        )
    }
}

/// Service account to impersonate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpServiceAccountImpersonation {
    /// Account name without the `@project.iam.gserviceaccount.com` suffix
    pub service_account_name: String,
}

impl GcpServiceAccountImpersonation {
    /// Full email of the account within `project_name`.
    #[must_use]
    pub fn email(&self, project_name: &str) -> String {
        format!(
            "{}@{project_name}.iam.gserviceaccount.com",
            self.service_account_name
        )
    }
}

/// Static API key reference. Kept so the discriminator is total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    /// Secret holding the key
    pub secret_ref: SecretRef,
}

/// Where the base identity token comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// OIDC discovery plus client-credentials grant
    Oidc(OidcConfig),
    /// Kubernetes projected service-account token file
    ServiceAccountToken {
        /// Path of the projected token
        path: PathBuf,
    },
}

/// OIDC client-credentials configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery reads `{issuer}/.well-known/openid-configuration`
    pub issuer: String,
    /// Overrides the discovered token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Client ID
    pub client_id: String,
    /// Secret holding the client secret under `client-secret`
    pub client_secret: SecretRef,
    /// Extra scopes merged with the issuer's advertised scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Reference to a secret in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace; the policy namespace when omitted
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SecretRef {
    /// Namespace to read from, falling back to `default`.
    #[must_use]
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

fn require(value: &str, what: &str, policy: &CredentialPolicy) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!(
            "policy {}/{}: {what} must not be empty",
            policy.namespace, policy.name
        )));
    }
    Ok(())
}

fn invalid(policy: &CredentialPolicy, message: &str) -> Error {
    Error::Config(format!(
        "policy {}/{}: {message}",
        policy.namespace, policy.name
    ))
}

impl CredentialPolicy {
    /// Check required fields without any network access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the policy and the offending field.
    pub fn validate(&self) -> Result<()> {
        require(&self.namespace, "namespace", self)?;
        require(&self.name, "name", self)?;

        match &self.provider {
            ProviderCredentials::Aws(aws) => {
                require(&aws.region, "aws region", self)?;
                require(&aws.role_arn, "aws role_arn", self)?;
                self.validate_identity(&aws.identity)
            }
            ProviderCredentials::Azure(azure) => {
                require(&azure.tenant_id, "azure tenant_id", self)?;
                require(&azure.client_id, "azure client_id", self)?;
                match (&azure.client_secret_ref, &azure.oidc) {
                    (Some(secret), None) => require(&secret.name, "azure client_secret_ref name", self),
                    (None, Some(oidc)) => self.validate_oidc(oidc),
                    _ => Err(invalid(
                        self,
                        "exactly one of azure client_secret_ref or oidc must be set",
                    )),
                }
            }
            ProviderCredentials::Gcp(gcp) => {
                require(&gcp.project_name, "gcp project_name", self)?;
                require(&gcp.region, "gcp region", self)?;
                match (&gcp.workload_identity_federation, &gcp.credentials_file) {
                    (Some(wif), None) => {
                        require(&wif.project_id, "gcp project_id", self)?;
                        require(
                            &wif.workload_identity_pool_name,
                            "gcp workload_identity_pool_name",
                            self,
                        )?;
                        require(
                            &wif.workload_identity_provider_name,
                            "gcp workload_identity_provider_name",
                            self,
                        )?;
                        if let Some(imp) = &wif.service_account_impersonation {
                            require(&imp.service_account_name, "gcp service_account_name", self)?;
                        }
                        self.validate_identity(&wif.identity)
                    }
                    (None, Some(file)) => require(&file.name, "gcp credentials_file name", self),
                    _ => Err(invalid(
                        self,
                        "exactly one of gcp workload_identity_federation or credentials_file must be set",
                    )),
                }
            }
            ProviderCredentials::ApiKey(key) => require(&key.secret_ref.name, "api_key secret_ref name", self),
        }
    }

    fn validate_identity(&self, identity: &IdentitySource) -> Result<()> {
        match identity {
            IdentitySource::Oidc(oidc) => self.validate_oidc(oidc),
            IdentitySource::ServiceAccountToken { path } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid(self, "service_account_token path must not be empty"));
                }
                Ok(())
            }
        }
    }

    fn validate_oidc(&self, oidc: &OidcConfig) -> Result<()> {
        require(&oidc.issuer, "oidc issuer", self)?;
        require(&oidc.client_id, "oidc client_id", self)?;
        require(&oidc.client_secret.name, "oidc client_secret name", self)
    }
}
