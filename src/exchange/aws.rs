//! AWS STS `AssumeRoleWithWebIdentity`.
//!
//! The call is unsigned: the web identity token authenticates it. STS speaks
//! the AWS query protocol, so the request is form-encoded and the response is
//! XML.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::EndpointConfig;
use crate::transport::Transports;
use crate::{Error, Result};

const STS_API_VERSION: &str = "2011-06-15";
const SESSION_NAME_PREFIX: &str = "llm-gateway-";
/// STS rejects session names longer than this.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Temporary session credentials returned by STS.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsSessionCredentials {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token
    pub session_token: String,
    /// Absolute expiry
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for AwsSessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Parameters of one `AssumeRoleWithWebIdentity` call.
#[derive(Clone)]
pub struct AssumeRoleRequest {
    /// STS region
    pub region: String,
    /// Role to assume
    pub role_arn: String,
    /// Session name recorded in CloudTrail
    pub session_name: String,
    /// OIDC token presented as the web identity
    pub web_identity_token: String,
}

impl fmt::Debug for AssumeRoleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumeRoleRequest")
            .field("region", &self.region)
            .field("role_arn", &self.role_arn)
            .field("session_name", &self.session_name)
            .finish_non_exhaustive()
    }
}

/// Session name for a policy, cut to the STS limit.
#[must_use]
pub fn role_session_name(policy_name: &str) -> String {
    let mut name = format!("{SESSION_NAME_PREFIX}{policy_name}");
    if name.len() > MAX_SESSION_NAME_LEN {
        let mut cut = MAX_SESSION_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// The STS web-identity exchange.
///
/// `Ok(None)` means STS answered successfully but without a credentials
/// element; callers must treat that as a failure.
#[async_trait::async_trait]
pub trait WebIdentityExchange: Send + Sync {
    /// Assume `request.role_arn` with the web identity token.
    async fn assume_role_with_web_identity(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<Option<AwsSessionCredentials>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResponse {
    assume_role_with_web_identity_result: AssumeRoleWithWebIdentityResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResult {
    #[serde(default)]
    credentials: Option<StsCredentials>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

impl fmt::Debug for StsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsErrorResponse {
    error: StsError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode a successful STS response body.
fn parse_response(body: &str, role_arn: &str) -> Result<Option<AwsSessionCredentials>> {
    let parsed: AssumeRoleWithWebIdentityResponse = quick_xml::de::from_str(body)
        .map_err(|e| Error::exchange(role_arn, format!("invalid STS response: {e}")))?;

    let Some(creds) = parsed.assume_role_with_web_identity_result.credentials else {
        return Ok(None);
    };
    let expiration = DateTime::parse_from_rfc3339(creds.expiration.trim())
        .map_err(|e| {
            Error::exchange(
                role_arn,
                format!("invalid credential expiration {:?}: {e}", creds.expiration),
            )
        })?
        .with_timezone(&Utc);

    Ok(Some(AwsSessionCredentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.session_token,
        expiration,
    }))
}

fn describe_error(body: &str) -> String {
    match quick_xml::de::from_str::<StsErrorResponse>(body) {
        Ok(resp) => format!("{}: {}", resp.error.code, resp.error.message),
        Err(_) => body.trim().to_string(),
    }
}

/// HTTP implementation against the regional STS endpoint.
pub struct HttpStsClient {
    transports: Arc<Transports>,
    endpoints: EndpointConfig,
}

impl HttpStsClient {
    /// Create a client calling [`EndpointConfig::aws_sts_url`] per region.
    pub fn new(transports: Arc<Transports>, endpoints: EndpointConfig) -> Self {
        Self {
            transports,
            endpoints,
        }
    }
}

#[async_trait::async_trait]
impl WebIdentityExchange for HttpStsClient {
    async fn assume_role_with_web_identity(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<Option<AwsSessionCredentials>> {
        let url = self.endpoints.aws_sts_url(&request.region);
        debug!(url = %url, role_arn = %request.role_arn, "Calling AssumeRoleWithWebIdentity");

        let client = self.transports.aws_sts.without_auth()?;
        let form = [
            ("Action", "AssumeRoleWithWebIdentity"),
            ("Version", STS_API_VERSION),
            ("RoleArn", request.role_arn.as_str()),
            ("RoleSessionName", request.session_name.as_str()),
            ("WebIdentityToken", request.web_identity_token.as_str()),
        ];
        let response = client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::exchange(&request.role_arn, format!("STS request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::exchange(&request.role_arn, format!("STS response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(Error::exchange(
                &request.role_arn,
                format!("HTTP {status}: {}", describe_error(&body)),
            ));
        }

        let credentials = parse_response(&body, &request.role_arn)?;
        if let Some(c) = &credentials {
            info!(
                role_arn = %request.role_arn,
                access_key_id = %c.access_key_id,
                expiration = %c.expiration,
                "Assumed role with web identity"
            );
        }
        Ok(credentials)
    }
}
