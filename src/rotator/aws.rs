//! AWS rotator: web identity token → STS session credentials → a
//! credentials-file profile stored under `credentials`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{Rotator, SecretTarget, truncate_to_seconds};
use crate::exchange::aws::role_session_name;
use crate::exchange::{AssumeRoleRequest, AwsSessionCredentials, WebIdentityExchange};
use crate::policy::ProviderKind;
use crate::store::SecretPayload;
use crate::token::TokenProvider;
use crate::{Error, Result};

/// Secret key holding the credentials file.
pub const CREDENTIALS_KEY: &str = "credentials";

/// Profile name written to the credentials file.
pub const PROFILE_NAME: &str = "default";

/// Render a single-profile AWS credentials file.
#[must_use]
pub fn credentials_file(credentials: &AwsSessionCredentials, region: &str) -> String {
    format!(
        "[{PROFILE_NAME}]\naws_access_key_id = {}\naws_secret_access_key = {}\naws_session_token = {}\nregion = {region}\n",
        credentials.access_key_id, credentials.secret_access_key, credentials.session_token,
    )
}

/// Rotates AWS session credentials for one policy.
pub struct AwsRotator {
    target: SecretTarget,
    region: String,
    role_arn: String,
    identity: Arc<dyn TokenProvider>,
    sts: Arc<dyn WebIdentityExchange>,
}

impl AwsRotator {
    /// Assemble a rotator from its collaborators.
    #[must_use]
    pub fn new(
        target: SecretTarget,
        region: impl Into<String>,
        role_arn: impl Into<String>,
        identity: Arc<dyn TokenProvider>,
        sts: Arc<dyn WebIdentityExchange>,
    ) -> Self {
        Self {
            target,
            region: region.into(),
            role_arn: role_arn.into(),
            identity,
            sts,
        }
    }

    async fn rotate_inner(&self) -> Result<DateTime<Utc>> {
        let identity = self.identity.get_token().await?;

        let request = AssumeRoleRequest {
            region: self.region.clone(),
            role_arn: self.role_arn.clone(),
            session_name: role_session_name(self.target.policy_name()),
            web_identity_token: identity.token,
        };
        let credentials = self
            .sts
            .assume_role_with_web_identity(&request)
            .await?
            .ok_or_else(|| Error::exchange(&self.role_arn, "STS response contained no credentials"))?;

        let expires_at = truncate_to_seconds(credentials.expiration);
        let payload: SecretPayload = BTreeMap::from([(
            CREDENTIALS_KEY.to_string(),
            credentials_file(&credentials, &self.region).into_bytes(),
        )]);
        self.target.upsert(payload, expires_at).await?;
        Ok(expires_at)
    }
}

#[async_trait::async_trait]
impl Rotator for AwsRotator {
    fn namespace(&self) -> &str {
        self.target.namespace()
    }

    fn policy_name(&self) -> &str {
        self.target.policy_name()
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Aws
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
            role_arn = %self.role_arn,
            "Rotating AWS credentials"
        );
        self.rotate_inner().await.map_err(|e| self.target.context(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::rotator::DEFAULT_PRE_ROTATION_WINDOW;
    use crate::store::{InMemorySecretStore, format_expiration};
    use crate::token::StaticTokenProvider;

    struct FakeSts {
        response: Option<AwsSessionCredentials>,
        seen: Mutex<Vec<AssumeRoleRequest>>,
    }

    #[async_trait::async_trait]
    impl WebIdentityExchange for FakeSts {
        async fn assume_role_with_web_identity(
            &self,
            request: &AssumeRoleRequest,
        ) -> Result<Option<AwsSessionCredentials>> {
            self.seen.lock().push(request.clone());
            Ok(self.response.clone())
        }
    }

    fn creds(expiration: DateTime<Utc>) -> AwsSessionCredentials {
        AwsSessionCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "SECRET".into(),
            session_token: "SESSION".into(),
            expiration,
        }
    }

    fn rotator(
        store: Arc<InMemorySecretStore>,
        sts: Arc<FakeSts>,
    ) -> AwsRotator {
        AwsRotator::new(
            SecretTarget::new("ai", "bedrock", DEFAULT_PRE_ROTATION_WINDOW, store).unwrap(),
            "us-east-1",
            "arn:aws:iam::123456789012:role/llm",
            Arc::new(StaticTokenProvider::new("web-identity", Utc::now() + TimeDelta::hours(1))),
            sts,
        )
    }

    #[test]
    fn credentials_file_format() {
        let file = credentials_file(&creds(Utc::now()), "eu-west-1");
        assert_eq!(
            file,
            "[default]\naws_access_key_id = AKID\naws_secret_access_key = SECRET\naws_session_token = SESSION\nregion = eu-west-1\n"
        );
    }

    #[tokio::test]
    async fn rotate_writes_profile_and_annotation() {
        // GIVEN: STS returns credentials valid for 1h
        let store = Arc::new(InMemorySecretStore::new());
        let expiration = Utc::now() + TimeDelta::hours(1);
        let sts = Arc::new(FakeSts {
            response: Some(creds(expiration)),
            seen: Mutex::new(Vec::new()),
        });

        // WHEN: rotated
        let r = rotator(store.clone(), sts.clone());
        let got = r.rotate().await.unwrap();

        // THEN: the secret holds the profile and the returned expiry
        let secret = store.get("ai", "llm-credentials-bedrock").unwrap();
        assert!(secret.get_str(CREDENTIALS_KEY).unwrap().contains("aws_session_token = SESSION"));
        assert_eq!(format_expiration(secret.expires_at().unwrap()), format_expiration(got));
        assert_eq!(secret.expires_at().unwrap(), got);

        // AND: STS saw the identity token and the derived session name
        let seen = sts.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].web_identity_token, "web-identity");
        assert_eq!(seen[0].session_name, "llm-gateway-bedrock");
        assert_eq!(seen[0].region, "us-east-1");
    }

    #[tokio::test]
    async fn nil_credentials_is_hard_error() {
        // GIVEN: STS answers without credentials
        let store = Arc::new(InMemorySecretStore::new());
        let sts = Arc::new(FakeSts {
            response: None,
            seen: Mutex::new(Vec::new()),
        });

        // WHEN: rotated
        let err = rotator(store.clone(), sts).rotate().await.unwrap_err();

        // THEN: exchange error with policy context, nothing written
        assert!(matches!(err.root(), Error::Exchange { .. }));
        assert!(err.to_string().contains("ai/bedrock"));
        assert_eq!(store.write_count(), 0);
    }
}
