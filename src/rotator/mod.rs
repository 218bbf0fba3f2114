//! Credential rotators
//!
//! A rotator keeps one policy's credential secret fresh. All providers share
//! the same contract ([`Rotator`]):
//!
//! - [`is_expired`](Rotator::is_expired): has the pre-rotation time passed?
//! - [`pre_rotation_time`](Rotator::pre_rotation_time): stored expiry minus
//!   the pre-rotation window, or [`NO_SECRET`] when nothing is stored yet.
//! - [`rotate`](Rotator::rotate): run the exchange chain, replace the secret,
//!   return the new expiry.
//!
//! A failed `rotate` never writes: every network step runs before the single
//! store write, and any error aborts the call.

pub mod aws;
pub mod azure;
pub mod factory;
pub mod gcp;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use tracing::{debug, info};

use crate::policy::ProviderKind;
use crate::store::{SecretPayload, SecretStore, StoreError, credential_secret_name};
use crate::{Error, Result};

pub use aws::AwsRotator;
pub use azure::AzureRotator;
pub use factory::{RotatorDeps, build_rotator};
pub use gcp::{GcpFederation, GcpRotator, GcpTokenSource};

/// Pre-rotation time reported when no secret exists: always in the past.
pub const NO_SECRET: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Default lead time before expiry at which credentials are rotated.
pub const DEFAULT_PRE_ROTATION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// True once `now + buffer` has reached `t`.
#[must_use]
pub fn is_buffered_time_expired(buffer: TimeDelta, t: DateTime<Utc>) -> bool {
    Utc::now()
        .checked_add_signed(buffer)
        .is_none_or(|deadline| deadline >= t)
}

/// Drop sub-second precision so the returned expiry equals the stored one.
#[must_use]
pub fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

/// The uniform rotation contract.
#[async_trait::async_trait]
pub trait Rotator: Send + Sync {
    /// Policy namespace.
    fn namespace(&self) -> &str;

    /// Policy name.
    fn policy_name(&self) -> &str;

    /// Provider served.
    fn provider(&self) -> ProviderKind;

    /// Whether `pre_rotation_time` is not in the future.
    fn is_expired(&self, pre_rotation_time: DateTime<Utc>) -> bool {
        is_buffered_time_expired(TimeDelta::zero(), pre_rotation_time)
    }

    /// When the stored credential should be rotated.
    ///
    /// Returns [`NO_SECRET`] when the secret does not exist.
    ///
    /// # Errors
    ///
    /// A secret without a parsable expiry annotation is
    /// [`Error::InconsistentSecret`]; other store failures propagate.
    async fn pre_rotation_time(&self) -> Result<DateTime<Utc>>;

    /// Exchange fresh credentials, store them and return their expiry.
    async fn rotate(&self) -> Result<DateTime<Utc>>;
}

/// The secret a rotator maintains, plus the pre-rotation window.
#[derive(Clone)]
pub struct SecretTarget {
    namespace: String,
    policy_name: String,
    secret_name: String,
    window: TimeDelta,
    store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for SecretTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretTarget")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl SecretTarget {
    /// Target for a policy; the secret name is derived from the policy name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a window too large to represent.
    pub fn new(
        namespace: &str,
        policy_name: &str,
        window: Duration,
        store: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let window = TimeDelta::from_std(window)
            .map_err(|e| Error::Config(format!("pre-rotation window out of range: {e}")))?;
        Ok(Self {
            namespace: namespace.to_string(),
            policy_name: policy_name.to_string(),
            secret_name: credential_secret_name(policy_name),
            window,
            store,
        })
    }

    /// Policy namespace (also the secret namespace).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Policy name.
    #[must_use]
    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Derived secret name.
    #[must_use]
    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    /// Pre-rotation window.
    #[must_use]
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Stored expiry minus the window, or [`NO_SECRET`].
    pub async fn pre_rotation_time(&self) -> Result<DateTime<Utc>> {
        let secret = match self.store.lookup(&self.namespace, &self.secret_name).await {
            Ok(secret) => secret,
            Err(StoreError::NotFound { .. }) => {
                debug!(
                    namespace = %self.namespace,
                    secret = %self.secret_name,
                    "No credential secret yet"
                );
                return Ok(NO_SECRET);
            }
            Err(e) => return Err(e.into()),
        };

        let expires_at = secret
            .expires_at()
            .map_err(|reason| Error::InconsistentSecret {
                namespace: self.namespace.clone(),
                name: self.secret_name.clone(),
                reason,
            })?;
        // A window reaching past the calendar start means "rotate now"
        Ok(expires_at
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Create the secret, or replace it if it exists, in one write.
    pub async fn upsert(&self, payload: SecretPayload, expires_at: DateTime<Utc>) -> Result<()> {
        match self.store.lookup(&self.namespace, &self.secret_name).await {
            Ok(existing) => {
                self.store.update(existing, payload, expires_at).await?;
                info!(
                    namespace = %self.namespace,
                    secret = %self.secret_name,
                    expires_at = %expires_at,
                    "Updated credential secret"
                );
            }
            Err(StoreError::NotFound { .. }) => {
                self.store
                    .create(&self.namespace, &self.secret_name, payload, expires_at)
                    .await?;
                info!(
                    namespace = %self.namespace,
                    secret = %self.secret_name,
                    expires_at = %expires_at,
                    "Created credential secret"
                );
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Attach this policy's identity to an error.
    #[must_use]
    pub fn context(&self, err: Error) -> Error {
        err.in_policy(&self.namespace, &self.policy_name)
    }
}

/// Tagged union over the provider rotators, chosen once from the policy.
pub enum CredentialRotator {
    /// AWS STS
    Aws(AwsRotator),
    /// Azure AD
    Azure(AzureRotator),
    /// GCP
    Gcp(GcpRotator),
}

impl CredentialRotator {
    fn inner(&self) -> &dyn Rotator {
        match self {
            Self::Aws(r) => r,
            Self::Azure(r) => r,
            Self::Gcp(r) => r,
        }
    }
}

#[async_trait::async_trait]
impl Rotator for CredentialRotator {
    fn namespace(&self) -> &str {
        self.inner().namespace()
    }

    fn policy_name(&self) -> &str {
        self.inner().policy_name()
    }

    fn provider(&self) -> ProviderKind {
        self.inner().provider()
    }

    fn is_expired(&self, pre_rotation_time: DateTime<Utc>) -> bool {
        self.inner().is_expired(pre_rotation_time)
    }

    async fn pre_rotation_time(&self) -> Result<DateTime<Utc>> {
        self.inner().pre_rotation_time().await
    }

    async fn rotate(&self) -> Result<DateTime<Utc>> {
        self.inner().rotate().await
    }
}
