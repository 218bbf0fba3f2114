//! Secret store adapter: the durable home of rotated credentials.
//!
//! The [`SecretStore`] trait abstracts over storage backends. Two
//! implementations exist: [`KubeSecretStore`] (Kubernetes `Secret` objects,
//! used in production) and [`InMemorySecretStore`] (a `DashMap`, used by tests
//! and dry runs).
//!
//! # Record shape
//!
//! A [`CredentialSecret`] is an opaque key/value map plus exactly one expiry
//! annotation ([`EXPIRATION_ANNOTATION_KEY`]) holding an RFC 3339 timestamp.
//! Writes always replace the full payload map and the annotation in one call.
//!
//! # Concurrency
//!
//! Each record carries the `resource_version` observed at lookup. `update`
//! refuses to overwrite a record whose version moved on, and `create` refuses
//! to overwrite an existing record; both surface [`StoreError::Conflict`].

pub mod kube;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

pub use self::kube::KubeSecretStore;
pub use memory::InMemorySecretStore;

/// Annotation holding the expiry of the credential stored in a secret.
pub const EXPIRATION_ANNOTATION_KEY: &str = "rotator.llm-gateway.io/expiration-time";

/// Prefix of every secret written by the rotators.
pub const SECRET_NAME_PREFIX: &str = "llm-credentials-";

/// Payload of a credential secret: key → raw bytes.
pub type SecretPayload = BTreeMap<String, Vec<u8>>;

/// Derive the credential secret name for a policy.
///
/// Used both for lookup and for create/update so the two can never diverge.
#[must_use]
pub fn credential_secret_name(policy_name: &str) -> String {
    format!("{SECRET_NAME_PREFIX}{policy_name}")
}

/// Format an expiry the way it is stored in the annotation.
#[must_use]
pub fn format_expiration(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Errors returned by secret store backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No secret with this identity exists.
    #[error("secret {namespace}/{name} not found")]
    NotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },

    /// The write lost an optimistic-concurrency race.
    #[error("secret {namespace}/{name} was modified concurrently: {message}")]
    Conflict {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Backend detail
        message: String,
    },

    /// Any other backend failure.
    #[error("secret store API error for {namespace}/{name}: {message}")]
    Api {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Backend detail
        message: String,
    },
}

impl StoreError {
    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A secret as read from the store.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSecret {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Payload
    pub data: SecretPayload,
    /// All annotations, including the expiry annotation when present
    pub annotations: BTreeMap<String, String>,
    /// Backend version observed at read time (compare-and-swap token)
    pub resource_version: Option<String>,
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSecret")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("annotations", &self.annotations)
            .field("resource_version", &self.resource_version)
            .finish()
    }
}

impl CredentialSecret {
    /// Raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// UTF-8 value for `key`; `None` if absent or not UTF-8.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Expiry recorded in the expiry annotation.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the annotation is missing or is
    /// not an RFC 3339 timestamp.
    pub fn expires_at(&self) -> std::result::Result<DateTime<Utc>, String> {
        let raw = self
            .annotations
            .get(EXPIRATION_ANNOTATION_KEY)
            .ok_or_else(|| format!("missing annotation {EXPIRATION_ANNOTATION_KEY}"))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("unparsable annotation {EXPIRATION_ANNOTATION_KEY}={raw:?}: {e}"))
    }
}

/// Storage backend for credential secrets.
///
/// Implementations must be `Send + Sync` because one store is shared by all
/// rotators and the scheduler tasks driving them.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Read a secret. A missing secret is [`StoreError::NotFound`].
    async fn lookup(&self, namespace: &str, name: &str) -> Result<CredentialSecret, StoreError>;

    /// Create a secret holding `payload` and the expiry annotation.
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError>;

    /// Replace the payload and expiry annotation of a secret previously read
    /// with [`lookup`](SecretStore::lookup).
    async fn update(
        &self,
        existing: CredentialSecret,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError>;
}
