//! In-memory secret store backed by a `DashMap`.
//!
//! Mirrors the Kubernetes semantics the rotators rely on: every write bumps a
//! resource version, `create` fails on an existing record and `update` fails
//! when the caller's version is stale.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::{
    CredentialSecret, EXPIRATION_ANNOTATION_KEY, SecretPayload, SecretStore, StoreError,
    format_expiration,
};

/// In-memory secret store.
pub struct InMemorySecretStore {
    secrets: DashMap<(String, String), CredentialSecret>,
    version: AtomicU64,
    writes: AtomicU64,
}

impl InMemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
            version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Seed a secret directly, bypassing create/update bookkeeping.
    ///
    /// Used to model secrets that exist before the rotator runs (client
    /// secrets, service-account keys, credentials from a previous rotation).
    pub fn insert(&self, mut secret: CredentialSecret) {
        secret.resource_version = Some(self.next_version());
        self.secrets
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    /// Seed a plain secret with string values and no annotations.
    pub fn insert_values(&self, namespace: &str, name: &str, values: &[(&str, &str)]) {
        self.insert(CredentialSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: values
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
                .collect(),
            annotations: BTreeMap::new(),
            resource_version: None,
        });
    }

    /// Current copy of a secret, if present.
    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<CredentialSecret> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|e| e.value().clone())
    }

    /// Number of successful `create` + `update` calls.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SecretStore for InMemorySecretStore {
    async fn lookup(&self, namespace: &str, name: &str) -> Result<CredentialSecret, StoreError> {
        self.get(namespace, name).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError> {
        match self.secrets.entry((namespace.to_string(), name.to_string())) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: "already exists".to_string(),
            }),
            Entry::Vacant(slot) => {
                let secret = CredentialSecret {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    data: payload,
                    annotations: BTreeMap::from([(
                        EXPIRATION_ANNOTATION_KEY.to_string(),
                        format_expiration(expires_at),
                    )]),
                    resource_version: Some(self.next_version()),
                };
                slot.insert(secret.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                debug!(namespace = %namespace, name = %name, "Created secret");
                Ok(secret)
            }
        }
    }

    async fn update(
        &self,
        existing: CredentialSecret,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError> {
        let key = (existing.namespace.clone(), existing.name.clone());
        let mut current = self.secrets.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            namespace: existing.namespace.clone(),
            name: existing.name.clone(),
        })?;

        if existing.resource_version.is_some()
            && current.resource_version != existing.resource_version
        {
            return Err(StoreError::Conflict {
                namespace: existing.namespace,
                name: existing.name,
                message: format!(
                    "resource version {:?} is stale (current {:?})",
                    existing.resource_version, current.resource_version
                ),
            });
        }

        let mut annotations = current.annotations.clone();
        annotations.insert(
            EXPIRATION_ANNOTATION_KEY.to_string(),
            format_expiration(expires_at),
        );
        let updated = CredentialSecret {
            namespace: existing.namespace,
            name: existing.name,
            data: payload,
            annotations,
            resource_version: Some(self.next_version()),
        };
        *current = updated.clone();
        drop(current);

        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(namespace = %updated.namespace, name = %updated.name, "Updated secret");
        Ok(updated)
    }
}
