//! Kubernetes `Secret` backend.
//!
//! Credentials are stored as `Opaque` secrets. The expiry lives in an
//! annotation, and `update` sends the observed `resourceVersion` so the API
//! server rejects writes based on a stale read with `409 Conflict`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

use super::{
    CredentialSecret, EXPIRATION_ANNOTATION_KEY, SecretPayload, SecretStore, StoreError,
    format_expiration,
};

/// Label set on every secret this crate creates.
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "credential-rotator");

/// Secret store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: resp.message,
        },
        other => StoreError::Api {
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

fn to_credential_secret(secret: Secret, namespace: &str, name: &str) -> CredentialSecret {
    let data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();
    CredentialSecret {
        namespace: secret.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
        name: secret.metadata.name.unwrap_or_else(|| name.to_string()),
        data,
        annotations: secret.metadata.annotations.unwrap_or_default(),
        resource_version: secret.metadata.resource_version,
    }
}

fn to_byte_strings(payload: SecretPayload) -> BTreeMap<String, ByteString> {
    payload.into_iter().map(|(k, v)| (k, ByteString(v))).collect()
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    async fn lookup(&self, namespace: &str, name: &str) -> Result<CredentialSecret, StoreError> {
        let secret = self
            .api(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, namespace, name))?;
        Ok(to_credential_secret(secret, namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.0.to_string(),
                    MANAGED_BY_LABEL.1.to_string(),
                )])),
                annotations: Some(BTreeMap::from([(
                    EXPIRATION_ANNOTATION_KEY.to_string(),
                    format_expiration(expires_at),
                )])),
                ..Default::default()
            },
            data: Some(to_byte_strings(payload)),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        let created = self
            .api(namespace)
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|e| map_error(e, namespace, name))?;

        debug!(namespace = %namespace, name = %name, "Created Kubernetes secret");
        Ok(to_credential_secret(created, namespace, name))
    }

    async fn update(
        &self,
        existing: CredentialSecret,
        payload: SecretPayload,
        expires_at: DateTime<Utc>,
    ) -> Result<CredentialSecret, StoreError> {
        let CredentialSecret {
            namespace,
            name,
            mut annotations,
            resource_version,
            ..
        } = existing;
        annotations.insert(
            EXPIRATION_ANNOTATION_KEY.to_string(),
            format_expiration(expires_at),
        );

        // Re-read to keep labels and owner references the rotator does not manage.
        let api = self.api(&namespace);
        let mut current = api
            .get(&name)
            .await
            .map_err(|e| map_error(e, &namespace, &name))?;
        current.metadata.annotations = Some(annotations);
        current.metadata.resource_version = resource_version;
        current.data = Some(to_byte_strings(payload));
        current.string_data = None;

        let replaced = api
            .replace(&name, &PostParams::default(), &current)
            .await
            .map_err(|e| map_error(e, &namespace, &name))?;

        debug!(namespace = %namespace, name = %name, "Updated Kubernetes secret");
        Ok(to_credential_secret(replaced, &namespace, &name))
    }
}
