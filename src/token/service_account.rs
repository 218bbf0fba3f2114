//! Kubernetes projected service-account token provider.
//!
//! The kubelet refreshes the token file in place, so it is re-read on every
//! call. The expiry comes from the token's own `exp` claim.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{TokenExpiry, TokenProvider, jwt};
use crate::{Error, Result};

/// Reads a projected service-account JWT from disk.
#[derive(Debug, Clone)]
pub struct ServiceAccountTokenProvider {
    path: PathBuf,
}

impl ServiceAccountTokenProvider {
    /// Provider for the token at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Token file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn get_token(&self) -> Result<TokenExpiry> {
        let source = self.path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::identity(&source, format!("cannot read token file: {e}")))?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(Error::identity(&source, "token file is empty"));
        }
        let expires_at = jwt::unverified_expiry(token)
            .ok_or_else(|| Error::identity(&source, "token is not a JWT with an exp claim"))?;

        debug!(path = %source, expires_at = %expires_at, "Read service account token");
        Ok(TokenExpiry::new(token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_token_and_expiry_from_file() {
        // GIVEN: a projected token on disk with a trailing newline
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let token = jwt::encode_unsigned(&json!({"sub": "system:serviceaccount:ai:gw", "exp": 1_950_000_000}));
        std::fs::write(&path, format!("{token}\n")).unwrap();

        // WHEN: read
        let got = ServiceAccountTokenProvider::new(&path).get_token().await.unwrap();

        // THEN: trimmed token and exp-derived expiry
        assert_eq!(got.token, token);
        assert_eq!(got.expires_at.timestamp(), 1_950_000_000);
    }

    #[tokio::test]
    async fn missing_file_is_identity_error() {
        let err = ServiceAccountTokenProvider::new("/nonexistent/token")
            .get_token()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityToken { .. }));
        assert!(err.to_string().contains("/nonexistent/token"));
    }

    #[tokio::test]
    async fn non_jwt_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "not-a-jwt").unwrap();
        let err = ServiceAccountTokenProvider::new(&path)
            .get_token()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exp claim"));
    }
}
