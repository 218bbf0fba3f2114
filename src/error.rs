//! Error types for the credential rotator

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for the credential rotator
pub type Result<T> = std::result::Result<T, Error>;

/// Credential rotator errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or contradictory policy fields, bad proxy URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The base identity token could not be obtained
    #[error("Identity token error from {provider}: {message}")]
    IdentityToken {
        /// Issuer URL, token file or tenant the token was requested from
        provider: String,
        /// Underlying failure
        message: String,
    },

    /// A provider-side token exchange failed
    #[error("Token exchange with {target} failed: {message}")]
    Exchange {
        /// Audience, role ARN, service account or token endpoint of the exchange
        target: String,
        /// Underlying failure
        message: String,
    },

    /// A credential secret exists but cannot be trusted for scheduling
    #[error("Secret {namespace}/{name} is inconsistent: {reason}")]
    InconsistentSecret {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Secret store error
    #[error("Secret store error: {0}")]
    Store(#[from] StoreError),

    /// A rotation step failed; wraps the step error with the policy identity
    #[error("Rotation of {namespace}/{policy} failed: {source}")]
    Rotation {
        /// Policy namespace
        namespace: String,
        /// Policy name
        policy: String,
        /// Failing step
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an identity-token error
    pub fn identity(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::IdentityToken {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Create an exchange error
    pub fn exchange(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Exchange {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Attach the policy identity to a step error
    #[must_use]
    pub fn in_policy(self, namespace: &str, policy: &str) -> Self {
        Self::Rotation {
            namespace: namespace.to_string(),
            policy: policy.to_string(),
            source: Box::new(self),
        }
    }

    /// Strip policy context and return the failing step
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Rotation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is a configuration error (never worth retrying)
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }

    /// Whether the underlying failure is a missing secret
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::Store(StoreError::NotFound { .. }))
    }
}
