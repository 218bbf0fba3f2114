//! Credential Rotator Library
//!
//! Keeps short-lived cloud credentials for an LLM gateway fresh. Each
//! configured policy names a provider and an identity; a rotator exchanges
//! that identity for provider credentials shortly before the stored ones
//! expire and writes them to a secret the gateway reads.
//!
//! # Providers
//!
//! - **AWS**: OIDC or projected token → STS `AssumeRoleWithWebIdentity` →
//!   credentials-file profile
//! - **Azure**: client secret or federated client assertion → Azure AD
//!   access token
//! - **GCP**: workload identity federation (STS token exchange, optional
//!   service-account impersonation) or a service-account key
//!
//! # Layout
//!
//! [`token`] produces identity and provider tokens, [`exchange`] wraps the
//! cloud STS APIs, [`store`] persists results, [`rotator`] ties a policy to
//! those pieces and [`schedule`] decides when to run it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod policy;
pub mod rotator;
pub mod schedule;
pub mod store;
pub mod token;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
