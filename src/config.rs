//! Configuration management

use std::collections::HashSet;
use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::policy::CredentialPolicy;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CREDENTIAL_ROTATOR_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load after the config is read.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Proxy variables set here are visible to `ProxyConfig::from_env`.
    pub env_files: Vec<String>,
    /// Lead time before expiry at which a credential is rotated
    #[serde(with = "humantime_serde")]
    pub pre_rotation_window: Duration,
    /// Delay before retrying a policy whose reconcile step failed
    #[serde(with = "humantime_serde")]
    pub failure_requeue: Duration,
    /// Per-request timeout of exchange HTTP clients
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Secret store backend
    pub store: StoreConfig,
    /// Provider endpoints
    pub endpoints: EndpointConfig,
    /// Credentials to keep fresh
    pub policies: Vec<CredentialPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            pre_rotation_window: Duration::from_secs(5 * 60),
            failure_requeue: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            store: StoreConfig::default(),
            endpoints: EndpointConfig::default(),
            policies: Vec::new(),
        }
    }
}

/// Secret store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to use
    pub backend: StoreBackend,
}

/// Secret store backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Kubernetes secrets via the ambient kubeconfig or in-cluster config
    #[default]
    Kubernetes,
    /// Process-local map; credentials are lost on exit
    Memory,
}

/// Provider endpoints. Defaults target the public clouds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// AWS STS endpoint; `{region}` is substituted
    pub aws_sts: String,
    /// GCP STS token endpoint
    pub gcp_sts: String,
    /// GCP IAM credentials API base URL
    pub gcp_iam_credentials: String,
    /// Azure AD authority host
    pub azure_authority: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            aws_sts: "https://sts.{region}.amazonaws.com/".to_string(),
            gcp_sts: "https://sts.googleapis.com/v1/token".to_string(),
            gcp_iam_credentials: "https://iamcredentials.googleapis.com/v1".to_string(),
            azure_authority: "https://login.microsoftonline.com".to_string(),
        }
    }
}

impl EndpointConfig {
    /// STS endpoint for `region`.
    #[must_use]
    pub fn aws_sts_url(&self, region: &str) -> String {
        self.aws_sts.replace("{region}", region)
    }

    /// Azure AD v2 token endpoint for a tenant.
    #[must_use]
    pub fn azure_token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            self.azure_authority.trim_end_matches('/')
        )
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Validate global settings and every policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.pre_rotation_window.is_zero() {
            return Err(Error::Config(
                "pre_rotation_window must be greater than zero".to_string(),
            ));
        }
        if self.failure_requeue.is_zero() {
            return Err(Error::Config(
                "failure_requeue must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert((policy.namespace.as_str(), policy.name.as_str())) {
                return Err(Error::Config(format!(
                    "duplicate policy {}/{}",
                    policy.namespace, policy.name
                )));
            }
        }
        Ok(())
    }

    /// Find a policy by namespace and name.
    #[must_use]
    pub fn policy(&self, namespace: &str, name: &str) -> Option<&CredentialPolicy> {
        self.policies
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!(path = %expanded, "Env file not found (skipped)");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!(path = %expanded, "Loaded env file"),
                Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
            }
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to the largest whole unit (e.g. "5m", "90s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "2h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Render a duration the way [`serialize`] does.
    #[must_use]
    pub fn format(duration: Duration) -> String {
        let secs = duration.as_secs();
        if duration.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", duration.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    /// Parse "100ms", "30s", "5m", "2h" or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns a message for malformed input or a value that overflows.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s", otherwise "100ms" parses as "100m" + garbage
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            return number(ms, s).map(Duration::from_millis);
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };
        number(digits, s)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is too large"))
    }

    fn number(digits: &str, input: &str) -> Result<u64, String> {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {input:?}: {e}"))
    }
}
