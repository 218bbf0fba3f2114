//! Outbound HTTP transports for provider exchanges.
//!
//! Each provider family (GCP, Azure, AWS STS) gets one [`ProxyTransport`]
//! holding an optional proxy URL read once from the environment. The
//! underlying `reqwest::Client` is built on first use and reused for every
//! later call. Per-call authentication is layered on top with
//! [`BearerClient`], which sets or omits the `Authorization` header without
//! touching the shared client.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Proxy override for GCP STS and IAM credentials calls.
pub const GCP_PROXY_ENV: &str = "AI_GATEWAY_GCP_AUTH_PROXY_URL";
/// Proxy override for Azure AD token calls.
pub const AZURE_PROXY_ENV: &str = "AI_GATEWAY_AZURE_PROXY_URL";
/// Proxy override for AWS STS calls.
pub const AWS_STS_PROXY_ENV: &str = "AI_GATEWAY_STS_PROXY_URL";

/// Default request timeout for exchange calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider family a transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    /// Google Cloud STS and IAM credentials
    Gcp,
    /// Azure AD
    Azure,
    /// AWS STS
    AwsSts,
}

impl ProviderFamily {
    /// Environment variable holding this family's proxy override.
    #[must_use]
    pub fn proxy_env(self) -> &'static str {
        match self {
            Self::Gcp => GCP_PROXY_ENV,
            Self::Azure => AZURE_PROXY_ENV,
            Self::AwsSts => AWS_STS_PROXY_ENV,
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::AwsSts => "aws-sts",
        })
    }
}

/// Raw proxy settings, one per provider family.
///
/// Values are kept unparsed; a malformed URL is reported when the family's
/// client is first requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// GCP proxy URL
    pub gcp: Option<String>,
    /// Azure proxy URL
    pub azure: Option<String>,
    /// AWS STS proxy URL
    pub aws_sts: Option<String>,
}

impl ProxyConfig {
    /// Read the three proxy variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |family: ProviderFamily| {
            lookup(family.proxy_env())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            gcp: read(ProviderFamily::Gcp),
            azure: read(ProviderFamily::Azure),
            aws_sts: read(ProviderFamily::AwsSts),
        }
    }

    /// Proxy URL configured for `family`.
    #[must_use]
    pub fn for_family(&self, family: ProviderFamily) -> Option<&str> {
        match family {
            ProviderFamily::Gcp => self.gcp.as_deref(),
            ProviderFamily::Azure => self.azure.as_deref(),
            ProviderFamily::AwsSts => self.aws_sts.as_deref(),
        }
    }
}

/// A lazily built, proxy-aware HTTP client for one provider family.
pub struct ProxyTransport {
    family: ProviderFamily,
    proxy_url: Option<String>,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl ProxyTransport {
    /// Create a transport. No client is built yet.
    #[must_use]
    pub fn new(family: ProviderFamily, proxy_url: Option<String>, timeout: Duration) -> Self {
        Self {
            family,
            proxy_url,
            timeout,
            client: OnceLock::new(),
        }
    }

    /// Provider family served.
    #[must_use]
    pub fn family(&self) -> ProviderFamily {
        self.family
    }

    /// Configured proxy URL, if any.
    #[must_use]
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    /// Shared client, built on first call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the proxy URL does not parse.
    pub fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = self.build()?;
        Ok(self.client.get_or_init(|| built))
    }

    /// Request wrapper that sends no `Authorization` header.
    pub fn without_auth(&self) -> Result<BearerClient<'_>> {
        Ok(BearerClient {
            client: self.client()?,
            bearer: None,
        })
    }

    /// Request wrapper that sets `Authorization: Bearer <token>`.
    ///
    /// An empty token behaves like [`without_auth`](Self::without_auth).
    pub fn with_bearer(&self, token: &str) -> Result<BearerClient<'_>> {
        Ok(BearerClient {
            client: self.client()?,
            bearer: (!token.is_empty()).then(|| token.to_string()),
        })
    }

    fn build(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(raw) = &self.proxy_url {
            let url = Url::parse(raw).map_err(|e| {
                Error::Config(format!(
                    "invalid proxy URL in {}: {raw:?}: {e}",
                    self.family.proxy_env()
                ))
            })?;
            let proxy = reqwest::Proxy::all(url.as_str()).map_err(|e| {
                Error::Config(format!(
                    "unusable proxy URL in {}: {e}",
                    self.family.proxy_env()
                ))
            })?;
            builder = builder.proxy(proxy);
            debug!(family = %self.family, proxy = %url, "Routing exchanges through proxy");
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build {} HTTP client: {e}", self.family)))
    }
}

impl fmt::Debug for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTransport")
            .field("family", &self.family)
            .field("proxy_url", &self.proxy_url)
            .field("built", &self.client.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Borrowed client plus the bearer token (if any) to attach to each request.
pub struct BearerClient<'a> {
    client: &'a Client,
    bearer: Option<String>,
}

impl BearerClient<'_> {
    /// Start a POST request.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    /// Start a GET request.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    /// Whether requests carry an `Authorization` header.
    #[must_use]
    pub fn has_bearer(&self) -> bool {
        self.bearer.is_some()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// The process-wide set of exchange transports.
#[derive(Debug)]
pub struct Transports {
    /// GCP STS and IAM credentials
    pub gcp: ProxyTransport,
    /// Azure AD
    pub azure: ProxyTransport,
    /// AWS STS
    pub aws_sts: ProxyTransport,
}

impl Transports {
    /// Build transports from proxy settings.
    #[must_use]
    pub fn new(proxies: &ProxyConfig, timeout: Duration) -> Self {
        let make = |family| {
            ProxyTransport::new(
                family,
                proxies.for_family(family).map(ToString::to_string),
                timeout,
            )
        };
        Self {
            gcp: make(ProviderFamily::Gcp),
            azure: make(ProviderFamily::Azure),
            aws_sts: make(ProviderFamily::AwsSts),
        }
    }

    /// Transports with no proxies and the default timeout.
    #[must_use]
    pub fn direct() -> Self {
        Self::new(&ProxyConfig::default(), DEFAULT_TIMEOUT)
    }
}
