//! Vendor-specific registry APIs.
//!
//! Listing repositories and changing visibility are not part of the core
//! distribution API, so each host gets an [`ExtendedApi`] chosen once from an
//! [`AdapterRegistry`]. Hosts without a registered adapter get [`Unsupported`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};

/// Registry capabilities beyond push and pull.
#[async_trait]
pub trait ExtendedApi: Send + Sync {
    /// Lists repositories on the host.
    async fn list_repositories(&self) -> Result<Vec<String>>;

    /// Lists tags of `repository`.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Makes `repository` public or private.
    async fn set_visibility(&self, repository: &str, public: bool) -> Result<()>;
}

/// Adapter for hosts with no known extended API.
#[derive(Debug, Clone)]
pub struct Unsupported {
    host: String,
}

impl Unsupported {
    /// Creates the adapter for `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn unsupported<T>(&self, feature: &str) -> Result<T> {
        Err(RegistryError::UnsupportedApi {
            feature: format!("{feature} on {}", self.host),
        })
    }
}

#[async_trait]
impl ExtendedApi for Unsupported {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        self.unsupported("listing repositories")
    }

    async fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
        self.unsupported("listing tags")
    }

    async fn set_visibility(&self, _repository: &str, _public: bool) -> Result<()> {
        self.unsupported("repository visibility")
    }
}

/// Plain distribution API: `/v2/_catalog` and `/v2/<name>/tags/list`.
#[derive(Debug, Clone)]
pub struct Distribution {
    client: Arc<RegistryClient>,
}

impl Distribution {
    /// Wraps `client`.
    #[must_use]
    pub const fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtendedApi for Distribution {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        self.client.catalog().await
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.client.list_tags(repository).await
    }

    async fn set_visibility(&self, _repository: &str, _public: bool) -> Result<()> {
        Err(RegistryError::UnsupportedApi {
            feature: format!("repository visibility on {}", self.client.host()),
        })
    }
}

/// Host match: exact (`opcr.io`) or subdomain wildcard (`*.example.com`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Matches one host.
    Exact(String),
    /// Matches any host ending in `.suffix`.
    Suffix(String),
}

impl HostPattern {
    /// Parses a pattern.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(suffix) => Self::Suffix(suffix.to_string()),
            None => Self::Exact(pattern),
        }
    }

    /// Returns true if `host` matches. A port on `host` is ignored for
    /// wildcard patterns.
    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            Self::Exact(exact) => host == *exact,
            Self::Suffix(suffix) => {
                let bare = host.split(':').next().unwrap_or_default();
                bare.ends_with(&format!(".{suffix}"))
            }
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(host) => write!(f, "{host}"),
            Self::Suffix(suffix) => write!(f, "*.{suffix}"),
        }
    }
}

/// Builds an adapter around a host's client.
pub type AdapterConstructor = Arc<dyn Fn(Arc<RegistryClient>) -> Box<dyn ExtendedApi> + Send + Sync>;

/// Ordered host-pattern → adapter constructor table. First match wins.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    entries: Vec<(HostPattern, AdapterConstructor)>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(p, _)| p.to_string()))
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty table: every host is [`Unsupported`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a constructor for hosts matching `pattern`.
    #[must_use]
    pub fn register(mut self, pattern: &str, constructor: AdapterConstructor) -> Self {
        self.entries.push((HostPattern::parse(pattern), constructor));
        self
    }

    /// Appends the [`Distribution`] adapter for hosts matching `pattern`.
    #[must_use]
    pub fn with_distribution(self, pattern: &str) -> Self {
        self.register(
            pattern,
            Arc::new(|client: Arc<RegistryClient>| -> Box<dyn ExtendedApi> {
                Box::new(Distribution::new(client))
            }),
        )
    }

    /// Returns the adapter for `client`'s host.
    #[must_use]
    pub fn select(&self, client: Arc<RegistryClient>) -> Box<dyn ExtendedApi> {
        let host = client.host().to_string();
        match self.entries.iter().find(|(pattern, _)| pattern.matches(&host)) {
            Some((pattern, constructor)) => {
                tracing::debug!(%host, %pattern, "Selected extended API adapter");
                constructor(client)
            }
            None => Box::new(Unsupported::new(host)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistryAuth, RegistryConfig};

    fn client(host: &str) -> Arc<RegistryClient> {
        Arc::new(RegistryClient::new(host, &RegistryConfig::new(), RegistryAuth::None).unwrap())
    }

    #[test]
    fn test_host_pattern() {
        assert!(HostPattern::parse("opcr.io").matches("opcr.io"));
        assert!(HostPattern::parse("OPCR.io").matches("opcr.io"));
        assert!(!HostPattern::parse("opcr.io").matches("ghcr.io"));

        let wildcard = HostPattern::parse("*.example.com");
        assert!(wildcard.matches("registry.example.com"));
        assert!(wildcard.matches("registry.example.com:5000"));
        assert!(!wildcard.matches("example.com"));
        assert_eq!(wildcard.to_string(), "*.example.com");
    }

    #[tokio::test]
    async fn test_unknown_host_is_unsupported() {
        let adapters = AdapterRegistry::new().with_distribution("registry.local");
        let api = adapters.select(client("opcr.io"));
        let err = api.list_repositories().await.unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedApi { feature } if feature.contains("opcr.io")));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let adapters = AdapterRegistry::new()
            .register(
                "*.example.com",
                Arc::new(|c: Arc<RegistryClient>| -> Box<dyn ExtendedApi> {
                    Box::new(Unsupported::new(format!("first:{}", c.host())))
                }),
            )
            .with_distribution("registry.example.com");

        let api = adapters.select(client("registry.example.com"));
        let err = api.list_tags("a").await.unwrap_err();
        assert!(err.to_string().contains("first:registry.example.com"));
    }
}
