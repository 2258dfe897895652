//! Transport and credential configuration.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Hosts always reached over plain HTTP.
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Per-process transport settings shared by every registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// TLS configuration for mTLS.
    pub tls: Option<TlsConfig>,

    /// Hosts reached over plain HTTP.
    pub plain_http: BTreeSet<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    /// Creates a configuration with default settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use policy_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new();
    /// assert_eq!(config.timeout, Duration::from_secs(30));
    /// assert!(config.user_agent.starts_with("policy/"));
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("policy/{}", env!("CARGO_PKG_VERSION")),
            tls: None,
            plain_http: BTreeSet::new(),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Reaches `host` over plain HTTP.
    #[must_use]
    pub fn with_plain_http(mut self, host: impl Into<String>) -> Self {
        self.plain_http.insert(host.into());
        self
    }

    /// Returns true if `host` (optionally with a port) uses plain HTTP.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new().with_plain_http("registry.local");
    /// assert!(config.is_plain_http("localhost:5000"));
    /// assert!(config.is_plain_http("registry.local:8080"));
    /// assert!(!config.is_plain_http("opcr.io"));
    /// ```
    #[must_use]
    pub fn is_plain_http(&self, host: &str) -> bool {
        let bare = strip_port(host);
        LOOPBACK_HOSTS.contains(&bare)
            || self.plain_http.contains(host)
            || self.plain_http.contains(bare)
    }

    /// Returns the base URL for `host`.
    #[must_use]
    pub fn base_url(&self, host: &str) -> String {
        if self.is_plain_http(host) {
            format!("http://{host}")
        } else {
            format!("https://{host}")
        }
    }
}

/// Strips a trailing `:port`, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

/// Authentication methods for registry access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistryAuth {
    /// Anonymous access.
    #[default]
    None,

    /// Basic authentication (username/password or username/token).
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// Bearer token authentication.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl RegistryAuth {
    /// Creates basic authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_registry::RegistryAuth;
    ///
    /// let auth = RegistryAuth::basic("user", "pass");
    /// ```
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }
}

/// Credential lookup by registry host.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    hosts: HashMap<String, RegistryAuth>,
}

impl Credentials {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds credentials for `host`.
    #[must_use]
    pub fn with(mut self, host: impl Into<String>, auth: RegistryAuth) -> Self {
        self.insert(host, auth);
        self
    }

    /// Adds or replaces credentials for `host`.
    pub fn insert(&mut self, host: impl Into<String>, auth: RegistryAuth) {
        self.hosts.insert(host.into(), auth);
    }

    /// Returns the credentials for `host`, or [`RegistryAuth::None`].
    ///
    /// Docker Hub's API host also matches entries stored under `docker.io`.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_registry::{Credentials, RegistryAuth};
    ///
    /// let creds = Credentials::new().with("docker.io", RegistryAuth::bearer("t"));
    /// assert_eq!(creds.for_host("registry-1.docker.io"), RegistryAuth::bearer("t"));
    /// assert_eq!(creds.for_host("opcr.io"), RegistryAuth::None);
    /// ```
    #[must_use]
    pub fn for_host(&self, host: &str) -> RegistryAuth {
        let aliases: &[&str] = match host {
            "registry-1.docker.io" | "index.docker.io" | "docker.io" => {
                &["registry-1.docker.io", "index.docker.io", "docker.io"]
            }
            _ => &[],
        };
        self.hosts
            .get(host)
            .or_else(|| aliases.iter().find_map(|alias| self.hosts.get(*alias)))
            .cloned()
            .unwrap_or_default()
    }
}

/// TLS configuration for mTLS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to CA certificate file.
    pub ca_cert: Option<PathBuf>,

    /// Path to client certificate file.
    pub client_cert: Option<PathBuf>,

    /// Path to client private key file.
    pub client_key: Option<PathBuf>,

    /// Whether to skip certificate verification (NOT recommended for production).
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Creates a new TLS configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure_skip_verify: false,
        }
    }

    /// Sets the CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Sets client certificate and key paths for mTLS.
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Enables insecure mode (skips certificate verification).
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }
}
