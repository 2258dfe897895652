//! CLI configuration file.
//!
//! ```yaml
//! default_domain: opcr.io
//! store_root: /home/me/.policy/policies-root
//! plain_http_hosts: [registry.local:5000]
//! timeout_secs: 60
//! tls:
//!   ca_cert: /etc/policy/ca.pem
//! credentials:
//!   opcr.io: { username: me, password: secret }
//!   ghcr.io: { token: abc }
//! extended_api:
//!   "*.example.com": distribution
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use policy_registry::{AdapterRegistry, Credentials, RegistryAuth, RegistryConfig, TlsConfig};
use serde::Deserialize;

/// Domain given to references that do not name one.
pub const DEFAULT_DOMAIN: &str = "opcr.io";

/// Loaded configuration. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Domain for references without one.
    pub default_domain: Option<String>,

    /// Local store directory.
    pub store_root: Option<PathBuf>,

    /// Registries reached over plain HTTP.
    pub plain_http_hosts: Vec<String>,

    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// TLS settings shared by all registries.
    pub tls: Option<TlsSettings>,

    /// Credentials per registry host.
    pub credentials: BTreeMap<String, CredentialEntry>,

    /// Extended API adapters per host pattern.
    pub extended_api: BTreeMap<String, ExtendedApiKind>,
}

/// TLS section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    /// CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
    /// Client certificate (PEM).
    pub client_cert: Option<PathBuf>,
    /// Client key (PEM).
    pub client_key: Option<PathBuf>,
    /// Skip certificate verification.
    pub insecure_skip_verify: bool,
}

/// Credentials for one host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CredentialEntry {
    /// Pre-issued bearer token.
    Token {
        /// The token.
        token: String,
    },
    /// Username and password.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
}

/// Known extended API flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendedApiKind {
    /// `/v2/_catalog` and `/v2/<name>/tags/list`.
    Distribution,
}

impl From<&CredentialEntry> for RegistryAuth {
    fn from(entry: &CredentialEntry) -> Self {
        match entry {
            CredentialEntry::Token { token } => Self::bearer(token.clone()),
            CredentialEntry::Basic { username, password } => Self::basic(username.clone(), password.clone()),
        }
    }
}

impl From<&TlsSettings> for TlsConfig {
    fn from(settings: &TlsSettings) -> Self {
        Self {
            ca_cert: settings.ca_cert.clone(),
            client_cert: settings.client_cert.clone(),
            client_key: settings.client_key.clone(),
            insecure_skip_verify: settings.insecure_skip_verify,
        }
    }
}

impl CliConfig {
    /// Default location: `<config_dir>/policy/config.yaml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("policy").join("config.yaml"))
    }

    /// Loads the configuration at `path`, or at the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error naming the file if it cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config {}", path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Configured default domain, or `opcr.io`.
    #[must_use]
    pub fn default_domain(&self) -> &str {
        self.default_domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// Configured store root, or `<home>/.policy/policies-root`.
    ///
    /// # Errors
    ///
    /// Returns an error if no root is configured and the home directory is unknown.
    pub fn store_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.store_root {
            return Ok(root.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".policy").join("policies-root"))
            .context("Cannot determine home directory; set store_root or POLICY_STORE_ROOT")
    }

    /// Transport settings for registry clients.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new();
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(tls) = &self.tls {
            config = config.with_tls(tls.into());
        }
        for host in &self.plain_http_hosts {
            config = config.with_plain_http(host.clone());
        }
        config
    }

    /// Credentials from the file.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        self.credentials
            .iter()
            .fold(Credentials::new(), |creds, (host, entry)| creds.with(host.clone(), entry.into()))
    }

    /// Extended API adapters, in pattern order.
    #[must_use]
    pub fn adapters(&self) -> AdapterRegistry {
        self.extended_api
            .iter()
            .fold(AdapterRegistry::new(), |registry, (pattern, kind)| match kind {
                ExtendedApiKind::Distribution => registry.with_distribution(pattern),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_domain: registry.example.com
store_root: /var/lib/policy
plain_http_hosts: ["registry.local:5000"]
timeout_secs: 5
tls:
  insecure_skip_verify: true
credentials:
  opcr.io:
    username: me
    password: secret
  ghcr.io:
    token: abc
extended_api:
  "*.example.com": distribution
"#;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.default_domain(), DEFAULT_DOMAIN);
    }

    #[test]
    fn test_load_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.default_domain(), "registry.example.com");
        assert_eq!(config.store_root().unwrap(), PathBuf::from("/var/lib/policy"));

        let registry = config.registry_config();
        assert_eq!(registry.timeout, Duration::from_secs(5));
        assert!(registry.is_plain_http("registry.local:5000"));
        assert!(registry.tls.is_some_and(|tls| tls.insecure_skip_verify));

        let creds = config.credentials();
        assert_eq!(creds.for_host("opcr.io"), RegistryAuth::basic("me", "secret"));
        assert_eq!(creds.for_host("ghcr.io"), RegistryAuth::bearer("abc"));
        assert_eq!(creds.for_host("quay.io"), RegistryAuth::None);
    }

    #[test]
    fn test_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "timeout_secs: [not a number").unwrap();

        let err = CliConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "registry_url: https://example.com\n").unwrap();

        assert!(CliConfig::load(Some(&path)).is_err());
    }
}
