//! Per-invocation settings shared by all commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use policy_core::{canonicalize, Descriptor, Reference};
use policy_registry::{AdapterRegistry, HttpResolver, RegistryAuth, RegistryClient, RegistryConfig};
use policy_store::Store;

use crate::commands::GlobalArgs;
use crate::config::CliConfig;

/// Resolved configuration: file settings with environment and flag overrides applied.
#[derive(Debug)]
pub struct Context {
    config: CliConfig,
    default_domain: String,
    store_root: PathBuf,
    auth: RegistryAuth,
}

impl Context {
    /// Loads the configuration file and applies `args` on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let config = CliConfig::load(args.config.as_deref())?;
        let default_domain = args
            .default_domain
            .clone()
            .unwrap_or_else(|| config.default_domain().to_string());
        let store_root = match &args.store_root {
            Some(root) => root.clone(),
            None => config.store_root()?,
        };
        let auth = match (&args.token, &args.username, &args.password) {
            (Some(token), _, _) => RegistryAuth::bearer(token.clone()),
            (None, Some(username), Some(password)) => RegistryAuth::basic(username.clone(), password.clone()),
            (None, Some(_), None) => anyhow::bail!("--username requires --password"),
            _ => RegistryAuth::None,
        };

        Ok(Self {
            config,
            default_domain,
            store_root,
            auth,
        })
    }

    /// Builds a context directly, bypassing files and flags.
    #[cfg(test)]
    pub fn for_store(store_root: impl Into<PathBuf>) -> Self {
        Self {
            config: CliConfig::default(),
            default_domain: crate::config::DEFAULT_DOMAIN.to_string(),
            store_root: store_root.into(),
            auth: RegistryAuth::None,
        }
    }

    /// Canonical form of a user reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed.
    pub fn canonicalize(&self, reference: &str) -> Result<String> {
        canonicalize(reference, &self.default_domain)
            .with_context(|| format!("Invalid reference '{reference}'"))
    }

    /// Opens the local store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or its index is corrupt.
    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.store_root)
            .with_context(|| format!("Failed to open store at {}", self.store_root.display()))
    }

    /// Looks `reference` up in `store`: canonical name first, then digest prefix.
    ///
    /// Returns the name it was found under with the descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing matches.
    pub fn lookup(&self, store: &Store, reference: &str) -> Result<(String, Descriptor)> {
        if let Ok(canonical) = self.canonicalize(reference) {
            if let Some(descriptor) = store.resolve(&canonical) {
                return Ok((canonical, descriptor));
            }
        }
        store
            .resolve_by_prefix(reference)
            .map(|descriptor| (reference.to_string(), descriptor))
            .with_context(|| format!("Not found: {reference}"))
    }

    fn registry_config(&self) -> RegistryConfig {
        self.config.registry_config()
    }

    /// Endpoint resolver for `reference`. Command-line credentials apply to
    /// its registry host.
    ///
    /// # Errors
    ///
    /// Returns an error if `reference` is not canonical.
    pub fn resolver(&self, reference: &str) -> Result<HttpResolver> {
        let mut credentials = self.config.credentials();
        if self.auth != RegistryAuth::None {
            let parsed = Reference::parse(reference)?;
            credentials.insert(parsed.registry_host(), self.auth.clone());
        }
        Ok(HttpResolver::new(self.registry_config(), credentials))
    }

    /// Registry client for `host`. Command-line credentials apply to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn client(&self, host: &str) -> Result<Arc<RegistryClient>> {
        let auth = if self.auth == RegistryAuth::None {
            self.config.credentials().for_host(host)
        } else {
            self.auth.clone()
        };
        let client = RegistryClient::new(host, &self.registry_config(), auth)
            .with_context(|| format!("Failed to create client for {host}"))?;
        Ok(Arc::new(client))
    }

    /// Extended API adapters from the configuration file.
    #[must_use]
    pub fn adapters(&self) -> AdapterRegistry {
        self.config.adapters()
    }
}
