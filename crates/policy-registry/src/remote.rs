//! Remote endpoint abstraction.
//!
//! The transfer coordinator only sees [`RemoteEndpoint`], scoped to a single
//! repository, and asks an [`EndpointResolver`] for one per reference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use policy_core::{Descriptor, Reference};

use crate::client::RegistryClient;
use crate::config::{Credentials, RegistryConfig};
use crate::error::Result;

/// Resolve, fetch and push primitives against one remote repository.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// `host/repository`, for messages.
    fn name(&self) -> String;

    /// Resolves a tag or digest to a manifest descriptor.
    async fn resolve(&self, object: &str) -> Result<Descriptor>;

    /// Fetches the content behind `descriptor`.
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;

    /// Returns true if the content behind `descriptor` is already present.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Uploads a blob.
    async fn push(&self, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()>;

    /// Uploads a manifest, under `tag` when given and by digest otherwise.
    async fn push_manifest(&self, descriptor: &Descriptor, bytes: Vec<u8>, tag: Option<&str>) -> Result<()>;
}

/// Maps a reference to the endpoint serving its repository.
pub trait EndpointResolver: Send + Sync {
    /// Returns an endpoint for `reference`'s repository.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport can be built for the host.
    fn endpoint(&self, reference: &Reference) -> Result<Box<dyn RemoteEndpoint>>;
}

/// [`RemoteEndpoint`] over the registry HTTP API.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Arc<RegistryClient>,
    repository: String,
}

impl HttpEndpoint {
    /// Scopes `client` to `repository`.
    #[must_use]
    pub fn new(client: Arc<RegistryClient>, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    fn name(&self) -> String {
        format!("{}/{}", self.client.host(), self.repository)
    }

    async fn resolve(&self, object: &str) -> Result<Descriptor> {
        self.client.resolve(&self.repository, object).await
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        if descriptor.is_manifest() {
            let (_, bytes) = self
                .client
                .fetch_manifest(&self.repository, &descriptor.digest.to_string())
                .await?;
            Ok(bytes)
        } else {
            self.client.fetch_blob(&self.repository, &descriptor.digest).await
        }
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        if descriptor.is_manifest() {
            self.client.manifest_exists(&self.repository, &descriptor.digest).await
        } else {
            self.client.blob_exists(&self.repository, &descriptor.digest).await
        }
    }

    async fn push(&self, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        self.client.push_blob(&self.repository, descriptor, bytes).await
    }

    async fn push_manifest(&self, descriptor: &Descriptor, bytes: Vec<u8>, tag: Option<&str>) -> Result<()> {
        let object = tag.map_or_else(|| descriptor.digest.to_string(), ToString::to_string);
        self.client
            .push_manifest(&self.repository, &object, &descriptor.media_type, bytes)
            .await
    }
}

/// Builds one [`RegistryClient`] per host, with that host's credentials.
#[derive(Debug)]
pub struct HttpResolver {
    config: RegistryConfig,
    credentials: Credentials,
    clients: Mutex<HashMap<String, Arc<RegistryClient>>>,
}

impl HttpResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(config: RegistryConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared client for `host`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn client(&self, host: &str) -> Result<Arc<RegistryClient>> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(host) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(RegistryClient::new(
            host,
            &self.config,
            self.credentials.for_host(host),
        )?);
        clients.insert(host.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

impl EndpointResolver for HttpResolver {
    fn endpoint(&self, reference: &Reference) -> Result<Box<dyn RemoteEndpoint>> {
        let client = self.client(reference.registry_host())?;
        Ok(Box::new(HttpEndpoint::new(client, reference.path())))
    }
}
