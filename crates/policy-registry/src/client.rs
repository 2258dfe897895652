//! OCI Distribution API client for one registry host.

use policy_core::{Descriptor, Digest, MediaType};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::auth::{Authenticator, Challenge};
use crate::config::{RegistryAuth, RegistryConfig};
use crate::error::{RegistryError, Result};

/// Manifest types requested when resolving. Anything outside the transfer
/// allow-list is still accepted here so the caller can reject it by name.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.index.v1+json";

const CATALOG_SCOPE: &str = "registry:catalog:*";

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct MediaTypeProbe {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
}

/// Client for the registry API of a single host.
#[derive(Debug)]
pub struct RegistryClient {
    host: String,
    base_url: String,
    http: reqwest::Client,
    auth: Authenticator,
}

impl RegistryClient {
    /// Creates a client for `host` (optionally with a port).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or a TLS file
    /// cannot be read.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use policy_registry::{RegistryAuth, RegistryClient, RegistryConfig};
    ///
    /// let client = RegistryClient::new("opcr.io", &RegistryConfig::new(), RegistryAuth::None)?;
    /// assert_eq!(client.base_url(), "https://opcr.io");
    /// # Ok::<(), policy_registry::RegistryError>(())
    /// ```
    pub fn new(host: &str, config: &RegistryConfig, auth: RegistryAuth) -> Result<Self> {
        Ok(Self {
            host: host.to_string(),
            base_url: config.base_url(host),
            http: build_http_client(config)?,
            auth: Authenticator::new(auth),
        })
    }

    /// Registry host this client talks to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Base URL, scheme included.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves a tag or digest to a manifest descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the manifest does not exist.
    pub async fn resolve(&self, repository: &str, object: &str) -> Result<Descriptor> {
        self.fetch_manifest(repository, object).await.map(|(d, _)| d)
    }

    /// Fetches a manifest body and its descriptor.
    ///
    /// The digest is computed from the body; when `object` is a digest the
    /// body must match it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the manifest does not exist, or
    /// [`RegistryError::InvalidManifest`] if the body does not match the
    /// requested digest.
    pub async fn fetch_manifest(&self, repository: &str, object: &str) -> Result<(Descriptor, Vec<u8>)> {
        let url = format!("{}/v2/{repository}/manifests/{object}", self.base_url);
        let response = self
            .send(repository, |http| http.get(&url).header(ACCEPT, MANIFEST_ACCEPT))
            .await?;
        let response = self.check(response, repository, object).await?;

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/json");
        let bytes = response.bytes().await?.to_vec();

        let media_type = header_type
            .or_else(|| {
                serde_json::from_slice::<MediaTypeProbe>(&bytes)
                    .ok()
                    .and_then(|p| p.media_type)
            })
            .unwrap_or_else(|| MediaType::OCI_MANIFEST.to_string());

        let digest = Digest::sha256(&bytes);
        if let Ok(requested) = Digest::parse(object) {
            if requested != digest {
                return Err(RegistryError::InvalidManifest {
                    reference: display_reference(&self.host, repository, object),
                    reason: format!("body hashes to {digest}"),
                });
            }
        }

        debug!(repository, object, %digest, "Fetched manifest");
        let size = bytes.len() as u64;
        Ok((Descriptor::new(MediaType::new(media_type), digest, size), bytes))
    }

    /// Fetches a blob.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the blob does not exist.
    pub async fn fetch_blob(&self, repository: &str, digest: &Digest) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.base_url);
        let response = self.send(repository, |http| http.get(&url)).await?;
        let response = self.check(response, repository, &digest.to_string()).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Returns true if the blob is present in `repository`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted.
    pub async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.base_url);
        self.head(repository, &url).await
    }

    /// Returns true if a manifest with `digest` is present in `repository`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted.
    pub async fn manifest_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        let url = format!("{}/v2/{repository}/manifests/{digest}", self.base_url);
        self.head(repository, &url).await
    }

    /// Uploads a blob: opens an upload session, then completes it with a
    /// single `PUT ?digest=`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::HttpError`] with the registry's status and
    /// body if either step is refused.
    pub async fn push_blob(&self, repository: &str, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        let start = format!("{}/v2/{repository}/blobs/uploads/", self.base_url);
        let response = self.send(repository, |http| http.post(&start)).await?;
        let response = self.check(response, repository, "blobs/uploads").await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::HttpError {
                status: response.status().as_u16(),
                message: "no upload location returned".to_string(),
            })?;

        let base = url::Url::parse(&self.base_url).map_err(|_| RegistryError::InvalidUrl {
            url: self.base_url.clone(),
        })?;
        let mut upload = base.join(location).map_err(|_| RegistryError::InvalidUrl {
            url: location.to_string(),
        })?;
        upload
            .query_pairs_mut()
            .append_pair("digest", &descriptor.digest.to_string());

        let response = self
            .send(repository, |http| {
                http.put(upload.clone())
                    .header(CONTENT_TYPE, MediaType::OCTET_STREAM)
                    .body(bytes.clone())
            })
            .await?;
        self.check(response, repository, &descriptor.digest.to_string())
            .await?;

        debug!(repository, digest = %descriptor.digest, size = descriptor.size, "Pushed blob");
        Ok(())
    }

    /// Uploads a manifest under `object` (a tag or its digest).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::HttpError`] if the registry refuses it.
    pub async fn push_manifest(
        &self,
        repository: &str,
        object: &str,
        media_type: &MediaType,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let url = format!("{}/v2/{repository}/manifests/{object}", self.base_url);
        let response = self
            .send(repository, |http| {
                http.put(&url)
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(bytes.clone())
            })
            .await?;
        self.check(response, repository, object).await?;

        debug!(repository, object, "Pushed manifest");
        Ok(())
    }

    /// Lists the tags of `repository`. A missing repository has no tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{repository}/tags/list", self.base_url);
        let response = self.send(repository, |http| http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = self.check(response, repository, "tags/list").await?;
        let list: TagList = response.json().await?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Lists the repositories on the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be contacted or does not
    /// expose a catalog.
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/_catalog", self.base_url);
        let response = self.send(CATALOG_SCOPE, |http| http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::UnsupportedApi {
                feature: format!("catalog on {}", self.host),
            });
        }
        let response = self.check(response, "", "_catalog").await?;
        let catalog: Catalog = response.json().await?;
        Ok(catalog.repositories)
    }

    async fn head(&self, repository: &str, url: &str) -> Result<bool> {
        let response = self.send(repository, |http| http.head(url)).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(RegistryError::HttpError {
                status: s.as_u16(),
                message: format!("HEAD {url}"),
            }),
        }
    }

    /// Sends a request, answering one authentication challenge if needed.
    async fn send<F>(&self, scope: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut request = build(&self.http);
        if let Some(value) = self.auth.authorization(scope) {
            request = request.header(AUTHORIZATION, value);
        }
        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse)
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                message: format!("{} returned 401 without a usable challenge", self.host),
            })?;

        self.auth.forget(scope);
        let value = self.auth.respond(&self.http, &challenge, scope).await?;
        let response = build(&self.http).header(AUTHORIZATION, value).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::AuthenticationFailed {
                message: format!("credentials rejected by {}", self.host),
            });
        }
        Ok(response)
    }

    async fn check(
        &self,
        response: reqwest::Response,
        repository: &str,
        object: &str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound {
                reference: display_reference(&self.host, repository, object),
            });
        }
        Err(RegistryError::HttpError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

fn display_reference(host: &str, repository: &str, object: &str) -> String {
    if object.contains(':') {
        format!("{host}/{repository}@{object}")
    } else {
        format!("{host}/{repository}:{object}")
    }
}

/// Builds the HTTP client with proper configuration.
fn build_http_client(config: &RegistryConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(&config.user_agent);

    if let Some(ref tls) = config.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref ca_cert) = tls.ca_cert {
            let pem = read_pem(ca_cert)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                RegistryError::AuthenticationFailed {
                    message: format!("invalid CA certificate {}: {e}", ca_cert.display()),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
            let mut pem = read_pem(cert_path)?;
            pem.extend_from_slice(&read_pem(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                RegistryError::AuthenticationFailed {
                    message: format!("invalid client certificate: {e}"),
                }
            })?;
            builder = builder.identity(identity);
        }
    }

    builder.build().map_err(Into::into)
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RegistryError::AuthenticationFailed {
        message: format!("cannot read {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new("opcr.io", &RegistryConfig::new(), RegistryAuth::None).unwrap();
        assert_eq!(client.host(), "opcr.io");
        assert_eq!(client.base_url(), "https://opcr.io");

        let local = RegistryClient::new("localhost:5000", &RegistryConfig::new(), RegistryAuth::None).unwrap();
        assert_eq!(local.base_url(), "http://localhost:5000");
    }

    #[test]
    fn test_missing_ca_cert_fails() {
        let config = RegistryConfig::new()
            .with_tls(crate::config::TlsConfig::new().with_ca_cert("/nonexistent/ca.pem"));
        let err = RegistryClient::new("opcr.io", &config, RegistryAuth::None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn test_display_reference() {
        assert_eq!(display_reference("opcr.io", "a/b", "1.0"), "opcr.io/a/b:1.0");
        assert_eq!(
            display_reference("opcr.io", "a/b", "sha256:abc"),
            "opcr.io/a/b@sha256:abc"
        );
    }
}
