//! Wire-level tests for the registry client against a mock distribution API.

use policy_core::{Descriptor, Digest, Manifest, MediaType};
use policy_registry::{
    Credentials, HttpResolver, RegistryAuth, RegistryClient, RegistryConfig, RegistryError,
    Transfer,
};
use policy_store::Store;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "acme/policy";

fn host(server: &MockServer) -> String {
    server.uri().trim_start_matches("http://").to_string()
}

fn client(server: &MockServer) -> RegistryClient {
    RegistryClient::new(&host(server), &RegistryConfig::new(), RegistryAuth::None).unwrap()
}

struct Artifact {
    manifest: Descriptor,
    manifest_bytes: Vec<u8>,
    layer: Descriptor,
    config: Descriptor,
}

fn artifact() -> Artifact {
    let layer = Descriptor::for_content(MediaType::layer(), b"bundle");
    let config = Descriptor::for_content(MediaType::config(), b"{}");
    let manifest_bytes = Manifest::new(config.clone(), vec![layer.clone()])
        .to_vec()
        .unwrap();
    Artifact {
        manifest: Descriptor::for_content(MediaType::manifest(), &manifest_bytes),
        manifest_bytes,
        layer,
        config,
    }
}

async fn mount_artifact(server: &MockServer, artifact: &Artifact) {
    for object in ["1.0.0".to_string(), artifact.manifest.digest.to_string()] {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{REPO}/manifests/{object}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", MediaType::OCI_MANIFEST)
                    .set_body_bytes(artifact.manifest_bytes.clone()),
            )
            .mount(server)
            .await;
    }
    for (descriptor, body) in [(&artifact.layer, &b"bundle"[..]), (&artifact.config, &b"{}"[..])] {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{REPO}/blobs/{}", descriptor.digest)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_resolve_computes_digest_from_body() {
    let server = MockServer::start().await;
    let artifact = artifact();
    mount_artifact(&server, &artifact).await;

    let resolved = client(&server).resolve(REPO, "1.0.0").await.unwrap();

    assert_eq!(resolved, artifact.manifest);
    assert!(resolved.is_manifest());
}

#[tokio::test]
async fn test_fetch_manifest_rejects_mismatched_body() {
    let server = MockServer::start().await;
    let claimed = Digest::sha256(b"something else");
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/manifests/{claimed}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact().manifest_bytes))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_manifest(REPO, &claimed.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidManifest { .. }));
}

#[tokio::test]
async fn test_fetch_blob_and_missing_manifest() {
    let server = MockServer::start().await;
    let artifact = artifact();
    mount_artifact(&server, &artifact).await;
    let client = client(&server);

    let bytes = client.fetch_blob(REPO, &artifact.layer.digest).await.unwrap();
    assert_eq!(bytes, b"bundle");

    let err = client.resolve(REPO, "missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("acme/policy:missing"));
}

#[tokio::test]
async fn test_head_reports_existence() {
    let server = MockServer::start().await;
    let artifact = artifact();
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{REPO}/blobs/{}", artifact.layer.digest)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let client = client(&server);

    assert!(client.blob_exists(REPO, &artifact.layer.digest).await.unwrap());
    assert!(!client.blob_exists(REPO, &artifact.config.digest).await.unwrap());
}

#[tokio::test]
async fn test_push_blob_follows_relative_location() {
    let server = MockServer::start().await;
    let layer = artifact().layer;

    Mock::given(method("POST"))
        .and(path(format!("/v2/{REPO}/blobs/uploads/")))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("location", format!("/v2/{REPO}/blobs/uploads/session-1").as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v2/{REPO}/blobs/uploads/session-1")))
        .and(query_param("digest", layer.digest.to_string().as_str()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .push_blob(REPO, &layer, b"bundle".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_conflict_is_already_exists() {
    let server = MockServer::start().await;
    let artifact = artifact();
    Mock::given(method("PUT"))
        .and(path(format!("/v2/{REPO}/manifests/1.0.0")))
        .respond_with(ResponseTemplate::new(409).set_body_string("manifest already exists"))
        .mount(&server)
        .await;

    let err = client(&server)
        .push_manifest(REPO, "1.0.0", &MediaType::manifest(), artifact.manifest_bytes)
        .await
        .unwrap_err();

    assert!(err.is_already_exists());
    assert!(matches!(err, RegistryError::HttpError { status: 409, .. }));
}

#[tokio::test]
async fn test_bearer_challenge_is_answered_once() {
    let server = MockServer::start().await;
    let artifact = artifact();

    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/manifests/1.0.0")))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact.manifest_bytes.clone()))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/manifests/1.0.0")))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(
                r#"Bearer realm="{}/token",service="mock",scope="repository:{REPO}:pull""#,
                server.uri()
            )
            .as_str(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "mock"))
        .and(query_param("scope", format!("repository:{REPO}:pull").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let first = client.resolve(REPO, "1.0.0").await.unwrap();
    let second = client.resolve(REPO, "1.0.0").await.unwrap();

    assert_eq!(first, artifact.manifest);
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_rejected_credentials_are_authentication_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/tags/list")))
        .respond_with(ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"mock\""))
        .mount(&server)
        .await;

    let client = RegistryClient::new(
        &host(&server),
        &RegistryConfig::new(),
        RegistryAuth::basic("user", "wrong"),
    )
    .unwrap();

    let err = client.list_tags(REPO).await.unwrap_err();
    assert!(matches!(err, RegistryError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_list_tags_and_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/tags/list")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": REPO,
            "tags": ["1.0.0", "latest"]
        })))
        .mount(&server)
        .await;
    let client = client(&server);

    assert_eq!(client.list_tags(REPO).await.unwrap(), vec!["1.0.0", "latest"]);
    assert!(client.list_tags("acme/other").await.unwrap().is_empty());

    let err = client.catalog().await.unwrap_err();
    assert!(matches!(err, RegistryError::UnsupportedApi { .. }));

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "repositories": [REPO]
        })))
        .mount(&server)
        .await;
    assert_eq!(client.catalog().await.unwrap(), vec![REPO]);
}

#[tokio::test]
async fn test_pull_over_http() {
    let server = MockServer::start().await;
    let artifact = artifact();
    mount_artifact(&server, &artifact).await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let resolver = HttpResolver::new(RegistryConfig::new(), Credentials::new());
    let reference = format!("{}/{REPO}:1.0.0", host(&server));

    let pulled = Transfer::new(&mut store, &resolver)
        .pull(&reference)
        .await
        .unwrap();

    assert_eq!(pulled.digest, artifact.manifest.digest);
    assert_eq!(store.resolve(&reference), Some(pulled));
    assert!(store.exists(&artifact.layer.digest));
    assert!(store.exists(&artifact.config.digest));
}

#[tokio::test]
async fn test_push_layer_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/{REPO}/blobs/uploads/")))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("location", format!("/v2/{REPO}/blobs/uploads/session").as_str()),
        )
        .expect(2..)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v2/{REPO}/blobs/uploads/session")))
        .respond_with(ResponseTemplate::new(201))
        .expect(2..)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v2/{REPO}/manifests/1.0.0")))
        .and(header("content-type", MediaType::OCI_MANIFEST))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let layer = store.put(MediaType::layer(), &b"bundle"[..], None).unwrap();
    let reference = format!("{}/{REPO}:1.0.0", host(&server));
    store.tag(&reference, layer.clone()).unwrap();

    let resolver = HttpResolver::new(RegistryConfig::new(), Credentials::new());
    let pushed = Transfer::new(&mut store, &resolver)
        .push(&reference)
        .await
        .unwrap();

    assert!(pushed.is_manifest());
    assert_eq!(store.resolve(&reference), Some(layer));
}
