//! Build, tag, push and pull a bundle between two stores.

use std::collections::BTreeMap;

use policy_build::{build, BuildOptions};
use policy_core::{annotations, MediaType};
use policy_registry::{MemoryRegistry, RegistryError, Transfer};
use policy_store::{ensure_image, split_manifest, ContentSource, Store};

const REFERENCE: &str = "opcr.io/acme/peoplefinder:1.0.0";

const POLICY: &str = r#"package peoplefinder.GET.api.users

default allowed := false

allowed if {
    input.user.attributes.roles[_] == "viewer"
}
"#;

fn build_into(store: &mut Store) -> policy_core::Descriptor {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("users.rego"), POLICY).unwrap();
    let tarball = src.path().join("bundle.tar.gz");

    build(&tarball, &[src.path().join("users.rego")], &BuildOptions::default()).unwrap();
    let layer = ensure_image(store, &tarball, &BTreeMap::new()).unwrap();
    store.tag(REFERENCE, layer.clone()).unwrap();
    store.save().unwrap();
    layer
}

#[tokio::test]
async fn test_build_push_pull_round_trip() {
    let registry = MemoryRegistry::new();

    let publisher_dir = tempfile::tempdir().unwrap();
    let mut publisher = Store::open(publisher_dir.path()).unwrap();
    let layer = build_into(&mut publisher);
    assert_eq!(layer.media_type, MediaType::layer());
    assert_eq!(
        layer.annotations.get(annotations::TITLE).map(String::as_str),
        Some("bundle.tar.gz")
    );

    let pushed = Transfer::new(&mut publisher, &registry)
        .push(REFERENCE)
        .await
        .unwrap();
    assert!(pushed.is_manifest());

    let consumer_dir = tempfile::tempdir().unwrap();
    let mut consumer = Store::open(consumer_dir.path()).unwrap();
    let pulled = Transfer::new(&mut consumer, &registry)
        .pull(REFERENCE)
        .await
        .unwrap();
    assert_eq!(pulled.digest, pushed.digest);

    let (bundle, config) = split_manifest(&consumer, &pulled).unwrap();
    assert_eq!(bundle.digest, layer.digest);
    assert_eq!(config.media_type.as_str(), MediaType::UNKNOWN_CONFIG);
    assert_eq!(consumer.fetch(&bundle).unwrap(), publisher.fetch(&layer).unwrap());

    // A second build of the same sources reuses the blob and the remote content.
    let rebuilt = build_into(&mut publisher);
    assert_eq!(rebuilt, layer);
    Transfer::new(&mut publisher, &registry)
        .push(REFERENCE)
        .await
        .unwrap();

    // The pulled manifest can be relayed onwards unchanged.
    let mirror = MemoryRegistry::new();
    let relayed = Transfer::new(&mut consumer, &mirror)
        .push(REFERENCE)
        .await
        .unwrap();
    assert_eq!(relayed, pulled);
    assert!(mirror.contains(&bundle.digest));
    assert_eq!(consumer.resolve(REFERENCE), Some(pulled));
}

#[tokio::test]
async fn test_pull_unknown_tag_is_not_found() {
    let registry = MemoryRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();

    let err = Transfer::new(&mut store, &registry)
        .pull("opcr.io/acme/peoplefinder:missing")
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert!(store.list().is_empty());
}
