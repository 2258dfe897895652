//! Pull command implementation.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_core::Descriptor;
use policy_registry::{EndpointResolver, Transfer};

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the pull command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Reference to pull
    pub reference: String,
}

/// Runs the pull command.
///
/// # Errors
///
/// Returns an error if the reference is invalid or the transfer fails; the
/// local tags are unchanged in that case.
pub async fn run<W: Write>(args: &PullArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Descriptor> {
    let reference = ctx.canonicalize(&args.reference)?;
    let resolver = ctx.resolver(&reference)?;
    execute(&reference, ctx, &resolver, ui).await
}

pub(crate) async fn execute<W: Write>(
    reference: &str,
    ctx: &Context,
    resolver: &dyn EndpointResolver,
    ui: &mut Ui<W>,
) -> Result<Descriptor> {
    let mut store = ctx.open_store()?;
    ui.message(format!("Pulling {reference}"));

    let descriptor = Transfer::new(&mut store, resolver)
        .pull(reference)
        .await
        .with_context(|| format!("Failed to pull {reference}"))?;

    ui.message(format!("  Digest: {}", descriptor.digest));
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::{Manifest, MediaType};
    use policy_registry::MemoryRegistry;

    #[tokio::test]
    async fn test_pull_then_push_elsewhere() {
        let source = MemoryRegistry::new();
        let layer = source.insert_blob(MediaType::layer(), b"bundle");
        let config = source.insert_blob(MediaType::config(), b"{}");
        let manifest = source.insert_manifest(
            "opcr.io/acme/policy",
            "1.0.0",
            &Manifest::new(config, vec![layer]).to_vec().unwrap(),
        );

        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let mut ui = Ui::new(Vec::new());
        let pulled = execute("opcr.io/acme/policy:1.0.0", &ctx, &source, &mut ui)
            .await
            .unwrap();
        assert_eq!(pulled, manifest);
        assert_eq!(
            ctx.open_store().unwrap().resolve("opcr.io/acme/policy:1.0.0"),
            Some(manifest.clone())
        );

        let target = MemoryRegistry::new();
        crate::commands::push::execute("opcr.io/acme/policy:1.0.0", &ctx, &target, &mut ui)
            .await
            .unwrap();
        assert_eq!(target.manifest("opcr.io/acme/policy", "1.0.0"), Some(manifest));
    }

    #[tokio::test]
    async fn test_pull_malformed_manifest_keeps_tags() {
        let source = MemoryRegistry::new();
        source.insert_manifest("opcr.io/acme/policy", "1.0.0", b"<html>");

        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let err = execute("opcr.io/acme/policy:1.0.0", &ctx, &source, &mut Ui::new(Vec::new()))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("Invalid manifest"));
        assert!(ctx.open_store().unwrap().list().is_empty());
    }
}
