//! Push command implementation.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_core::Descriptor;
use policy_registry::{EndpointResolver, Transfer};

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the push command.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Reference to push
    pub reference: String,
}

/// Runs the push command against the registry named by the reference.
///
/// # Errors
///
/// Returns an error if the reference is not tagged locally or the transfer fails.
pub async fn run<W: Write>(args: &PushArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Descriptor> {
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
    ui.message(format!("Pushing {reference}"));

    let descriptor = Transfer::new(&mut store, resolver)
        .push(reference)
        .await
        .with_context(|| format!("Failed to push {reference}"))?;

    ui.message(format!("  Digest: {}", descriptor.digest));
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::MediaType;
    use policy_registry::MemoryRegistry;

    #[tokio::test]
    async fn test_push_bare_layer() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let mut store = ctx.open_store().unwrap();
        let layer = store.put(MediaType::layer(), &b"bundle"[..], None).unwrap();
        store.tag("opcr.io/acme/policy:1.0.0", layer).unwrap();
        store.save().unwrap();

        let registry = MemoryRegistry::new();
        let mut ui = Ui::new(Vec::new());
        let pushed = execute("opcr.io/acme/policy:1.0.0", &ctx, &registry, &mut ui)
            .await
            .unwrap();

        assert_eq!(registry.manifest("opcr.io/acme/policy", "1.0.0"), Some(pushed));
    }

    #[tokio::test]
    async fn test_push_untagged_names_reference() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());

        let err = execute("opcr.io/acme/policy:1.0.0", &ctx, &MemoryRegistry::new(), &mut Ui::new(Vec::new()))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("opcr.io/acme/policy:1.0.0"));
    }
}
