//! Tag command implementation.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_core::Descriptor;

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the tag command.
#[derive(Args, Debug)]
pub struct TagArgs {
    /// Existing reference or digest prefix
    pub existing: String,

    /// New reference
    pub new: String,
}

/// Runs the tag command. The new tag gets its own copy of the descriptor.
///
/// # Errors
///
/// Returns an error if `existing` is not found or `new` is invalid.
pub fn run<W: Write>(args: &TagArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Descriptor> {
    let new = ctx.canonicalize(&args.new)?;
    let mut store = ctx.open_store()?;

    let existing = match ctx.canonicalize(&args.existing) {
        Ok(canonical) if store.resolve(&canonical).is_some() => canonical,
        _ => args.existing.clone(),
    };
    let descriptor = store
        .tag_existing(&existing, &new)
        .with_context(|| format!("Failed to tag {} as {new}", args.existing))?;

    ui.message(format!("Tagged {new}"));
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::MediaType;

    fn args(existing: &str, new: &str) -> TagArgs {
        TagArgs {
            existing: existing.to_string(),
            new: new.to_string(),
        }
    }

    #[test]
    fn test_tag_by_name_and_by_prefix() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let mut store = ctx.open_store().unwrap();
        let layer = store.put(MediaType::layer(), &b"bundle"[..], None).unwrap();
        store.tag("opcr.io/acme/policy:1.0.0", layer.clone()).unwrap();
        store.save().unwrap();
        let mut ui = Ui::new(Vec::new());

        run(&args("acme/policy:1.0.0", "acme/policy:stable"), &ctx, &mut ui).unwrap();
        run(&args(&layer.digest.hex()[..12], "other/policy"), &ctx, &mut ui).unwrap();

        let store = ctx.open_store().unwrap();
        assert_eq!(store.resolve("opcr.io/acme/policy:stable"), Some(layer.clone()));
        assert_eq!(store.resolve("opcr.io/other/policy:latest"), Some(layer));
    }

    #[test]
    fn test_tag_missing_leaves_index_alone() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());

        let err = run(&args("acme/missing:1", "acme/new:1"), &ctx, &mut Ui::new(Vec::new())).unwrap_err();

        assert!(format!("{err:#}").contains("Not found"));
        assert!(ctx.open_store().unwrap().list().is_empty());
    }
}
