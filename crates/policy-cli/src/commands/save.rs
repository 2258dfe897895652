//! Save command implementation.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_core::Descriptor;
use policy_store::split_manifest;

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the save command.
#[derive(Args, Debug)]
pub struct SaveArgs {
    /// Reference or digest prefix
    pub reference: String,

    /// Output file, or `-` for standard output
    #[arg(short, long, default_value = "bundle.tar.gz")]
    pub file: PathBuf,
}

/// Writes the bundle layer of a local artifact to a file.
///
/// # Errors
///
/// Returns an error if the reference is not found or the file cannot be written.
pub fn run<W: Write>(args: &SaveArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Descriptor> {
    let store = ctx.open_store()?;
    let (reference, descriptor) = ctx.lookup(&store, &args.reference)?;
    let layer = if descriptor.is_manifest() {
        split_manifest(&store, &descriptor)?.0
    } else {
        descriptor
    };

    let mut blob = store.open_blob(&layer)?;
    if args.file.as_os_str() == "-" {
        io::copy(&mut blob, &mut io::stdout().lock()).context("Failed to write bundle")?;
        return Ok(layer);
    }

    let mut out = File::create(&args.file)
        .with_context(|| format!("Failed to create {}", args.file.display()))?;
    io::copy(&mut blob, &mut out).with_context(|| format!("Failed to write {}", args.file.display()))?;
    out.sync_all()
        .with_context(|| format!("Failed to write {}", args.file.display()))?;

    ui.message(format!("Saved {reference} to {}", args.file.display()));
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::{Manifest, MediaType};

    #[test]
    fn test_save_splits_manifest() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let mut store = ctx.open_store().unwrap();
        let layer = store.put(MediaType::layer(), &b"bundle"[..], None).unwrap();
        let config = store.put(MediaType::config(), &b"{}"[..], None).unwrap();
        let bytes = Manifest::new(config, vec![layer.clone()]).to_vec().unwrap();
        let manifest = store.put(MediaType::manifest(), bytes.as_slice(), None).unwrap();
        store.tag("opcr.io/acme/policy:1.0.0", manifest).unwrap();
        store.save().unwrap();

        let out = tempfile::tempdir().unwrap();
        let file = out.path().join("exported.tar.gz");
        let args = SaveArgs {
            reference: "acme/policy:1.0.0".to_string(),
            file: file.clone(),
        };
        let saved = run(&args, &ctx, &mut Ui::new(Vec::new())).unwrap();

        assert_eq!(saved.digest, layer.digest);
        assert_eq!(std::fs::read(file).unwrap(), b"bundle");
    }

    #[test]
    fn test_save_missing_reference() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Context::for_store(root.path());
        let args = SaveArgs {
            reference: "acme/policy:1.0.0".to_string(),
            file: root.path().join("out.tar.gz"),
        };

        assert!(run(&args, &ctx, &mut Ui::new(Vec::new())).is_err());
        assert!(!root.path().join("out.tar.gz").exists());
    }
}
