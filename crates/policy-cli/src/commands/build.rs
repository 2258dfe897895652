//! Build command implementation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_build::BuildOptions;
use policy_core::Descriptor;
use policy_store::ensure_image;
use tracing::{info, warn};

use crate::context::Context;
use crate::ui::{human_size, Ui};

/// File name given to freshly built bundles.
const BUNDLE_FILE: &str = "bundle.tar.gz";

/// Arguments for the build command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Policy source directories or files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Reference to tag the bundle with
    #[arg(short, long)]
    pub tag: String,

    /// Bundle revision recorded in the bundle manifest
    #[arg(long)]
    pub revision: Option<String>,

    /// Bundle roots (derived from package names if omitted)
    #[arg(long)]
    pub root: Vec<String>,

    /// Paths to skip (a file or directory name, or `*suffix`)
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Extra annotation, as key=value
    #[arg(long = "annotation", value_parser = parse_annotation)]
    pub annotations: Vec<(String, String)>,

    /// Skip Rego validation
    #[arg(long)]
    pub no_validate: bool,
}

fn parse_annotation(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Runs the build command.
///
/// # Errors
///
/// Returns an error if the reference is invalid, the sources do not build,
/// or the bundle cannot be stored.
pub fn run<W: Write>(args: &BuildArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Descriptor> {
    let reference = ctx.canonicalize(&args.tag)?;
    let mut store = ctx.open_store()?;
    info!(reference = %reference, paths = ?args.paths, "Building policy bundle");

    let workdir = store.ingest_dir().join(format!("build-{}", std::process::id()));
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create {}", workdir.display()))?;
    let tarball = workdir.join(BUNDLE_FILE);

    let options = BuildOptions {
        revision: args.revision.clone(),
        roots: args.root.clone(),
        ignore: args.ignore.clone(),
        validate: !args.no_validate,
    };
    let annotations: BTreeMap<String, String> = args.annotations.iter().cloned().collect();

    let result = policy_build::build(&tarball, &args.paths, &options)
        .context("Build failed")
        .and_then(|summary| {
            let descriptor = ensure_image(&store, &tarball, &annotations)
                .context("Failed to store bundle")?;
            Ok((summary, descriptor))
        });

    if let Err(e) = std::fs::remove_dir_all(&workdir) {
        warn!(path = %workdir.display(), error = %e, "Failed to clean up build directory");
    }
    let (summary, descriptor) = result?;

    store.tag(&reference, descriptor.clone())?;
    store.save()?;

    ui.message(format!("Created {reference}"));
    ui.message(format!("  Digest:  {}", descriptor.digest));
    ui.message(format!("  Size:    {}", human_size(descriptor.size)));
    ui.message(format!("  Modules: {}", summary.modules.len()));
    if !summary.roots.is_empty() {
        ui.message(format!("  Roots:   {}", summary.roots.join(", ")));
    }

    Ok(descriptor)
}
