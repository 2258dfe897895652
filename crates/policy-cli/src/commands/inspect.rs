//! Inspect command implementation.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_store::ContentSource;
use serde_json::{json, Value};

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Reference or digest prefix
    pub reference: String,
}

/// Prints the descriptor, and the manifest body when the reference names one.
///
/// # Errors
///
/// Returns an error if the reference is not found or its manifest is unreadable.
pub fn run<W: Write>(args: &InspectArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Value> {
    let store = ctx.open_store()?;
    let (reference, descriptor) = ctx.lookup(&store, &args.reference)?;

    let mut document = json!({
        "reference": reference,
        "descriptor": descriptor,
    });
    if descriptor.is_manifest() {
        let body = store.fetch(&descriptor)?;
        let manifest: Value = serde_json::from_slice(&body)
            .with_context(|| format!("Manifest {} is not JSON", descriptor.digest))?;
        document["manifest"] = manifest;
    }

    ui.json(&document);
    Ok(document)
}
