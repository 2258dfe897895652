//! Rm command implementation.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Args;
use policy_store::StoreError;

use crate::context::Context;
use crate::ui::Ui;

/// Arguments for the rm command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// References to remove
    #[arg(required = true)]
    pub references: Vec<String>,

    /// Ignore references that are not tagged
    #[arg(short, long)]
    pub force: bool,
}

/// Removes tags. Blobs stay in the store.
///
/// Nothing is removed unless every reference could be.
///
/// # Errors
///
/// Returns an error if a reference is invalid, or missing without `--force`.
pub fn run<W: Write>(args: &RmArgs, ctx: &Context, ui: &mut Ui<W>) -> Result<Vec<String>> {
    let mut store = ctx.open_store()?;
    let mut removed = Vec::with_capacity(args.references.len());

    for reference in &args.references {
        let canonical = ctx.canonicalize(reference)?;
        match store.untag(&canonical) {
            Ok(_) => removed.push(canonical),
            Err(StoreError::NotFound { .. }) if args.force => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {reference}")),
        }
    }

    store.save()?;
    for reference in &removed {
        ui.message(format!("Untagged {reference}"));
    }
    Ok(removed)
}
