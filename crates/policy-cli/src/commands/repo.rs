//! Repo command implementation: the registry's extended API.

use std::io::Write;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use policy_core::Reference;

use crate::context::Context;
use crate::ui::Ui;

/// Repository queries.
#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// List repositories on a registry host
    List {
        /// Registry host, e.g. `opcr.io`
        host: String,
    },

    /// List tags of a repository
    Tags {
        /// Repository, e.g. `acme/policy`
        repository: String,
    },
}

/// Runs a repo subcommand through the adapter configured for the host.
///
/// # Errors
///
/// Returns an error if the host has no adapter for the request or the
/// registry cannot be queried.
pub async fn run<W: Write>(command: &RepoCommand, ctx: &Context, ui: &mut Ui<W>) -> Result<Vec<String>> {
    let adapters = ctx.adapters();
    let entries = match command {
        RepoCommand::List { host } => adapters
            .select(ctx.client(host)?)
            .list_repositories()
            .await
            .with_context(|| format!("Failed to list repositories on {host}"))?,
        RepoCommand::Tags { repository } => {
            let canonical = ctx.canonicalize(repository)?;
            let parsed = Reference::parse(&canonical)?;
            adapters
                .select(ctx.client(parsed.registry_host())?)
                .list_tags(parsed.path())
                .await
                .with_context(|| format!("Failed to list tags of {repository}"))?
        }
    };

    for entry in &entries {
        ui.message(entry);
    }
    Ok(entries)
}
