//! Policy CLI - build, tag and exchange policy bundles as OCI artifacts.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod context;
mod ui;

use commands::{Cli, Commands};
use context::Context;
use ui::Ui;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable.
    let default_filter = if cli.global.verbose { "policy=debug" } else { "policy=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("policy {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = Context::new(&cli.global)?;
    let mut ui = Ui::stdout();

    match &cli.command {
        Commands::Build(args) => commands::build::run(args, &ctx, &mut ui).map(drop),
        Commands::Push(args) => commands::push::run(args, &ctx, &mut ui).await.map(drop),
        Commands::Pull(args) => commands::pull::run(args, &ctx, &mut ui).await.map(drop),
        Commands::Tag(args) => commands::tag::run(args, &ctx, &mut ui).map(drop),
        Commands::Rm(args) => commands::rm::run(args, &ctx, &mut ui).map(drop),
        Commands::Images(args) => commands::images::run(args, &ctx, &mut ui),
        Commands::Inspect(args) => commands::inspect::run(args, &ctx, &mut ui).map(drop),
        Commands::Save(args) => commands::save::run(args, &ctx, &mut ui).map(drop),
        Commands::Repo(command) => commands::repo::run(command, &ctx, &mut ui).await.map(drop),
        Commands::Version => Ok(()),
    }
}
