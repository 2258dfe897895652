//! CLI commands and argument parsing.

pub mod build;
pub mod images;
pub mod inspect;
pub mod pull;
pub mod push;
pub mod repo;
pub mod rm;
pub mod save;
pub mod tag;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Policy - build, tag and exchange policy bundles as OCI artifacts
#[derive(Parser)]
#[command(name = "policy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file
    #[arg(long, global = true, env = "POLICY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local store directory
    #[arg(long, global = true, env = "POLICY_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// Registry for references that do not name one
    #[arg(long, global = true, env = "POLICY_DEFAULT_DOMAIN")]
    pub default_domain: Option<String>,

    /// Username for the registry of the reference
    #[arg(short, long, global = true, env = "POLICY_USERNAME")]
    pub username: Option<String>,

    /// Password for the registry of the reference
    #[arg(short, long, global = true, env = "POLICY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Bearer token for the registry of the reference
    #[arg(long, global = true, env = "POLICY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Build a policy bundle and tag it locally
    Build(build::BuildArgs),

    /// Push a local artifact to its registry
    Push(push::PushArgs),

    /// Pull an artifact from its registry
    Pull(pull::PullArgs),

    /// Create a new tag for a local artifact
    Tag(tag::TagArgs),

    /// Remove local tags
    Rm(rm::RmArgs),

    /// List local artifacts
    #[command(visible_aliases = ["ls", "list"])]
    Images(images::ImagesArgs),

    /// Show the descriptor (and manifest) of a local artifact
    Inspect(inspect::InspectArgs),

    /// Export the bundle of a local artifact to a file
    Save(save::SaveArgs),

    /// Query registry repositories
    #[command(subcommand)]
    Repo(repo::RepoCommand),

    /// Print version information
    Version,
}

/// Output format for listing commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Text,
    /// JSON document
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_aliases_and_globals() {
        let cli = Cli::try_parse_from(["policy", "ls", "--output", "json", "--verbose"]).unwrap();
        assert!(cli.global.verbose);
        assert!(matches!(
            cli.command,
            Commands::Images(images::ImagesArgs {
                output: OutputFormat::Json
            })
        ));

        let cli = Cli::try_parse_from(["policy", "rm", "a:1", "b:2", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Rm(ref args) if args.references.len() == 2 && args.force));
    }
}
