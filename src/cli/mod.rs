//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod cache;
mod plugins;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Process exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// rpbuild - Assemble resource packs through a plugin pipeline
#[derive(Parser)]
#[command(name = "rpbuild")]
#[command(about = "rpbuild - Assemble resource packs through a plugin pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the pack described by rpbuild.toml
    Build {
        /// Config file (default: search upwards for rpbuild.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Number of transform workers (default: one per CPU)
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        jobs: Option<u16>,

        /// Let plugins rewrite the source tree instead of a staged copy
        #[arg(long)]
        in_place: bool,

        /// Never contact remote repositories
        #[arg(long)]
        offline: bool,

        /// Override the plugin cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Remove every downloaded plugin from the local cache
    ClearCache {
        /// Cache directory (default: from rpbuild.toml or the user cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// List the plugins shipped with rpbuild
    Plugins,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config, verbose, jobs, in_place, offline, cache_dir } => {
            crate::logging::init(verbose);
            let args = build::BuildArgs {
                config,
                verbose,
                jobs: jobs.map(usize::from),
                in_place,
                offline,
                cache_dir,
            };
            build::run_build(&args)
        }
        Commands::ClearCache { cache_dir } => {
            crate::logging::init(false);
            cache::run_clear_cache(cache_dir.as_deref())
        }
        Commands::Plugins => plugins::run_plugins(),
    }
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
    fn test_build_flags() {
        let cli = Cli::try_parse_from([
            "rpbuild",
            "build",
            "--config",
            "pack/rpbuild.toml",
            "-j",
            "4",
            "--in-place",
            "--offline",
        ])
        .unwrap();
        match cli.command {
            Commands::Build { config, jobs, in_place, offline, verbose, cache_dir } => {
                assert_eq!(config, Some(PathBuf::from("pack/rpbuild.toml")));
                assert_eq!(jobs, Some(4));
                assert!(in_place && offline);
                assert!(!verbose);
                assert!(cache_dir.is_none());
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_zero_jobs_rejected() {
        assert!(Cli::try_parse_from(["rpbuild", "build", "-j", "0"]).is_err());
    }
}
