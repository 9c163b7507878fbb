//! Build command implementation

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{debug, error};

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildContext, BuildPipeline};
use crate::config::{find_config, load_config, merge_cli_overrides, CliOverrides};

/// Arguments of `rpbuild build`
#[derive(Debug, Default)]
pub struct BuildArgs {
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub jobs: Option<usize>,
    pub in_place: bool,
    pub offline: bool,
    pub cache_dir: Option<PathBuf>,
}

impl BuildArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            jobs: self.jobs,
            cache_dir: self.cache_dir.clone(),
            offline: self.offline.then_some(true),
            stage: self.in_place.then_some(false),
        }
    }
}

/// Directory holding the config file; relative paths in it resolve from here.
fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Run the build command
pub fn run_build(args: &BuildArgs) -> ExitCode {
    let config_path = match &args.config {
        Some(path) if !path.is_file() => {
            eprintln!("Error: Config file not found: {}", path.display());
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
        Some(path) => path.clone(),
        None => match find_config() {
            Some(path) => path,
            None => {
                eprintln!("Error: No rpbuild.toml found in this directory or any parent");
                eprintln!("Pass the project file with --config");
                return ExitCode::from(EXIT_ERROR);
            }
        },
    };
    debug!(path = %config_path.display(), "using config");

    let mut config = match load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    merge_cli_overrides(&mut config, &args.overrides());

    let context = BuildContext::new(config, config_dir(&config_path)).with_verbose(args.verbose);
    match BuildPipeline::new(context).run() {
        Ok(report) => {
            println!("{}", report.summary());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            error!("build failed: {e}");
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
