//! Cache maintenance commands

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use super::{EXIT_ERROR, EXIT_SUCCESS};
use crate::config::{find_config, load_config, resolve_path};
use crate::repository::LocalRepository;

/// Cache directory from the nearest rpbuild.toml, if it names one.
fn configured_cache_dir() -> Option<PathBuf> {
    let config_path = find_config()?;
    let config = load_config(Some(&config_path)).ok()?;
    let dir = config.cache.dir?;
    let root = config_path.parent().unwrap_or_else(|| Path::new("."));
    Some(resolve_path(root, &dir))
}

/// Run the clear-cache command
pub fn run_clear_cache(cache_dir: Option<&Path>) -> ExitCode {
    let root = cache_dir
        .map(Path::to_path_buf)
        .or_else(configured_cache_dir)
        .or_else(LocalRepository::default_root);
    let Some(root) = root else {
        eprintln!("Error: No cache directory available; pass one with --cache-dir");
        return ExitCode::from(EXIT_ERROR);
    };

    match LocalRepository::new(&root).clear() {
        Ok(true) => {
            println!("Cleared plugin cache at {}", root.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Ok(false) => {
            println!("Plugin cache at {} is already empty", root.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error clearing cache: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
