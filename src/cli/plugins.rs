//! Plugins command implementation

use std::process::ExitCode;

use super::EXIT_SUCCESS;
use crate::plugin::bundled;

/// Run the plugins command
pub fn run_plugins() -> ExitCode {
    println!("Bundled plugins:");
    for plugin in bundled::all() {
        let descriptor = plugin.descriptor();
        if descriptor.kind.uses_glob() {
            println!(
                "  {:<28} {:<5} {:<20} {}",
                descriptor.name,
                descriptor.version,
                descriptor.kind,
                plugin.glob_pattern()
            );
        } else {
            println!("  {:<28} {:<5} {}", descriptor.name, descriptor.version, descriptor.kind);
        }
    }
    ExitCode::from(EXIT_SUCCESS)
}
