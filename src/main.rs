//! rpbuild - Command-line tool for assembling resource packs

use std::process::ExitCode;

use rpbuild::cli;

fn main() -> ExitCode {
    cli::run()
}
