//! Diagnostic output for the command-line tool.
//!
//! Logs go to stderr so build summaries on stdout stay machine readable.
//! `RUST_LOG` takes precedence over the verbosity flag.

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "rpbuild=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber.
///
/// Only the first call has an effect. Returns whether this process ended up
/// with our subscriber installed (false if another one was already set, as
/// happens under some test harnesses).
pub fn init(verbose: bool) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .try_init()
            .is_ok()
    })
}
