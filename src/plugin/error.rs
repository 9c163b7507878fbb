//! Errors raised while initializing or invoking a plugin.
//!
//! Every variant is recoverable from the build's point of view: the
//! orchestrator counts it against the plugin and moves on.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// The plugin rejected its input or configuration.
    #[error("{0}")]
    Failed(String),

    /// The plugin panicked.
    #[error("plugin panicked: {0}")]
    Panicked(String),

    /// Reading or writing file content failed inside the plugin.
    #[error("I/O error in plugin '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An external plugin process could not be started.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed { name: String, message: String },

    #[error("plugin '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("plugin '{name}' exited with non-zero status {status}")]
    NonZeroExit { name: String, status: i32 },

    /// The plugin process wrote something that is not a protocol response.
    #[error("plugin '{name}' wrote invalid output: {message}")]
    InvalidOutput { name: String, message: String },

    /// The plugin answered with an explicit error response.
    #[error("plugin '{name}' reported an error: {message}")]
    Reported { name: String, message: String },
}

impl PluginError {
    /// Shorthand for [`PluginError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io { name: name.to_owned(), source: Arc::new(source) }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload))
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
