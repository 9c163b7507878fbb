//! In-process table of loaded plugins.
//!
//! The registry is filled during resolution (`&mut`) and only read during
//! orchestration (`&`). Each entry tracks its own initialization state and
//! failure counter, so plugin instances can be shared across worker threads
//! without further coordination.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::{bundled, Plugin, PluginDescriptor, PluginError, PluginVersion};

const PLUGIN_TARGET: &str = "rpbuild::plugin";

/// Failures logged in full before a plugin's errors are shortened.
pub const DEFAULT_ERROR_LOG_LIMIT: usize = 10;

/// How invocation failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Number of detailed failure reports per plugin.
    pub log_limit: usize,
    /// Report every failure in full regardless of the limit.
    pub verbose: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self { log_limit: DEFAULT_ERROR_LOG_LIMIT, verbose: false }
    }
}

/// Where a loaded plugin came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOrigin {
    /// Compiled into the binary.
    Bundled,
    /// Loaded from a cached artifact.
    Artifact(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Pending,
    Ready,
    Failed,
}

/// Usage counters for one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStats {
    pub name: String,
    pub version: String,
    pub invocations: usize,
    pub failures: usize,
    pub busy: Duration,
    pub disabled: bool,
}

/// A plugin instance together with its loading origin and build-scoped state.
pub struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    origin: PluginOrigin,
    init: Mutex<InitState>,
    invocations: AtomicUsize,
    failures: AtomicUsize,
    busy_nanos: AtomicU64,
}

impl LoadedPlugin {
    pub fn new(plugin: Arc<dyn Plugin>, origin: PluginOrigin) -> Self {
        Self {
            plugin,
            origin,
            init: Mutex::new(InitState::Pending),
            invocations: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            busy_nanos: AtomicU64::new(0),
        }
    }

    pub fn bundled(plugin: Arc<dyn Plugin>) -> Self {
        Self::new(plugin, PluginOrigin::Bundled)
    }

    pub fn from_artifact(plugin: Arc<dyn Plugin>, artifact: &Path) -> Self {
        Self::new(plugin, PluginOrigin::Artifact(artifact.to_path_buf()))
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        self.plugin.descriptor()
    }

    pub fn name(&self) -> &str {
        &self.plugin.descriptor().name
    }

    pub fn origin(&self) -> &PluginOrigin {
        &self.origin
    }

    /// Run `initialize` unless it already ran.
    ///
    /// Returns whether the plugin is usable. Concurrent callers block until the
    /// first initialization finishes. A failure is logged once and disables the
    /// plugin for the rest of the build.
    pub fn ensure_initialized(&self) -> bool {
        let mut state = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == InitState::Pending {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.plugin.initialize()))
                .unwrap_or_else(|payload| Err(PluginError::from_panic(payload)));
            *state = match result {
                Ok(()) => {
                    debug!(target: PLUGIN_TARGET, plugin = self.name(), "plugin initialized");
                    InitState::Ready
                }
                Err(err) => {
                    error!(
                        target: PLUGIN_TARGET,
                        plugin = self.name(),
                        error = %err,
                        "plugin failed to initialize and is disabled for this build"
                    );
                    InitState::Failed
                }
            };
        }
        *state == InitState::Ready
    }

    pub fn is_initialized(&self) -> bool {
        *self.init.lock().unwrap_or_else(PoisonError::into_inner) == InitState::Ready
    }

    /// Whether initialization failed.
    pub fn is_disabled(&self) -> bool {
        *self.init.lock().unwrap_or_else(PoisonError::into_inner) == InitState::Failed
    }

    /// Run one plugin call, timing it and turning a panic into an error.
    pub fn invoke<T>(
        &self,
        call: impl FnOnce() -> Result<T, PluginError>,
    ) -> Result<T, PluginError> {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(call))
            .unwrap_or_else(|payload| Err(PluginError::from_panic(payload)));
        let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Count a failed invocation and log it according to `policy`.
    ///
    /// The first `log_limit - 1` failures are logged with full detail, the
    /// failure that reaches the limit also announces that later ones will be
    /// shortened, and everything after that is a one-line notice.
    pub fn record_failure(&self, err: &PluginError, subject: &str, policy: ErrorPolicy) {
        let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        let name = self.name();

        if policy.verbose || count < policy.log_limit {
            warn!(
                target: PLUGIN_TARGET,
                plugin = name,
                subject,
                error = ?err,
                "plugin invocation failed: {err}"
            );
        } else if count == policy.log_limit {
            warn!(
                target: PLUGIN_TARGET,
                plugin = name,
                subject,
                error = ?err,
                "plugin invocation failed: {err}"
            );
            warn!(
                target: PLUGIN_TARGET,
                plugin = name,
                limit = policy.log_limit,
                "plugin generated too many errors; further details will be hidden"
            );
        } else {
            warn!(target: PLUGIN_TARGET, plugin = name, subject, "plugin invocation failed");
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PluginStats {
        let descriptor = self.descriptor();
        PluginStats {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            invocations: self.invocation_count(),
            failures: self.failure_count(),
            busy: Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed)),
            disabled: self.is_disabled(),
        }
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("descriptor", self.descriptor())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Append-only table of loaded plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<LoadedPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every bundled plugin.
    pub fn with_bundled() -> Self {
        let mut registry = Self::new();
        for plugin in bundled::all() {
            registry.register(LoadedPlugin::bundled(plugin));
        }
        registry
    }

    /// Add a plugin. If the same name and version is already present the
    /// existing entry wins and is returned.
    pub fn register(&mut self, loaded: LoadedPlugin) -> Arc<LoadedPlugin> {
        let descriptor = loaded.descriptor();
        let existing = self.plugins.iter().find(|p| {
            p.descriptor().name == descriptor.name && p.descriptor().version == descriptor.version
        });
        if let Some(existing) = existing {
            debug!(target: PLUGIN_TARGET, plugin = %descriptor, "plugin already registered");
            return Arc::clone(existing);
        }
        let loaded = Arc::new(loaded);
        self.plugins.push(Arc::clone(&loaded));
        loaded
    }

    /// First registered plugin satisfying `requirement`.
    pub fn find(&self, requirement: &PluginVersion) -> Option<&Arc<LoadedPlugin>> {
        self.plugins.iter().find(|p| requirement.satisfied_by(p.descriptor()))
    }

    pub fn contains(&self, requirement: &PluginVersion) -> bool {
        self.find(requirement).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LoadedPlugin>> {
        self.plugins.iter()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Counters for every plugin that was invoked or disabled.
    pub fn stats(&self) -> Vec<PluginStats> {
        self.plugins
            .iter()
            .map(|p| p.stats())
            .filter(|s| s.invocations > 0 || s.disabled)
            .collect()
    }
}
