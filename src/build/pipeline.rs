//! Build pipeline orchestration.
//!
//! [`BuildPipeline`] runs a whole build: parse the section tree, resolve
//! plugins, stage sources, walk the tree with an [`Orchestrator`], then hand
//! the surviving files to the archiver.
//!
//! The orchestrator processes sections depth-first. A section's own phases
//! run only after all of its children are finished:
//!
//! 1. `GENERATE_BEFORE_LIST` plugins, output written at once
//! 2. Directory listing with the section's effective excludes
//! 3. `GENERATE_AFTER_LIST` plugins, output added to the working list
//! 4. Transform plugins, one binding at a time in declaration order
//!
//! Plugin failures are counted and logged; I/O failures end the build.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::{
    collect_archive_files, list_section_files, stage_sources, ArchiveError, Archiver,
    BuildContext, BuildReport, DiscoveryError, EngineError, SectionResult, TransformEngine,
    WorkItem, ZipArchiver,
};
use crate::config::ConfigError;
use crate::plugin::external::{PluginLoader, ProcessPluginLoader};
use crate::plugin::{
    Capability, ErrorPolicy, LoadedPlugin, OpenedFile, Plugin, PluginConfig, PluginContext,
    PluginError, PluginRegistry, PluginVersion,
};
use crate::repository::{
    HttpRepository, LocalRepository, RemoteRepository, RepositoryError, ResolveError, Resolver,
};
use crate::section::{slash_path, BuildSection, GlobFilter, PluginBinding};

/// Fatal build error.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("invalid repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("failed to stage sources: {0}")]
    Staging(#[source] io::Error),

    #[error("failed to list files: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("plugin {0} was not resolved")]
    PluginMissing(PluginVersion),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to write archive: {0}")]
    Archive(#[from] ArchiveError),
}

/// An enabled binding paired with its loaded plugin.
struct ActiveBinding<'a> {
    binding: &'a PluginBinding,
    plugin: Arc<LoadedPlugin>,
}

/// Walks the section tree and runs every plugin phase.
pub struct Orchestrator<'a> {
    registry: &'a PluginRegistry,
    engine: &'a TransformEngine,
    project_name: &'a str,
    source_root: &'a Path,
    policy: ErrorPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        registry: &'a PluginRegistry,
        engine: &'a TransformEngine,
        project_name: &'a str,
        source_root: &'a Path,
    ) -> Self {
        Self { registry, engine, project_name, source_root, policy: ErrorPolicy::default() }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process `root` and its whole subtree.
    pub fn run(&self, root: &BuildSection, report: &mut BuildReport) -> Result<(), BuildError> {
        self.process(root, report)
    }

    fn process(&self, section: &BuildSection, report: &mut BuildReport) -> Result<(), BuildError> {
        if !section.path().is_dir() {
            warn!(
                section = section.name(),
                path = %section.path().display(),
                "section directory does not exist, skipping it and its subsections"
            );
            let path = section.path().to_path_buf();
            report.add_section(SectionResult::skipped(section.name(), path));
            return Ok(());
        }

        for child in section.children() {
            self.process(child, report)?;
        }

        let start = Instant::now();
        let active = self.active_bindings(section)?;
        let cx = Arc::new(PluginContext::new(
            self.project_name,
            self.source_root,
            section.path(),
        ));

        let mut written = self.generate_before(section, &active, &cx)?;
        let listed =
            list_section_files(section.path(), self.source_root, section.effective_excludes())?;
        debug!(section = section.name(), files = listed.len(), "section listed");

        let (working, generated) = self.generate_after(section, &active, &cx, listed)?;
        written += generated;
        written += self.transform(section, &active, &cx, &working)?;

        debug!(section = section.name(), written, "section finished");
        report.add_section(SectionResult::built(
            section.name(),
            section.path().to_path_buf(),
            working.len(),
            written,
            start.elapsed(),
        ));
        Ok(())
    }

    /// Enabled bindings with their plugins. Each disabled binding gets one
    /// notice and is otherwise ignored.
    fn active_bindings<'s>(
        &self,
        section: &'s BuildSection,
    ) -> Result<Vec<ActiveBinding<'s>>, BuildError> {
        let mut active = Vec::new();
        for binding in section.bindings() {
            if binding.disabled {
                info!(section = section.name(), plugin = %binding.plugin, "plugin disabled");
                continue;
            }
            let plugin = self
                .registry
                .find(&binding.plugin)
                .cloned()
                .ok_or_else(|| BuildError::PluginMissing(binding.plugin.clone()))?;
            active.push(ActiveBinding { binding, plugin });
        }
        Ok(active)
    }

    fn generate_before(
        &self,
        section: &BuildSection,
        active: &[ActiveBinding<'_>],
        cx: &PluginContext,
    ) -> Result<usize, BuildError> {
        let mut written = 0;
        for ActiveBinding { binding, plugin } in active {
            let Capability::GenerateBeforeList(generator) = plugin.plugin().capability() else {
                continue;
            };
            if !plugin.ensure_initialized() {
                continue;
            }
            match plugin.invoke(|| generator.generate(cx, &binding.config)) {
                Ok(files) => {
                    for mut file in files {
                        written += usize::from(write_generated(&mut file, section.path())?);
                    }
                }
                Err(err) => plugin.record_failure(&err, section.name(), self.policy),
            }
        }
        Ok(written)
    }

    /// Returns the working file list and the number of files written.
    fn generate_after(
        &self,
        section: &BuildSection,
        active: &[ActiveBinding<'_>],
        cx: &PluginContext,
        listed: Vec<PathBuf>,
    ) -> Result<(Vec<PathBuf>, usize), BuildError> {
        let mut working = listed;
        let mut known: HashSet<PathBuf> = working.iter().cloned().collect();
        let mut written = 0;

        for ActiveBinding { binding, plugin } in active {
            let Capability::GenerateAfterList(generator) = plugin.plugin().capability() else {
                continue;
            };
            if !plugin.ensure_initialized() {
                continue;
            }
            match plugin.invoke(|| generator.generate_after(cx, &binding.config, &working)) {
                Ok(files) => {
                    for mut file in files {
                        written += usize::from(write_generated(&mut file, section.path())?);
                        if let Some(path) = file.path() {
                            if known.insert(path.to_path_buf()) {
                                working.push(path.to_path_buf());
                            }
                        }
                    }
                }
                Err(err) => plugin.record_failure(&err, section.name(), self.policy),
            }
        }
        Ok((working, written))
    }

    fn transform(
        &self,
        section: &BuildSection,
        active: &[ActiveBinding<'_>],
        cx: &Arc<PluginContext>,
        working: &[PathBuf],
    ) -> Result<usize, BuildError> {
        let mut written = 0;
        for ActiveBinding { binding, plugin } in active {
            let capability = plugin.plugin().capability();
            if !capability.kind().uses_glob() || !plugin.ensure_initialized() {
                continue;
            }
            let Some(candidates) = self.candidates(section, plugin, working) else {
                continue;
            };
            if candidates.is_empty() {
                continue;
            }
            written += match capability {
                Capability::TransformFiles(_) => {
                    self.transform_each(plugin, &binding.config, cx, candidates)?
                }
                Capability::TransformAllFiles(transformer) => {
                    let mut files: Vec<OpenedFile> = candidates
                        .into_iter()
                        .map(|(name, path)| OpenedFile::open(name, path))
                        .collect();
                    let config = &binding.config;
                    let result =
                        plugin.invoke(|| transformer.transform_all(cx, config, &mut files));
                    match result {
                        Ok(()) => {
                            for file in &mut files {
                                if let Some(err) = file.take_failure() {
                                    plugin.record_failure(&err, file.name(), self.policy);
                                }
                            }
                            write_all(&mut files)?
                        }
                        Err(err) => {
                            plugin.record_failure(&err, section.name(), self.policy);
                            0
                        }
                    }
                }
                _ => 0,
            };
        }
        Ok(written)
    }

    /// Files from `working` matching the plugin's glob, as (section-relative
    /// name, absolute path). `None` when the glob itself is unusable.
    fn candidates(
        &self,
        section: &BuildSection,
        plugin: &LoadedPlugin,
        working: &[PathBuf],
    ) -> Option<Vec<(String, PathBuf)>> {
        let pattern = plugin.plugin().glob_pattern();
        let filter = match GlobFilter::new(pattern) {
            Ok(filter) => filter,
            Err(e) => {
                let err = PluginError::failed(format!("bad glob '{pattern}': {e}"));
                plugin.record_failure(&err, section.name(), self.policy);
                return None;
            }
        };
        Some(
            working
                .iter()
                .filter_map(|path| {
                    let relative = path.strip_prefix(section.path()).ok()?;
                    filter.matches(relative).then(|| (slash_path(relative), path.clone()))
                })
                .collect(),
        )
    }

    /// Run one TRANSFORM_FILES binding over its candidates on the engine.
    fn transform_each(
        &self,
        plugin: &Arc<LoadedPlugin>,
        config: &Arc<PluginConfig>,
        cx: &Arc<PluginContext>,
        candidates: Vec<(String, PathBuf)>,
    ) -> Result<usize, BuildError> {
        let written = Arc::new(AtomicUsize::new(0));
        let failures: Arc<Mutex<Vec<(PathBuf, io::Error)>>> = Arc::new(Mutex::new(Vec::new()));

        let items: Vec<WorkItem> = candidates
            .into_iter()
            .map(|(name, path)| {
                let plugin = Arc::clone(plugin);
                let config = Arc::clone(config);
                let cx = Arc::clone(cx);
                let written = Arc::clone(&written);
                let failures = Arc::clone(&failures);
                let policy = self.policy;
                Box::new(move || {
                    let mut file = OpenedFile::open(name, path);
                    let result = plugin.invoke(|| match plugin.plugin().capability() {
                        Capability::TransformFiles(t) => t.transform(&cx, &config, &mut file),
                        other => Err(PluginError::failed(format!(
                            "expected TRANSFORM_FILES, plugin reports {}",
                            other.kind()
                        ))),
                    });
                    match result {
                        Ok(()) => match file.write_back() {
                            Ok(true) => {
                                written.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                let path = file.path().map(Path::to_path_buf).unwrap_or_default();
                                failures
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push((path, e));
                            }
                        },
                        Err(err) => plugin.record_failure(&err, file.name(), policy),
                    }
                }) as WorkItem
            })
            .collect();

        let stats = self.engine.run_all(items)?;
        debug!(plugin = plugin.name(), %stats, "transform phase finished");

        let mut failures = failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.len() > 1 {
            warn!(plugin = plugin.name(), count = failures.len(), "several files failed to write");
        }
        if let Some((path, source)) = failures.drain(..).next() {
            return Err(BuildError::Write { path, source });
        }
        Ok(written.load(Ordering::Relaxed))
    }
}

/// Anchor a generated file in `dir` and write it.
fn write_generated(file: &mut OpenedFile, dir: &Path) -> Result<bool, BuildError> {
    let path = file.resolve_in(dir).to_path_buf();
    file.write_back().map_err(|source| BuildError::Write { path, source })
}

fn write_all(files: &mut [OpenedFile]) -> Result<usize, BuildError> {
    let mut written = 0;
    for file in files {
        let path = file.path().map(Path::to_path_buf).unwrap_or_default();
        if file.write_back().map_err(|source| BuildError::Write { path, source })? {
            written += 1;
        }
    }
    Ok(written)
}

/// Build pipeline for executing builds.
pub struct BuildPipeline {
    /// Build context
    context: BuildContext,
    /// Plugins available before resolution
    registry: PluginRegistry,
    /// Remote repositories; taken from the config when unset
    remotes: Option<Vec<Box<dyn RemoteRepository>>>,
    /// Local cache; taken from the config when unset
    local: Option<LocalRepository>,
    /// Loader for cached artifacts
    loader: Option<Box<dyn PluginLoader>>,
    /// Output sink
    archiver: Box<dyn Archiver>,
}

impl BuildPipeline {
    /// Create a new build pipeline with the bundled plugins registered.
    pub fn new(context: BuildContext) -> Self {
        Self {
            context,
            registry: PluginRegistry::with_bundled(),
            remotes: None,
            local: None,
            loader: None,
            archiver: Box::new(ZipArchiver),
        }
    }

    /// Register an additional in-process plugin.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.registry.register(LoadedPlugin::bundled(plugin));
        self
    }

    /// Replace the starting registry.
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_remotes(mut self, remotes: Vec<Box<dyn RemoteRepository>>) -> Self {
        self.remotes = Some(remotes);
        self
    }

    pub fn with_local_repository(mut self, local: LocalRepository) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_archiver(mut self, archiver: Box<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Run the build pipeline.
    pub fn run(self) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let Self { context, mut registry, remotes, local, loader, archiver } = self;

        let source = context.source_dir();
        if !source.is_dir() {
            return Err(BuildError::SourceMissing(source));
        }
        let mut tree =
            BuildSection::from_table(&context.config().build, &source, &context.global_excludes())?;

        let remotes = match remotes {
            Some(remotes) => remotes,
            None => configured_remotes(&context)?,
        };
        let local = local.unwrap_or_else(|| context.local_repository());
        let loader: Box<dyn PluginLoader> = match loader {
            Some(loader) => loader,
            None => Box::new(ProcessPluginLoader::new(context.plugin_timeout_secs())),
        };

        let required = tree.required_plugins();
        info!(plugins = required.len(), "resolving plugins");
        let resolve = Resolver::new(&local, &remotes, &*loader)
            .with_offline(context.is_offline())
            .resolve(&required, &mut registry)?;

        let staging = if context.is_staged() {
            let staging = stage_sources(&source, context.config().git.ignore_git_folders)
                .map_err(BuildError::Staging)?;
            tree.relocate(staging.path());
            Some(staging)
        } else {
            None
        };
        let build_root = staging.as_ref().map_or(source.as_path(), |s| s.path());

        let mut report = BuildReport::new();
        report.resolve = resolve;

        let engine = TransformEngine::new(context.jobs());
        Orchestrator::new(&registry, &engine, context.project_name(), build_root)
            .with_policy(context.error_policy())
            .run(&tree, &mut report)?;
        engine.shutdown();

        let target = context.target_path();
        let mut skip = vec![target.clone()];
        if let Ok(relative) = target.strip_prefix(&source) {
            // an earlier archive inside the sources was staged along with them
            skip.push(build_root.join(relative));
        }
        let files = collect_archive_files(&tree, build_root, &skip)?;
        let summary =
            archiver.archive(&files, build_root, &target, context.compression_level())?;

        report.archive = Some((target, summary));
        report.plugins = registry.stats();
        report.total_duration = start.elapsed();
        Ok(report)
    }
}

fn configured_remotes(
    context: &BuildContext,
) -> Result<Vec<Box<dyn RemoteRepository>>, BuildError> {
    context
        .config()
        .repositories
        .iter()
        .map(|repo| {
            HttpRepository::new(&repo.id, &repo.url)
                .map(|r| Box::new(r) as Box<dyn RemoteRepository>)
                .map_err(BuildError::from)
        })
        .collect()
}
