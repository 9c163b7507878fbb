//! Build System Test Suite
//!
//! End-to-end builds through [`BuildPipeline`] on scratch projects:
//!
//! - Exclude inheritance and git folders
//! - Deterministic generation and archiving
//! - Failure isolation inside a transform phase
//! - Disabled bindings and missing section directories
//! - Generated files joining the working list

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use zip::ZipArchive;

use rpbuild::build::{BuildContext, BuildError, BuildPipeline, BuildReport, SectionStatus};
use rpbuild::config::parse_config;
use rpbuild::plugin::{
    Capability, OpenedFile, Plugin, PluginConfig, PluginContext, PluginDescriptor, PluginError,
    PluginKind, TransformFiles,
};
use rpbuild::repository::LocalRepository;

// ============================================================================
// Test Utilities
// ============================================================================

/// Write a project with `rpbuild.toml` contents `config` and no sources yet.
fn create_project(config: &str) -> (TempDir, BuildContext) {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("src")).unwrap();
    let config = parse_config(config).unwrap();
    let ctx = BuildContext::new(config, temp.path().to_path_buf());
    (temp, ctx)
}

/// Create a source file with content.
fn create_source(project: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = project.join("src").join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Pipeline isolated from the network and the user's cache.
fn pipeline(project: &Path, ctx: BuildContext) -> BuildPipeline {
    BuildPipeline::new(ctx)
        .with_remotes(Vec::new())
        .with_local_repository(LocalRepository::new(project.join("cache")))
}

fn build(project: &Path, ctx: BuildContext) -> BuildReport {
    pipeline(project, ctx).run().unwrap()
}

fn zip_entries(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(String::from).collect()
}

fn zip_entry(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut content = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut content).unwrap();
    content
}

/// Uppercases `*.txt` files and refuses any whose content starts with `fail`.
struct Shout {
    descriptor: PluginDescriptor,
    initialized: Arc<AtomicUsize>,
}

impl Shout {
    fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new("shout", "tests", "1.0", PluginKind::TransformFiles),
            initialized: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TransformFiles for Shout {
    fn transform(
        &self,
        _cx: &PluginContext,
        _config: &PluginConfig,
        file: &mut OpenedFile,
    ) -> Result<(), PluginError> {
        let name = file.name().to_string();
        let content = file.content().map_err(|e| PluginError::io(&name, e))?;
        if content.starts_with(b"fail") {
            return Err(PluginError::failed(format!("refusing {name}")));
        }
        let upper = content.to_ascii_uppercase();
        if upper != content {
            file.set_content(upper);
        }
        Ok(())
    }
}

impl Plugin for Shout {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn glob_pattern(&self) -> &str {
        "*.txt"
    }

    fn initialize(&self) -> Result<(), PluginError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capability(&self) -> Capability<'_> {
        Capability::TransformFiles(self)
    }
}

// ============================================================================
// Excludes and Transforms
// ============================================================================

#[test]
fn test_child_transform_and_git_exclude() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[git]
ignore_git_folders = false

[runtime]
stage = false

[build]
exclude = ["**/.git/**"]

[build.textures.plugins."rpbuild-jsonminify-plugin"]
"#,
    );
    let json = create_source(temp.path(), "textures/a.json", br#"{ "a" : 1 }"#);
    create_source(temp.path(), ".git/config", b"[core]");
    create_source(temp.path(), "readme.txt", b"hello");

    let report = build(temp.path(), ctx);

    assert_eq!(fs::read_to_string(&json).unwrap(), r#"{"a":1}"#);
    let target = temp.path().join("build/pack.zip");
    let entries = zip_entries(&target);
    assert!(entries.contains(&"textures/a.json".to_string()));
    assert!(entries.contains(&"readme.txt".to_string()));
    assert!(!entries.iter().any(|e| e.starts_with(".git")));
    assert_eq!(zip_entry(&target, "textures/a.json"), r#"{"a":1}"#);
    assert_eq!(report.built_count(), 2);
    assert_eq!(report.files_written(), 1);
}

#[test]
fn test_staged_build_leaves_sources_alone() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[build.plugins."rpbuild-jsonminify-plugin"]
"#,
    );
    let json = create_source(temp.path(), "a.json", b"[ 1, 2 ]");
    create_source(temp.path(), ".git/HEAD", b"ref");

    build(temp.path(), ctx);

    assert_eq!(fs::read_to_string(&json).unwrap(), "[ 1, 2 ]");
    let target = temp.path().join("build/pack.zip");
    assert_eq!(zip_entries(&target), vec!["a.json"]);
    assert_eq!(zip_entry(&target, "a.json"), "[1,2]");
}

#[test]
fn test_unchanged_files_are_not_rewritten() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[runtime]
stage = false

[build.plugins."rpbuild-jsonminify-plugin"]
"#,
    );
    let json = create_source(temp.path(), "already.json", br#"{"a":[1,2]}"#);
    let old = SystemTime::now() - Duration::from_secs(3600);
    File::options().write(true).open(&json).unwrap().set_modified(old).unwrap();

    let report = build(temp.path(), ctx);

    assert_eq!(report.files_written(), 0);
    assert_eq!(fs::metadata(&json).unwrap().modified().unwrap(), old);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_generated_metadata_is_reproducible() {
    let config = r#"
[project]
name = "reproducible"
source = "src"
target = "out/pack.zip"

[build.plugins."rpbuild-packmcmeta-plugin"]
pack_format = 15
"#;
    let mut archives = Vec::new();
    let mut metadata = Vec::new();
    for _ in 0..2 {
        let (temp, ctx) = create_project(config);
        create_source(temp.path(), "assets/lang/en_us.json", b"{}");
        build(temp.path(), ctx);

        let target = temp.path().join("out/pack.zip");
        metadata.push(zip_entry(&target, "pack.mcmeta"));
        archives.push(fs::read(target).unwrap());
    }

    assert_eq!(metadata[0], metadata[1]);
    assert_eq!(archives[0], archives[1]);
    let value: serde_json::Value = serde_json::from_str(&metadata[0]).unwrap();
    assert_eq!(value["pack"]["pack_format"], 15);
    assert_eq!(value["pack"]["description"], "reproducible");
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[test]
fn test_failing_file_does_not_stop_the_phase() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[runtime]
stage = false
jobs = 2

[build.plugins.shout]
"#,
    );
    let names = ["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"];
    let paths: Vec<_> = names
        .iter()
        .map(|name| {
            let content = if *name == "3.txt" { "fail here" } else { "quiet" };
            create_source(temp.path(), name, content.as_bytes())
        })
        .collect();

    let report = pipeline(temp.path(), ctx).with_plugin(Arc::new(Shout::new())).run().unwrap();

    for (name, path) in names.iter().zip(&paths) {
        let content = fs::read_to_string(path).unwrap();
        if *name == "3.txt" {
            assert_eq!(content, "fail here");
        } else {
            assert_eq!(content, "QUIET");
        }
    }
    let shout = report.plugins.iter().find(|p| p.name == "shout").unwrap();
    assert_eq!(shout.invocations, 5);
    assert_eq!(shout.failures, 1);
    assert_eq!(report.plugin_failures(), 1);
    assert_eq!(report.files_written(), 4);
}

#[test]
fn test_disabled_binding_is_never_initialized() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[runtime]
stage = false

[build.plugins.shout]
disable = true
"#,
    );
    let file = create_source(temp.path(), "a.txt", b"quiet");
    let plugin = Shout::new();
    let initialized = Arc::clone(&plugin.initialized);

    let report = pipeline(temp.path(), ctx).with_plugin(Arc::new(plugin)).run().unwrap();

    assert_eq!(initialized.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read_to_string(file).unwrap(), "quiet");
    assert_eq!(report.resolve.registered, 1);
}

#[test]
fn test_unresolvable_plugin_fails_before_building() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[build.plugins."nowhere:2.0"]
"#,
    );
    create_source(temp.path(), "a.txt", b"a");

    let err = pipeline(temp.path(), ctx).run().unwrap_err();

    assert!(matches!(err, BuildError::Resolve(_)));
    assert!(err.to_string().contains("nowhere:2.0"));
    assert!(!temp.path().join("build/pack.zip").exists());
}

// ============================================================================
// Section Tree
// ============================================================================

#[test]
fn test_missing_section_directory_is_skipped() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[build.missing.deeper]

[build.present]
"#,
    );
    create_source(temp.path(), "present/a.txt", b"a");

    let report = build(temp.path(), ctx);

    assert_eq!(report.skipped_count(), 1);
    let skipped = report.sections.iter().find(|s| s.status == SectionStatus::Skipped).unwrap();
    assert_eq!(skipped.name, "missing");
    // children first, root last
    assert_eq!(report.sections.last().unwrap().name, "#global#");
    assert_eq!(zip_entries(&temp.path().join("build/pack.zip")), vec!["present/a.txt"]);
}

#[test]
fn test_child_excludes_do_not_leak_to_parent() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[build]
exclude = ["**/*.psd"]

[build.textures]
exclude = ["**/raw/**"]
"#,
    );
    create_source(temp.path(), "textures/raw/skin.png", b"png");
    create_source(temp.path(), "textures/skin.png", b"png");
    create_source(temp.path(), "textures/skin.psd", b"psd");
    create_source(temp.path(), "raw/keep.txt", b"keep");

    build(temp.path(), ctx);

    let mut entries = zip_entries(&temp.path().join("build/pack.zip"));
    entries.sort();
    assert_eq!(entries, vec!["raw/keep.txt", "textures/skin.png"]);
}

#[test]
fn test_generated_after_listing_is_archived() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[build.plugins."rpbuild-soundsjson-plugin"]
"#,
    );
    create_source(temp.path(), "assets/minecraft/sounds/mob/cow_say1.ogg", b"ogg");
    create_source(temp.path(), "assets/minecraft/sounds/mob/cow_say2.ogg", b"ogg");

    build(temp.path(), ctx);

    let target = temp.path().join("build/pack.zip");
    let sounds: serde_json::Value =
        serde_json::from_str(&zip_entry(&target, "assets/minecraft/sounds.json")).unwrap();
    assert_eq!(sounds["mob.cow"]["sounds"], serde_json::json!(["mob/cow_say1", "mob/cow_say2"]));
}

#[test]
fn test_missing_source_directory_is_fatal() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "nope"
target = "build/pack.zip"
"#,
    );
    let err = pipeline(temp.path(), ctx).run().unwrap_err();
    assert!(matches!(err, BuildError::SourceMissing(_)));
}

#[cfg(unix)]
#[test]
fn test_unreadable_section_subtree_is_fatal() {
    use std::os::unix::fs::PermissionsExt;

    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[runtime]
stage = false

[build.sec]
"#,
    );
    create_source(temp.path(), "sec/a.json", b"{}");
    create_source(temp.path(), "sec/locked/b.json", b"{}");
    let locked = temp.path().join("src/sec/locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // running as root, permissions are not enforced
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = pipeline(temp.path(), ctx).run();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(result, Err(BuildError::Discovery(_))));
    assert!(!temp.path().join("build/pack.zip").exists());
}

#[test]
fn test_downscale_failures_reach_plugin_stats() {
    let (temp, ctx) = create_project(
        r#"
[project]
name = "demo"
source = "src"
target = "build/pack.zip"

[runtime]
stage = false

[build.plugins.rpbuild-downscale-plugin]
maxResolution = 64
interpolation = "Bilinear"
"#,
    );
    let photo = create_source(temp.path(), "textures/sky/photo.jpg", b"");
    image::RgbImage::from_pixel(128, 64, image::Rgb([1, 2, 3])).save(&photo).unwrap();
    let broken = create_source(temp.path(), "textures/broken.png", b"not an image");

    let report = build(temp.path(), ctx);

    let resized = image::open(&photo).unwrap();
    assert_eq!((resized.width(), resized.height()), (64, 32));
    assert_eq!(fs::read(&broken).unwrap(), b"not an image");
    let stats = report.plugins.iter().find(|p| p.name == "rpbuild-downscale-plugin").unwrap();
    assert_eq!((stats.invocations, stats.failures), (1, 1));
}
