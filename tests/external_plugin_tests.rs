//! External plugins driven through child processes.
//!
//! Each test writes a small shell script into the local cache and lets the
//! pipeline load it like a downloaded artifact.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::TempDir;

use rpbuild::build::{BuildContext, BuildPipeline, BuildReport};
use rpbuild::config::parse_config;
use rpbuild::plugin::external::{PluginLoader, ProcessPlugin, ProcessPluginLoader};
use rpbuild::plugin::{PluginError, PluginKind, PluginVersion};
use rpbuild::repository::LocalRepository;

const DESCRIBE_GEN: &str = concat!(
    r#"{"success":true,"descriptor":{"name":"shell-gen","author":"tests","#,
    r#""version":"1.0","kind":"generate_before_list"}}"#
);
const DESCRIBE_UPPER: &str = concat!(
    r#"{"success":true,"descriptor":{"name":"shell-upper","author":"tests","#,
    r#""version":"1.0","kind":"transform_files"},"glob":"*.txt"}"#
);

/// A plugin script answering `describe` and `initialize`, plus one extra arm.
fn script(describe: &str, operation: &str, body: &str) -> String {
    format!(
        "#!/bin/sh\ncat > /dev/null\ncase \"$1\" in\n  describe) echo '{describe}' ;;\n  \
         initialize) echo '{{\"success\":true}}' ;;\n  {operation}) {body} ;;\n  \
         *) echo '{{\"success\":false,\"message\":\"unsupported\"}}' ;;\nesac\n"
    )
}

fn install(cache: &Path, plugin: &str, content: &str) {
    let plugin: PluginVersion = plugin.parse().unwrap();
    LocalRepository::new(cache).save(&plugin, &mut content.as_bytes()).unwrap();
}

fn run_build(temp: &TempDir, config: &str) -> BuildReport {
    let config = parse_config(config).unwrap();
    let ctx = BuildContext::new(config, temp.path().to_path_buf());
    BuildPipeline::new(ctx)
        .with_remotes(Vec::new())
        .with_local_repository(LocalRepository::new(temp.path().join("cache")))
        .run()
        .unwrap()
}

fn write_source(temp: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = temp.path().join("src").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_cached_generator_contributes_files() {
    let temp = TempDir::new().unwrap();
    let generate = concat!(
        r#"echo '{"success":true,"#,
        r#""files":[{"name":"credits.txt","content":"bWFkZSBieSBzaA=="}]}'"#
    );
    install(
        &temp.path().join("cache"),
        "shell-gen:1.0",
        &script(DESCRIBE_GEN, "generate", generate),
    );
    write_source(&temp, "a.txt", "a");

    let report = run_build(
        &temp,
        r#"
[project]
name = "ext"
source = "src"
target = "out/pack.zip"

[runtime]
stage = false

[build.plugins."shell-gen:1.0"]
"#,
    );

    assert_eq!(report.resolve.cached, 1);
    assert_eq!(fs::read_to_string(temp.path().join("src/credits.txt")).unwrap(), "made by sh");
    let stats = report.plugins.iter().find(|p| p.name == "shell-gen").unwrap();
    assert_eq!((stats.invocations, stats.failures), (1, 0));
}

#[test]
#[serial]
fn test_external_transform_rewrites_matching_files() {
    let temp = TempDir::new().unwrap();
    let transform = r#"echo '{"success":true,"files":[{"name":"x","content":"SEVMTE8="}]}'"#;
    install(
        &temp.path().join("cache"),
        "shell-upper",
        &script(DESCRIBE_UPPER, "transform", transform),
    );
    let text = write_source(&temp, "a.txt", "hello");
    let json = write_source(&temp, "b.json", "{}");

    let report = run_build(
        &temp,
        r#"
[project]
name = "ext"
source = "src"
target = "out/pack.zip"

[runtime]
stage = false

[build.plugins.shell-upper]
"#,
    );

    assert_eq!(fs::read_to_string(text).unwrap(), "HELLO");
    assert_eq!(fs::read_to_string(json).unwrap(), "{}");
    assert_eq!(report.files_written(), 1);
}

#[test]
#[serial]
fn test_reported_error_leaves_file_untouched() {
    let temp = TempDir::new().unwrap();
    let transform = r#"echo '{"success":false,"message":"cannot read"}'"#;
    install(
        &temp.path().join("cache"),
        "shell-upper",
        &script(DESCRIBE_UPPER, "transform", transform),
    );
    let text = write_source(&temp, "a.txt", "hello");

    let report = run_build(
        &temp,
        r#"
[project]
name = "ext"
source = "src"
target = "out/pack.zip"

[runtime]
stage = false

[build.plugins.shell-upper]
"#,
    );

    assert_eq!(fs::read_to_string(text).unwrap(), "hello");
    assert_eq!(report.plugin_failures(), 1);
}

#[test]
#[serial]
fn test_slow_plugin_times_out() {
    let temp = TempDir::new().unwrap();
    let transform = "sleep 5; echo '{\"success\":true}'";
    install(
        &temp.path().join("cache"),
        "shell-upper",
        &script(DESCRIBE_UPPER, "transform", transform),
    );
    let text = write_source(&temp, "a.txt", "hello");

    let report = run_build(
        &temp,
        r#"
[project]
name = "ext"
source = "src"
target = "out/pack.zip"

[runtime]
stage = false
plugin_timeout_secs = 1

[build.plugins.shell-upper]
"#,
    );

    assert_eq!(fs::read_to_string(text).unwrap(), "hello");
    assert_eq!(report.plugin_failures(), 1);
}

#[test]
#[serial]
fn test_timeout_covers_plugin_ignoring_stdin() {
    let temp = TempDir::new().unwrap();
    // transform never reads its request, so a large payload fills the pipe
    let plugin = format!(
        "#!/bin/sh\nif [ \"$1\" = transform ]; then sleep 30; exit 0; fi\ncat > /dev/null\n\
         case \"$1\" in\n  describe) echo '{DESCRIBE_UPPER}' ;;\n  \
         *) echo '{{\"success\":true}}' ;;\nesac\n"
    );
    install(&temp.path().join("cache"), "shell-upper", &plugin);
    let large = "x".repeat(1024 * 1024);
    let text = write_source(&temp, "big.txt", &large);

    let start = Instant::now();
    let report = run_build(
        &temp,
        r#"
[project]
name = "ext"
source = "src"
target = "out/pack.zip"

[runtime]
stage = false
plugin_timeout_secs = 1

[build.plugins.shell-upper]
"#,
    );

    assert!(start.elapsed() < Duration::from_secs(10), "took {:?}", start.elapsed());
    assert_eq!(report.plugin_failures(), 1);
    assert_eq!(fs::read_to_string(text).unwrap().len(), large.len());
}

#[test]
#[serial]
fn test_loader_reads_descriptor_and_glob() {
    let temp = TempDir::new().unwrap();
    install(temp.path(), "shell-upper", &script(DESCRIBE_UPPER, "transform", "true"));
    let artifact = LocalRepository::new(temp.path()).artifact_path(&"shell-upper".parse().unwrap());

    let plugin = ProcessPluginLoader::default().load(&artifact).unwrap();

    assert_eq!(plugin.descriptor().name, "shell-upper");
    assert_eq!(plugin.descriptor().kind, PluginKind::TransformFiles);
    assert_eq!(plugin.glob_pattern(), "*.txt");
    assert_eq!(plugin.capability().kind(), PluginKind::TransformFiles);
}

#[test]
#[serial]
fn test_garbage_describe_is_rejected() {
    let temp = TempDir::new().unwrap();
    install(temp.path(), "noise", "#!/bin/sh\ncat > /dev/null\necho 'not json'\n");
    let artifact = LocalRepository::new(temp.path()).artifact_path(&PluginVersion::any("noise"));

    let err = ProcessPlugin::describe(&artifact, 5).unwrap_err();
    assert!(matches!(err, PluginError::InvalidOutput { .. }));
}
