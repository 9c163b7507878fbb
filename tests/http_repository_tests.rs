//! HTTP repository protocol against a mock server.
//!
//! The repository uses a blocking client, so every call runs on a blocking
//! task while the mock server lives on the test runtime.

use std::fs;
use std::time::{Duration, UNIX_EPOCH};

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rpbuild::plugin::PluginVersion;
use rpbuild::repository::{HttpRepository, LocalRepository, RemoteRepository, RepositoryError};

const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

async fn blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

// ── Probing ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn head_200_reports_artifact_with_last_modified() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/repo/foo/1.0/foo.jar"))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", LAST_MODIFIED))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/repo/", server.uri());
    let artifact = blocking(move || {
        let repo = HttpRepository::new("mock", url).unwrap();
        repo.lookup(&PluginVersion::exact("foo", "1.0")).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(artifact.last_modified, Some(UNIX_EPOCH + Duration::from_secs(1_445_412_480)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unversioned_lookup_uses_flat_path() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/foo.jar"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let url = server.uri();
    let (found, last_modified) = blocking(move || {
        let repo = HttpRepository::new("mock", url).unwrap();
        let plugin = PluginVersion::any("foo");
        (repo.has_plugin(&plugin).unwrap(), repo.last_modified(&plugin).unwrap())
    })
    .await;

    assert!(found);
    assert_eq!(last_modified, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn head_404_means_absent() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = server.uri();
    let lookup = blocking(move || {
        HttpRepository::new("mock", url).unwrap().lookup(&PluginVersion::exact("foo", "1.0"))
    })
    .await;

    assert!(lookup.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = server.uri();
    let lookup = blocking(move || {
        HttpRepository::new("mock", url).unwrap().lookup(&PluginVersion::any("foo"))
    })
    .await;

    assert!(matches!(lookup, Err(RepositoryError::Status { status: 503, .. })));
}

// ── Downloading ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn get_downloads_into_cache_with_cache_buster() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foo/1.0/foo.jar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\n".to_vec()))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let root = cache.path().to_path_buf();
    let url = server.uri();
    let saved = blocking(move || {
        let repo = HttpRepository::new("mock", url).unwrap();
        repo.download_to(&PluginVersion::exact("foo", "1.0"), &LocalRepository::new(root))
    })
    .await
    .unwrap();

    assert_eq!(saved, cache.path().join("foo/1.0/foo.jar"));
    assert_eq!(fs::read(&saved).unwrap(), b"#!/bin/sh\n");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.query_pairs().any(|(key, value)| key == "random" && !value.is_empty()));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_leaves_cache_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let root = cache.path().to_path_buf();
    let url = server.uri();
    let result = blocking(move || {
        let local = LocalRepository::new(root);
        let plugin = PluginVersion::any("foo");
        let result = HttpRepository::new("mock", url).unwrap().download_to(&plugin, &local);
        (result, local.has_plugin(&plugin))
    })
    .await;

    assert!(matches!(result.0, Err(RepositoryError::Status { status: 404, .. })));
    assert!(!result.1);
}
