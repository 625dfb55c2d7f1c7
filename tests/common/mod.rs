//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use torrent_shuttle::Config;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A config whose tiers live in a temp directory and whose qBittorrent
/// endpoint points at a wiremock server.
pub fn test_config(tmp: &TempDir, qbit: &MockServer) -> Config {
    let mut config = Config::default();
    config.paths.cache_root = tmp.path().join("cache");
    config.paths.bulk_root = tmp.path().join("bulk");
    config.paths.state_dir = tmp.path().join("state");
    std::fs::create_dir_all(&config.paths.cache_root).unwrap();
    std::fs::create_dir_all(&config.paths.bulk_root).unwrap();

    let url = reqwest::Url::parse(&qbit.uri()).unwrap();
    config.qbit.host = url.host_str().unwrap().to_string();
    config.qbit.port = url.port().unwrap();
    config
}

/// Session endpoints every worker touches: liveness probe and login.
pub async fn mount_session(server: &MockServer) {
    Mock::given(method("GET"))
        .and(url_path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.3"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(url_path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(url_path("/api/v2/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Accept every mutating torrent command.
pub async fn mount_commands(server: &MockServer) {
    for endpoint in [
        "torrents/pause",
        "torrents/resume",
        "torrents/setLocation",
        "torrents/addTags",
        "torrents/removeTags",
    ] {
        Mock::given(method("POST"))
            .and(url_path(format!("/api/v2/{endpoint}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }
}

/// One `torrents/info` wire object.
pub fn torrent_json(
    hash: &str,
    name: &str,
    content_path: &Path,
    category: &str,
    tags: &str,
    state: &str,
    size: i64,
    completion_on: i64,
) -> serde_json::Value {
    serde_json::json!({
        "hash": hash,
        "name": name,
        "content_path": content_path.to_str().unwrap(),
        "save_path": content_path.parent().unwrap().to_str().unwrap(),
        "size": size,
        "category": category,
        "tags": tags,
        "state": state,
        "completion_on": completion_on
    })
}

pub fn write_file(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Poll until the orchestrator has no queued or running torrent work.
pub async fn wait_for_idle(orchestrator: &torrent_shuttle::Orchestrator, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = orchestrator.status();
        if status.processing.queued == 0
            && status.processing.running == 0
            && status.copy.queued == 0
            && status.copy.running == 0
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "orchestrator did not go idle: {:?} queued, {:?} running",
            status.processing.queued,
            status.processing.running
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
