mod common;

use assert_matches::assert_matches;
use common::{release_json, TestEnvironment};
use releasewatch::{ListQuery, ReleaseFilter, SortKey, TrackerError};
use serde_json::json;
use std::process::Command;

/// Integration tests for the GitHub adapter and tracker against a mock API,
/// plus CLI runs of the built binary

#[tokio::test]
async fn test_add_repository_through_github_api() {
    let env = TestEnvironment::new().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(2, "v2.0.0", "2024-03-01T12:00:00Z"),
            release_json(1, "v1.0.0", "2024-01-01T12:00:00Z"),
        ],
    )
    .await;

    let tracker = env.tracker();
    let tracked = tracker
        .add_repository("https://github.com/acme/widgets")
        .await
        .expect("Failed to add repository");

    assert_eq!(tracked.repository.external_id, 42);
    assert_eq!(tracked.repository.full_name, "acme/widgets");
    assert_eq!(tracked.repository.description.as_deref(), Some("Widget factory"));
    assert_eq!(tracked.releases.len(), 2);
    assert!(tracked.has_new_release());

    let latest = tracked.latest_release().unwrap();
    assert_eq!(latest.version, "v2.0.0");
    assert_eq!(latest.name, "Release v2.0.0");
    assert_eq!(
        latest.metadata.html_url,
        "https://github.com/acme/widgets/releases/tag/v2.0.0"
    );
}

#[tokio::test]
async fn test_draft_release_uses_created_at_and_tag_name() {
    let env = TestEnvironment::new().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![json!({
            "id": 9,
            "tag_name": "v3.0.0-rc1",
            "name": "",
            "body": "",
            "html_url": "https://github.com/acme/widgets/releases/tag/v3.0.0-rc1",
            "tarball_url": null,
            "zipball_url": null,
            "draft": true,
            "prerelease": true,
            "created_at": "2024-05-01T00:00:00Z",
            "published_at": null,
        })],
    )
    .await;

    let tracked = env.tracker().add_repository("acme/widgets").await.unwrap();
    let release = &tracked.releases[0];

    assert_eq!(release.name, "v3.0.0-rc1");
    assert!(release.description.is_none());
    assert!(release.metadata.draft);
    assert!(release.metadata.prerelease);
    assert_eq!(release.release_time.to_rfc3339(), "2024-05-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_release_pagination() {
    let mut env = TestEnvironment::new().await;
    env.config.github.per_page = 2;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(3, "v3", "2024-03-01T00:00:00Z"),
            release_json(2, "v2", "2024-02-01T00:00:00Z"),
        ],
    )
    .await;
    env.mount_releases(
        "acme/widgets",
        2,
        vec![release_json(1, "v1", "2024-01-01T00:00:00Z")],
    )
    .await;

    let tracked = env.tracker().add_repository("acme/widgets").await.unwrap();
    assert_eq!(tracked.releases.len(), 3);
}

#[tokio::test]
async fn test_release_page_limit_with_complete_listing() {
    let mut env = TestEnvironment::new().await;
    env.config.github.per_page = 2;
    env.config.github.max_pages = 1;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(2, "v2", "2024-02-01T00:00:00Z"),
            release_json(1, "v1", "2024-01-01T00:00:00Z"),
        ],
    )
    .await;
    env.mount_releases("acme/widgets", 2, vec![]).await;

    let tracked = env.tracker().add_repository("acme/widgets").await.unwrap();
    assert_eq!(tracked.releases.len(), 2);
}

#[tokio::test]
async fn test_release_page_limit_exceeded_keeps_existing_releases() {
    let mut env = TestEnvironment::new().await;
    env.config.github.per_page = 2;
    env.config.github.max_pages = 1;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(2, "v2", "2024-02-01T00:00:00Z"),
            release_json(1, "v1", "2024-01-01T00:00:00Z"),
        ],
    )
    .await;
    env.mount_releases("acme/widgets", 2, vec![]).await;

    let tracker = env.tracker();
    let added = tracker.add_repository("acme/widgets").await.unwrap();
    let v1 = added.releases.iter().find(|r| r.version == "v1").unwrap().id;
    tracker.mark_release_seen(v1, true).await.unwrap();
    let before = tracker.get_repository(added.repository.id).unwrap().unwrap();

    // v3 published: v1 moves past the page limit but still exists upstream
    env.server.reset().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(3, "v3", "2024-03-01T00:00:00Z"),
            release_json(2, "v2", "2024-02-01T00:00:00Z"),
        ],
    )
    .await;
    env.mount_releases(
        "acme/widgets",
        2,
        vec![release_json(1, "v1", "2024-01-01T00:00:00Z")],
    )
    .await;

    let result = tracker.refresh_repository(added.repository.id).await;
    assert_matches!(result, Err(TrackerError::RemoteFetch { .. }));

    let after = tracker.get_repository(added.repository.id).unwrap().unwrap();
    assert_eq!(after, before);
    assert!(tracker.get_release(v1).unwrap().unwrap().seen);
}

#[tokio::test]
async fn test_unknown_repository_is_not_persisted() {
    let env = TestEnvironment::new().await;
    env.mount_error("/repos/acme/missing", 404, "Not Found").await;

    let tracker = env.tracker();
    let result = tracker.add_repository("acme/missing").await;

    assert_matches!(result, Err(TrackerError::RemoteNotFound(name)) if name == "acme/missing");
    assert!(tracker.list_repositories(&ListQuery::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_server_error_during_refresh_keeps_state() {
    let env = TestEnvironment::new().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![release_json(1, "v1", "2024-01-01T00:00:00Z")],
    )
    .await;

    let tracker = env.tracker();
    let added = tracker.add_repository("acme/widgets").await.unwrap();

    env.server.reset().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_error("/repos/acme/widgets/releases", 500, "Server Error")
        .await;

    let result = tracker.refresh_repository(added.repository.id).await;
    assert_matches!(result, Err(TrackerError::RemoteFetch { .. }));

    let after = tracker.get_repository(added.repository.id).unwrap().unwrap();
    assert_eq!(after, added);
}

#[tokio::test]
async fn test_refresh_mirrors_remote_changes() {
    let env = TestEnvironment::new().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![
            release_json(2, "v2", "2024-02-01T00:00:00Z"),
            release_json(1, "v1", "2024-01-01T00:00:00Z"),
        ],
    )
    .await;

    let tracker = env.tracker();
    let added = tracker.add_repository("acme/widgets").await.unwrap();
    let v2 = added.releases.iter().find(|r| r.version == "v2").unwrap().id;
    tracker.mark_release_seen(v2, true).await.unwrap();

    // v1 deleted upstream, v2 edited, v3 published
    let mut edited = release_json(2, "v2", "2024-02-01T00:00:00Z");
    edited["body"] = json!("Edited changelog");
    env.server.reset().await;
    env.mount_repository(42, "acme/widgets", "Widget factory, now archived")
        .await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![release_json(3, "v3", "2024-03-01T00:00:00Z"), edited],
    )
    .await;

    let outcome = tracker.refresh_repository(added.repository.id).await.unwrap();
    assert_eq!(outcome.counts.created, 1);
    assert_eq!(outcome.counts.updated, 1);
    assert_eq!(outcome.counts.deleted, 1);

    let repository = outcome.repository;
    assert_eq!(
        repository.repository.description.as_deref(),
        Some("Widget factory, now archived")
    );

    let v2_after = tracker.get_release(v2).unwrap().unwrap();
    assert!(v2_after.seen);
    assert_eq!(v2_after.description.as_deref(), Some("Edited changelog"));
    assert_eq!(repository.latest_release().unwrap().version, "v3");
    assert!(repository.has_new_release());

    // Nothing changes on a second pass
    let again = tracker.refresh_repository(added.repository.id).await.unwrap();
    assert!(again.counts.is_noop());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let env = TestEnvironment::new().await;
    env.mount_repository(42, "acme/widgets", "Widget factory").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![release_json(1, "v1", "2024-01-01T00:00:00Z")],
    )
    .await;

    let id = {
        let tracker = env.tracker();
        let added = tracker.add_repository("acme/widgets").await.unwrap();
        tracker
            .mark_all_seen(added.repository.id, true)
            .await
            .unwrap();
        added.repository.id
    };

    let tracker = env.tracker();
    let reopened = tracker.get_repository(id).unwrap().unwrap();
    assert_eq!(reopened.repository.full_name, "acme/widgets");
    assert_eq!(reopened.unseen_count(), 0);

    let seen = ListQuery {
        filter: ReleaseFilter::Seen,
        sort: SortKey::Name,
        ..ListQuery::default()
    };
    assert_eq!(tracker.list_repositories(&seen).unwrap().len(), 1);

    assert_matches!(
        tracker.add_repository("git@github.com:acme/widgets.git").await,
        Err(TrackerError::AlreadyTracked { .. })
    );
}

#[tokio::test]
async fn test_refresh_all_reports_each_repository() {
    let env = TestEnvironment::new().await;
    env.mount_repository(1, "acme/widgets", "Widgets").await;
    env.mount_repository(2, "acme/gadgets", "Gadgets").await;
    env.mount_releases("acme/widgets", 1, vec![]).await;
    env.mount_releases("acme/gadgets", 1, vec![]).await;

    let tracker = env.tracker();
    tracker.add_repository("acme/widgets").await.unwrap();
    tracker.add_repository("acme/gadgets").await.unwrap();

    env.server.reset().await;
    env.mount_repository(1, "acme/widgets", "Widgets").await;
    env.mount_releases(
        "acme/widgets",
        1,
        vec![release_json(10, "v1", "2024-01-01T00:00:00Z")],
    )
    .await;
    env.mount_error("/repos/acme/gadgets", 404, "Not Found").await;
    env.mount_error("/repos/acme/gadgets/releases", 404, "Not Found")
        .await;

    let summary = tracker.refresh_all().await.unwrap();
    assert_eq!(summary.total_repositories, 2);
    assert_eq!(summary.refreshed.len(), 1);
    assert_eq!(summary.counts.created, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].full_name, "acme/gadgets");
    assert_matches!(summary.failed[0].error, TrackerError::RemoteNotFound(_));
}

// =========================================================================
// CLI
// =========================================================================

fn releasewatch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_releasewatch"))
}

#[test]
fn test_cli_help() {
    let output = releasewatch()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    for command in ["add", "refresh", "list", "show", "seen", "seen-all", "remove", "init", "doctor"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = releasewatch()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("releasewatch"));
}

#[tokio::test]
async fn test_cli_list_empty_database() {
    let env = TestEnvironment::new().await;
    let config_path = env.write_config();

    let output = releasewatch()
        .arg("--config")
        .arg(&config_path)
        .arg("list")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Repositories (0)"));
}

#[tokio::test]
async fn test_cli_unknown_repository_id_fails() {
    let env = TestEnvironment::new().await;
    let config_path = env.write_config();

    let output = releasewatch()
        .arg("--config")
        .arg(&config_path)
        .args(["remove", "00000000-0000-4000-8000-000000000000"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Repository not found"));
}

#[test]
fn test_cli_rejects_malformed_id() {
    let output = releasewatch()
        .args(["seen", "not-a-uuid"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}

#[test]
fn test_cli_refresh_requires_target() {
    let output = releasewatch()
        .arg("refresh")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}

#[test]
fn test_cli_invalid_config_fails() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    std::fs::write(&config_path, "sync: [not, a, map").unwrap();

    let output = releasewatch()
        .arg("--config")
        .arg(&config_path)
        .arg("list")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_cli_init_writes_config() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config_path = temp_dir.path().join("releasewatch").join("config.yml");

    let output = releasewatch()
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .env("XDG_DATA_HOME", temp_dir.path().join("data"))
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(config_path.exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("initialized"));
}
