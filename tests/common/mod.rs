/// Common test utilities and helpers for releasewatch tests
use releasewatch::{Config, Tracker};
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Temporary database plus a mock GitHub API
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub server: MockServer,
    pub config: Config,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let server = MockServer::start().await;

        let mut config = Config::default();
        config.github.auth_method = "anonymous".to_string();
        config.github.api_url = Some(server.uri());
        config.github.timeout = 5;
        config.database.path = temp_dir
            .path()
            .join("data")
            .join("releases.db")
            .display()
            .to_string();

        Self {
            temp_dir,
            server,
            config,
        }
    }

    pub fn tracker(&self) -> Tracker {
        Tracker::from_config(&self.config).expect("Failed to build tracker")
    }

    /// Save the configuration for CLI runs
    pub fn write_config(&self) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.yml");
        self.config
            .save(&config_path)
            .expect("Failed to write test config");
        config_path
    }

    pub async fn mount_repository(&self, id: i64, full_name: &str, description: &str) {
        let (owner, name) = full_name.split_once('/').expect("owner/name");
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}", full_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "name": name,
                "full_name": full_name,
                "owner": { "login": owner, "id": 1 },
                "description": description,
                "archived": false,
                "html_url": format!("https://github.com/{}", full_name),
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_releases(&self, full_name: &str, page: u32, releases: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/releases", full_name)))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(releases)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_error(&self, route: &str, status: u16, message: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "message": message,
                "documentation_url": "https://docs.github.com/rest",
            })))
            .mount(&self.server)
            .await;
    }
}

/// Release payload as returned by the GitHub releases endpoint
pub fn release_json(id: i64, tag: &str, published_at: &str) -> Value {
    json!({
        "id": id,
        "tag_name": tag,
        "name": format!("Release {}", tag),
        "body": format!("Changes in {}", tag),
        "html_url": format!("https://github.com/acme/widgets/releases/tag/{}", tag),
        "tarball_url": format!("https://api.github.com/repos/acme/widgets/tarball/{}", tag),
        "zipball_url": format!("https://api.github.com/repos/acme/widgets/zipball/{}", tag),
        "draft": false,
        "prerelease": false,
        "created_at": published_at,
        "published_at": published_at,
    })
}
