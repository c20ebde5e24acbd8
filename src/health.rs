//! System health checks for releasewatch
//!
//! Preflight checks run by `releasewatch doctor` to verify that the
//! configuration, the release database and GitHub access are usable.

use std::path::Path;

use crate::github::AuthStrategy;
use crate::store::Store;
use crate::{Config, GitHubClient};

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Configuration file status
    pub config_file: CheckResult,
    /// Release database status
    pub database: CheckResult,
    /// GitHub authentication status (anonymous access is a warning)
    pub github_auth: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config, config_path: &Path) -> Self {
        Self {
            config_file: Self::check_config_file(config_path),
            database: Self::check_database(config),
            github_auth: Self::check_github_auth(config).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.config_file.passed && self.database.passed && self.github_auth.passed
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.config_file, &self.database, &self.github_auth]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.config_file, &self.database, &self.github_auth]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_config_file(path: &Path) -> CheckResult {
        if !path.exists() {
            return CheckResult::warning_with_details(
                "Configuration file not found, using defaults",
                "Run: releasewatch init",
            );
        }

        match Config::load(path) {
            Ok(_) => CheckResult::ok_with_details("Configuration valid", path.display().to_string()),
            Err(e) => CheckResult::error_with_details("Configuration invalid", format!("{:#}", e)),
        }
    }

    /// Open the database and count what it holds
    fn check_database(config: &Config) -> CheckResult {
        let path = config.database_path();

        let store = match Store::open(&path) {
            Ok(store) => store,
            Err(e) => {
                return CheckResult::error_with_details(
                    "Release database unavailable",
                    format!("{}: {:#}", path.display(), e),
                )
            }
        };

        match store.read(|tx| tx.list_repositories()) {
            Ok(repositories) => CheckResult::ok_with_details(
                "Release database readable",
                format!("{} ({} repositories)", path.display(), repositories.len()),
            ),
            Err(e) => CheckResult::error_with_details(
                "Release database unreadable",
                format!("{}: {}", path.display(), e),
            ),
        }
    }

    /// Check GitHub authentication
    async fn check_github_auth(config: &Config) -> CheckResult {
        let client = match GitHubClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::error_with_details(
                    "GitHub client setup failed",
                    format!("{:#}\nRun: gh auth login", e),
                )
            }
        };

        if *client.strategy() == AuthStrategy::Anonymous {
            return CheckResult::warning_with_details(
                "Using anonymous GitHub access",
                "Rate limit is 60 requests per hour. Run: gh auth login",
            );
        }

        match client.authenticated_login().await {
            Ok(login) => CheckResult::ok_with_details(
                "GitHub authentication successful",
                format!(
                    "Username: {} ({:?})",
                    login.unwrap_or_default(),
                    client.strategy()
                ),
            ),
            Err(e) => CheckResult::error_with_details(
                "GitHub authentication failed",
                format!("{:#}\nRun: gh auth login", e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Configuration", &self.config_file),
            ("Release Database", &self.database),
            ("GitHub Authentication", &self.github_auth),
        ]
    }
}
