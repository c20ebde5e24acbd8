use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::process::Command;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{TrackerError, TrackerResult};
use crate::model::ReleaseMetadata;
use crate::source::{ReleaseSource, RemoteRelease, RemoteRepository, RepositoryRef};

/// GitHub client wrapper with authentication management
pub struct GitHubClient {
    client: Octocrab,
    strategy: AuthStrategy,
    timeout: Duration,
    per_page: u8,
    max_pages: u32,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
    /// Unauthenticated requests (low rate limit, public repositories only)
    Anonymous,
}

/// Subset of the repository payload we persist
#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    id: i64,
    name: String,
    full_name: String,
    owner: OwnerPayload,
    description: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    id: i64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    html_url: String,
    tarball_url: Option<String>,
    zipball_url: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    created_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

impl From<RepositoryPayload> for RemoteRepository {
    fn from(payload: RepositoryPayload) -> Self {
        RemoteRepository {
            external_id: payload.id,
            owner: payload.owner.login,
            name: payload.name,
            full_name: payload.full_name,
            description: payload.description,
            archived: payload.archived,
        }
    }
}

impl ReleasePayload {
    fn into_remote(self) -> Option<RemoteRelease> {
        // published_at is null for drafts; created_at is always present
        let release_time = self.published_at.or(self.created_at)?;
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.tag_name.clone());

        Some(RemoteRelease {
            external_id: self.id,
            version: self.tag_name,
            name,
            description: self.body.filter(|b| !b.is_empty()),
            release_time,
            metadata: ReleaseMetadata {
                html_url: self.html_url,
                tarball_url: self.tarball_url,
                zipball_url: self.zipball_url,
                draft: self.draft,
                prerelease: self.prerelease,
            },
        })
    }
}

impl GitHubClient {
    /// Create a new GitHub client with automatic authentication
    pub fn new(config: &Config) -> Result<Self> {
        let (strategy, token) = Self::detect_authentication(config)?;

        info!("Using authentication strategy: {:?}", strategy);

        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        if let Some(api_url) = &config.github.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .with_context(|| format!("Invalid GitHub API url: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self {
            client,
            strategy,
            timeout: Duration::from_secs(config.github.timeout),
            per_page: config.github.per_page.clamp(1, 100),
            max_pages: config.github.max_pages.max(1),
        })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, Option<String>)> {
        match config.github.auth_method.as_str() {
            "auto" => {
                // Try GitHub CLI first, then environment token
                if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, Some(token)))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, Some(token)))
                } else {
                    warn!(
                        "No GitHub authentication found, falling back to anonymous access. \
                         Run `gh auth login` or set GITHUB_TOKEN for higher rate limits."
                    );
                    Ok((AuthStrategy::Anonymous, None))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, Some(token)))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, Some(token)))
            }
            "anonymous" => Ok((AuthStrategy::Anonymous, None)),
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to run GitHub CLI (is gh installed?)")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !["ghp_", "gho_", "ghs_", "github_pat_"]
            .iter()
            .any(|prefix| token.starts_with(prefix))
        {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token (should start with ghp_, gho_, ghs_ or github_pat_)");
        }

        debug!("Successfully found GITHUB_TOKEN environment variable");
        Ok(token)
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Login of the authenticated user, `None` for anonymous access
    pub async fn authenticated_login(&self) -> Result<Option<String>> {
        if self.strategy == AuthStrategy::Anonymous {
            return Ok(None);
        }

        let user = timeout(self.timeout, self.client.current().user())
            .await
            .map_err(|_| anyhow!("Timed out after {}s", self.timeout.as_secs()))?
            .context("Failed to get current user information. Check your authentication.")?;

        Ok(Some(user.login))
    }

    /// Run a request under the configured timeout and translate failures
    async fn bounded<T, F>(&self, repo: &RepositoryRef, target: &str, request: F) -> TrackerResult<T>
    where
        F: Future<Output = octocrab::Result<T>>,
    {
        match timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(octocrab::Error::GitHub { source, .. })) if source.status_code.as_u16() == 404 => {
                Err(TrackerError::RemoteNotFound(repo.full_name()))
            }
            Ok(Err(e)) => Err(TrackerError::remote_fetch(target, e)),
            Err(_) => Err(TrackerError::remote_fetch(
                target,
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl ReleaseSource for GitHubClient {
    async fn fetch_repository(&self, repo: &RepositoryRef) -> TrackerResult<RemoteRepository> {
        debug!("Fetching repository metadata for {}", repo);

        let route = format!("/repos/{}/{}", repo.owner, repo.name);
        let payload: RepositoryPayload = self
            .bounded(
                repo,
                &format!("repository {}", repo),
                self.client.get(route, None::<&()>),
            )
            .await?;

        Ok(payload.into())
    }

    async fn fetch_releases(&self, repo: &RepositoryRef) -> TrackerResult<Vec<RemoteRelease>> {
        debug!("Fetching releases for {}", repo);

        let route = format!("/repos/{}/{}/releases", repo.owner, repo.name);
        let mut releases = Vec::new();
        let mut page = 1u32;

        loop {
            let params = PageParams {
                per_page: self.per_page,
                page,
            };
            let items: Vec<ReleasePayload> = self
                .bounded(
                    repo,
                    &format!("releases of {} (page {})", repo, page),
                    self.client.get(&route, Some(&params)),
                )
                .await?;

            // Past the limit only an empty page proves the listing is complete;
            // a truncated list must never be returned.
            if page > self.max_pages {
                if items.is_empty() {
                    break;
                }
                warn!("Reached maximum pagination limit ({} pages) for {}", self.max_pages, repo);
                return Err(TrackerError::remote_fetch(
                    format!("releases of {}", repo),
                    format!(
                        "more than {} releases; raise github.max_pages",
                        self.max_pages as usize * self.per_page as usize
                    ),
                ));
            }

            let count = items.len();
            for item in items {
                let id = item.id;
                let remote = item.into_remote().ok_or_else(|| {
                    TrackerError::remote_fetch(
                        format!("releases of {}", repo),
                        format!("release {} has no timestamp", id),
                    )
                })?;
                releases.push(remote);
            }

            if count < self.per_page as usize {
                break;
            }
            page += 1;
        }

        info!("Found {} releases for {}", releases.len(), repo);
        Ok(releases)
    }

    fn source_name(&self) -> &'static str {
        "GitHub"
    }
}
