use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use releasewatch::health::CheckResult;
use releasewatch::{
    Config, HealthCheck, ListQuery, Release, ReleaseFilter, ReleaseId, RepositoryId, SortKey,
    TrackedRepository, Tracker,
};

#[derive(Parser)]
#[command(name = "releasewatch")]
#[command(about = "Track GitHub releases of the repositories you care about")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching a repository (URL or owner/name)
    Add {
        /// e.g. https://github.com/tokio-rs/tokio or tokio-rs/tokio
        url: String,
    },

    /// Fetch the current releases of one or all repositories
    Refresh {
        /// Repository id as shown by `list`
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<RepositoryId>,

        /// Refresh every watched repository
        #[arg(long)]
        all: bool,
    },

    /// List watched repositories
    List {
        /// Show repository details
        #[arg(long)]
        details: bool,

        /// Filter by the seen state of the latest release (all, seen, unseen)
        #[arg(long, default_value = "all")]
        filter: ReleaseFilter,

        /// Case-insensitive match on name or description
        #[arg(long)]
        search: Option<String>,

        /// Sort key (updated, name, latest, status)
        #[arg(long, default_value = "updated")]
        sort: SortKey,

        /// Reverse the sort order
        #[arg(long)]
        reverse: bool,
    },

    /// Show a repository with all of its releases
    Show { id: RepositoryId },

    /// Mark a release as seen
    Seen {
        release_id: ReleaseId,

        /// Mark as unseen instead
        #[arg(long)]
        unseen: bool,
    },

    /// Mark every release of a repository as seen
    SeenAll {
        id: RepositoryId,

        /// Mark as unseen instead
        #[arg(long)]
        unseen: bool,
    },

    /// Stop watching a repository and forget its releases
    Remove { id: RepositoryId },

    /// Write the default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `init` writes the configuration itself
    let create_default = !matches!(cli.command, Commands::Init { .. });
    let config = load_config(cli.config.clone(), create_default)?;

    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting releasewatch v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Add { url } => cmd_add(&url, &config).await,
        Commands::Refresh { id, all } => cmd_refresh(id, all, &config).await,
        Commands::List {
            details,
            filter,
            search,
            sort,
            reverse,
        } => {
            let query = ListQuery {
                filter,
                search,
                sort,
                reverse,
            };
            cmd_list(&query, details, &config)
        }
        Commands::Show { id } => cmd_show(id, &config),
        Commands::Seen { release_id, unseen } => cmd_seen(release_id, !unseen, &config).await,
        Commands::SeenAll { id, unseen } => cmd_seen_all(id, !unseen, &config).await,
        Commands::Remove { id } => cmd_remove(id, &config).await,
        Commands::Init { force } => cmd_init(cli.config, force, &config),
        Commands::Doctor => cmd_doctor(cli.config, &config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>, create_default: bool) -> Result<Config> {
    match config_path {
        Some(path) if create_default || path.exists() => Config::load(&path),
        Some(_) => Ok(Config::default()),
        None if create_default => Config::load_or_default(),
        None => {
            let path = Config::default_config_path()?;
            if path.exists() {
                Config::load(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn cmd_add(url: &str, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;

    println!("🔍 Looking up {}...", url);
    let tracked = tracker.add_repository(url).await?;

    println!("✅ Now watching {}", tracked.repository.full_name);
    println!("   🆔 {}", tracked.repository.id);
    println!("   📦 Releases imported: {}", tracked.releases.len());
    if let Some(latest) = tracked.latest_release() {
        println!(
            "   🏷️  Latest: {} ({})",
            latest.version,
            latest.release_time.format("%Y-%m-%d")
        );
    }

    Ok(())
}

async fn cmd_refresh(id: Option<RepositoryId>, all: bool, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;

    if let (Some(id), false) = (id, all) {
        let outcome = tracker.refresh_repository(id).await?;
        let counts = outcome.counts;

        println!("🔄 Refreshed {}", outcome.repository.repository.full_name);
        println!("   📥 New: {}", counts.created);
        println!("   ✏️  Updated: {}", counts.updated);
        println!("   🗑️  Removed: {}", counts.deleted);
        println!("   ✅ Unchanged: {}", counts.unchanged);
        return Ok(());
    }

    println!("🔄 Refreshing all watched repositories...");
    let summary = tracker.refresh_all().await?;

    println!("\n🎉 Refresh Complete!");
    println!("   📊 Total repositories: {}", summary.total_repositories);
    println!("   ✅ Refreshed: {}", summary.refreshed.len());
    println!("   ❌ Failed: {}", summary.failed.len());
    println!("   📥 New releases: {}", summary.counts.created);
    println!("   ✏️  Updated releases: {}", summary.counts.updated);
    println!("   🗑️  Removed releases: {}", summary.counts.deleted);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    for outcome in summary.refreshed.iter().filter(|o| o.counts.created > 0) {
        println!(
            "   🆕 {}: {} new",
            outcome.repository.repository.full_name, outcome.counts.created
        );
    }

    if !summary.failed.is_empty() {
        println!("\n🔍 Failed Repositories:");
        for failure in &summary.failed {
            let hint = if failure.error.is_transient() { " (retry may help)" } else { "" };
            println!("   ❌ {}: {}{}", failure.full_name, failure.error, hint);
        }
        bail!(
            "{} of {} repositories failed to refresh",
            summary.failed.len(),
            summary.total_repositories
        );
    }

    Ok(())
}

fn cmd_list(query: &ListQuery, details: bool, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let repositories = tracker.list_repositories(query)?;

    println!("Repositories ({}): ", repositories.len());

    for tracked in &repositories {
        if details {
            print_repository_details(tracked);
            println!();
        } else {
            let marker = if tracked.has_new_release() { "🆕" } else { "📁" };
            let latest = tracked
                .latest_release()
                .map(|r| r.version.as_str())
                .unwrap_or("no releases");
            println!(
                "  {} {} ({}) {}",
                marker, tracked.repository.full_name, latest, tracked.repository.id
            );
        }
    }

    Ok(())
}

fn cmd_show(id: RepositoryId, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let Some(tracked) = tracker.get_repository(id)? else {
        bail!("Repository not found: {}", id);
    };

    print_repository_details(&tracked);
    println!();
    println!("Releases ({}):", tracked.releases.len());
    for release in &tracked.releases {
        print_release(release);
    }

    Ok(())
}

async fn cmd_seen(id: ReleaseId, seen: bool, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let release = tracker.mark_release_seen(id, seen).await?;

    let state = if release.seen { "seen" } else { "unseen" };
    println!("✅ Marked {} as {}", release.version, state);
    Ok(())
}

async fn cmd_seen_all(id: RepositoryId, seen: bool, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let changed = tracker.mark_all_seen(id, seen).await?;

    let state = if seen { "seen" } else { "unseen" };
    println!("✅ Marked {} releases as {}", changed, state);
    Ok(())
}

async fn cmd_remove(id: RepositoryId, config: &Config) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let name = tracker
        .get_repository(id)?
        .map(|t| t.repository.full_name)
        .unwrap_or_else(|| id.to_string());

    tracker.remove_repository(id).await?;

    println!("🗑️  Stopped watching {}", name);
    Ok(())
}

/// Write the configuration file and create the database
fn cmd_init(config_path: Option<PathBuf>, force: bool, config: &Config) -> Result<()> {
    info!("Initializing releasewatch...");

    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it with defaults");
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Config::default().save(&config_path)?;
        info!("Configuration saved to: {:?}", config_path);
    }

    let tracker = Tracker::from_config(config)?;
    let count = tracker.list_repositories(&ListQuery::default())?.len();

    println!("✅ releasewatch initialized successfully!");
    println!("   Config: {}", config_path.display());
    println!("   Database: {} ({} repositories)", config.database.path, count);
    println!("   Next: releasewatch add <owner/name>");

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config_path: Option<PathBuf>, config: &Config) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    let health = HealthCheck::run(config, &config_path).await;
    print_health_report(&health);

    if !health.all_passed() {
        bail!("{} health checks failed", health.errors().len());
    }
    Ok(())
}

fn print_repository_details(tracked: &TrackedRepository) {
    let repo = &tracked.repository;

    println!("📁 {}", repo.full_name);
    println!("   🆔 {}", repo.id);
    if let Some(description) = &repo.description {
        println!("   📝 {}", description);
    }
    if repo.archived {
        println!("   📦 Archived");
    }
    match tracked.latest_release() {
        Some(latest) => {
            let marker = if latest.seen { "" } else { " 🆕" };
            println!(
                "   🏷️  Latest: {} ({}){}",
                latest.version,
                latest.release_time.format("%Y-%m-%d"),
                marker
            );
        }
        None => println!("   🏷️  No releases"),
    }
    println!(
        "   👀 Unseen: {} of {}",
        tracked.unseen_count(),
        tracked.releases.len()
    );
    println!("   🕒 Updated: {}", repo.updated_at.format("%Y-%m-%d %H:%M"));
    println!("   🔗 https://github.com/{}", repo.full_name);
}

fn print_release(release: &Release) {
    let icon = if release.seen { "  " } else { "🆕" };
    let mut flags = Vec::new();
    if release.metadata.prerelease {
        flags.push("pre-release");
    }
    if release.metadata.draft {
        flags.push("draft");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    println!(
        "  {} {} {}{} - {}",
        icon,
        release.release_time.format("%Y-%m-%d"),
        release.version,
        flags,
        release.name
    );
    println!("     🆔 {}", release.id);
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 releasewatch System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let warnings = health.warnings().len();
    if health.all_passed() && warnings > 0 {
        println!("✅ All checks passed ({} warnings)", warnings);
    } else if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
