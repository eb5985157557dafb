//! Web Archiver main entry point
//!
//! This is the command-line interface for the resumable website archiver.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use web_archiver::config::{load_config_with_hash, Config};
use web_archiver::crawler::{archive_all, reconcile_all, HttpFetcher, HttpSettings};
use web_archiver::output::{load_statistics, print_report, print_statistics};
use web_archiver::storage::open_storage;

/// Web Archiver: a resumable website archiver
///
/// Crawls every configured site, storing pages, assets and the links between
/// them in SQLite. Interrupted runs resume from their last checkpoint.
#[derive(Parser, Debug)]
#[command(name = "web-archiver")]
#[command(version)]
#[command(about = "A resumable website archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only archive the site with this base URL
    #[arg(long, value_name = "BASE_URL")]
    site: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be archived without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "reconcile"])]
    dry_run: bool,

    /// Show per-site statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "reconcile"])]
    stats: bool,

    /// Absorb resolvable external links for every site and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    reconcile: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if let Some(base_url) = &cli.site {
        let profile = config
            .profile_for(base_url)
            .cloned()
            .with_context(|| format!("no [[site]] with base-url {}", base_url))?;
        config.site = vec![profile];
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.reconcile {
        handle_reconcile(&config)?;
    } else {
        handle_archive(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("web_archiver=info,warn"),
            1 => EnvFilter::new("web_archiver=debug,info"),
            2 => EnvFilter::new("web_archiver=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated plan
fn handle_dry_run(config: &Config) {
    let archiver = &config.archiver;
    println!("=== Web Archiver Dry Run ===\n");

    println!("Archiver:");
    println!("  Database: {}", archiver.database_path);
    println!(
        "  Timeouts: {}s request, {}s connect",
        archiver.request_timeout, archiver.connect_timeout
    );
    println!("  Max redirects: {}", archiver.max_redirects);
    println!("  Connectivity probe: {}", archiver.connectivity_probe_url);
    println!("  User agents: {}", archiver.user_agents.len());
    println!("  Proxy pool: {}", archiver.proxy_pool.len());

    println!("\nSites ({}):", config.site.len());
    for profile in &config.site {
        println!("  - {}", profile.seed_url());
        println!("    Allowed hosts: {}", profile.allowed_hosts().join(", "));
        if let Some(proxies) = &profile.proxies {
            println!("    Proxies: {:?}", proxies);
        }
        println!(
            "    Milestone every {} pages; reconnect {} x {}s",
            profile.milestones, profile.reconnect_retries, profile.reconnect_interval
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.archiver.database_path);
    println!("Database: {}\n", path.display());

    let mut store = open_storage(path).context("failed to open the archive database")?;
    let mut sites = load_statistics(&mut store)?;

    if config.site.len() == 1 {
        let wanted = config.site[0].seed_url();
        sites.retain(|site| site.base_url == wanted);
    }

    print_statistics(&sites);
    Ok(())
}

/// Handles the --reconcile mode
fn handle_reconcile(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.archiver.database_path);
    let mut store = open_storage(path).context("failed to open the archive database")?;

    for (base_url, count) in reconcile_all(&mut store)? {
        println!("{}: {} external link(s) absorbed", base_url, count);
    }
    Ok(())
}

/// Handles the main archive operation
async fn handle_archive(config: Config) -> anyhow::Result<()> {
    tracing::info!("Archiving {} site(s)", config.site.len());

    let fetcher = Arc::new(HttpFetcher::new(HttpSettings::from_config(&config.archiver)));
    let results = archive_all(config, fetcher).await;

    let mut failures = 0;
    for (base_url, result) in &results {
        match result {
            Ok(report) => print_report(report),
            Err(e) => {
                failures += 1;
                tracing::error!("Archiving {} failed: {}", base_url, e);
            }
        }
    }

    if failures > 0 {
        bail!(
            "{} of {} site(s) stopped early; rerun to resume from their checkpoints",
            failures,
            results.len()
        );
    }

    tracing::info!("All sites archived");
    Ok(())
}
