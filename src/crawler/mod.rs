//! Crawler module for archiving sites
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching behind the `Fetcher` trait
//! - HTML parsing and reference extraction
//! - The per-site `ArchiverEngine` state machine
//! - Running every configured site, one worker task each

mod engine;
mod fetcher;
mod parser;

pub use engine::{ArchiveReport, ArchiverEngine, EngineFailure};
pub use fetcher::{
    build_http_client, FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher,
    HttpSettings,
};
pub use parser::{parse_html, ParsedPage};

use crate::config::{ArchiverConfig, Config, Profile};
use crate::storage::{FrontierStore, SqliteFrontier};
use crate::{ArchiverError, Result};
use std::path::Path;
use std::sync::Arc;

/// Archives one site with its own store connection
///
/// # Arguments
///
/// * `settings` - Process-wide settings (database path, identities, probe)
/// * `profile` - The site to archive
/// * `fetcher` - Network capability shared between sites
///
/// # Returns
///
/// * `Ok(ArchiveReport)` - The run finished
/// * `Err(ArchiverError)` - The run stopped; its checkpoint allows resuming
pub async fn archive_site(
    settings: ArchiverConfig,
    profile: Profile,
    fetcher: Arc<dyn Fetcher>,
) -> Result<ArchiveReport> {
    let store = SqliteFrontier::new(Path::new(&settings.database_path))?;
    let mut engine = ArchiverEngine::new(profile, settings, store, fetcher);
    engine.run().await
}

/// Archives every configured site concurrently
///
/// Sites share nothing but the database file; each gets its own tokio task.
/// Results are returned in configuration order, paired with the site's base URL.
pub async fn archive_all(
    config: Config,
    fetcher: Arc<dyn Fetcher>,
) -> Vec<(String, Result<ArchiveReport>)> {
    // Create the schema once before the workers race for it
    if let Err(e) = SqliteFrontier::new(Path::new(&config.archiver.database_path)) {
        let error = e.to_string();
        return config
            .site
            .iter()
            .map(|profile| {
                (
                    profile.base_url.clone(),
                    Err(ArchiverError::Worker(error.clone())),
                )
            })
            .collect();
    }

    let mut handles = Vec::with_capacity(config.site.len());
    for profile in config.site {
        let base_url = profile.base_url.clone();
        tracing::info!("Spawning worker for {}", base_url);
        let handle = tokio::spawn(archive_site(
            config.archiver.clone(),
            profile,
            Arc::clone(&fetcher),
        ));
        handles.push((base_url, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (base_url, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ArchiverError::Worker(format!("{}: {}", base_url, e))),
        };
        results.push((base_url, result));
    }
    results
}

/// Absorbs resolvable external links in every site namespace of the database
///
/// Returns the base URL of each site with the number of links absorbed.
pub fn reconcile_all(store: &mut SqliteFrontier) -> Result<Vec<(String, usize)>> {
    let mut absorbed = Vec::new();
    for site in store.list_sites()? {
        store.use_site(&site);
        let count = store.reconcile_external_links()?;
        tracing::info!("Reconciled {} external link(s) for {}", count, site.base_url);
        absorbed.push((site.base_url, count));
    }
    Ok(absorbed)
}
