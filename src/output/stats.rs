//! Statistics generation from the archive database
//!
//! This module provides functionality for extracting and displaying
//! per-site archive statistics from the storage layer.

use crate::storage::{FrontierStatistics, FrontierStore, RunRecord, SqliteFrontier};
use crate::Result;

/// Statistics of one site namespace
#[derive(Debug, Clone)]
pub struct SiteStatistics {
    /// Base URL the namespace was created for
    pub base_url: String,

    /// Short profile fingerprint, distinguishing namespaces of the same base URL
    pub fingerprint: String,

    /// Row counts
    pub counts: FrontierStatistics,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,
}

impl SiteStatistics {
    /// Share of discovered page edges already consumed, in percent
    pub fn frontier_progress(&self) -> f64 {
        if self.counts.page_links == 0 {
            return 100.0;
        }
        let consumed = self
            .counts
            .page_links
            .saturating_sub(self.counts.pending_links);
        (consumed as f64 / self.counts.page_links as f64) * 100.0
    }
}

/// Loads statistics for every site in the database
///
/// # Arguments
///
/// * `store` - The archive database
///
/// # Returns
///
/// * `Ok(Vec<SiteStatistics>)` - One entry per site namespace, oldest first
/// * `Err(ArchiverError)` - Failed to query statistics
pub fn load_statistics(store: &mut SqliteFrontier) -> Result<Vec<SiteStatistics>> {
    let mut sites = Vec::new();

    for site in store.list_sites()? {
        store.use_site(&site);
        let counts = store.statistics()?;
        let latest_run = store.runs()?.pop();

        sites.push(SiteStatistics {
            base_url: site.base_url,
            fingerprint: site.fingerprint.chars().take(12).collect(),
            counts,
            latest_run,
        });
    }

    Ok(sites)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(sites: &[SiteStatistics]) {
    println!("=== Archive Statistics ===\n");

    if sites.is_empty() {
        println!("No sites archived yet.");
        return;
    }

    for site in sites {
        let counts = &site.counts;
        println!("{} [{}]", site.base_url, site.fingerprint);
        println!(
            "  Pages: {} ({} inactive)",
            counts.pages, counts.inactive_pages
        );
        println!("  Assets: {}", counts.assets);
        println!(
            "  Page links: {} ({} pending, {:.1}% consumed)",
            counts.page_links,
            counts.pending_links,
            site.frontier_progress()
        );
        println!("  Asset links: {}", counts.asset_links);
        println!("  External links: {}", counts.external_links);
        println!(
            "  Raw snapshots: {} pages, {} assets",
            counts.raw_pages, counts.raw_assets
        );
        println!(
            "  Runs: {} ({} finished), checkpoints: {}",
            counts.runs, counts.finished_runs, counts.checkpoints
        );

        if let Some(run) = &site.latest_run {
            match &run.finished_at {
                Some(finished) => println!(
                    "  Latest run {}: started {}, finished {}",
                    run.id, run.started_at, finished
                ),
                None => println!(
                    "  Latest run {}: started {}, unfinished (last update {})",
                    run.id,
                    run.started_at,
                    run.updated_at.as_deref().unwrap_or("never")
                ),
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::storage::LinkKind;

    #[test]
    fn test_load_statistics_per_site() {
        let mut store = SqliteFrontier::new_in_memory().unwrap();

        store
            .get_or_create_run(&Profile::new("http://one.test/"))
            .unwrap();
        store
            .register_page("http://one.test/", Some(b"<html></html>"), None)
            .unwrap();
        store
            .register_page("http://one.test/a", None, None)
            .unwrap();
        store
            .register_link("http://one.test/", "http://one.test/a", LinkKind::Page)
            .unwrap();

        store
            .get_or_create_run(&Profile::new("http://two.test/"))
            .unwrap();

        let sites = load_statistics(&mut store).unwrap();
        assert_eq!(sites.len(), 2);

        let one = &sites[0];
        assert_eq!(one.base_url, "http://one.test/");
        assert_eq!(one.counts.pages, 2);
        assert_eq!(one.counts.pending_links, 1);
        assert_eq!(one.counts.raw_pages, 1);
        assert_eq!(one.frontier_progress(), 0.0);
        assert_eq!(one.fingerprint.len(), 12);
        assert!(one.latest_run.is_some());

        assert_eq!(sites[1].counts.pages, 0);
        assert_eq!(sites[1].frontier_progress(), 100.0);
    }
}
