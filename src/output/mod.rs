//! Output module for archive reports
//!
//! This module handles:
//! - Per-site statistics read back from the archive database
//! - Printing the summary of a finished run

pub mod stats;

pub use stats::{load_statistics, print_statistics, SiteStatistics};

use crate::crawler::ArchiveReport;

/// Prints the summary of one finished run
pub fn print_report(report: &ArchiveReport) {
    println!("{} (run {})", report.base_url, report.run_id);
    println!(
        "  Processed: {} pages, {} assets",
        report.pages_processed, report.assets_processed
    );
    println!(
        "  Stored: {} pages, {} assets",
        report.page_count, report.asset_count
    );
    println!(
        "  External links: {} discarded, {} reconciled",
        report.external_discarded, report.reconciled
    );

    if !report.failed_urls.is_empty() {
        println!("  Failed URLs ({}):", report.failed_urls.len());
        for url in &report.failed_urls {
            println!("    - {}", url);
        }
    }
}
