//! Storage module for the crawl graph
//!
//! This module owns every persisted entity of a crawl:
//! - Site namespaces and runs (one unfinished run reused across restarts)
//! - Pages, assets and their raw content history
//! - Page, asset and external link edges, including the pending frontier
//! - Checkpoints of the engine's resumable state

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteFrontier;
pub use traits::{CheckpointStore, FrontierStore, StorageError, StorageResult};

use std::path::Path;

/// Opens (or creates) the archive database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteFrontier> {
    SqliteFrontier::new(path)
}

/// Which edge table a discovered link belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Page,
    Asset,
}

impl LinkKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Asset => "asset",
        }
    }
}

/// A site namespace
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub id: i64,
    pub base_url: String,
    pub fingerprint: String,
    pub profile: serde_json::Value,
    pub created_at: String,
}

/// A crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub site_id: i64,
    pub profile: serde_json::Value,
    /// Opaque resumable state of the latest checkpoint
    pub state: Option<String>,
    pub started_at: String,
    pub updated_at: Option<String>,
    pub finished_at: Option<String>,
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
    pub inactive: bool,
}

#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub id: i64,
    pub url: String,
    pub asset_type: String,
    pub created_at: String,
    pub updated_at: String,
    pub inactive: bool,
}

/// A page-to-page edge
#[derive(Debug, Clone)]
pub struct PageLinkRecord {
    pub source_url: String,
    pub target_url: String,
    pub followed: bool,
    pub inactive: bool,
}

/// A page-to-asset edge
#[derive(Debug, Clone)]
pub struct AssetLinkRecord {
    pub source_url: String,
    pub target_url: String,
    pub inactive: bool,
}

/// An edge to a target that is not yet known to be internal
#[derive(Debug, Clone)]
pub struct ExternalLinkRecord {
    pub source_url: String,
    pub target_url: String,
}

#[derive(Debug, Clone)]
pub struct RawPageRecord {
    pub id: i64,
    pub raw: Option<Vec<u8>>,
    pub path: Option<String>,
    pub created_at: String,
    pub inactive: bool,
}

#[derive(Debug, Clone)]
pub struct RawAssetRecord {
    pub id: i64,
    pub raw: Option<Vec<u8>>,
    pub encoding: Option<String>,
    pub extension: Option<String>,
    pub path: Option<String>,
    pub created_at: String,
    pub inactive: bool,
}

/// A persisted checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub id: i64,
    pub run_id: i64,
    pub tag: String,
    pub reason: Option<String>,
    pub state: String,
    pub created_at: String,
}

/// A checkpoint about to be written
#[derive(Debug, Clone, Copy)]
pub struct NewCheckpoint<'a> {
    pub tag: &'a str,
    pub reason: Option<&'a str>,
    pub state: &'a str,
    /// Replace the run's previous checkpoint with the same tag
    pub rotate: bool,
}

/// Row counts for one site namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierStatistics {
    pub pages: u64,
    pub inactive_pages: u64,
    pub assets: u64,
    pub page_links: u64,
    pub pending_links: u64,
    pub asset_links: u64,
    pub external_links: u64,
    pub raw_pages: u64,
    pub raw_assets: u64,
    pub runs: u64,
    pub finished_runs: u64,
    pub checkpoints: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_kind_names() {
        assert_eq!(LinkKind::Page.to_db_string(), "page");
        assert_eq!(LinkKind::Asset.to_db_string(), "asset");
    }
}
