//! Storage traits and error types
//!
//! `FrontierStore` is the contract the engine crawls against; every mutating
//! call is one transaction. `CheckpointStore` persists the engine's resumable
//! state for the active run.

use crate::config::Profile;
use crate::storage::{
    AssetLinkRecord, AssetRecord, CheckpointRecord, ExternalLinkRecord, FrontierStatistics,
    LinkKind, NewCheckpoint, PageLinkRecord, PageRecord, RawAssetRecord, RawPageRecord,
    RunRecord,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No site namespace selected")]
    NoActiveSite,

    #[error("No run in progress")]
    NoActiveRun,

    #[error("Asset not found: {0}")]
    AssetNotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The persistent page/asset/link graph of one site
pub trait FrontierStore {
    // ===== Runs =====

    /// Finds the unfinished run whose profile deep-equals `profile`, or
    /// creates one (provisioning the site namespace on first use)
    ///
    /// Selects the run's namespace for every other call on this store.
    fn get_or_create_run(&mut self, profile: &Profile) -> StorageResult<RunRecord>;

    // ===== Registration =====

    /// Upserts a page, clearing its tombstone
    ///
    /// When `content` or `path` is given, a new raw snapshot is appended and
    /// the page's previous snapshots are tombstoned.
    fn register_page(
        &mut self,
        url: &str,
        content: Option<&[u8]>,
        path: Option<&str>,
    ) -> StorageResult<()>;

    /// Upserts an asset with the same snapshot semantics as `register_page`
    fn register_asset(
        &mut self,
        url: &str,
        asset_type: &str,
        content: Option<&[u8]>,
        encoding: Option<&str>,
        extension: Option<&str>,
        path: Option<&str>,
    ) -> StorageResult<()>;

    /// Upserts an edge from a page to a page or asset
    ///
    /// # Returns
    ///
    /// `true` if the edge is new, `false` if an existing edge was reactivated.
    /// New page edges start unfollowed.
    fn register_link(&mut self, source: &str, target: &str, kind: LinkKind)
        -> StorageResult<bool>;

    /// Upserts an edge to a target not yet known to be internal
    fn register_external_link(&mut self, source: &str, target: &str) -> StorageResult<bool>;

    // ===== Frontier =====

    /// Marks every pending edge into `current` as followed, then returns the
    /// target of the next pending edge
    ///
    /// Edges whose target was already consumed through another edge are
    /// marked followed on the way, so no page is handed out twice.
    fn get_next_url(&mut self, current: &str) -> StorageResult<Option<String>>;

    /// Converts external links whose target is now a known page into page
    /// links and tombstones them; returns how many were absorbed
    fn reconcile_external_links(&mut self) -> StorageResult<usize>;

    /// Whether some edge into `url` has been consumed
    fn is_followed(&self, url: &str) -> StorageResult<bool>;

    /// Number of pending page edges
    fn frontier_size(&self) -> StorageResult<u64>;

    // ===== Inspection =====

    /// (page count, asset count)
    fn element_counts(&self) -> StorageResult<(u64, u64)>;

    /// Whether an active asset row exists for `url`
    fn has_asset(&self, url: &str) -> StorageResult<bool>;

    fn get_page(&self, url: &str) -> StorageResult<Option<PageRecord>>;

    fn get_asset(&self, url: &str) -> StorageResult<Option<AssetRecord>>;

    fn page_links_from(&self, source: &str) -> StorageResult<Vec<PageLinkRecord>>;

    fn asset_links_from(&self, source: &str) -> StorageResult<Vec<AssetLinkRecord>>;

    /// Active external links of the namespace
    fn external_links(&self) -> StorageResult<Vec<ExternalLinkRecord>>;

    /// Raw snapshots of a page, oldest first
    fn raw_pages_for(&self, url: &str) -> StorageResult<Vec<RawPageRecord>>;

    /// Raw snapshots of an asset, oldest first
    fn raw_assets_for(&self, url: &str) -> StorageResult<Vec<RawAssetRecord>>;

    fn statistics(&self) -> StorageResult<FrontierStatistics>;
}

/// Durable checkpoint slots keyed by (site, run)
pub trait CheckpointStore {
    /// Writes a checkpoint and mirrors its state onto the run, atomically
    fn save_checkpoint(&mut self, checkpoint: &NewCheckpoint<'_>) -> StorageResult<i64>;

    /// Mirrors `state` onto the run without writing a checkpoint row
    fn record_state(&mut self, state: &str) -> StorageResult<()>;

    /// Consumes `current` exactly like `FrontierStore::get_next_url` and, in
    /// the same transaction, mirrors the state `progress` builds from the
    /// next URL onto the run
    ///
    /// Either both the frontier step and the state land, or neither does.
    fn advance_run(
        &mut self,
        current: &str,
        progress: &mut dyn FnMut(Option<&str>) -> StorageResult<String>,
    ) -> StorageResult<Option<String>>;

    /// State of the active run's latest checkpoint
    fn latest_state(&self) -> StorageResult<Option<String>>;

    /// Checkpoints of the active run, oldest first
    fn checkpoints(&self) -> StorageResult<Vec<CheckpointRecord>>;

    /// Stamps the active run as finished
    fn finish_run(&mut self) -> StorageResult<()>;
}
