//! SQLite storage implementation
//!
//! This module provides the SQLite-backed `FrontierStore` and
//! `CheckpointStore`. Each public operation runs in its own transaction.

use crate::config::{canonical_profile_json, profile_fingerprint, Profile};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, FrontierStore, StorageError, StorageResult};
use crate::storage::{
    AssetLinkRecord, AssetRecord, CheckpointRecord, ExternalLinkRecord, FrontierStatistics,
    LinkKind, NewCheckpoint, PageLinkRecord, PageRecord, RawAssetRecord, RawPageRecord,
    RunRecord, SiteRecord,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// How long a writer waits for another site worker's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite storage backend
///
/// One instance serves one site namespace at a time, selected by
/// `get_or_create_run` (or `use_site` for read-only inspection).
pub struct SqliteFrontier {
    conn: Connection,
    active: Option<ActiveSite>,
}

#[derive(Debug, Clone)]
struct ActiveSite {
    site_id: i64,
    seed_url: String,
    run_id: Option<i64>,
}

impl SqliteFrontier {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteFrontier)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        initialize_schema(&conn)?;

        Ok(Self { conn, active: None })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, active: None })
    }

    /// Lists every site namespace in the database
    pub fn list_sites(&self) -> StorageResult<Vec<SiteRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, base_url, fingerprint, profile, created_at FROM sites ORDER BY id",
        )?;

        let sites = stmt
            .query_map([], |row| {
                let profile: String = row.get(3)?;
                Ok(SiteRecord {
                    id: row.get(0)?,
                    base_url: row.get(1)?,
                    fingerprint: row.get(2)?,
                    profile: serde_json::from_str(&profile).unwrap_or(serde_json::Value::Null),
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sites)
    }

    /// Selects a site namespace without opening a run
    pub fn use_site(&mut self, site: &SiteRecord) {
        self.active = Some(ActiveSite {
            site_id: site.id,
            seed_url: site.base_url.clone(),
            run_id: None,
        });
    }

    /// Runs of the selected site, oldest first
    pub fn runs(&self) -> StorageResult<Vec<RunRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT id, site_id, profile, state, started_at, updated_at, finished_at
             FROM runs WHERE site_id = ?1 ORDER BY id",
        )?;
        let runs = stmt
            .query_map(params![site_id], map_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn site(&self) -> StorageResult<&ActiveSite> {
        self.active.as_ref().ok_or(StorageError::NoActiveSite)
    }

    fn run_id(&self) -> StorageResult<i64> {
        self.site()?.run_id.ok_or(StorageError::NoActiveRun)
    }

    fn count(&self, sql: &str, site_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, params![site_id], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl FrontierStore for SqliteFrontier {
    // ===== Runs =====

    fn get_or_create_run(&mut self, profile: &Profile) -> StorageResult<RunRecord> {
        let profile_json = canonical_profile_json(profile)?;
        let profile_value: serde_json::Value = serde_json::from_str(&profile_json)?;
        let fingerprint = profile_fingerprint(profile)?;
        let seed_url = profile.seed_url();
        let now = now();

        let tx = self.conn.transaction()?;

        let existing_site = {
            let mut stmt = tx.prepare(
                "SELECT id, profile FROM sites WHERE base_url = ?1 AND fingerprint = ?2 ORDER BY id",
            )?;
            let candidates = stmt
                .query_map(params![seed_url, fingerprint], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            candidates.into_iter().find_map(|(id, stored)| {
                serde_json::from_str::<serde_json::Value>(&stored)
                    .ok()
                    .filter(|value| *value == profile_value)
                    .map(|_| id)
            })
        };

        let site_id = match existing_site {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO sites (base_url, fingerprint, profile, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![seed_url, fingerprint, profile_json, now],
                )?;
                let id = tx.last_insert_rowid();
                info!("Provisioned namespace {} for {}", id, seed_url);
                id
            }
        };

        let unfinished = tx
            .query_row(
                "SELECT id, site_id, profile, state, started_at, updated_at, finished_at
                 FROM runs WHERE site_id = ?1 AND finished_at IS NULL
                 ORDER BY id DESC LIMIT 1",
                params![site_id],
                map_run,
            )
            .optional()?;

        let run = match unfinished {
            Some(run) => {
                info!("Reusing unfinished run {} for {}", run.id, seed_url);
                run
            }
            None => {
                tx.execute(
                    "INSERT INTO runs (site_id, profile, started_at) VALUES (?1, ?2, ?3)",
                    params![site_id, profile_json, now],
                )?;
                let id = tx.last_insert_rowid();
                info!("Started run {} for {}", id, seed_url);
                RunRecord {
                    id,
                    site_id,
                    profile: profile_value,
                    state: None,
                    started_at: now,
                    updated_at: None,
                    finished_at: None,
                }
            }
        };

        tx.commit()?;

        self.active = Some(ActiveSite {
            site_id,
            seed_url,
            run_id: Some(run.id),
        });

        Ok(run)
    }

    // ===== Registration =====

    fn register_page(
        &mut self,
        url: &str,
        content: Option<&[u8]>,
        path: Option<&str>,
    ) -> StorageResult<()> {
        let site_id = self.site()?.site_id;
        let now = now();
        let tx = self.conn.transaction()?;

        let page_id = upsert_page(&tx, site_id, url, &now)?;

        if content.is_some() || path.is_some() {
            tx.execute(
                "UPDATE raw_pages SET inactive = 1, updated_at = ?1
                 WHERE page_id = ?2 AND inactive = 0",
                params![now, page_id],
            )?;
            tx.execute(
                "INSERT INTO raw_pages (page_id, raw, path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![page_id, content, path, now],
            )?;
        }

        tx.commit()?;
        debug!("Registered page {}", url);
        Ok(())
    }

    fn register_asset(
        &mut self,
        url: &str,
        asset_type: &str,
        content: Option<&[u8]>,
        encoding: Option<&str>,
        extension: Option<&str>,
        path: Option<&str>,
    ) -> StorageResult<()> {
        let site_id = self.site()?.site_id;
        let now = now();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO assets (site_id, url, asset_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(site_id, url) DO UPDATE SET
                 inactive = 0,
                 asset_type = excluded.asset_type,
                 updated_at = excluded.updated_at",
            params![site_id, url, asset_type, now],
        )?;
        let asset_id = find_id(&tx, "assets", site_id, url)?
            .ok_or_else(|| StorageError::AssetNotFound(url.to_string()))?;

        if content.is_some() || path.is_some() {
            tx.execute(
                "UPDATE raw_assets SET inactive = 1, updated_at = ?1
                 WHERE asset_id = ?2 AND inactive = 0",
                params![now, asset_id],
            )?;
            tx.execute(
                "INSERT INTO raw_assets
                     (asset_id, raw, encoding, extension, path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![asset_id, content, encoding, extension, path, now],
            )?;
        }

        tx.commit()?;
        debug!("Registered asset {} ({})", url, asset_type);
        Ok(())
    }

    fn register_link(
        &mut self,
        source: &str,
        target: &str,
        kind: LinkKind,
    ) -> StorageResult<bool> {
        let site_id = self.site()?.site_id;
        let now = now();
        let tx = self.conn.transaction()?;

        let source_id = upsert_page(&tx, site_id, source, &now)?;
        let created = match kind {
            LinkKind::Page => {
                let target_id = upsert_page(&tx, site_id, target, &now)?;
                upsert_edge(&tx, Edge::Page, site_id, source_id, target_id, &now)?
            }
            LinkKind::Asset => {
                let target_id = find_id(&tx, "assets", site_id, target)?
                    .ok_or_else(|| StorageError::AssetNotFound(target.to_string()))?;
                upsert_edge(&tx, Edge::Asset, site_id, source_id, target_id, &now)?
            }
        };

        tx.commit()?;
        debug!(
            "Linked {} -> {} ({}, new: {})",
            source,
            target,
            kind.to_db_string(),
            created
        );
        Ok(created)
    }

    fn register_external_link(&mut self, source: &str, target: &str) -> StorageResult<bool> {
        let site_id = self.site()?.site_id;
        let now = now();
        let tx = self.conn.transaction()?;

        let source_id = upsert_page(&tx, site_id, source, &now)?;
        let reactivated = tx.execute(
            "UPDATE external_page_links SET inactive = 0, updated_at = ?1
             WHERE source_page_id = ?2 AND target_url = ?3",
            params![now, source_id, target],
        )?;
        if reactivated == 0 {
            tx.execute(
                "INSERT INTO external_page_links
                     (site_id, source_page_id, target_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![site_id, source_id, target, now],
            )?;
        }

        tx.commit()?;
        debug!("Recorded external link {} -> {}", source, target);
        Ok(reactivated == 0)
    }

    // ===== Frontier =====

    fn get_next_url(&mut self, current: &str) -> StorageResult<Option<String>> {
        let site = self.site()?.clone();
        let tx = self.conn.transaction()?;
        let next = next_url(&tx, &site, current, &now())?;
        tx.commit()?;
        Ok(next)
    }

    fn reconcile_external_links(&mut self) -> StorageResult<usize> {
        let site = self.site()?.clone();
        let now = now();
        let tx = self.conn.transaction()?;

        let matches = {
            let mut stmt = tx.prepare(
                "SELECT e.id, e.source_page_id, p.id, p.url
                 FROM external_page_links e
                 JOIN pages p ON p.site_id = e.site_id AND p.url = e.target_url
                 WHERE e.site_id = ?1 AND e.inactive = 0
                 ORDER BY e.id",
            )?;
            let rows = stmt
                .query_map(params![site.site_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (external_id, source_id, target_id, target_url) in &matches {
            let consumed = *target_url == site.seed_url
                || target_consumed(&tx, *target_id)?
                || has_snapshot(&tx, *target_id)?;
            let created = upsert_edge(&tx, Edge::Page, site.site_id, *source_id, *target_id, &now)?;
            if created && consumed {
                tx.execute(
                    "UPDATE page_links SET followed = 1
                     WHERE source_page_id = ?1 AND target_page_id = ?2",
                    params![source_id, target_id],
                )?;
            }
            tx.execute(
                "UPDATE external_page_links SET inactive = 1, updated_at = ?1 WHERE id = ?2",
                params![now, external_id],
            )?;
        }

        tx.commit()?;
        if !matches.is_empty() {
            info!("Reconciled {} external link(s) into page links", matches.len());
        }
        Ok(matches.len())
    }

    fn is_followed(&self, url: &str) -> StorageResult<bool> {
        let site_id = self.site()?.site_id;
        let followed: bool = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM page_links l JOIN pages p ON p.id = l.target_page_id
                 WHERE p.site_id = ?1 AND p.url = ?2 AND l.followed = 1)",
            params![site_id, url],
            |row| row.get(0),
        )?;
        Ok(followed)
    }

    fn frontier_size(&self) -> StorageResult<u64> {
        let site_id = self.site()?.site_id;
        self.count(
            "SELECT COUNT(*) FROM page_links WHERE site_id = ?1 AND followed = 0 AND inactive = 0",
            site_id,
        )
    }

    // ===== Inspection =====

    fn element_counts(&self) -> StorageResult<(u64, u64)> {
        let site_id = self.site()?.site_id;
        let pages = self.count("SELECT COUNT(*) FROM pages WHERE site_id = ?1", site_id)?;
        let assets = self.count("SELECT COUNT(*) FROM assets WHERE site_id = ?1", site_id)?;
        Ok((pages, assets))
    }

    fn has_asset(&self, url: &str) -> StorageResult<bool> {
        Ok(self.get_asset(url)?.map(|asset| !asset.inactive).unwrap_or(false))
    }

    fn get_page(&self, url: &str) -> StorageResult<Option<PageRecord>> {
        let site_id = self.site()?.site_id;
        let page = self
            .conn
            .query_row(
                "SELECT id, url, created_at, updated_at, inactive
                 FROM pages WHERE site_id = ?1 AND url = ?2",
                params![site_id, url],
                |row| {
                    Ok(PageRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                        inactive: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(page)
    }

    fn get_asset(&self, url: &str) -> StorageResult<Option<AssetRecord>> {
        let site_id = self.site()?.site_id;
        let asset = self
            .conn
            .query_row(
                "SELECT id, url, asset_type, created_at, updated_at, inactive
                 FROM assets WHERE site_id = ?1 AND url = ?2",
                params![site_id, url],
                |row| {
                    Ok(AssetRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        asset_type: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                        inactive: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(asset)
    }

    fn page_links_from(&self, source: &str) -> StorageResult<Vec<PageLinkRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT s.url, t.url, l.followed, l.inactive
             FROM page_links l
             JOIN pages s ON s.id = l.source_page_id
             JOIN pages t ON t.id = l.target_page_id
             WHERE l.site_id = ?1 AND s.url = ?2
             ORDER BY l.id",
        )?;
        let links = stmt
            .query_map(params![site_id, source], |row| {
                Ok(PageLinkRecord {
                    source_url: row.get(0)?,
                    target_url: row.get(1)?,
                    followed: row.get(2)?,
                    inactive: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn asset_links_from(&self, source: &str) -> StorageResult<Vec<AssetLinkRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT s.url, a.url, l.inactive
             FROM asset_links l
             JOIN pages s ON s.id = l.source_page_id
             JOIN assets a ON a.id = l.target_asset_id
             WHERE l.site_id = ?1 AND s.url = ?2
             ORDER BY l.id",
        )?;
        let links = stmt
            .query_map(params![site_id, source], |row| {
                Ok(AssetLinkRecord {
                    source_url: row.get(0)?,
                    target_url: row.get(1)?,
                    inactive: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn external_links(&self) -> StorageResult<Vec<ExternalLinkRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT s.url, e.target_url
             FROM external_page_links e JOIN pages s ON s.id = e.source_page_id
             WHERE e.site_id = ?1 AND e.inactive = 0
             ORDER BY e.id",
        )?;
        let links = stmt
            .query_map(params![site_id], |row| {
                Ok(ExternalLinkRecord {
                    source_url: row.get(0)?,
                    target_url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn raw_pages_for(&self, url: &str) -> StorageResult<Vec<RawPageRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.raw, r.path, r.created_at, r.inactive
             FROM raw_pages r JOIN pages p ON p.id = r.page_id
             WHERE p.site_id = ?1 AND p.url = ?2
             ORDER BY r.id",
        )?;
        let raws = stmt
            .query_map(params![site_id, url], |row| {
                Ok(RawPageRecord {
                    id: row.get(0)?,
                    raw: row.get(1)?,
                    path: row.get(2)?,
                    created_at: row.get(3)?,
                    inactive: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raws)
    }

    fn raw_assets_for(&self, url: &str) -> StorageResult<Vec<RawAssetRecord>> {
        let site_id = self.site()?.site_id;
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.raw, r.encoding, r.extension, r.path, r.created_at, r.inactive
             FROM raw_assets r JOIN assets a ON a.id = r.asset_id
             WHERE a.site_id = ?1 AND a.url = ?2
             ORDER BY r.id",
        )?;
        let raws = stmt
            .query_map(params![site_id, url], |row| {
                Ok(RawAssetRecord {
                    id: row.get(0)?,
                    raw: row.get(1)?,
                    encoding: row.get(2)?,
                    extension: row.get(3)?,
                    path: row.get(4)?,
                    created_at: row.get(5)?,
                    inactive: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raws)
    }

    fn statistics(&self) -> StorageResult<FrontierStatistics> {
        let site_id = self.site()?.site_id;
        Ok(FrontierStatistics {
            pages: self.count(
                "SELECT COUNT(*) FROM pages WHERE site_id = ?1 AND inactive = 0",
                site_id,
            )?,
            inactive_pages: self.count(
                "SELECT COUNT(*) FROM pages WHERE site_id = ?1 AND inactive = 1",
                site_id,
            )?,
            assets: self.count("SELECT COUNT(*) FROM assets WHERE site_id = ?1", site_id)?,
            page_links: self.count(
                "SELECT COUNT(*) FROM page_links WHERE site_id = ?1 AND inactive = 0",
                site_id,
            )?,
            pending_links: self.frontier_size()?,
            asset_links: self.count(
                "SELECT COUNT(*) FROM asset_links WHERE site_id = ?1 AND inactive = 0",
                site_id,
            )?,
            external_links: self.count(
                "SELECT COUNT(*) FROM external_page_links WHERE site_id = ?1 AND inactive = 0",
                site_id,
            )?,
            raw_pages: self.count(
                "SELECT COUNT(*) FROM raw_pages r JOIN pages p ON p.id = r.page_id
                 WHERE p.site_id = ?1",
                site_id,
            )?,
            raw_assets: self.count(
                "SELECT COUNT(*) FROM raw_assets r JOIN assets a ON a.id = r.asset_id
                 WHERE a.site_id = ?1",
                site_id,
            )?,
            runs: self.count("SELECT COUNT(*) FROM runs WHERE site_id = ?1", site_id)?,
            finished_runs: self.count(
                "SELECT COUNT(*) FROM runs WHERE site_id = ?1 AND finished_at IS NOT NULL",
                site_id,
            )?,
            checkpoints: self.count(
                "SELECT COUNT(*) FROM checkpoints WHERE site_id = ?1",
                site_id,
            )?,
        })
    }
}

impl CheckpointStore for SqliteFrontier {
    fn save_checkpoint(&mut self, checkpoint: &NewCheckpoint<'_>) -> StorageResult<i64> {
        let site_id = self.site()?.site_id;
        let run_id = self.run_id()?;
        let now = now();
        let tx = self.conn.transaction()?;

        if checkpoint.rotate {
            let removed = tx.execute(
                "DELETE FROM checkpoints WHERE run_id = ?1 AND tag = ?2",
                params![run_id, checkpoint.tag],
            )?;
            debug!("Rotated out {} {} checkpoint(s)", removed, checkpoint.tag);
        }

        tx.execute(
            "INSERT INTO checkpoints (site_id, run_id, tag, reason, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site_id,
                run_id,
                checkpoint.tag,
                checkpoint.reason,
                checkpoint.state,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE runs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![checkpoint.state, now, run_id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    fn record_state(&mut self, state: &str) -> StorageResult<()> {
        let run_id = self.run_id()?;
        self.conn.execute(
            "UPDATE runs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, now(), run_id],
        )?;
        Ok(())
    }

    fn advance_run(
        &mut self,
        current: &str,
        progress: &mut dyn FnMut(Option<&str>) -> StorageResult<String>,
    ) -> StorageResult<Option<String>> {
        let site = self.site()?.clone();
        let run_id = self.run_id()?;
        let now = now();
        let tx = self.conn.transaction()?;

        let next = next_url(&tx, &site, current, &now)?;
        let state = progress(next.as_deref())?;
        tx.execute(
            "UPDATE runs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, now, run_id],
        )?;

        tx.commit()?;
        Ok(next)
    }

    fn latest_state(&self) -> StorageResult<Option<String>> {
        let run_id = self.run_id()?;
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(state)
    }

    fn checkpoints(&self) -> StorageResult<Vec<CheckpointRecord>> {
        let run_id = self.run_id()?;
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, tag, reason, state, created_at
             FROM checkpoints WHERE run_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![run_id], |row| {
                Ok(CheckpointRecord {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    tag: row.get(2)?,
                    reason: row.get(3)?,
                    state: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn finish_run(&mut self) -> StorageResult<()> {
        let run_id = self.run_id()?;
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1 WHERE id = ?2",
            params![now(), run_id],
        )?;
        info!("Run {} finished", run_id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Page,
    Asset,
}

impl Edge {
    fn table(&self) -> &'static str {
        match self {
            Self::Page => "page_links",
            Self::Asset => "asset_links",
        }
    }

    fn target_column(&self) -> &'static str {
        match self {
            Self::Page => "target_page_id",
            Self::Asset => "target_asset_id",
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let profile: String = row.get(2)?;
    Ok(RunRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        profile: serde_json::from_str(&profile).unwrap_or(serde_json::Value::Null),
        state: row.get(3)?,
        started_at: row.get(4)?,
        updated_at: row.get(5)?,
        finished_at: row.get(6)?,
    })
}

/// Inserts or reactivates a page and returns its id
fn upsert_page(conn: &Connection, site_id: i64, url: &str, now: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO pages (site_id, url, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(site_id, url) DO UPDATE SET
             inactive = 0,
             updated_at = excluded.updated_at",
        params![site_id, url, now],
    )?;
    conn.query_row(
        "SELECT id FROM pages WHERE site_id = ?1 AND url = ?2",
        params![site_id, url],
        |row| row.get(0),
    )
}

fn find_id(conn: &Connection, table: &str, site_id: i64, url: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        &format!("SELECT id FROM {} WHERE site_id = ?1 AND url = ?2", table),
        params![site_id, url],
        |row| row.get(0),
    )
    .optional()
}

/// Inserts or reactivates an edge; returns true if it was inserted
fn upsert_edge(
    conn: &Connection,
    edge: Edge,
    site_id: i64,
    source_id: i64,
    target_id: i64,
    now: &str,
) -> rusqlite::Result<bool> {
    let reactivated = conn.execute(
        &format!(
            "UPDATE {} SET inactive = 0, updated_at = ?1 WHERE source_page_id = ?2 AND {} = ?3",
            edge.table(),
            edge.target_column()
        ),
        params![now, source_id, target_id],
    )?;
    if reactivated > 0 {
        return Ok(false);
    }

    conn.execute(
        &format!(
            "INSERT INTO {} (site_id, source_page_id, {}, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            edge.table(),
            edge.target_column()
        ),
        params![site_id, source_id, target_id, now],
    )?;
    Ok(true)
}

/// Marks every pending edge into `current` as followed and picks the next
/// pending target, collapsing edges into targets consumed elsewhere
fn next_url(
    conn: &Connection,
    site: &ActiveSite,
    current: &str,
    now: &str,
) -> rusqlite::Result<Option<String>> {
    conn.execute(
        "UPDATE page_links SET followed = 1, updated_at = ?1
         WHERE site_id = ?2 AND followed = 0 AND target_page_id IN
             (SELECT id FROM pages WHERE site_id = ?2 AND url = ?3)",
        params![now, site.site_id, current],
    )?;

    loop {
        let candidate = conn
            .query_row(
                "SELECT l.target_page_id, p.url
                 FROM page_links l JOIN pages p ON p.id = l.target_page_id
                 WHERE l.site_id = ?1 AND l.followed = 0 AND l.inactive = 0
                 ORDER BY l.id LIMIT 1",
                params![site.site_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((target_id, url)) = candidate else {
            return Ok(None);
        };

        if url != site.seed_url && !target_consumed(conn, target_id)? {
            return Ok(Some(url));
        }

        let collapsed = conn.execute(
            "UPDATE page_links SET followed = 1, updated_at = ?1
             WHERE target_page_id = ?2 AND followed = 0",
            params![now, target_id],
        )?;
        debug!("Collapsed {} duplicate frontier edge(s) into {}", collapsed, url);
    }
}

/// Whether the page has an active raw snapshot, i.e. was already archived
fn has_snapshot(conn: &Connection, page_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM raw_pages WHERE page_id = ?1 AND inactive = 0)",
        params![page_id],
        |row| row.get(0),
    )
}

/// Whether some edge into the page has already been followed
fn target_consumed(conn: &Connection, target_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM page_links WHERE target_page_id = ?1 AND followed = 1)",
        params![target_id],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://ex.test/";

    fn store() -> SqliteFrontier {
        let mut store = SqliteFrontier::new_in_memory().unwrap();
        store.get_or_create_run(&Profile::new(BASE)).unwrap();
        store
    }

    fn page(path: &str) -> String {
        format!("http://ex.test{}", path)
    }

    fn followed_flags(store: &SqliteFrontier) -> Vec<(String, String, bool)> {
        let mut stmt = store
            .conn
            .prepare(
                "SELECT s.url, t.url, l.followed FROM page_links l
                 JOIN pages s ON s.id = l.source_page_id
                 JOIN pages t ON t.id = l.target_page_id ORDER BY l.id",
            )
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_operations_require_a_run() {
        let mut store = SqliteFrontier::new_in_memory().unwrap();
        assert!(matches!(
            store.register_page(BASE, None, None),
            Err(StorageError::NoActiveSite)
        ));
    }

    #[test]
    fn test_get_or_create_run_reuses_unfinished_run() {
        let mut store = SqliteFrontier::new_in_memory().unwrap();
        let profile = Profile::new(BASE);

        let first = store.get_or_create_run(&profile).unwrap();
        let second = store.get_or_create_run(&profile.clone()).unwrap();
        assert_eq!(first.id, second.id);

        store.finish_run().unwrap();
        let third = store.get_or_create_run(&profile).unwrap();
        assert_ne!(first.id, third.id);
        assert_eq!(first.site_id, third.site_id);
    }

    #[test]
    fn test_different_profiles_get_separate_namespaces() {
        let mut store = SqliteFrontier::new_in_memory().unwrap();
        let plain = Profile::new(BASE);
        let mut tuned = Profile::new(BASE);
        tuned.milestones = 5;

        let a = store.get_or_create_run(&plain).unwrap();
        store.register_page(&page("/only-in-plain"), None, None).unwrap();

        let b = store.get_or_create_run(&tuned).unwrap();
        assert_ne!(a.site_id, b.site_id);
        assert!(store.get_page(&page("/only-in-plain")).unwrap().is_none());
        assert_eq!(store.list_sites().unwrap().len(), 2);
    }

    #[test]
    fn test_register_page_is_idempotent() {
        let mut store = store();
        store.register_page(&page("/a"), None, None).unwrap();
        store.register_page(&page("/a"), None, None).unwrap();

        assert_eq!(store.element_counts().unwrap(), (1, 0));
        assert!(!store.get_page(&page("/a")).unwrap().unwrap().inactive);
    }

    #[test]
    fn test_register_page_reactivates_tombstone() {
        let mut store = store();
        store.register_page(&page("/a"), None, None).unwrap();
        store
            .conn
            .execute("UPDATE pages SET inactive = 1", [])
            .unwrap();

        store.register_page(&page("/a"), None, None).unwrap();
        assert!(!store.get_page(&page("/a")).unwrap().unwrap().inactive);
        assert_eq!(store.element_counts().unwrap(), (1, 0));
    }

    #[test]
    fn test_raw_snapshots_keep_history() {
        let mut store = store();
        store.register_page(&page("/a"), Some(b"v1"), None).unwrap();
        store.register_page(&page("/a"), Some(b"v2"), Some("ex.test/a.html")).unwrap();

        let raws = store.raw_pages_for(&page("/a")).unwrap();
        assert_eq!(raws.len(), 2);
        assert!(raws[0].inactive);
        assert_eq!(raws[0].raw.as_deref(), Some(&b"v1"[..]));
        assert!(!raws[1].inactive);
        assert_eq!(raws[1].path.as_deref(), Some("ex.test/a.html"));

        store.register_page(&page("/a"), None, None).unwrap();
        assert_eq!(store.raw_pages_for(&page("/a")).unwrap().len(), 2);
    }

    #[test]
    fn test_register_asset_and_snapshot() {
        let mut store = store();
        let url = page("/img.png");
        store
            .register_asset(&url, "image/png", Some(b"png"), None, Some(".png"), None)
            .unwrap();
        store
            .register_asset(&url, "image/png", Some(b"png2"), None, Some(".png"), None)
            .unwrap();

        assert_eq!(store.element_counts().unwrap(), (0, 1));
        assert!(store.has_asset(&url).unwrap());
        let raws = store.raw_assets_for(&url).unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws.iter().filter(|raw| !raw.inactive).count(), 1);
        assert_eq!(raws[1].extension.as_deref(), Some(".png"));
    }

    #[test]
    fn test_register_link_reports_new_edges() {
        let mut store = store();
        store.register_page(BASE, None, None).unwrap();

        assert!(store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap());
        assert!(!store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap());

        let links = store.page_links_from(BASE).unwrap();
        assert_eq!(links.len(), 1);
        assert!(!links[0].followed);
        assert_eq!(store.element_counts().unwrap(), (2, 0));
    }

    #[test]
    fn test_register_asset_link_requires_asset() {
        let mut store = store();
        let result = store.register_link(BASE, &page("/missing.png"), LinkKind::Asset);
        assert!(matches!(result, Err(StorageError::AssetNotFound(_))));

        store
            .register_asset(&page("/img.png"), "image/png", None, None, None, None)
            .unwrap();
        assert!(store
            .register_link(BASE, &page("/img.png"), LinkKind::Asset)
            .unwrap());
        assert_eq!(store.asset_links_from(BASE).unwrap().len(), 1);
    }

    #[test]
    fn test_get_next_url_walks_frontier_in_order() {
        let mut store = store();
        store.register_page(BASE, None, None).unwrap();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.register_link(BASE, &page("/b"), LinkKind::Page).unwrap();

        assert_eq!(store.get_next_url(BASE).unwrap(), Some(page("/a")));
        assert_eq!(store.get_next_url(&page("/a")).unwrap(), Some(page("/b")));
        assert_eq!(store.get_next_url(&page("/b")).unwrap(), None);
        assert_eq!(store.frontier_size().unwrap(), 0);
    }

    #[test]
    fn test_get_next_url_collapses_sibling_edges() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.register_link(BASE, &page("/b"), LinkKind::Page).unwrap();
        store.register_link(&page("/a"), &page("/b"), LinkKind::Page).unwrap();
        store.register_link(&page("/a"), &page("/c"), LinkKind::Page).unwrap();

        assert_eq!(store.get_next_url(BASE).unwrap(), Some(page("/a")));
        assert_eq!(store.get_next_url(&page("/a")).unwrap(), Some(page("/b")));
        // Both edges into /b are consumed together
        assert_eq!(store.get_next_url(&page("/b")).unwrap(), Some(page("/c")));
        let into_b: Vec<_> = followed_flags(&store)
            .into_iter()
            .filter(|(_, target, _)| *target == page("/b"))
            .collect();
        assert_eq!(into_b.len(), 2);
        assert!(into_b.iter().all(|(_, _, followed)| *followed));
    }

    #[test]
    fn test_get_next_url_skips_already_visited_targets() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        assert_eq!(store.get_next_url(BASE).unwrap(), Some(page("/a")));
        assert_eq!(store.get_next_url(&page("/a")).unwrap(), None);

        // A late edge into an already visited page is consumed, not returned
        store.register_link(&page("/z"), &page("/a"), LinkKind::Page).unwrap();
        store.register_link(&page("/z"), BASE, LinkKind::Page).unwrap();
        assert_eq!(store.get_next_url(&page("/a")).unwrap(), None);
        assert!(followed_flags(&store).iter().all(|(_, _, followed)| *followed));
    }

    #[test]
    fn test_followed_is_monotonic() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.get_next_url(&page("/a")).unwrap();
        assert!(store.is_followed(&page("/a")).unwrap());

        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.reconcile_external_links().unwrap();
        assert!(store.page_links_from(BASE).unwrap()[0].followed);
    }

    #[test]
    fn test_reconcile_absorbs_known_targets() {
        let mut store = store();
        store.register_page(BASE, None, None).unwrap();
        assert!(store.register_external_link(BASE, &page("/later")).unwrap());
        assert!(store.register_external_link(BASE, "http://other.test/x").unwrap());

        assert_eq!(store.reconcile_external_links().unwrap(), 0);

        store.register_page(&page("/later"), None, None).unwrap();
        assert_eq!(store.reconcile_external_links().unwrap(), 1);
        assert_eq!(store.reconcile_external_links().unwrap(), 0);

        let remaining = store.external_links().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_url, "http://other.test/x");

        let links = store.page_links_from(BASE).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_url, page("/later"));
        assert!(!links[0].followed);
    }

    #[test]
    fn test_reconcile_does_not_reopen_visited_pages() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.get_next_url(&page("/a")).unwrap();

        store.register_external_link(&page("/b"), &page("/a")).unwrap();
        store.register_external_link(&page("/b"), BASE).unwrap();
        assert_eq!(store.reconcile_external_links().unwrap(), 2);
        assert_eq!(store.frontier_size().unwrap(), 0);
    }

    #[test]
    fn test_advance_run_commits_state_with_frontier() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store.register_link(&page("/a"), &page("/b"), LinkKind::Page).unwrap();

        let next = store
            .advance_run(&page("/a"), &mut |next| Ok(format!("{:?}", next)))
            .unwrap();
        assert_eq!(next, Some(page("/b")));
        assert!(store.is_followed(&page("/a")).unwrap());
        assert_eq!(
            store.latest_state().unwrap(),
            Some(format!("{:?}", Some(page("/b").as_str())))
        );
    }

    #[test]
    fn test_advance_run_rolls_back_when_state_fails() {
        let mut store = store();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();

        let result = store.advance_run(&page("/a"), &mut |_| Err(StorageError::NoActiveRun));
        assert!(result.is_err());
        assert!(!store.is_followed(&page("/a")).unwrap());
        assert_eq!(store.frontier_size().unwrap(), 1);
        assert_eq!(store.latest_state().unwrap(), None);
    }

    #[test]
    fn test_reconcile_treats_archived_pages_as_visited() {
        let mut store = store();
        store
            .register_page("http://mirror.test/go", Some(b"<html></html>"), None)
            .unwrap();
        store
            .register_external_link(BASE, "http://mirror.test/go")
            .unwrap();

        assert_eq!(store.reconcile_external_links().unwrap(), 1);
        let links = store.page_links_from(BASE).unwrap();
        assert!(links[0].followed);
        assert_eq!(store.frontier_size().unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_rotation_and_mirror() {
        let mut store = store();
        let first = NewCheckpoint {
            tag: "milestone",
            reason: None,
            state: "{\"n\":1}",
            rotate: true,
        };
        store.save_checkpoint(&first).unwrap();
        store
            .save_checkpoint(&NewCheckpoint {
                state: "{\"n\":2}",
                ..first
            })
            .unwrap();
        store
            .save_checkpoint(&NewCheckpoint {
                tag: "outage",
                reason: Some("connection refused"),
                state: "{\"n\":3}",
                rotate: false,
            })
            .unwrap();

        let records = store.checkpoints().unwrap();
        let tags: Vec<_> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["milestone", "outage"]);
        assert_eq!(records[0].state, "{\"n\":2}");
        assert_eq!(store.latest_state().unwrap().as_deref(), Some("{\"n\":3}"));
    }

    #[test]
    fn test_statistics_counts_namespace() {
        let mut store = store();
        store.register_page(BASE, Some(b"<html></html>"), None).unwrap();
        store.register_link(BASE, &page("/a"), LinkKind::Page).unwrap();
        store
            .register_asset(&page("/s.css"), "text/css", Some(b"body{}"), None, Some(".css"), None)
            .unwrap();
        store.register_link(BASE, &page("/s.css"), LinkKind::Asset).unwrap();
        store.register_external_link(BASE, &page("/x")).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.assets, 1);
        assert_eq!(stats.page_links, 1);
        assert_eq!(stats.pending_links, 1);
        assert_eq!(stats.asset_links, 1);
        assert_eq!(stats.external_links, 1);
        assert_eq!(stats.raw_pages, 1);
        assert_eq!(stats.raw_assets, 1);
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.finished_runs, 0);
    }
}
