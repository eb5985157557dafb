//! Database schema definitions
//!
//! One fixed schema serves every site. Graph tables carry a `site_id` column
//! that namespaces rows per (base URL, profile) pair, and nothing is ever
//! physically deleted from them: removal is the `inactive` tombstone.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One namespace per (base url, profile)
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_url TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    profile TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sites_lookup ON sites(base_url, fingerprint);

-- Crawl attempts; state mirrors the latest checkpoint
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    profile TEXT NOT NULL,
    state TEXT,
    started_at TEXT NOT NULL,
    updated_at TEXT,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_site ON runs(site_id, finished_at);

CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    run_id INTEGER NOT NULL REFERENCES runs(id),
    tag TEXT NOT NULL,
    reason TEXT,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints(run_id, tag);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    UNIQUE(site_id, url)
);

CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    UNIQUE(site_id, url)
);

-- Page -> page edges; followed = 0 is a pending frontier entry
CREATE TABLE IF NOT EXISTS page_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    source_page_id INTEGER NOT NULL REFERENCES pages(id),
    target_page_id INTEGER NOT NULL REFERENCES pages(id),
    followed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source_page_id, target_page_id)
);

CREATE INDEX IF NOT EXISTS idx_page_links_pending ON page_links(site_id, followed);
CREATE INDEX IF NOT EXISTS idx_page_links_target ON page_links(target_page_id);

CREATE TABLE IF NOT EXISTS asset_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    source_page_id INTEGER NOT NULL REFERENCES pages(id),
    target_asset_id INTEGER NOT NULL REFERENCES assets(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source_page_id, target_asset_id)
);

-- Targets not yet proven internal; not keyed to pages
CREATE TABLE IF NOT EXISTS external_page_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    source_page_id INTEGER NOT NULL REFERENCES pages(id),
    target_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source_page_id, target_url)
);

CREATE INDEX IF NOT EXISTS idx_external_links_target ON external_page_links(site_id, target_url);

CREATE TABLE IF NOT EXISTS raw_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL REFERENCES pages(id),
    raw BLOB,
    path TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_raw_pages_page ON raw_pages(page_id);

CREATE TABLE IF NOT EXISTS raw_assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id INTEGER NOT NULL REFERENCES assets(id),
    raw BLOB,
    encoding TEXT,
    extension TEXT,
    path TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_raw_assets_asset ON raw_assets(asset_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = [
            "sites",
            "runs",
            "checkpoints",
            "pages",
            "assets",
            "page_links",
            "asset_links",
            "external_page_links",
            "raw_pages",
            "raw_assets",
        ];

        for table in tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
