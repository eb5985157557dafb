//! Configuration module for the archiver
//!
//! This module handles loading, parsing, and validating the TOML configuration:
//! one `[archiver]` table of process-wide settings and one `[[site]]` table per
//! crawl profile.
//!
//! # Example
//!
//! ```no_run
//! use web_archiver::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("archiver.toml")).unwrap();
//! for site in &config.site {
//!     println!("{} (checkpoint every {} pages)", site.base_url, site.milestones);
//! }
//! ```

mod parser;
mod types;
mod validation;

pub use types::{ArchiverConfig, Config, Profile, ProxyMode, ProxySetting};

pub use parser::{
    canonical_profile_json, compute_config_hash, load_config, load_config_with_hash,
    profile_fingerprint,
};
