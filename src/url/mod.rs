//! URL handling module for the archiver
//!
//! This module resolves discovered references into absolute URLs, decides
//! whether a URL is a page or an asset, and matches hosts against a site's
//! allowed bases.

mod classify;
mod domain;
mod matcher;
mod normalize;

pub use classify::{classify_link, is_asset_url};
pub use domain::extract_host;
pub use matcher::{matches_wildcard, HostScope};
pub use normalize::UrlNormalizer;
