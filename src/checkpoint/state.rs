use crate::state::IdentityCursor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the engine needs to resume a run
///
/// Serialized as JSON into the checkpoint slot of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlState {
    /// URL to fetch next; `None` once the frontier is exhausted
    pub current_url: Option<String>,
    /// Last URL whose processing completed (successfully or not)
    pub last_url: Option<String>,
    pub pages_processed: u64,
    pub assets_processed: u64,
    /// Out-of-scope page references dropped without a row
    pub external_discarded: u64,
    /// URLs that exhausted their retries this run
    pub failed_urls: BTreeSet<String>,
    pub identity: IdentityCursor,
    pub milestones: MilestoneBook,
    /// Host to scheme, see `UrlNormalizer`
    pub scheme_cache: BTreeMap<String, String>,
}

/// Bookkeeping for periodic checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilestoneBook {
    /// Page counter at the last milestone checkpoint
    pub last_counter: Option<u64>,
    /// How many milestone checkpoints this run has taken
    pub taken: u64,
}

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    Milestone,
    Outage,
    Fatal,
    Finished,
}

impl CheckpointTag {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Milestone => "milestone",
            Self::Outage => "outage",
            Self::Fatal => "fatal",
            Self::Finished => "finished",
        }
    }

    /// Only periodic checkpoints replace their predecessor
    pub fn rotates(&self) -> bool {
        matches!(self, Self::Milestone)
    }
}

/// The failure attached to an outage or fatal checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,
    pub url: Option<String>,
    /// Captured stack trace, for fatal failures
    pub trace: Option<String>,
}

impl FailureReport {
    pub fn new(message: impl Into<String>, url: Option<String>) -> Self {
        Self {
            message: message.into(),
            url,
            trace: None,
        }
    }

    /// A report carrying the current stack trace
    pub fn fatal(message: impl Into<String>, url: Option<String>) -> Self {
        Self {
            message: message.into(),
            url,
            trace: Some(std::backtrace::Backtrace::force_capture().to_string()),
        }
    }
}
