//! Engine state definitions for one site's crawl loop
//!
//! The loop runs `Init -> Fetching -> Processing -> Advancing -> Fetching`,
//! detouring through `Retrying` while the retry ladder still has a rung and
//! through `FailedUrl` once it is exhausted. `Done` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Restoring a checkpoint or seeding the frontier
    Init,

    /// Fetching the current URL
    Fetching,

    /// Extracting and registering the links of a fetched page
    Processing,

    /// Consuming the page in the frontier and moving to the next URL
    Advancing,

    /// Re-issuing the fetch after a recoverable failure
    Retrying,

    /// Giving up on the current URL for this run
    FailedUrl,

    /// Frontier exhausted
    Done,
}

impl EngineState {
    /// Returns true if the loop has nothing left to do
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if moving from `self` to `next` is a legal step
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;

        matches!(
            (self, next),
            (Init, Fetching)
                | (Fetching, Processing)
                | (Fetching, Retrying)
                | (Fetching, FailedUrl)
                | (Fetching, Done)
                | (Retrying, Fetching)
                | (Processing, Advancing)
                | (Advancing, Fetching)
                | (FailedUrl, Fetching)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Advancing => "advancing",
            Self::Retrying => "retrying",
            Self::FailedUrl => "failed_url",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
