//! Checkpoint management
//!
//! Serializes the engine's resumable state into the run's checkpoint slots
//! and reloads it at startup. Periodic (milestone) checkpoints replace each
//! other; outage, fatal and finished checkpoints are kept as history.

mod state;

pub use state::{CheckpointTag, CrawlState, FailureReport, MilestoneBook};

use crate::storage::{CheckpointStore, NewCheckpoint};
use crate::Result;
use tracing::{debug, info};

/// Decides when to checkpoint and writes checkpoints through a store
#[derive(Debug, Clone, Copy)]
pub struct CheckpointManager {
    interval: u64,
}

impl CheckpointManager {
    /// Creates a manager taking a milestone every `interval` pages
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Loads the active run's latest checkpointed state, if any
    pub fn restore<S>(&self, store: &S) -> Result<Option<CrawlState>>
    where
        S: CheckpointStore + ?Sized,
    {
        match store.latest_state()? {
            Some(raw) => {
                let state: CrawlState = serde_json::from_str(&raw)?;
                info!(
                    "Restored checkpoint: {} pages processed, next {:?}",
                    state.pages_processed, state.current_url
                );
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Whether the page counter has reached a new milestone
    pub fn is_due(&self, state: &CrawlState) -> bool {
        state.pages_processed > 0
            && state.pages_processed % self.interval == 0
            && state.milestones.last_counter != Some(state.pages_processed)
    }

    /// Takes a milestone checkpoint, replacing the previous one
    pub fn milestone<S>(&self, store: &mut S, state: &mut CrawlState) -> Result<i64>
    where
        S: CheckpointStore + ?Sized,
    {
        state.milestones.last_counter = Some(state.pages_processed);
        state.milestones.taken += 1;
        let id = self.save(store, CheckpointTag::Milestone, state, None)?;
        info!("Milestone checkpoint at {} pages", state.pages_processed);
        Ok(id)
    }

    /// Writes a checkpoint of `state` tagged `tag`
    ///
    /// # Arguments
    ///
    /// * `store` - Checkpoint slots of the active run
    /// * `tag` - Why the checkpoint is taken
    /// * `state` - State to persist
    /// * `report` - Failure to attach (outage and fatal checkpoints)
    pub fn save<S>(
        &self,
        store: &mut S,
        tag: CheckpointTag,
        state: &CrawlState,
        report: Option<&FailureReport>,
    ) -> Result<i64>
    where
        S: CheckpointStore + ?Sized,
    {
        let serialized = serde_json::to_string(state)?;
        let reason = report.map(serde_json::to_string).transpose()?;

        let id = store.save_checkpoint(&NewCheckpoint {
            tag: tag.to_db_string(),
            reason: reason.as_deref(),
            state: &serialized,
            rotate: tag.rotates(),
        })?;

        debug!("Saved {} checkpoint {}", tag.to_db_string(), id);
        Ok(id)
    }

    /// Mirrors `state` onto the run so a restart resumes from it
    pub fn record<S>(&self, store: &mut S, state: &CrawlState) -> Result<()>
    where
        S: CheckpointStore + ?Sized,
    {
        store.record_state(&serde_json::to_string(state)?)?;
        Ok(())
    }

    /// Consumes `current` in the frontier and persists the advanced state
    /// in the same transaction
    ///
    /// `state` is only updated once the store committed, so a failed
    /// advance leaves it pointing at `current`.
    pub fn advance<S>(
        &self,
        store: &mut S,
        state: &mut CrawlState,
        current: &str,
    ) -> Result<Option<String>>
    where
        S: CheckpointStore + ?Sized,
    {
        let mut staged = state.clone();
        let next = store.advance_run(current, &mut |next| {
            staged.last_url = Some(current.to_string());
            staged.current_url = next.map(str::to_string);
            Ok(serde_json::to_string(&staged)?)
        })?;

        *state = staged;
        Ok(next)
    }

    /// Takes the final checkpoint and marks the run finished
    pub fn finish<S>(&self, store: &mut S, state: &CrawlState) -> Result<i64>
    where
        S: CheckpointStore + ?Sized,
    {
        let id = self.save(store, CheckpointTag::Finished, state, None)?;
        store.finish_run()?;
        Ok(id)
    }
}
