//! Archiver engine - the per-site crawl state machine
//!
//! One engine drives one run of one site, strictly sequentially:
//! - restores the run's checkpoint or seeds the frontier with the base URL
//! - fetches the current URL, walking the retry ladder on failure
//! - extracts references, archives assets and registers page edges
//! - consumes the page in the frontier and asks for the next URL
//! - checkpoints every `milestones` pages, on outages and on fatal errors

use crate::checkpoint::{CheckpointManager, CheckpointTag, CrawlState, FailureReport};
use crate::config::{ArchiverConfig, Profile};
use crate::crawler::fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::crawler::parser::parse_html;
use crate::media;
use crate::state::{EngineState, IdentityCursor, IdentityRotation};
use crate::storage::{CheckpointStore, FrontierStore, LinkKind};
use crate::url::{classify_link, extract_host, HostScope, UrlNormalizer};
use crate::{ArchiverError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outage rounds a single URL may go through before it is given up
const MAX_OUTAGE_ROUNDS: u32 = 3;

/// Pages between progress log lines
const PROGRESS_INTERVAL: u64 = 10;

/// How a URL (or the whole run) failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineFailure {
    /// Non-200, timeout, TLS or missing scheme after the ladder was exhausted
    #[error("transient fetch failure for {url} persisted: {reason}")]
    TransientFetch { url: String, reason: String },

    /// Redirect loop or unusable URL
    #[error("permanent failure for {url}: {reason}")]
    PermanentUrl { url: String, reason: String },

    #[error("connectivity outage while fetching {url}: {detail}")]
    ConnectivityOutage { url: String, detail: String },

    #[error("unclassified failure while fetching {url}: {message}")]
    Fatal { url: String, message: String },
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub base_url: String,
    pub run_id: i64,
    pub pages_processed: u64,
    pub assets_processed: u64,
    pub external_discarded: u64,
    pub failed_urls: Vec<String>,
    /// Page rows in the site namespace
    pub page_count: u64,
    /// Asset rows in the site namespace
    pub asset_count: u64,
    /// External links absorbed at the end of the run
    pub reconciled: usize,
}

/// Per-URL progress through the retry ladder
#[derive(Debug, Default)]
struct RetryLadder {
    /// Scheme-repaired form of the URL, once repaired
    effective_url: Option<String>,
    rotated: bool,
    tls_relaxed: bool,
    scheme_repaired: bool,
    outages: u32,
}

enum Attempt {
    /// Requested URL and its 200 response
    Fetched(String, FetchResponse),
    Retry,
    Failed(EngineFailure),
}

/// Crawl state machine for one site
pub struct ArchiverEngine<S> {
    profile: Profile,
    settings: ArchiverConfig,
    store: S,
    fetcher: Arc<dyn Fetcher>,
    checkpoints: CheckpointManager,
    normalizer: UrlNormalizer,
    identity: IdentityRotation,
    scope: HostScope,
    crawl: CrawlState,
    state: EngineState,
    seed_url: String,
    run_id: Option<i64>,
}

impl<S> ArchiverEngine<S>
where
    S: FrontierStore + CheckpointStore,
{
    /// Creates an engine for `profile`
    ///
    /// # Arguments
    ///
    /// * `profile` - The site to crawl and its policies
    /// * `settings` - Process-wide identity and probe settings
    /// * `store` - Frontier and checkpoint storage
    /// * `fetcher` - Network capability
    pub fn new(
        profile: Profile,
        settings: ArchiverConfig,
        store: S,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let identity = IdentityRotation::new(&settings, &profile, IdentityCursor::default());
        let scope = HostScope::new(profile.allowed_hosts());
        let checkpoints = CheckpointManager::new(profile.milestones);
        let seed_url = profile.seed_url();

        Self {
            profile,
            settings,
            store,
            fetcher,
            checkpoints,
            normalizer: UrlNormalizer::new(),
            identity,
            scope,
            crawl: CrawlState::default(),
            state: EngineState::Init,
            seed_url,
            run_id: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn crawl_state(&self) -> &CrawlState {
        &self.crawl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Runs the crawl until the frontier is exhausted
    ///
    /// Unclassified failures are checkpointed (with a stack trace) before
    /// they are returned; a later run resumes from that checkpoint.
    pub async fn run(&mut self) -> Result<ArchiveReport> {
        match self.drive().await {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!("Archiving {} stopped: {}", self.seed_url, err);
                if self.run_id.is_some() {
                    let report =
                        FailureReport::fatal(err.to_string(), self.crawl.current_url.clone());
                    if let Err(checkpoint_err) = self.checkpoint(CheckpointTag::Fatal, Some(&report))
                    {
                        tracing::error!("Failed to write fatal checkpoint: {}", checkpoint_err);
                    }
                }
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<ArchiveReport> {
        let started = Instant::now();
        let mut ladder = RetryLadder::default();
        let mut fetched: Option<(String, FetchResponse)> = None;

        while !self.state.is_terminal() {
            match self.state {
                EngineState::Init => self.initialize()?,

                EngineState::Fetching => {
                    let Some(url) = self.crawl.current_url.clone() else {
                        tracing::info!("Frontier of {} is exhausted", self.seed_url);
                        self.transition(EngineState::Done)?;
                        continue;
                    };

                    if self.crawl.failed_urls.contains(&url) {
                        tracing::debug!("Skipping {} (already failed this run)", url);
                        self.transition(EngineState::FailedUrl)?;
                        continue;
                    }

                    match self.attempt(&url, &mut ladder).await? {
                        Attempt::Fetched(target, response) => {
                            fetched = Some((target, response));
                            self.transition(EngineState::Processing)?;
                        }
                        Attempt::Retry => self.transition(EngineState::Retrying)?,
                        Attempt::Failed(failure) => {
                            tracing::warn!("Giving up on {}: {}", url, failure);
                            self.crawl.failed_urls.insert(url);
                            self.transition(EngineState::FailedUrl)?;
                        }
                    }
                }

                EngineState::Retrying => self.transition(EngineState::Fetching)?,

                EngineState::Processing => {
                    if let Some((target, response)) = fetched.take() {
                        self.process(&target, response).await?;
                    }
                    self.transition(EngineState::Advancing)?;
                }

                EngineState::Advancing => {
                    self.crawl.pages_processed += 1;
                    self.advance()?;
                    ladder = RetryLadder::default();

                    if self.crawl.pages_processed % PROGRESS_INTERVAL == 0 {
                        self.log_progress(started)?;
                    }
                    if self.checkpoints.is_due(&self.crawl) {
                        self.sync_state();
                        self.checkpoints.milestone(&mut self.store, &mut self.crawl)?;
                    }
                    self.transition(EngineState::Fetching)?;
                }

                EngineState::FailedUrl => {
                    self.advance()?;
                    ladder = RetryLadder::default();
                    self.transition(EngineState::Fetching)?;
                }

                EngineState::Done => break,
            }
        }

        self.finish()
    }

    /// Restores the run's checkpoint, or seeds the frontier with the base URL
    fn initialize(&mut self) -> Result<()> {
        let run = self.store.get_or_create_run(&self.profile)?;
        self.run_id = Some(run.id);

        match self.checkpoints.restore(&self.store)? {
            Some(state) => {
                self.identity =
                    IdentityRotation::new(&self.settings, &self.profile, state.identity);
                self.normalizer = UrlNormalizer::from_cache(state.scheme_cache.clone());
                self.crawl = state;
                tracing::info!(
                    "Resuming run {} of {} ({} pages already processed)",
                    run.id,
                    self.seed_url,
                    self.crawl.pages_processed
                );

                if let Some(current) = self.crawl.current_url.clone() {
                    if current != self.seed_url && self.store.is_followed(&current)? {
                        tracing::info!(
                            "{} was consumed after the last checkpoint; advancing",
                            current
                        );
                        self.advance()?;
                    }
                }
            }
            None => {
                tracing::info!(
                    "Starting run {} of {} from its base URL (milestone every {} pages)",
                    run.id,
                    self.seed_url,
                    self.checkpoints.interval()
                );
                self.store.register_page(&self.seed_url, None, None)?;
                self.normalizer.remember(&self.seed_url);
                self.crawl = CrawlState {
                    current_url: Some(self.seed_url.clone()),
                    ..CrawlState::default()
                };
                self.sync_state();
                self.checkpoints.record(&mut self.store, &self.crawl)?;
            }
        }

        self.transition(EngineState::Fetching)
    }

    /// Issues one fetch of `url` and decides the next rung of the ladder
    async fn attempt(&mut self, url: &str, ladder: &mut RetryLadder) -> Result<Attempt> {
        let target = ladder
            .effective_url
            .clone()
            .unwrap_or_else(|| url.to_string());
        let request = FetchRequest::get(target.clone(), self.identity.current())
            .with_tls_verification(!ladder.tls_relaxed);

        tracing::info!(
            "Fetching {} (page {})",
            target,
            self.crawl.pages_processed + 1
        );

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_ok() => Ok(Attempt::Fetched(target, response)),
            Ok(response) => Ok(self.rotate_or_fail(
                &target,
                ladder,
                format!("HTTP {}", response.status),
            )),
            Err(FetchError::Timeout) => {
                Ok(self.rotate_or_fail(&target, ladder, "timeout".to_string()))
            }
            Err(FetchError::Tls(detail)) if !ladder.tls_relaxed => {
                tracing::warn!(
                    "TLS error on {} ({}); retrying without certificate verification",
                    target,
                    detail
                );
                ladder.tls_relaxed = true;
                Ok(Attempt::Retry)
            }
            Err(FetchError::MissingScheme(raw)) if !ladder.scheme_repaired => {
                ladder.scheme_repaired = true;
                match self.normalizer.repair(&raw) {
                    Ok(repaired) => {
                        tracing::info!("Repaired {} to {}", raw, repaired);
                        ladder.effective_url = Some(repaired);
                        Ok(Attempt::Retry)
                    }
                    Err(e) => Ok(Attempt::Failed(EngineFailure::PermanentUrl {
                        url: target,
                        reason: e.to_string(),
                    })),
                }
            }
            Err(FetchError::Connection(detail)) => {
                self.recover_connectivity(&target, ladder, detail).await
            }
            Err(FetchError::Other(message)) => {
                Err(EngineFailure::Fatal {
                    url: target,
                    message,
                }
                .into())
            }
            Err(err @ (FetchError::Tls(_) | FetchError::MissingScheme(_))) => {
                Ok(Attempt::Failed(EngineFailure::TransientFetch {
                    url: target,
                    reason: err.to_string(),
                }))
            }
            Err(err @ (FetchError::TooManyRedirects | FetchError::InvalidUrl(_))) => {
                Ok(Attempt::Failed(EngineFailure::PermanentUrl {
                    url: target,
                    reason: err.to_string(),
                }))
            }
        }
    }

    /// Rotates the identity once per URL; the second failure gives up
    fn rotate_or_fail(&mut self, url: &str, ladder: &mut RetryLadder, reason: String) -> Attempt {
        if ladder.rotated {
            return Attempt::Failed(EngineFailure::TransientFetch {
                url: url.to_string(),
                reason,
            });
        }

        ladder.rotated = true;
        let identity = self.identity.rotate();
        tracing::warn!(
            "{} failed ({}); rotating identity to '{}'",
            url,
            reason,
            identity.user_agent
        );
        Attempt::Retry
    }

    /// Checkpoints, then waits for connectivity before retrying `url`
    ///
    /// If the probe budget runs out the outage is fatal; a URL that keeps
    /// failing while the probe succeeds is given up after a few rounds.
    async fn recover_connectivity(
        &mut self,
        url: &str,
        ladder: &mut RetryLadder,
        detail: String,
    ) -> Result<Attempt> {
        ladder.outages += 1;
        tracing::warn!("Connection error on {}: {}", url, detail);

        let report = FailureReport::new(
            format!("connection error: {}", detail),
            Some(url.to_string()),
        );
        self.checkpoint(CheckpointTag::Outage, Some(&report))?;

        if ladder.outages > MAX_OUTAGE_ROUNDS {
            return Ok(Attempt::Failed(EngineFailure::ConnectivityOutage {
                url: url.to_string(),
                detail,
            }));
        }

        let retries = self.profile.reconnect_retries;
        let interval = Duration::from_secs(self.profile.reconnect_interval);

        for probe in 1..=retries {
            if self
                .fetcher
                .probe_connectivity(&self.settings.connectivity_probe_url)
                .await
            {
                let identity = self.identity.rotate();
                tracing::info!(
                    "Connectivity is back after {} probe(s); retrying {} as '{}'",
                    probe,
                    url,
                    identity.user_agent
                );
                return Ok(Attempt::Retry);
            }

            tracing::warn!("Connectivity probe {}/{} failed", probe, retries);
            if probe < retries {
                tokio::time::sleep(interval).await;
            }
        }

        Err(EngineFailure::ConnectivityOutage {
            url: url.to_string(),
            detail: format!("no connectivity after {} probe(s): {}", retries, detail),
        }
        .into())
    }

    /// Registers a fetched page and everything it references
    async fn process(&mut self, page_url: &str, response: FetchResponse) -> Result<()> {
        self.store
            .register_page(page_url, Some(&response.body), None)?;
        self.normalizer.remember(&response.final_url);
        if response.final_url != page_url {
            tracing::debug!("{} redirected to {}", page_url, response.final_url);
            self.store
                .register_page(&response.final_url, Some(&response.body), None)?;
        }

        let parsed = parse_html(&response.text());
        if let Some(title) = &parsed.title {
            tracing::debug!("Title of {}: {}", page_url, title);
        }

        let mut assets: Vec<String> = Vec::new();
        let mut pages: Vec<String> = Vec::new();
        for reference in &parsed.references {
            match self.normalizer.fix(&response.final_url, reference) {
                Ok(url) => {
                    let bucket = match classify_link(&url) {
                        LinkKind::Asset => &mut assets,
                        LinkKind::Page => &mut pages,
                    };
                    if !bucket.contains(&url) {
                        bucket.push(url);
                    }
                }
                Err(e) => tracing::trace!("Skipping {:?} on {}: {}", reference, page_url, e),
            }
        }

        for asset in &assets {
            self.archive_asset(page_url, asset).await?;
        }

        let final_host = extract_host(&response.final_url);
        let (mut internal, mut external, mut discarded) = (0u64, 0u64, 0u64);

        for target in &pages {
            match extract_host(target) {
                Some(host) if self.scope.allows(&host) => {
                    self.store.register_page(target, None, None)?;
                    self.store.register_link(page_url, target, LinkKind::Page)?;
                    internal += 1;
                }
                Some(host) if Some(&host) == final_host.as_ref() => {
                    self.store.register_external_link(page_url, target)?;
                    external += 1;
                }
                _ => discarded += 1,
            }
        }

        self.crawl.external_discarded += discarded;
        tracing::info!(
            "Processed {}: {} page link(s), {} asset(s), {} held external, {} discarded",
            page_url,
            internal,
            assets.len(),
            external,
            discarded
        );
        Ok(())
    }

    /// Links (and, if unknown, fetches and registers) one asset
    ///
    /// Fetch failures are contained here; only storage errors propagate.
    async fn archive_asset(&mut self, page_url: &str, asset_url: &str) -> Result<()> {
        if self.store.has_asset(asset_url)? {
            self.store
                .register_link(page_url, asset_url, LinkKind::Asset)?;
            return Ok(());
        }

        if self.crawl.failed_urls.contains(asset_url) {
            return Ok(());
        }

        let request = FetchRequest::get(asset_url, self.identity.current());
        match fetch_with_tls_fallback(self.fetcher.as_ref(), request).await {
            Ok(response) if response.is_ok() => {
                let class = media::classify(response.content_type());
                self.store.register_asset(
                    asset_url,
                    &class.asset_type,
                    Some(&response.body),
                    class.encoding.as_deref(),
                    Some(class.extension_or_fallback()),
                    None,
                )?;
                self.store
                    .register_link(page_url, asset_url, LinkKind::Asset)?;
                self.crawl.assets_processed += 1;
                tracing::debug!("Archived asset {} as {}", asset_url, class.asset_type);
            }
            Ok(response) => {
                tracing::warn!("Asset {} answered HTTP {}", asset_url, response.status);
                self.crawl.failed_urls.insert(asset_url.to_string());
            }
            Err(err @ (FetchError::MissingScheme(_) | FetchError::Connection(_))) => {
                tracing::warn!("Skipping asset {}: {}", asset_url, err);
            }
            Err(err) => {
                tracing::warn!("Asset {} failed: {}", asset_url, err);
                self.crawl.failed_urls.insert(asset_url.to_string());
            }
        }

        Ok(())
    }

    /// Consumes the current URL in the frontier and moves to the next one
    ///
    /// The frontier step and the resumable state are committed together.
    fn advance(&mut self) -> Result<()> {
        let Some(url) = self.crawl.current_url.clone() else {
            return Ok(());
        };

        self.sync_state();
        let next = self
            .checkpoints
            .advance(&mut self.store, &mut self.crawl, &url)?;
        tracing::debug!("Advanced from {} to {:?}", url, next);
        Ok(())
    }

    fn finish(&mut self) -> Result<ArchiveReport> {
        self.sync_state();
        self.checkpoints.finish(&mut self.store, &self.crawl)?;

        let reconciled = self.store.reconcile_external_links()?;
        let (page_count, asset_count) = self.store.element_counts()?;

        tracing::info!(
            "Finished {}: {} pages processed, {} assets archived, {} failed, {} external discarded ({} pages / {} assets stored)",
            self.seed_url,
            self.crawl.pages_processed,
            self.crawl.assets_processed,
            self.crawl.failed_urls.len(),
            self.crawl.external_discarded,
            page_count,
            asset_count
        );

        Ok(ArchiveReport {
            base_url: self.seed_url.clone(),
            run_id: self.run_id.unwrap_or_default(),
            pages_processed: self.crawl.pages_processed,
            assets_processed: self.crawl.assets_processed,
            external_discarded: self.crawl.external_discarded,
            failed_urls: self.crawl.failed_urls.iter().cloned().collect(),
            page_count,
            asset_count,
            reconciled,
        })
    }

    fn checkpoint(&mut self, tag: CheckpointTag, report: Option<&FailureReport>) -> Result<i64> {
        self.sync_state();
        self.checkpoints.save(&mut self.store, tag, &self.crawl, report)
    }

    /// Copies identity and scheme cache into the checkpointable state
    fn sync_state(&mut self) {
        self.crawl.identity = self.identity.cursor();
        self.crawl.scheme_cache = self.normalizer.cache().clone();
    }

    fn log_progress(&self, started: Instant) -> Result<()> {
        let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "Progress on {}: {} pages, {} assets, {} in frontier, {:.2} pages/sec",
            self.seed_url,
            self.crawl.pages_processed,
            self.crawl.assets_processed,
            self.store.frontier_size()?,
            self.crawl.pages_processed as f64 / elapsed
        );
        Ok(())
    }

    fn transition(&mut self, next: EngineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ArchiverError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!("{}: {} -> {}", self.seed_url, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// Fetches `request`, repeating it once without certificate verification on a TLS error
async fn fetch_with_tls_fallback(
    fetcher: &dyn Fetcher,
    request: FetchRequest,
) -> std::result::Result<FetchResponse, FetchError> {
    match fetcher.fetch(&request).await {
        Err(FetchError::Tls(detail)) => {
            tracing::warn!(
                "TLS error on asset {} ({}); retrying without certificate verification",
                request.url,
                detail
            );
            fetcher.fetch(&request.with_tls_verification(false)).await
        }
        outcome => outcome,
    }
}
