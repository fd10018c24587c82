//! Crawl orchestrator - the four-stage job pipeline
//!
//! ```text
//! 1 navigation ─► 2 category expansion ─► 3 paginated extraction ─► 4 finalize
//! ```
//!
//! The checkpoint's `pipeline_step` records the stage a job has reached. A
//! resumed job skips finished stages, and in stage 3 it skips every category
//! already listed in `urls_processed`.

use crate::catalog::{CategoryLink, ListingExtractor, NavigationDiscovery};
use crate::checkpoint::{
    CategoryEntry, CheckpointDraft, CheckpointError, CheckpointManager, CheckpointRecord,
    CheckpointStatus, ErrorDetails, FieldError, PipelineDelta, PipelineStep, ValidationError,
};
use crate::config::Config;
use crate::crawler::{CategoryResult, CategoryStatus, CrawlJob};
use crate::output::JobReport;
use crate::page::{Browser, Page, PageError};
use crate::pagination::{PaginationController, PaginationLimits, PaginationSession, StopReason};
use crate::throttle::{DomainThrottle, SlotPolicy, ThrottleError, ThrottlePermit};
use crate::url::{canonicalize_url, extract_domain};
use crate::{CrawlError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Consecutive stage 3 rounds that may end with nothing finished before the
/// job gives up on a throttled domain
const MAX_STALLED_ROUNDS: u32 = 3;

/// How a category task ended
enum TaskOutcome {
    Finished(CategoryResult),
    /// The throttle refused a slot in time; the category stays unprocessed
    Deferred {
        category: CategoryEntry,
        cause: ThrottleError,
    },
    /// Interrupted by cancellation; the category stays unprocessed
    Cancelled,
}

/// What one pass over the stage 3 queue left behind
struct ExtractionRound {
    finished: usize,
    requeue: Vec<CategoryEntry>,
    backpressure: Option<ThrottleError>,
}

/// Composes throttle, pagination and checkpoints into a crawl pipeline
pub struct CrawlOrchestrator {
    browser: Arc<dyn Browser>,
    discovery: Arc<dyn NavigationDiscovery>,
    extractor: Arc<dyn ListingExtractor>,
    throttle: Arc<DomainThrottle>,
    pagination: PaginationController,
    checkpoints: Arc<CheckpointManager>,
    navigation_timeout: Duration,
    slot_timeout: Duration,
    persist_retries: u32,
    persist_backoff: Duration,
}

impl CrawlOrchestrator {
    /// Creates an orchestrator with a fresh throttle built from `config`
    pub fn new(
        config: &Config,
        browser: Arc<dyn Browser>,
        discovery: Arc<dyn NavigationDiscovery>,
        extractor: Arc<dyn ListingExtractor>,
        checkpoints: Arc<CheckpointManager>,
    ) -> Self {
        Self {
            browser,
            discovery,
            extractor,
            throttle: Arc::new(DomainThrottle::new(config.throttle.clone())),
            pagination: PaginationController::new(config.pagination.clone()),
            checkpoints,
            navigation_timeout: Duration::from_millis(config.pagination.navigation_timeout_ms),
            slot_timeout: Duration::from_millis(config.crawler.slot_timeout_ms),
            persist_retries: config.crawler.persist_retries.max(1),
            persist_backoff: Duration::from_millis(config.crawler.persist_backoff_ms),
        }
    }

    /// Shares an existing throttle, so pacing spans several orchestrators
    pub fn with_throttle(mut self, throttle: Arc<DomainThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle(&self) -> &Arc<DomainThrottle> {
        &self.throttle
    }

    /// Runs a job to completion
    ///
    /// # Returns
    ///
    /// * `Ok(JobReport)` - The job finished; its checkpoint is `completed`
    /// * `Err(CrawlError::Cancelled)` - Cancelled; the checkpoint stays active
    /// * `Err(CrawlError)` - The job failed; its checkpoint is `failed` and
    ///   keeps partial progress
    pub async fn run(&self, job: CrawlJob) -> Result<JobReport> {
        let started = Instant::now();
        let domain = extract_domain(&job.root_url)?;
        let record = self.resolve_checkpoint(&job, &domain).await?;
        let id = record.checkpoint_id;

        tracing::info!(
            "Job {} on {} ({}) starting at step {}",
            id,
            domain,
            job.job_type,
            record.pipeline_step
        );

        match self.run_stages(&job, &domain, record).await {
            Ok(record) => {
                let report = JobReport::from_record(&record, started.elapsed());
                tracing::info!(
                    "Job {} completed: {} categories ok, {} failed, {} products in {:?}",
                    id,
                    report.categories_succeeded,
                    report.categories_failed,
                    report.quality.unique_products,
                    started.elapsed()
                );
                Ok(report)
            }
            Err(CrawlError::Cancelled) => {
                tracing::info!("Job {} cancelled; checkpoint left resumable", id);
                Err(CrawlError::Cancelled)
            }
            Err(e) => {
                tracing::error!("Job {} failed: {}", id, e);
                let details = ErrorDetails::new(e.to_string(), e.code());
                if let Err(mark_err) = self.checkpoints.mark_failed(id, details).await {
                    tracing::error!("Could not mark job {} failed: {}", id, mark_err);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        job: &CrawlJob,
        domain: &str,
        mut record: CheckpointRecord,
    ) -> Result<CheckpointRecord> {
        let id = record.checkpoint_id;
        check_cancelled(job)?;

        if record.pipeline_step <= PipelineStep::NAVIGATION {
            let top_level = self.discover(job, domain).await?;
            record = self
                .persist(
                    id,
                    PipelineDelta {
                        pipeline_step: Some(PipelineStep::CATEGORY_EXPANSION),
                        urls_discovered: top_level.iter().map(|c| c.url.clone()).collect(),
                        categories: top_level,
                        ..PipelineDelta::default()
                    },
                )
                .await?;
        }
        check_cancelled(job)?;

        if record.pipeline_step <= PipelineStep::CATEGORY_EXPANSION {
            let tree = self.expand(job, domain, &record.pipeline_data.categories).await?;
            let targets: Vec<String> = tree
                .iter()
                .filter(|c| c.is_target)
                .map(|c| c.url.clone())
                .collect();
            tracing::info!(
                "Category tree has {} nodes, {} extraction targets",
                tree.len(),
                targets.len()
            );

            let next = if job.job_type.extracts_listings() {
                PipelineStep::EXTRACTION
            } else {
                PipelineStep::FINALIZE
            };
            record = self
                .persist(
                    id,
                    PipelineDelta {
                        pipeline_step: Some(next),
                        urls_discovered: targets,
                        categories: tree,
                        ..PipelineDelta::default()
                    },
                )
                .await?;
        }
        check_cancelled(job)?;

        if record.pipeline_step <= PipelineStep::EXTRACTION {
            self.extract_targets(job, domain, &record).await?;
            check_cancelled(job)?;
            self.persist(id, PipelineDelta::step(PipelineStep::FINALIZE))
                .await?;
        }

        Ok(self.checkpoints.mark_completed(id).await?)
    }

    // ===== Checkpoint =====

    /// Finds the checkpoint a job continues, or creates one
    async fn resolve_checkpoint(&self, job: &CrawlJob, domain: &str) -> Result<CheckpointRecord> {
        if let Some(id) = job.job_id {
            match self.checkpoints.get(id).await? {
                Some(record) if record.site_domain != domain => {
                    return Err(ValidationError {
                        fields: vec![FieldError {
                            field: "site_domain",
                            message: format!(
                                "checkpoint {} belongs to {}, not {}",
                                id, record.site_domain, domain
                            ),
                        }],
                    }
                    .into());
                }
                Some(record) if record.status == CheckpointStatus::Active => {
                    if !record.is_expired(chrono::Utc::now()) {
                        tracing::info!("Resuming checkpoint {}", id);
                        return Ok(record);
                    }
                    self.checkpoints.mark_expired(id).await?;
                    tracing::info!("Checkpoint {} expired, starting a new one", id);
                }
                Some(record) if record.status == CheckpointStatus::Failed => {
                    if !record.is_expired(chrono::Utc::now()) {
                        return Ok(self.checkpoints.retry(&record).await?);
                    }
                    tracing::info!("Failed checkpoint {} expired, starting a new one", id);
                }
                Some(record) => {
                    return Err(CheckpointError::Terminal {
                        id,
                        status: record.status,
                    }
                    .into());
                }
                None => {
                    let draft = CheckpointDraft {
                        checkpoint_id: Some(id.to_string()),
                        ..CheckpointDraft::new(domain, job.job_type)
                    };
                    return Ok(self.checkpoints.create(draft).await?);
                }
            }
        } else if job.resume {
            if let Some(record) = self.checkpoints.find_resumable(domain, job.job_type).await? {
                tracing::info!(
                    "Resuming checkpoint {} at step {} ({} of {} URLs processed)",
                    record.checkpoint_id,
                    record.pipeline_step,
                    record.pipeline_data.urls_processed.len(),
                    record.pipeline_data.urls_discovered.len()
                );
                return Ok(record);
            }
            if let Some(failed) = self.checkpoints.find_retryable(domain, job.job_type).await? {
                return Ok(self.checkpoints.retry(&failed).await?);
            }
        }

        Ok(self
            .checkpoints
            .create(CheckpointDraft::new(domain, job.job_type))
            .await?)
    }

    /// Merges a delta, retrying store failures with exponential backoff
    async fn persist(
        &self,
        id: uuid::Uuid,
        delta: PipelineDelta,
    ) -> Result<CheckpointRecord> {
        let mut backoff = self.persist_backoff;
        let mut attempt = 1;

        loop {
            match self.checkpoints.apply_delta(id, delta.clone()).await {
                Ok(record) => return Ok(record),
                Err(CheckpointError::Store(e)) if attempt < self.persist_retries => {
                    tracing::warn!(
                        "Checkpoint write {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        self.persist_retries,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ===== Throttled page access =====

    async fn slot<'a>(&'a self, domain: &str) -> Result<ThrottlePermit<'a>> {
        let permit = self
            .throttle
            .acquire(domain, SlotPolicy::Wait, Some(self.slot_timeout))
            .await?;
        if !permit.delay_applied().is_zero() {
            tracing::trace!("Waited {:?} for {}", permit.delay_applied(), domain);
        }
        Ok(permit)
    }

    /// Feeds a fetch outcome back into the throttle
    fn observe<T>(&self, domain: &str, outcome: &std::result::Result<T, PageError>) {
        match outcome {
            Ok(_) => self.throttle.record_success(domain),
            Err(e @ (PageError::Navigation { .. } | PageError::Timeout(_))) => {
                self.throttle.record_failure(domain, e.status())
            }
            // Local failures say nothing about the server
            Err(_) => {}
        }
    }

    // ===== Stage 1 =====

    async fn discover(&self, job: &CrawlJob, domain: &str) -> Result<Vec<CategoryEntry>> {
        let root = canonicalize_url(&job.root_url)?;
        let mut page = self.browser.open_page().await?;

        let found = {
            let _permit = self.slot(domain).await?;
            let found = self
                .discovery
                .discover_top_level(page.as_mut(), root.as_str())
                .await;
            self.observe(domain, &found);
            found?
        };

        let mut seen = HashSet::new();
        let top_level: Vec<CategoryEntry> = found
            .into_iter()
            .filter(|link| seen.insert(link.url.clone()))
            .take(job.limits.max_categories_per_level)
            .map(|link| CategoryEntry {
                name: link.name,
                url: link.url,
                depth: 0,
                parent: None,
                has_products: false,
                is_target: false,
            })
            .collect();

        if top_level.is_empty() {
            return Err(CrawlError::Extraction(format!(
                "no navigation categories found at {}",
                root
            )));
        }

        tracing::info!("Discovered {} top-level categories", top_level.len());
        Ok(top_level)
    }

    // ===== Stage 2 =====

    /// Breadth-first expansion under the depth and per-level limits
    ///
    /// A node whose expansion fails is kept as a leaf. Leaves and nodes known
    /// to list products become extraction targets.
    async fn expand(
        &self,
        job: &CrawlJob,
        domain: &str,
        top_level: &[CategoryEntry],
    ) -> Result<Vec<CategoryEntry>> {
        let limits = job.limits;
        let mut tree: Vec<CategoryEntry> =
            top_level.iter().filter(|c| c.depth == 0).cloned().collect();
        let mut seen: HashSet<String> = tree.iter().map(|c| c.url.clone()).collect();
        let mut frontier: Vec<usize> = (0..tree.len()).collect();
        let mut page = self.browser.open_page().await?;

        for depth in 1..=limits.max_depth {
            let mut next = Vec::new();

            for parent in frontier {
                check_cancelled(job)?;
                if next.len() >= limits.max_categories_per_level {
                    break;
                }

                let link = CategoryLink {
                    name: tree[parent].name.clone(),
                    url: tree[parent].url.clone(),
                };
                let expanded = {
                    let _permit = self.slot(domain).await?;
                    let expanded = self
                        .discovery
                        .expand_category(page.as_mut(), &link, depth)
                        .await;
                    self.observe(domain, &expanded);
                    expanded
                };

                let children = match expanded {
                    Ok(children) => children,
                    Err(e) => {
                        tracing::warn!("Expanding '{}' failed, keeping it as a leaf: {}", link.name, e);
                        continue;
                    }
                };

                let mut kept = 0;
                for child in children {
                    if kept >= limits.max_categories_per_level
                        || next.len() >= limits.max_categories_per_level
                    {
                        break;
                    }
                    if !seen.insert(child.url.clone()) {
                        continue;
                    }
                    tree.push(CategoryEntry {
                        name: child.name,
                        url: child.url,
                        depth,
                        parent: Some(link.url.clone()),
                        has_products: child.has_products,
                        is_target: false,
                    });
                    next.push(tree.len() - 1);
                    kept += 1;
                }
            }

            tracing::debug!("Depth {} kept {} categories", depth, next.len());
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let parents: HashSet<String> = tree.iter().filter_map(|c| c.parent.clone()).collect();
        for entry in &mut tree {
            entry.is_target = entry.has_products || !parents.contains(&entry.url);
        }
        Ok(tree)
    }

    // ===== Stage 3 =====

    async fn extract_targets(
        &self,
        job: &CrawlJob,
        domain: &str,
        record: &CheckpointRecord,
    ) -> Result<()> {
        let id = record.checkpoint_id;
        let total = record.pipeline_data.targets().count();
        let pending: Vec<CategoryEntry> = record
            .pipeline_data
            .targets()
            .filter(|c| !record.pipeline_data.is_processed(&c.url))
            .cloned()
            .collect();

        tracing::info!(
            "Extracting {} of {} categories ({} already processed)",
            pending.len(),
            total,
            total - pending.len()
        );

        let mut queue = pending;
        let mut stalled_rounds = 0;
        while !queue.is_empty() {
            let round = self.extract_round(job, domain, id, &queue).await?;
            let Some(cause) = round.backpressure else {
                break;
            };

            if round.finished > 0 {
                stalled_rounds = 0;
            } else {
                stalled_rounds += 1;
            }
            if stalled_rounds >= MAX_STALLED_ROUNDS {
                tracing::warn!(
                    "{} still throttled after {} rounds, leaving {} categories unprocessed",
                    domain,
                    stalled_rounds,
                    round.requeue.len()
                );
                return Err(cause.into());
            }

            tracing::info!(
                "{} is throttling ({}), requeueing {} categories",
                domain,
                cause,
                round.requeue.len()
            );
            queue = round.requeue;
        }

        Ok(())
    }

    /// Runs `queue` in batches until it is drained or the throttle pushes back
    ///
    /// Once a batch has a deferred category no further batch starts; the
    /// deferred categories and every untouched one are handed back.
    async fn extract_round(
        &self,
        job: &CrawlJob,
        domain: &str,
        id: uuid::Uuid,
        queue: &[CategoryEntry],
    ) -> Result<ExtractionRound> {
        let batch_size = job.limits.parallel_categories.max(1);
        let mut round = ExtractionRound {
            finished: 0,
            requeue: Vec::new(),
            backpressure: None,
        };

        for (index, batch) in queue.chunks(batch_size).enumerate() {
            check_cancelled(job)?;

            let mut tasks: FuturesUnordered<_> = batch
                .iter()
                .map(|category| self.extract_category(job, domain, category))
                .collect();

            while let Some(outcome) = tasks.next().await {
                match outcome {
                    TaskOutcome::Finished(result) => {
                        let delta = PipelineDelta {
                            urls_processed: vec![result.category_url.clone()],
                            current_page: Some(result.pages_visited),
                            pagination_state: Some(result.pagination_state()),
                            extraction_results: vec![serde_json::to_value(&result)?],
                            ..PipelineDelta::default()
                        };
                        self.persist(id, delta).await?;
                        round.finished += 1;
                    }
                    TaskOutcome::Deferred { category, cause } => {
                        round.requeue.push(category);
                        round.backpressure = Some(cause);
                    }
                    TaskOutcome::Cancelled => {}
                }
            }

            if round.backpressure.is_some() {
                let untouched = queue.iter().skip((index + 1) * batch_size).cloned();
                round.requeue.extend(untouched);
                break;
            }
        }

        Ok(round)
    }

    async fn extract_category(
        &self,
        job: &CrawlJob,
        domain: &str,
        category: &CategoryEntry,
    ) -> TaskOutcome {
        let started = Instant::now();
        let mut result = CategoryResult::new(category);

        match self.paginate(job, domain, &mut result).await {
            Ok(()) => {}
            Err(CrawlError::Cancelled) => return TaskOutcome::Cancelled,
            Err(CrawlError::Throttle(cause)) => {
                tracing::debug!("Category '{}' deferred: {}", category.name, cause);
                return TaskOutcome::Deferred {
                    category: category.clone(),
                    cause,
                };
            }
            Err(e) => {
                tracing::warn!("Category '{}' failed: {}", category.name, e);
                result.status = CategoryStatus::Error;
                result.stop_reason.get_or_insert(StopReason::Error);
                result.error = Some(ErrorDetails::new(e.to_string(), e.code()));
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            "Category '{}': {} products over {} pages ({:?})",
            result.category_name,
            result.products.len(),
            result.pages_visited,
            result.stop_reason
        );
        TaskOutcome::Finished(result)
    }

    /// Detect, then extract and advance until a limit or the last page
    async fn paginate(
        &self,
        job: &CrawlJob,
        domain: &str,
        result: &mut CategoryResult,
    ) -> Result<()> {
        let mut page: Box<dyn Page> = self.browser.open_page().await?;

        {
            let _permit = self.slot(domain).await?;
            let loaded = page.navigate(&result.category_url, self.navigation_timeout).await;
            self.observe(domain, &loaded);
            loaded?;
        }
        result.pages_visited = 1;

        let pagination_type = self.pagination.detect_type(page.as_mut()).await;
        result.pagination_type = Some(pagination_type);
        let mut session = PaginationSession::new(pagination_type);
        let limits = PaginationLimits {
            max_pages: job.limits.max_pages,
            max_items: job.limits.max_products_per_category,
            empty_page_threshold: self.pagination.config().empty_page_threshold,
        };

        loop {
            let items = self.extractor.extract_listing_page(page.as_mut()).await?;
            let fresh = session.record_items(items, |item| item.item_key.as_str(), limits.max_items);
            result.products.extend(fresh);

            if let Some(reason) = session.limit_reached(&limits) {
                session.stop(reason);
                break;
            }
            if !pagination_type.is_paginated() {
                session.stop(StopReason::NoMorePages);
                break;
            }
            if job.cancel.is_cancelled() {
                session.stop(StopReason::Cancelled);
                result.stop_reason = session.stop_reason;
                return Err(CrawlError::Cancelled);
            }

            let advanced = {
                let _permit = self.slot(domain).await?;
                let advanced = self.pagination.try_advance(page.as_mut(), &mut session).await;
                self.observe(domain, &advanced);
                advanced
            };

            match advanced {
                Ok(true) => result.pages_visited = session.current_page,
                Ok(false) => {
                    session.stop(StopReason::NoMorePages);
                    break;
                }
                Err(e) => {
                    // Fail closed: keep what was collected
                    tracing::warn!(
                        "Pagination of '{}' stopped after page {}: {}",
                        result.category_name,
                        session.current_page,
                        e
                    );
                    result.error = Some(ErrorDetails::new(e.to_string(), e.code()));
                    session.stop(StopReason::Error);
                    break;
                }
            }
        }

        result.stop_reason = session.stop_reason;
        Ok(())
    }
}

fn check_cancelled(job: &CrawlJob) -> Result<()> {
    if job.cancel.is_cancelled() {
        Err(CrawlError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SelectorCatalog;
    use crate::checkpoint::JobType;
    use crate::config::parse_config;
    use crate::page::script::{ScriptedBrowser, ScriptedDoc, ScriptedElement, ScriptedSite};
    use crate::storage::{CheckpointStore, MemoryCheckpointStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const ROOT: &str = "https://shop.test/";
    const SHOES: &str = "https://shop.test/c/shoes";
    const BAGS: &str = "https://shop.test/c/bags";
    const HATS: &str = "https://shop.test/c/hats";

    fn config() -> Config {
        parse_config(
            r#"
[crawler]
persist-backoff-ms = 10

[throttle]
default-delay-ms = 10
min-delay-ms = 5
max-delay-ms = 100

[pagination]
scroll-delay-ms = 1

[user-agent]
crawler-name = "ShelfBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
database-path = "./checkpoints.db"
summary-path = "./summary.md"
"#,
        )
        .unwrap()
    }

    struct Harness {
        orchestrator: CrawlOrchestrator,
        site: Arc<ScriptedSite>,
        checkpoints: Arc<CheckpointManager>,
        config: Config,
    }

    impl Harness {
        fn new(site: ScriptedSite) -> Self {
            Self::with_store(site, Arc::new(MemoryCheckpointStore::new()))
        }

        fn with_store(site: ScriptedSite, store: Arc<dyn CheckpointStore>) -> Self {
            Self::build(site, store, config())
        }

        fn with_config(site: ScriptedSite, config: Config) -> Self {
            Self::build(site, Arc::new(MemoryCheckpointStore::new()), config)
        }

        fn build(site: ScriptedSite, store: Arc<dyn CheckpointStore>, config: Config) -> Self {
            let browser = ScriptedBrowser::new(site);
            let site = browser.site.clone();
            let catalog = Arc::new(SelectorCatalog::new(
                config.catalog.clone(),
                Duration::from_secs(1),
            ));
            let checkpoints = Arc::new(CheckpointManager::new(store, 30));
            let orchestrator = CrawlOrchestrator::new(
                &config,
                Arc::new(browser),
                catalog.clone(),
                catalog,
                checkpoints.clone(),
            );

            Self {
                orchestrator,
                site,
                checkpoints,
                config,
            }
        }

        /// A job that extracts top-level categories without expanding them
        fn flat_job(&self) -> CrawlJob {
            let mut job = CrawlJob::new(ROOT, &self.config.crawler);
            job.limits.max_depth = 0;
            job
        }
    }

    fn home(links: &[(&str, &str)]) -> ScriptedDoc {
        ScriptedDoc::new().with(
            "nav a",
            links
                .iter()
                .map(|(name, href)| ScriptedElement::link(name, href))
                .collect(),
        )
    }

    fn listing(prefix: &str, count: usize) -> ScriptedDoc {
        ScriptedDoc::new().with_items(".product-item a", prefix, count)
    }

    fn target(name: &str, url: &str) -> CategoryEntry {
        CategoryEntry {
            name: name.to_string(),
            url: url.to_string(),
            depth: 0,
            parent: None,
            has_products: false,
            is_target: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_category_does_not_fail_job() {
        let site = ScriptedSite::new()
            .page(
                ROOT,
                home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags"), ("Hats", "/c/hats")]),
            )
            .page(SHOES, listing("shoe", 3))
            .fail(BAGS, 500)
            .page(HATS, listing("hat", 2));
        let harness = Harness::new(site);

        let report = harness.orchestrator.run(harness.flat_job()).await.unwrap();

        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.categories_targeted, 3);
        assert_eq!(report.categories_succeeded, 2);
        assert_eq!(report.categories_failed, 1);
        assert_eq!(report.errors[0].category_url, BAGS);
        assert_eq!(report.errors[0].code, "navigation");
        assert_eq!(report.quality.unique_products, 5);

        let record = harness
            .checkpoints
            .get(report.checkpoint_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.pipeline_step, PipelineStep::FINALIZE);
        assert_eq!(record.pipeline_data.urls_processed.len(), 3);
        assert!(record.error_details.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_processed_categories() {
        let site = ScriptedSite::new()
            .page(SHOES, listing("shoe", 3))
            .page(BAGS, listing("bag", 1))
            .page(HATS, listing("hat", 1));
        let harness = Harness::new(site);

        let seeded = harness
            .checkpoints
            .create(CheckpointDraft::new("shop.test", JobType::ProductCatalog))
            .await
            .unwrap();
        let shoes = target("Shoes", SHOES);
        let mut done = CategoryResult::new(&shoes);
        done.pages_visited = 1;
        harness
            .checkpoints
            .apply_delta(
                seeded.checkpoint_id,
                PipelineDelta {
                    pipeline_step: Some(PipelineStep::EXTRACTION),
                    urls_discovered: vec![SHOES.to_string(), BAGS.to_string(), HATS.to_string()],
                    urls_processed: vec![SHOES.to_string()],
                    categories: vec![shoes, target("Bags", BAGS), target("Hats", HATS)],
                    extraction_results: vec![serde_json::to_value(&done).unwrap()],
                    ..PipelineDelta::default()
                },
            )
            .await
            .unwrap();

        let report = harness.orchestrator.run(harness.flat_job()).await.unwrap();

        assert_eq!(report.checkpoint_id, seeded.checkpoint_id);
        assert_eq!(report.categories_succeeded, 3);
        assert_eq!(harness.site.visit_count(ROOT), 0);
        assert_eq!(harness.site.visit_count(SHOES), 0);
        assert_eq!(harness.site.visit_count(BAGS), 1);
        assert_eq!(harness.site.visit_count(HATS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_pages_respected() {
        let page = |prefix: &str, next: &str| {
            listing(prefix, 3).with("a[rel='next']", vec![ScriptedElement::link("Next", next)])
        };
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes")]))
            .page(SHOES, page("first", "/c/shoes?page=2"))
            .page("https://shop.test/c/shoes?page=2", page("second", "/c/shoes?page=3"))
            .page("https://shop.test/c/shoes?page=3", listing("third", 3));
        let harness = Harness::new(site);

        let mut job = harness.flat_job();
        job.limits.max_pages = 2;
        let report = harness.orchestrator.run(job).await.unwrap();

        assert_eq!(report.pages_visited, 2);
        assert_eq!(report.quality.unique_products, 6);
        assert_eq!(harness.site.visit_count("https://shop.test/c/shoes?page=2"), 1);
        assert_eq!(harness.site.visit_count("https://shop.test/c/shoes?page=3"), 0);

        let record = harness
            .checkpoints
            .get(report.checkpoint_id)
            .await
            .unwrap()
            .unwrap();
        let result: CategoryResult =
            serde_json::from_value(record.pipeline_data.extraction_results[0].clone()).unwrap();
        assert_eq!(result.stop_reason, Some(StopReason::MaxPages));
        assert_eq!(record.pipeline_data.current_page, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expansion_builds_targets() {
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags")]))
            .page(
                SHOES,
                ScriptedDoc::new().with(
                    ".subcategories a",
                    vec![
                        ScriptedElement::link("Boots", "/c/shoes/boots"),
                        ScriptedElement::link("Sandals", "/c/shoes/sandals"),
                    ],
                ),
            )
            .page(BAGS, listing("bag", 2))
            .page("https://shop.test/c/shoes/boots", listing("boot", 2))
            .page("https://shop.test/c/shoes/sandals", listing("sandal", 2));
        let harness = Harness::new(site);

        let mut job = CrawlJob::new(ROOT, &harness.config.crawler);
        job.limits.max_depth = 1;
        let report = harness.orchestrator.run(job).await.unwrap();

        assert_eq!(report.categories_discovered, 4);
        assert_eq!(report.categories_targeted, 3);
        assert_eq!(report.categories_succeeded, 3);
        assert_eq!(report.quality.unique_products, 6);
        // Shoes is only a parent, so it is expanded but never extracted
        assert_eq!(harness.site.visit_count(SHOES), 1);
        assert_eq!(harness.site.visit_count(BAGS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_discovery_skips_extraction() {
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags")]))
            .page(SHOES, listing("shoe", 2))
            .page(BAGS, listing("bag", 2));
        let harness = Harness::new(site);

        let mut job = harness.flat_job();
        job.job_type = JobType::CategoryDiscovery;
        let report = harness.orchestrator.run(job).await.unwrap();

        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.categories_targeted, 2);
        assert_eq!(report.categories_succeeded, 0);
        assert_eq!(harness.site.visit_count(SHOES), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_marks_job_failed() {
        let harness = Harness::new(ScriptedSite::new().fail(ROOT, 503));
        let id = Uuid::new_v4();
        let mut job = harness.flat_job();
        job.job_id = Some(id);

        let err = harness.orchestrator.run(job).await.unwrap_err();
        assert_eq!(err.code(), "navigation");

        let record = harness.checkpoints.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Failed);
        assert_eq!(record.pipeline_step, PipelineStep::NAVIGATION);
        assert_eq!(record.error_details.unwrap().code, "navigation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_navigation_fails_job() {
        let harness = Harness::new(ScriptedSite::new().page(ROOT, ScriptedDoc::new()));

        let err = harness.orchestrator.run(harness.flat_job()).await.unwrap_err();
        assert!(matches!(err, CrawlError::Extraction(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_stays_resumable() {
        let harness = Harness::new(ScriptedSite::new().page(ROOT, home(&[("Shoes", "/c/shoes")])));
        let id = Uuid::new_v4();
        let mut job = harness.flat_job();
        job.job_id = Some(id);
        job.cancel.cancel();

        let err = harness.orchestrator.run(job).await.unwrap_err();
        assert!(matches!(err, CrawlError::Cancelled));

        let record = harness.checkpoints.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Active);
        assert_eq!(record.pipeline_step, PipelineStep::NAVIGATION);
        assert!(harness.site.visits().is_empty());
    }

    fn three_categories() -> ScriptedSite {
        ScriptedSite::new().page(
            ROOT,
            home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags"), ("Hats", "/c/hats")]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_domain_leaves_categories_unprocessed() {
        let site = three_categories()
            .fail(SHOES, 403)
            .page(BAGS, listing("bag", 1))
            .page(HATS, listing("hat", 1));
        let mut config = config();
        config.crawler.slot_timeout_ms = 2_000;
        let harness = Harness::with_config(site, config);

        let id = Uuid::new_v4();
        let mut job = harness.flat_job();
        job.job_id = Some(id);
        job.limits.parallel_categories = 1;

        let err = harness.orchestrator.run(job).await.unwrap_err();
        assert!(matches!(
            err,
            CrawlError::Throttle(ThrottleError::Timeout { .. })
        ));

        let record = harness.checkpoints.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Failed);
        assert_eq!(record.error_details.unwrap().code, "throttle");
        // The 403 itself is a category failure; the rest never got a slot
        assert!(record.pipeline_data.is_processed(SHOES));
        assert!(!record.pipeline_data.is_processed(BAGS));
        assert!(!record.pipeline_data.is_processed(HATS));
        assert_eq!(record.pipeline_data.extraction_results.len(), 1);
        assert_eq!(harness.site.visit_count(BAGS), 0);
        assert_eq!(harness.site.visit_count(HATS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_categories_run_after_cooldown() {
        let site = three_categories()
            .fail(SHOES, 403)
            .page(BAGS, listing("bag", 1))
            .page(HATS, listing("hat", 1));
        let mut config = config();
        config.crawler.slot_timeout_ms = 2_000;
        config.throttle.block_cooldown_ms = 3_000;
        let harness = Harness::with_config(site, config);

        let mut job = harness.flat_job();
        job.limits.parallel_categories = 1;
        let report = harness.orchestrator.run(job).await.unwrap();

        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.categories_succeeded, 2);
        assert_eq!(report.categories_failed, 1);
        assert_eq!(report.errors[0].category_url, SHOES);
        assert_eq!(harness.site.visit_count(BAGS), 1);
        assert_eq!(harness.site.visit_count(HATS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_retried_by_id() {
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags")]))
            .page(SHOES, listing("shoe", 2))
            .page(BAGS, listing("bag", 2));
        let harness = Harness::new(site);
        let failed = seed_failed_extraction(&harness).await;

        let mut job = harness.flat_job();
        job.job_id = Some(failed.checkpoint_id);
        let report = harness.orchestrator.run(job).await.unwrap();

        assert_ne!(report.checkpoint_id, failed.checkpoint_id);
        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.categories_succeeded, 2);
        assert_eq!(harness.site.visit_count(ROOT), 0);
        assert_eq!(harness.site.visit_count(SHOES), 0);
        assert_eq!(harness.site.visit_count(BAGS), 1);

        let original = harness
            .checkpoints
            .get(failed.checkpoint_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.status, CheckpointStatus::Failed);
        assert!(!original.pipeline_data.is_processed(BAGS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_picks_up_failed_job() {
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes"), ("Bags", "/c/bags")]))
            .page(SHOES, listing("shoe", 2))
            .page(BAGS, listing("bag", 2));
        let harness = Harness::new(site);
        let failed = seed_failed_extraction(&harness).await;

        let report = harness.orchestrator.run(harness.flat_job()).await.unwrap();

        assert_ne!(report.checkpoint_id, failed.checkpoint_id);
        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(harness.site.visit_count(ROOT), 0);
        assert_eq!(harness.site.visit_count(SHOES), 0);

        // A completed retry hides the failed record from later runs
        let report = harness.orchestrator.run(harness.flat_job()).await.unwrap();
        assert_ne!(report.checkpoint_id, failed.checkpoint_id);
        assert_eq!(harness.site.visit_count(ROOT), 1);
    }

    /// A job that failed in stage 3 with Shoes done and Bags still pending
    async fn seed_failed_extraction(harness: &Harness) -> CheckpointRecord {
        let seeded = harness
            .checkpoints
            .create(CheckpointDraft::new("shop.test", JobType::ProductCatalog))
            .await
            .unwrap();
        let shoes = target("Shoes", SHOES);
        let mut done = CategoryResult::new(&shoes);
        done.pages_visited = 1;
        harness
            .checkpoints
            .apply_delta(
                seeded.checkpoint_id,
                PipelineDelta {
                    pipeline_step: Some(PipelineStep::EXTRACTION),
                    urls_discovered: vec![SHOES.to_string(), BAGS.to_string()],
                    urls_processed: vec![SHOES.to_string()],
                    categories: vec![shoes, target("Bags", BAGS)],
                    extraction_results: vec![serde_json::to_value(&done).unwrap()],
                    ..PipelineDelta::default()
                },
            )
            .await
            .unwrap();
        harness
            .checkpoints
            .mark_failed(
                seeded.checkpoint_id,
                ErrorDetails::new("slot wait timed out", "throttle"),
            )
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_id_for_other_domain_rejected() {
        let harness = Harness::new(ScriptedSite::new());
        let other = harness
            .checkpoints
            .create(CheckpointDraft::new("other.test", JobType::ProductCatalog))
            .await
            .unwrap();
        let mut job = harness.flat_job();
        job.job_id = Some(other.checkpoint_id);

        let err = harness.orchestrator.run(job).await.unwrap_err();
        assert!(matches!(err, CrawlError::Validation(_)));
    }

    /// Accepts a fixed number of writes, then fails every later one
    struct FlakyStore {
        inner: MemoryCheckpointStore,
        writes_left: AtomicUsize,
        failed_writes: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn upsert(&self, record: &CheckpointRecord) -> StorageResult<()> {
            let allowed = self
                .writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                self.failed_writes.fetch_add(1, Ordering::SeqCst);
                return Err(StorageError::Database("disk I/O error".to_string()));
            }
            self.inner.upsert(record).await
        }

        async fn get(&self, id: Uuid) -> StorageResult<Option<CheckpointRecord>> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: Uuid) -> StorageResult<bool> {
            self.inner.delete(id).await
        }

        async fn find_latest(
            &self,
            site_domain: &str,
            job_type: JobType,
            status: Option<CheckpointStatus>,
        ) -> StorageResult<Option<CheckpointRecord>> {
            self.inner.find_latest(site_domain, job_type, status).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
            self.inner.purge_expired(now).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_retries_exhausted_fails_job() {
        let store = Arc::new(FlakyStore {
            inner: MemoryCheckpointStore::new(),
            writes_left: AtomicUsize::new(1),
            failed_writes: AtomicUsize::new(0),
        });
        let site = ScriptedSite::new()
            .page(ROOT, home(&[("Shoes", "/c/shoes")]))
            .page(SHOES, listing("shoe", 1));
        let harness = Harness::with_store(site, store.clone());

        let err = harness.orchestrator.run(harness.flat_job()).await.unwrap_err();

        assert!(matches!(
            err,
            CrawlError::Checkpoint(CheckpointError::Store(_))
        ));
        // Three attempts at the stage-1 write, then the failed mark
        assert_eq!(store.failed_writes.load(Ordering::SeqCst), 4);
    }
}
