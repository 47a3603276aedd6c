//! Crawler coordinator - main crawl orchestration logic
//!
//! This module fans a run out into one task per active portal plus one
//! search-query task, and drives every detail page through:
//! - the robots.txt gate and the circuit-breaking HTTP manager
//! - extraction and classification
//! - scoring and phone-directory enrichment
//! - the lead writer and the `urls_seen` index

use crate::config::Config;
use crate::crawler::control::{ControlToken, CrawlControl};
use crate::crawler::links::{extract_detail_links, scoped_fragment};
use crate::crawler::portals::{DetailExtractor, PortalConfig, PortalRegistry};
use crate::crawler::query_bank::{QueryBank, QueryMode};
use crate::crawler::search::{SearchChain, SearchRequest};
use crate::extract::{ExtractionOutcome, ExtractionPipeline, PageContext};
use crate::http::{FetchResult, FetchedPage, HttpManager};
use crate::lifecycle::{CounterSnapshot, Emitter, EventCategory, EventLevel, LogEvent, RunCounters};
use crate::resilience::RequestKind;
use crate::robots::{RobotsDecision, RobotsGate};
use crate::scoring::{AdjustmentStore, Enricher, PhoneDirectory, Scorer};
use crate::storage::{with_storage, LeadWriter, SharedStorage, Storage, StorageError, WriteReport, WrittenTo};
use crate::url::{extract_domain, seen_key};
use crate::HarvestError;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

/// Main crawler coordinator structure
///
/// Shared behind an `Arc` by every crawl task of a run.
pub struct Coordinator {
    config: Arc<Config>,
    http: Arc<HttpManager>,
    robots: Arc<RobotsGate>,
    portals: PortalRegistry,
    search: SearchChain,
    queries: QueryBank,
    pipeline: ExtractionPipeline,
    scorer: Scorer,
    enricher: Option<Enricher>,
    writer: LeadWriter,
    storage: SharedStorage,
    counters: Arc<RunCounters>,
    emitter: Emitter,
    run_id: Option<i64>,
}

impl Coordinator {
    /// Creates a coordinator with the configured portals, search chain and
    /// query bank, writing only to the local store
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `http` - Shared HTTP manager (and through it the circuit breaker)
    /// * `storage` - Local lead store
    /// * `adjustments` - Learned score adjustments read by the scorer
    pub fn new(
        config: Arc<Config>,
        http: Arc<HttpManager>,
        storage: SharedStorage,
        adjustments: Arc<AdjustmentStore>,
    ) -> Self {
        let search = if config.crawler.search_enabled {
            SearchChain::from_config(&config, &http)
        } else {
            SearchChain::default()
        };
        let mode = config.crawler.mode.parse::<QueryMode>().unwrap_or_default();

        Self {
            robots: Arc::new(RobotsGate::new(Arc::clone(&http))),
            portals: PortalRegistry::from_overrides(&config.portals),
            search,
            queries: QueryBank::new(mode),
            pipeline: ExtractionPipeline::new(),
            scorer: Scorer::new(adjustments, config.scoring.learned_scale),
            enricher: None,
            writer: LeadWriter::local(Arc::clone(&storage)),
            storage,
            counters: Arc::new(RunCounters::new()),
            emitter: Emitter::default(),
            run_id: None,
            http,
            config,
        }
    }

    pub fn with_portals(mut self, portals: PortalRegistry) -> Self {
        self.portals = portals;
        self
    }

    pub fn with_search(mut self, search: SearchChain) -> Self {
        self.search = search;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn PhoneDirectory>) -> Self {
        self.enricher = Some(Enricher::new(directory, Arc::clone(&self.storage)));
        self
    }

    /// Replaces the local-only writer, e.g. with one that tries an external store first
    pub fn with_writer(mut self, writer: LeadWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_counters(mut self, counters: Arc<RunCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self.emitter = self.emitter.for_run(run_id);
        self
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    pub fn robots(&self) -> &Arc<RobotsGate> {
        &self.robots
    }

    pub fn http(&self) -> &Arc<HttpManager> {
        &self.http
    }

    pub fn portals(&self) -> &PortalRegistry {
        &self.portals
    }

    pub fn search(&self) -> &SearchChain {
        &self.search
    }

    pub fn query_bank(&self) -> &QueryBank {
        &self.queries
    }

    /// Runs every portal crawl and the search path to completion or stop
    ///
    /// Returns the final counters. A fatal error stops the remaining tasks
    /// at their next checkpoint, so pages already fetched are still written,
    /// and is then returned. Every other failure was already logged by the
    /// task that hit it.
    pub async fn run(self: Arc<Self>, token: ControlToken) -> Result<CounterSnapshot, HarvestError> {
        let (control, relay) = CrawlControl::linked(token);
        let token = control.token();
        let mut tasks: JoinSet<Result<(), HarvestError>> = JoinSet::new();

        for portal in self.portals.active().cloned() {
            let this = Arc::clone(&self);
            let token = token.clone();
            tasks.spawn(async move { this.crawl_portal(&portal, token).await });
        }

        if !self.search.is_empty() {
            let this = Arc::clone(&self);
            let token = token.clone();
            tasks.spawn(async move { this.run_search(token).await });
        } else if self.config.crawler.search_enabled {
            self.emitter
                .warn(EventCategory::Crawl, "No search backend available, search path disabled");
        }

        self.emitter.emit(
            LogEvent::new(EventLevel::Info, EventCategory::Crawl, "Crawl tasks started")
                .with("tasks", tasks.len() as u64)
                .with("search_backends", self.search.names().join(",")),
        );

        let mut fatal: Option<HarvestError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        self.emitter.emit(
                            LogEvent::new(EventLevel::Critical, EventCategory::Lifecycle, "Fatal error, stopping crawl tasks")
                                .with("error", e.to_string())
                                .with("classification", e.classification()),
                        );
                        control.stop();
                        fatal = Some(e);
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    self.counters.error();
                    self.emitter.emit(
                        LogEvent::new(EventLevel::Error, EventCategory::Crawl, "Crawl task panicked")
                            .with("error", join_err.to_string()),
                    );
                }
            }
        }

        relay.abort();

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.counters.snapshot()),
        }
    }

    /// Crawls one portal's listing pages in order, then their detail pages
    ///
    /// A listing page that fails or yields no links ends that template.
    async fn crawl_portal(&self, portal: &PortalConfig, mut token: ControlToken) -> Result<(), HarvestError> {
        self.emitter.emit(
            LogEvent::new(EventLevel::Info, EventCategory::Crawl, "Portal crawl started")
                .with("portal", portal.name.as_str())
                .with("templates", portal.listing_urls.len() as u64),
        );

        for template in &portal.listing_urls {
            for page in 1..=portal.pages_for(template) {
                if !token.checkpoint().await {
                    return Ok(());
                }

                let listing = PortalConfig::listing_url(template, page);
                let listing_url = match Url::parse(&listing) {
                    Ok(url) => url,
                    Err(e) => {
                        self.emitter.emit(
                            LogEvent::new(EventLevel::Warn, EventCategory::Validation, "Invalid listing URL")
                                .with("portal", portal.name.as_str())
                                .with("url", listing.as_str())
                                .with("error", e.to_string()),
                        );
                        break;
                    }
                };

                let Some(body) = self.fetch_gated(&listing_url).await else {
                    break;
                };
                let links = extract_detail_links(
                    &body.body,
                    &listing_url,
                    &portal.link_selector,
                    portal.link_pattern.as_deref(),
                );
                if links.is_empty() {
                    tracing::debug!(portal = %portal.name, url = %listing_url, "Listing page has no detail links");
                    break;
                }

                let fresh = self.filter_unseen(links).await?;
                tracing::debug!(portal = %portal.name, page, fresh = fresh.len(), "Listing page parsed");

                for link in fresh {
                    if !token.sleep(portal.delay()).await || !token.checkpoint().await {
                        return Ok(());
                    }
                    let ctx = PageContext {
                        url: link.to_string(),
                        portal: Some(portal.name.clone()),
                        query: None,
                        industry: portal.industry.clone(),
                    };
                    self.visit_detail(&link, ctx, &portal.extractor).await?;
                }

                if !token.sleep(portal.delay()).await {
                    return Ok(());
                }
            }
        }

        self.emitter.emit(
            LogEvent::new(EventLevel::Info, EventCategory::Crawl, "Portal crawl finished")
                .with("portal", portal.name.as_str()),
        );
        Ok(())
    }

    /// Issues generated queries and fans each result set out concurrently
    ///
    /// A query is only recorded in `queries_done` once a backend answered;
    /// failed queries are retried by a later run.
    async fn run_search(&self, mut token: ControlToken) -> Result<(), HarvestError> {
        let per_industry = self.config.crawler.queries_per_industry;
        let mut issued: HashMap<String, usize> = HashMap::new();
        let fan_out = self.config.crawler.max_concurrent_requests.max(1);

        for query in self.queries.generate_all(&self.config.crawler.industries) {
            if !token.checkpoint().await {
                return Ok(());
            }
            if issued.get(&query.industry).copied().unwrap_or(0) >= per_industry {
                continue;
            }

            let text = query.text.clone();
            match with_storage(&self.storage, move |s| s.is_query_done(&text)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => self.handle_storage_error(e)?,
            }

            *issued.entry(query.industry.clone()).or_insert(0) += 1;
            self.counters.query_issued();

            let request = SearchRequest {
                query: query.text.clone(),
                date_restrict: self.config.crawler.date_restrict.clone(),
                num: self.config.search.results_per_query,
            };
            let outcome = match self.search.search(&request).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    self.counters.error();
                    self.emitter.emit(
                        LogEvent::new(EventLevel::Warn, EventCategory::Network, "Search query failed")
                            .with("query", query.text.as_str())
                            .with("error", e.to_string()),
                    );
                    continue;
                }
            };

            self.emitter.emit(
                LogEvent::new(EventLevel::Info, EventCategory::Crawl, "Search query answered")
                    .with("query", query.text.as_str())
                    .with("backend", outcome.backend.as_str())
                    .with("hits", outcome.hits.len() as u64),
            );

            let text = query.text.clone();
            let hits = outcome.hits.len();
            let run_id = self.run_id;
            if let Err(e) = with_storage(&self.storage, move |s| s.mark_query_done(&text, run_id, hits)).await {
                self.handle_storage_error(e)?;
            }

            let urls: Vec<Url> = outcome.hits.iter().filter_map(|hit| Url::parse(&hit.url).ok()).collect();
            let fresh = self.filter_unseen(urls).await?;

            let mut visits = stream::iter(fresh)
                .map(|url| {
                    let mut token = token.clone();
                    let ctx = PageContext {
                        url: url.to_string(),
                        portal: extract_domain(&url),
                        query: Some(query.text.clone()),
                        industry: Some(query.industry.clone()),
                    };
                    async move {
                        if !token.checkpoint().await {
                            return Ok(());
                        }
                        self.visit_detail(&url, ctx, &DetailExtractor::Generic).await
                    }
                })
                .buffer_unordered(fan_out);

            while let Some(result) = visits.next().await {
                result?;
            }
        }

        Ok(())
    }

    /// Fetches a detail page and runs it through extraction and persistence
    ///
    /// The URL is recorded as seen only after the page was fetched and
    /// processed, so deferred or failed pages are retried later.
    async fn visit_detail(&self, url: &Url, ctx: PageContext, extractor: &DetailExtractor) -> Result<(), HarvestError> {
        let Some(page) = self.fetch_gated(url).await else {
            return Ok(());
        };

        let html = match extractor {
            DetailExtractor::Generic => page.body,
            DetailExtractor::Scoped(selector) => scoped_fragment(&page.body, selector).unwrap_or(page.body),
        };
        self.process_page(&html, &ctx).await?;

        let key = seen_key(url.as_str());
        let run_id = self.run_id;
        if let Err(e) = with_storage(&self.storage, move |s| s.mark_url_seen(&key, run_id)).await {
            self.handle_storage_error(e)?;
        }
        Ok(())
    }

    /// Extracts, scores, enriches and stores the lead on a fetched page
    ///
    /// Returns the write report when a lead was stored.
    pub async fn process_page(&self, html: &str, ctx: &PageContext) -> Result<Option<WriteReport>, HarvestError> {
        let mut lead = match self.pipeline.process(html, ctx).await {
            ExtractionOutcome::Lead(lead) => *lead,
            ExtractionOutcome::Rejected { lead_type, reason } => {
                self.counters.lead_rejected();
                self.emitter.emit(
                    LogEvent::new(EventLevel::Debug, EventCategory::Extraction, "Page rejected")
                        .with("url", ctx.url.as_str())
                        .with("lead_type", lead_type.to_db_string())
                        .with("reason", reason),
                );
                return Ok(None);
            }
            ExtractionOutcome::NoContact { lead_type } => {
                tracing::debug!(url = %ctx.url, lead_type = %lead_type, "No contact data on page");
                return Ok(None);
            }
        };
        self.counters.lead_found();

        let breakdown = self.scorer.score(&mut lead);
        if let Some(enricher) = &self.enricher {
            match enricher.enrich(&mut lead).await {
                Ok(outcome) => tracing::debug!(url = %ctx.url, ?outcome, "Enrichment finished"),
                Err(e) => self.handle_storage_error(e)?,
            }
        }

        if lead.quality_score < self.config.scoring.min_quality_score {
            self.counters.lead_rejected();
            tracing::debug!(url = %ctx.url, score = lead.quality_score, "Lead below minimum quality");
            return Ok(None);
        }

        match self.writer.write(&lead).await {
            Ok(report) => {
                self.counters.lead_accepted();
                let target = match &report.written_to {
                    WrittenTo::External { store, .. } => store.clone(),
                    WrittenTo::Local => "local".to_string(),
                };
                self.emitter.emit(
                    LogEvent::new(EventLevel::Info, EventCategory::Db, "Lead stored")
                        .with("url", ctx.url.as_str())
                        .with("lead_id", report.outcome.id())
                        .with("inserted", report.outcome.is_insert())
                        .with("target", target)
                        .with("lead_type", lead.lead_type.to_db_string())
                        .with("quality_score", lead.quality_score as u64)
                        .with("adjustment_version", breakdown.version),
                );
                Ok(Some(report))
            }
            Err(e) => {
                self.handle_storage_error(e)?;
                Ok(None)
            }
        }
    }

    /// Robots gate then HTTP fetch, with counters and events for each outcome
    async fn fetch_gated(&self, url: &Url) -> Option<FetchedPage> {
        self.counters.link_checked();

        match self.robots.check(url).await {
            RobotsDecision::Allowed => {}
            RobotsDecision::Disallowed => {
                self.counters.blocked();
                self.emitter.emit(
                    LogEvent::new(EventLevel::Info, EventCategory::Security, "Disallowed by robots.txt")
                        .with("url", url.as_str()),
                );
                return None;
            }
            RobotsDecision::Deferred { retry_in } => {
                self.counters.deferred();
                tracing::debug!(url = %url, retry_in_secs = retry_in.as_secs(), "robots.txt deferred by circuit breaker");
                return None;
            }
            RobotsDecision::Unavailable => {
                self.counters.deferred();
                tracing::debug!(url = %url, "robots.txt unavailable, page left for a later run");
                return None;
            }
        }

        match self.http.fetch(url, RequestKind::Scrape).await {
            FetchResult::Success(page) => {
                self.counters.page_fetched();
                Some(page)
            }
            FetchResult::Deferred { host, retry_in } => {
                self.counters.deferred();
                self.emitter.emit(
                    LogEvent::new(EventLevel::Debug, EventCategory::CircuitBreaker, "Request deferred")
                        .with("url", url.as_str())
                        .with("host", host)
                        .with("retry_in_secs", retry_in.as_secs()),
                );
                None
            }
            FetchResult::HttpError { status_code } => {
                let (level, category) = if matches!(status_code, 403 | 429) {
                    self.counters.blocked();
                    (EventLevel::Warn, EventCategory::CircuitBreaker)
                } else {
                    self.counters.error();
                    (EventLevel::Warn, EventCategory::Network)
                };
                self.emitter.emit(
                    LogEvent::new(level, category, "HTTP error")
                        .with("url", url.as_str())
                        .with("status", status_code as u64),
                );
                None
            }
            FetchResult::NetworkError { error, timeout } => {
                if timeout {
                    self.counters.timeout();
                } else {
                    self.counters.error();
                }
                self.emitter.emit(
                    LogEvent::new(EventLevel::Warn, EventCategory::Network, "Network error")
                        .with("url", url.as_str())
                        .with("timeout", timeout)
                        .with("error", error),
                );
                None
            }
        }
    }

    /// Drops links already recorded in `urls_seen`
    async fn filter_unseen(&self, links: Vec<Url>) -> Result<Vec<Url>, HarvestError> {
        let candidates = links.clone();
        let result = with_storage(&self.storage, move |s| {
            let mut fresh = Vec::new();
            for link in candidates {
                if !s.is_url_seen(&seen_key(link.as_str()))? {
                    fresh.push(link);
                }
            }
            Ok(fresh)
        })
        .await;

        match result {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                self.handle_storage_error(e)?;
                Ok(links)
            }
        }
    }

    /// Fatal storage errors end the run; the rest are logged and skipped
    fn handle_storage_error(&self, e: StorageError) -> Result<(), HarvestError> {
        if e.is_fatal() {
            return Err(e.into());
        }
        self.counters.error();
        self.emitter.emit(
            LogEvent::new(EventLevel::Error, EventCategory::Db, "Storage operation failed")
                .with("error", e.to_string()),
        );
        Ok(())
    }
}
