//! Single-flight crawl driver.
//!
//! `start_crawl` claims the gate, clears the previous results and hands the
//! rest of the run to a background task that owns the gate guard. Whatever
//! way that task ends, the guard is dropped with it and the next crawl can
//! start.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::extraction::ExtractionClient;
use crate::flight::{FlightGuard, SingleFlight};
use crate::scraper::{extract_body_text, fetch_all, format_text, truncate_chars, PageFetcher};
use crate::status::StatusTracker;
use crate::store::ContentStore;

/// Operation type the crawl reports through the status tracker.
pub const FOOD_CRAWL: &str = "food_crawl";

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub sites: Vec<String>,
    pub delay: Duration,
    pub max_page_chars: usize,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sites: config.sites.clone(),
            delay: config.fetch.delay,
            max_page_chars: config.fetch.max_page_chars,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub items_saved: usize,
    pub items_failed: usize,
}

#[derive(Debug)]
pub enum CrawlStart {
    /// A run was launched; the handle resolves when it has finished.
    Started(JoinHandle<CrawlReport>),
    AlreadyRunning,
}

impl CrawlStart {
    pub fn started(&self) -> bool {
        matches!(self, CrawlStart::Started(_))
    }
}

pub struct CrawlOrchestrator {
    flight: SingleFlight,
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn PageFetcher>,
    extraction: ExtractionClient,
    status: StatusTracker,
    settings: CrawlSettings,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn PageFetcher>,
        extraction: ExtractionClient,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            flight: SingleFlight::new(),
            status: StatusTracker::new(Arc::clone(&store)),
            store,
            fetcher,
            extraction,
            settings,
        }
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_busy()
    }

    /// Launch a crawl unless one is already in flight.
    ///
    /// Errors during setup (clearing the previous results) are returned to the
    /// caller and leave the gate open again.
    pub async fn start_crawl(&self) -> Result<CrawlStart> {
        let Some(guard) = self.flight.try_acquire() else {
            info!("crawl requested while another is running");
            return Ok(CrawlStart::AlreadyRunning);
        };

        self.store.clear_food_items().await?;
        self.status.mark_pending(FOOD_CRAWL).await?;

        let run = CrawlRun {
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            extraction: self.extraction.clone(),
            status: self.status.clone(),
            settings: self.settings.clone(),
        };

        info!(sites = self.settings.sites.len(), "crawl started");
        let handle = tokio::spawn(run.execute(guard));
        Ok(CrawlStart::Started(handle))
    }
}

struct CrawlRun {
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn PageFetcher>,
    extraction: ExtractionClient,
    status: StatusTracker,
    settings: CrawlSettings,
}

impl CrawlRun {
    async fn execute(self, guard: FlightGuard) -> CrawlReport {
        let status = self.status.clone();

        // The run gets its own task so a panic in it still reaches the finalize step.
        let report = match tokio::spawn(async move { self.crawl_sites().await }).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "crawl task failed");
                CrawlReport::default()
            }
        };

        if let Err(e) = status.mark_done(FOOD_CRAWL).await {
            error!(error = %e, "failed to record crawl completion");
        }
        info!(
            pages_fetched = report.pages_fetched,
            pages_failed = report.pages_failed,
            items_saved = report.items_saved,
            items_failed = report.items_failed,
            "crawl finished"
        );

        drop(guard);
        report
    }

    async fn crawl_sites(&self) -> CrawlReport {
        let mut report = CrawlReport::default();

        let pages = fetch_all(
            self.fetcher.as_ref(),
            self.settings.sites.clone(),
            self.settings.delay,
        );
        futures::pin_mut!(pages);

        while let Some(page) = pages.next().await {
            let html = match page.body {
                Ok(html) => html,
                Err(_) => {
                    report.pages_failed += 1;
                    continue;
                }
            };
            report.pages_fetched += 1;

            let text = extract_body_text(&html).unwrap_or_else(|| format_text(&html));
            let text = truncate_chars(&text, self.settings.max_page_chars);
            if text.is_empty() {
                debug!(url = %page.url, "page has no visible text");
                continue;
            }

            let items = self.extraction.extract_food_items(&page.url, text).await;
            for item in &items {
                match self.store.insert_food_item(item).await {
                    Ok(()) => report.items_saved += 1,
                    Err(e) => {
                        warn!(url = %page.url, item = %item.name, error = %e, "failed to save item");
                        report.items_failed += 1;
                    }
                }
            }
            info!(url = %page.url, items = items.len(), "page processed");
        }

        report
    }
}
