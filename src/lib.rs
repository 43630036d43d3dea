pub mod analysis;
pub mod api;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extraction;
pub mod flight;
pub mod llm;
pub mod models;
pub mod scraper;
pub mod status;
pub mod store;

use std::sync::Arc;

use crate::analysis::MediaAnalyzer;
use crate::config::{Config, StoreConfig};
use crate::crawler::{CrawlOrchestrator, CrawlSettings};
use crate::extraction::ExtractionClient;
use crate::llm::{Extractor, GeminiClient};
use crate::scraper::{HttpFetcher, PageFetcher};
use crate::status::StatusTracker;
use crate::store::{ContentStore, MemoryContentStore, PgContentStore};

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ContentStore>,
    pub crawler: Arc<CrawlOrchestrator>,
    pub analyzer: Arc<MediaAnalyzer>,
    pub status: StatusTracker,
}

impl AppState {
    /// Wire the services around already-built collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Option<Arc<dyn Extractor>>,
    ) -> Self {
        let extraction = ExtractionClient::new(extractor);
        let crawler = CrawlOrchestrator::new(
            Arc::clone(&store),
            fetcher,
            extraction.clone(),
            CrawlSettings::from_config(&config),
        );
        let analyzer = MediaAnalyzer::new(extraction, Arc::clone(&store), config.key_policy);

        Self {
            status: StatusTracker::new(Arc::clone(&store)),
            crawler: Arc::new(crawler),
            analyzer: Arc::new(analyzer),
            store,
            config: Arc::new(config),
        }
    }

    /// Build the production collaborators described by `config`.
    pub async fn from_config(config: Config) -> error::Result<Self> {
        let store: Arc<dyn ContentStore> = match &config.store {
            StoreConfig::Postgres { database_url } => Arc::new(PgContentStore::connect(database_url).await?),
            StoreConfig::Memory => {
                tracing::warn!("using in-memory store, results are lost on restart");
                Arc::new(MemoryContentStore::new())
            }
        };

        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);

        let extractor: Option<Arc<dyn Extractor>> = match GeminiClient::from_config(&config.gemini) {
            Some(client) => Some(Arc::new(client)),
            None => {
                tracing::warn!("GEMINI_API_KEY is not set, extraction is disabled");
                None
            }
        };

        Ok(Self::new(config, store, fetcher, extractor))
    }
}
