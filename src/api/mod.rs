//! HTTP surface of the gateway
//!
//! Routes:
//! - `POST /api/generate` - prompt in, sanitized insights out
//! - `GET /api/news` - filtered article feed with cache fallback
//! - `GET /health` - liveness and uptime

mod generate;
mod health;
mod news;

pub use generate::{generate_insights, GenerateRequest, GenerateResponse};
pub use health::{health_check, HealthResponse};
pub use news::{get_news, NewsResponse, DATA_SOURCE_HEADER, DATA_TIMESTAMP_HEADER, NEWS_CACHE_KEY};

use std::fmt;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::cache::{CacheStore, CacheTier, CacheWriter};
use crate::cli::GatewayConfig;
use crate::data::{
    GenerationClient, GenerationEndpoint, NewsClient, NewsEndpoint, Provenance,
};
use crate::fallback::FallbackResolver;
use crate::filter::FilterCriteria;
use crate::upstream::{HttpTransport, UpstreamClient};

/// Application state shared across handlers
///
/// Holds no per-request data; the only state shared between requests is what
/// the cache tiers keep on disk.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Generative-text client, absent when no API key is configured
    pub generation: Option<GenerationClient>,
    /// News client, absent when no API key is configured
    pub news: Option<NewsClient>,
    /// Relevance criteria applied to live news
    pub criteria: Arc<FilterCriteria>,
    /// Background writer for the news cache tiers
    pub writer: CacheWriter,
    /// Reader for the same tiers, used when the upstream fails
    pub resolver: FallbackResolver,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Builds the state from configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        let upstream = UpstreamClient::new(transport, config.retry_policy);

        let generation = match &config.generation_api_key {
            Some(key) => Some(GenerationClient::new(
                upstream.clone(),
                GenerationEndpoint::new(&config.generation_url, key.clone())
                    .with_model(&config.generation_model),
            )),
            None => {
                warn!("no generation API key configured; /api/generate will fail");
                None
            }
        };

        let news = match &config.news_api_key {
            Some(key) => Some(NewsClient::new(
                upstream,
                NewsEndpoint::new(&config.news_url, key.clone()),
            )),
            None => {
                warn!("no news API key configured; /api/news will serve cached data only");
                None
            }
        };

        let tiers = vec![
            CacheTier::new(
                Provenance::ApiCache,
                CacheStore::with_dir(config.primary_cache_dir.clone()),
            ),
            CacheTier::new(
                Provenance::PublicCache,
                CacheStore::with_dir(config.mirror_cache_dir.clone()),
            ),
        ];

        Ok(Self {
            generation,
            news,
            criteria: Arc::new(FilterCriteria::topic()),
            writer: CacheWriter::new(tiers.clone()),
            resolver: FallbackResolver::new(tiers),
            startup_time: Utc::now(),
        })
    }
}

/// Stage of an inbound request, logged as it progresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetching,
    Filtering,
    Responding,
    Fallback,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Fetching => "fetching",
            Phase::Filtering => "filtering",
            Phase::Responding => "responding",
            Phase::Fallback => "fallback",
            Phase::Failed => "failed",
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate_insights))
        .route("/api/news", get(get_news))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
