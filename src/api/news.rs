//! News endpoint with cache fallback
//!
//! Live path: fetch, filter, persist in the background, respond. Failure path:
//! consult the cache tiers in order and respond with the first record found,
//! or with the upstream error when every tier is empty.

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{AppState, Phase};
use crate::cache::CacheRecord;
use crate::data::{Article, Provenance};
use crate::error::ApiError;
use crate::fallback::Resolved;
use crate::filter::filter;

/// Cache key of the news feed snapshot
pub const NEWS_CACHE_KEY: &str = "news-feed";

/// Header naming the source of the served data
pub const DATA_SOURCE_HEADER: &str = "x-data-source";

/// Header carrying the capture time of the served data (RFC 3339)
pub const DATA_TIMESTAMP_HEADER: &str = "x-data-timestamp";

/// Response body for `GET /api/news`
#[derive(Debug, Serialize)]
pub struct NewsResponse {
    pub articles: Vec<Article>,
    pub source: Provenance,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/news
pub async fn get_news(State(state): State<AppState>) -> Response {
    debug!(phase = %Phase::Fetching, "fetching news");

    let failure = match &state.news {
        Some(client) => match client.fetch_articles().await {
            Ok(articles) => return serve_live(&state, articles),
            Err(e) => ApiError::from(e),
        },
        None => ApiError::NotConfigured("news"),
    };

    debug!(phase = %Phase::Fallback, error = %failure, "news upstream unavailable");
    let resolver = state.resolver.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        resolver.resolve::<Vec<Article>>(NEWS_CACHE_KEY)
    })
    .await
    .unwrap_or_else(|e| {
        warn!(error = %e, "cache lookup task failed");
        None
    });

    match resolved {
        Some(Resolved {
            payload,
            provenance,
            as_of,
        }) => {
            debug!(phase = %Phase::Responding, source = %provenance);
            respond(payload, provenance, as_of)
        }
        None => {
            debug!(phase = %Phase::Failed);
            warn!(error = %failure, "no news available from upstream or cache");
            let mut response = failure.into_response();
            set_header(&mut response, DATA_SOURCE_HEADER, Provenance::NoData.as_str());
            response
        }
    }
}

fn serve_live(state: &AppState, articles: Vec<Article>) -> Response {
    debug!(phase = %Phase::Filtering, received = articles.len());
    let filtered = filter(&articles, &state.criteria);
    info!(
        received = articles.len(),
        kept = filtered.len(),
        "serving live news"
    );

    let record = CacheRecord::new(filtered);
    let timestamp = record.timestamp;
    let articles = record.data.clone();
    // Persistence completes on its own; failures are logged by the writer
    drop(state.writer.submit(NEWS_CACHE_KEY, record));

    debug!(phase = %Phase::Responding, source = %Provenance::LiveFiltered);
    respond(articles, Provenance::LiveFiltered, timestamp)
}

fn respond(articles: Vec<Article>, source: Provenance, timestamp: DateTime<Utc>) -> Response {
    let mut response = Json(NewsResponse {
        articles,
        source,
        timestamp,
    })
    .into_response();
    set_header(&mut response, DATA_SOURCE_HEADER, source.as_str());
    set_header(&mut response, DATA_TIMESTAMP_HEADER, &timestamp.to_rfc3339());
    response
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
        Err(e) => warn!(header = name, error = %e, "invalid header value"),
    }
}
