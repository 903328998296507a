//! News-aggregation API client
//!
//! Fetches recent articles for the topic keywords and converts them into
//! [`Article`] records. The keyword query is a boolean OR of quoted terms; when
//! it would exceed the upstream's query length limit a compact keyword set is
//! used instead.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::Article;
use crate::upstream::{ApiKey, Method, UpstreamClient, UpstreamFailure, UpstreamRequest};

/// Base URL for the news API
pub const DEFAULT_NEWS_URL: &str = "https://newsapi.org";

/// Longest query string the upstream accepts
pub const MAX_QUERY_CHARS: usize = 500;

/// Articles requested per call
const PAGE_SIZE: u32 = 50;

/// Upstream name used in logs and errors
const UPSTREAM_NAME: &str = "news";

/// Title the upstream substitutes for withdrawn articles
const REMOVED_MARKER: &str = "[Removed]";

/// Keywords describing the topic domain of the feed
pub const TOPIC_KEYWORDS: &[&str] = &[
    "blockchain",
    "cryptocurrency",
    "bitcoin",
    "ethereum",
    "web3",
    "defi",
    "decentralized finance",
    "stablecoin",
    "smart contract",
    "crypto exchange",
    "crypto regulation",
    "digital assets",
    "tokenization",
    "central bank digital currency",
    "distributed ledger",
    "crypto mining",
    "layer 2",
    "nft",
];

/// Keywords used when the full query is too long
pub const COMPACT_KEYWORDS: &[&str] = &["blockchain", "cryptocurrency", "bitcoin", "ethereum"];

/// Errors that can occur when fetching news
#[derive(Debug, Error)]
pub enum NewsError {
    /// Retries were exhausted
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),

    /// The body was not JSON or matched no known envelope
    #[error("news upstream returned an unreadable body: {0}")]
    Unreadable(#[from] serde_json::Error),

    /// The upstream answered with `status: "error"`
    #[error("news upstream error {code}: {message}")]
    Rejected { code: String, message: String },
}

/// Builds a boolean OR query from keywords
///
/// Each keyword is quoted. If the result is longer than [`MAX_QUERY_CHARS`],
/// the query is built from `compact` instead.
pub fn build_query<S: AsRef<str>>(keywords: &[S], compact: &[S]) -> String {
    let full = or_query(keywords);
    if full.chars().count() <= MAX_QUERY_CHARS {
        full
    } else {
        debug!(len = full.len(), "keyword query too long, using compact set");
        or_query(compact)
    }
}

fn or_query<S: AsRef<str>>(keywords: &[S]) -> String {
    keywords
        .iter()
        .map(|keyword| format!("\"{}\"", keyword.as_ref()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Location, credentials and query of the news API
#[derive(Debug, Clone)]
pub struct NewsEndpoint {
    base_url: String,
    api_key: ApiKey,
    keywords: Vec<String>,
    compact_keywords: Vec<String>,
    page_size: u32,
}

impl NewsEndpoint {
    /// Creates an endpoint querying [`TOPIC_KEYWORDS`]
    pub fn new(base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            keywords: TOPIC_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            compact_keywords: COMPACT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            page_size: PAGE_SIZE,
        }
    }

    /// Builds the upstream request
    pub fn request(&self) -> UpstreamRequest {
        let url = format!("{}/v2/everything", self.base_url.trim_end_matches('/'));

        UpstreamRequest {
            upstream: UPSTREAM_NAME,
            method: Method::Get,
            url,
            query: vec![
                (
                    "q".to_string(),
                    build_query(&self.keywords, &self.compact_keywords),
                ),
                ("sortBy".to_string(), "publishedAt".to_string()),
                ("pageSize".to_string(), self.page_size.to_string()),
                ("language".to_string(), "en".to_string()),
            ],
            credential: Some(("apiKey", self.api_key.clone())),
            body: None,
        }
    }
}

/// Known shapes of a news response body, tagged by `status`
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum NewsEnvelope {
    Ok {
        #[serde(default)]
        articles: Vec<RawArticle>,
    },
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    source: Option<RawSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
}

impl RawArticle {
    /// Converts to an [`Article`], dropping withdrawn or incomplete entries
    fn into_article(self) -> Option<Article> {
        let title = self.title.filter(|t| !t.trim().is_empty() && t != REMOVED_MARKER)?;
        let url = self.url.filter(|u| !u.trim().is_empty())?;
        let published_at = self.published_at.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Some(Article {
            title,
            description: self.description.filter(|d| d != REMOVED_MARKER),
            url,
            source_name: self
                .source
                .and_then(|s| s.name)
                .filter(|n| n != REMOVED_MARKER),
            published_at,
            image_url: self.url_to_image,
        })
    }
}

/// Parses a news response body into articles
pub fn parse_articles(body: &str) -> Result<Vec<Article>, NewsError> {
    match serde_json::from_str::<NewsEnvelope>(body)? {
        NewsEnvelope::Ok { articles } => {
            let total = articles.len();
            let articles: Vec<Article> = articles
                .into_iter()
                .filter_map(RawArticle::into_article)
                .collect();
            if articles.len() < total {
                debug!(
                    dropped = total - articles.len(),
                    "dropped withdrawn or incomplete articles"
                );
            }
            Ok(articles)
        }
        NewsEnvelope::Error { code, message } => Err(NewsError::Rejected {
            code: code.unwrap_or_else(|| "unknown".to_string()),
            message: message.unwrap_or_default(),
        }),
    }
}

/// Client for the news API
#[derive(Debug, Clone)]
pub struct NewsClient {
    upstream: UpstreamClient,
    endpoint: NewsEndpoint,
}

impl NewsClient {
    pub fn new(upstream: UpstreamClient, endpoint: NewsEndpoint) -> Self {
        Self { upstream, endpoint }
    }

    /// Fetches the latest articles for the topic keywords
    ///
    /// # Returns
    /// * `Ok(Vec<Article>)` - articles in upstream order (unfiltered)
    /// * `Err(NewsError)` - retries exhausted; a body that is unreadable or reports
    ///   an error uses up an attempt
    pub async fn fetch_articles(&self) -> Result<Vec<Article>, NewsError> {
        let request = self.endpoint.request();
        let articles = self.upstream.fetch_parsed(&request, parse_articles).await?;
        Ok(articles)
    }
}
