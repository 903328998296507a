//! Core data models for the gateway
//!
//! This module contains the typed records served to callers and the clients
//! for the two upstream APIs (generative text and news).

pub mod generation;
pub mod news;

pub use generation::{GenerationClient, GenerationEndpoint, GenerationError, GenerationReply};
pub use news::{NewsClient, NewsEndpoint, NewsError};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news article after conversion from the upstream schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Headline
    pub title: String,
    /// Short summary, if the upstream provided one
    pub description: Option<String>,
    /// Canonical link to the article
    pub url: String,
    /// Publisher name
    pub source_name: Option<String>,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Lead image
    pub image_url: Option<String>,
}

/// Where the data in a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Fresh upstream data that passed the content filter
    LiveFiltered,
    /// Primary cache tier
    ApiCache,
    /// Mirrored cache tier
    PublicCache,
    /// Nothing could be served
    #[serde(rename = "none")]
    NoData,
}

impl Provenance {
    /// Wire representation, also used for the `X-Data-Source` header
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::LiveFiltered => "live-filtered",
            Provenance::ApiCache => "api-cache",
            Provenance::PublicCache => "public-cache",
            Provenance::NoData => "none",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
