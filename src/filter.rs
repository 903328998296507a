//! Topic relevance filter for upstream article lists
//!
//! [`filter`] is a pure function: it never mutates its input and always
//! returns the same articles in the same order for the same criteria.

use std::collections::HashSet;

use crate::data::news::TOPIC_KEYWORDS;
use crate::data::Article;

/// Phrases that mark promotional content
const DEFAULT_EXCLUDE_PHRASES: &[&str] = &["sponsored content", "press release", "giveaway"];

/// What makes an article relevant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    /// At least one must appear in the title or description (case-insensitive).
    /// Empty means every article matches.
    pub keywords: Vec<String>,
    /// If non-empty, the article host must equal or be a subdomain of one of these
    pub allowed_domains: Vec<String>,
    /// Articles whose title or description contain any of these are dropped
    pub exclude_phrases: Vec<String>,
}

impl FilterCriteria {
    /// Criteria matching any of `keywords`
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_lowercase()).collect(),
            ..Self::default()
        }
    }

    /// Criteria for the gateway's topic domain
    pub fn topic() -> Self {
        Self::new(TOPIC_KEYWORDS).with_excluded_phrases(DEFAULT_EXCLUDE_PHRASES)
    }

    /// Restricts articles to the given domains
    pub fn with_allowed_domains<S: AsRef<str>>(mut self, domains: &[S]) -> Self {
        self.allowed_domains = domains
            .iter()
            .map(|d| d.as_ref().trim_start_matches("www.").to_lowercase())
            .collect();
        self
    }

    /// Drops articles mentioning any of the given phrases
    pub fn with_excluded_phrases<S: AsRef<str>>(mut self, phrases: &[S]) -> Self {
        self.exclude_phrases = phrases.iter().map(|p| p.as_ref().to_lowercase()).collect();
        self
    }

    fn matches(&self, article: &Article) -> bool {
        let text = format!(
            "{} {}",
            article.title,
            article.description.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        let keyword_hit = self.keywords.is_empty()
            || self
                .keywords
                .iter()
                .any(|keyword| text.contains(&keyword.to_lowercase()));
        let excluded = self
            .exclude_phrases
            .iter()
            .any(|phrase| text.contains(&phrase.to_lowercase()));

        keyword_hit && !excluded && self.domain_allowed(&article.url)
    }

    fn domain_allowed(&self, url: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = host_of(url) else {
            return false;
        };
        self.allowed_domains.iter().any(|domain| {
            let domain = domain.to_lowercase();
            host == domain || host.ends_with(&format!(".{}", domain))
        })
    }
}

/// Keeps the articles matching `criteria`, first occurrence of each URL only
pub fn filter(items: &[Article], criteria: &FilterCriteria) -> Vec<Article> {
    let mut seen: HashSet<&str> = HashSet::new();
    items
        .iter()
        .filter(|article| criteria.matches(article))
        .filter(|article| seen.insert(article.url.as_str()))
        .cloned()
        .collect()
}

/// Lower-cased host of an http(s) URL
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host_port.split(':').next()?.to_lowercase();
    (!host.is_empty()).then_some(host)
}
